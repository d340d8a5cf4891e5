//! # 凭据记录
//!
//! 应用 key 与密钥、沙箱标志、缓存 token 以及访问控制元数据的绑定

use std::fmt;

use crate::config::CredentialConfig;

/// 上游刷新失败时 token 的哨兵值
pub const FAILED_TOKEN_SENTINEL: &str = "no";

/// 缓存 token 的状态
#[derive(Clone, PartialEq, Eq, Default)]
pub enum TokenState {
    /// 从未获取
    #[default]
    Empty,
    /// 最近一次刷新失败
    Failed,
    /// 可用的 token
    Valid(String),
}

impl TokenState {
    /// 从上游返回的原始字符串解析
    ///
    /// 空串视为未获取，`"no"` 视为失败。
    #[must_use]
    pub fn from_raw(raw: &str) -> Self {
        match raw {
            "" => Self::Empty,
            FAILED_TOKEN_SENTINEL => Self::Failed,
            token => Self::Valid(token.to_string()),
        }
    }

    /// 是否为可直接返回给客户端的 token
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    /// 可用的 token 值
    #[must_use]
    pub fn as_valid(&self) -> Option<&str> {
        match self {
            Self::Valid(token) => Some(token),
            Self::Empty | Self::Failed => None,
        }
    }

    /// 原始字符串表示（`""` / `"no"` / token）
    #[must_use]
    pub fn as_raw(&self) -> &str {
        match self {
            Self::Empty => "",
            Self::Failed => FAILED_TOKEN_SENTINEL,
            Self::Valid(token) => token,
        }
    }
}

impl fmt::Debug for TokenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Failed => f.write_str("Failed"),
            Self::Valid(token) => write!(f, "Valid(len={})", token.len()),
        }
    }
}

/// 单个应用的凭据记录
///
/// 除 token 外均不可变；token 只通过 [`CredentialRecord::with_token`] 生成新记录替换。
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    app_key: String,
    secret: String,
    sandbox: bool,
    wx_app_id: String,
    referer_prefix: String,
    check_referer: bool,
    token: TokenState,
    generation: u64,
}

impl CredentialRecord {
    /// 创建尚未获取 token 的记录
    pub fn new(app_key: impl Into<String>, secret: impl Into<String>, sandbox: bool) -> Self {
        Self {
            app_key: app_key.into(),
            secret: secret.into(),
            sandbox,
            wx_app_id: String::new(),
            referer_prefix: String::new(),
            check_referer: false,
            token: TokenState::Empty,
            generation: 0,
        }
    }

    /// 设置 Referer 校验
    #[must_use]
    pub fn with_referer_check(
        mut self,
        wx_app_id: impl Into<String>,
        referer_prefix: impl Into<String>,
        check_referer: bool,
    ) -> Self {
        self.wx_app_id = wx_app_id.into();
        self.referer_prefix = referer_prefix.into();
        self.check_referer = check_referer;
        self
    }

    /// 以新的 token 生成下一代记录
    #[must_use]
    pub fn with_token(&self, token: TokenState) -> Self {
        Self {
            token,
            generation: self.generation.wrapping_add(1),
            ..self.clone()
        }
    }

    /// 应用 key
    #[must_use]
    pub fn app_key(&self) -> &str {
        &self.app_key
    }

    /// 应用密钥，只用于发往上游的请求
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// 是否使用沙箱环境
    #[must_use]
    pub const fn sandbox(&self) -> bool {
        self.sandbox
    }

    /// 小程序 APPID
    #[must_use]
    pub fn wx_app_id(&self) -> &str {
        &self.wx_app_id
    }

    /// Referer 前缀
    #[must_use]
    pub fn referer_prefix(&self) -> &str {
        &self.referer_prefix
    }

    /// 是否校验 Referer
    #[must_use]
    pub const fn check_referer(&self) -> bool {
        self.check_referer
    }

    /// 当前缓存的 token
    #[must_use]
    pub const fn token(&self) -> &TokenState {
        &self.token
    }

    /// token 被刷新写回的次数
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }
}

impl From<&CredentialConfig> for CredentialRecord {
    fn from(config: &CredentialConfig) -> Self {
        Self::new(config.app_key.clone(), config.secret.clone(), config.sandbox).with_referer_check(
            config.wx_app_id.clone(),
            config.effective_referer_prefix(),
            config.check_referer,
        )
    }
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("app_key", &self.app_key)
            .field("secret", &"***")
            .field("sandbox", &self.sandbox)
            .field("wx_app_id", &self.wx_app_id)
            .field("referer_prefix", &self.referer_prefix)
            .field("check_referer", &self.check_referer)
            .field("token", &self.token)
            .field("generation", &self.generation)
            .finish()
    }
}
