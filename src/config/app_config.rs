//! # 应用配置结构定义

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 默认上游 token 接口
pub const DEFAULT_TOKEN_ENDPOINT: &str = "https://api.euphonyqr.com/api/token/v1";
/// 上游响应体最大字节数
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024;
/// 小程序平台的固定包标识
pub const DEFAULT_WX_PACKAGE: &str = "wx70bcdd12873c3cb1";

/// 应用主配置结构
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 监听配置
    pub server: ServerConfig,
    /// 上游服务配置
    pub upstream: UpstreamConfig,
    /// 检测转发配置
    pub detect: DetectConfig,
    /// 注册的应用凭据
    pub credentials: Vec<CredentialConfig>,
}

/// 服务器配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 监听地址
    pub host: String,
    /// 监听端口
    pub port: u16,
    /// 客户端 token 接口路径
    pub token_path: String,
    /// 客户端检测转发接口路径
    pub detect_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            token_path: "/wx/token".to_string(),
            detect_path: "/wx/detect".to_string(),
        }
    }
}

/// 刷新锁粒度
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshLockMode {
    /// 所有 key 共用一把锁
    #[default]
    Global,
    /// 每个 key 一把锁，按需创建
    PerKey,
}

impl std::str::FromStr for RefreshLockMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "global" => Ok(Self::Global),
            "per_key" | "perkey" | "per-key" => Ok(Self::PerKey),
            other => Err(format!("未知的刷新锁模式: {other}")),
        }
    }
}

/// 上游服务配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// token 接口地址
    pub token_endpoint: String,
    /// 建立连接超时（秒）
    pub connect_timeout_secs: u64,
    /// 等待响应头超时（秒）
    pub response_header_timeout_secs: u64,
    /// 整体请求超时（秒）
    pub request_timeout_secs: u64,
    /// 响应体最大字节数，超出视为失败
    pub max_body_bytes: usize,
    /// 每个主机保留的空闲连接数
    pub max_idle_per_host: usize,
    /// 刷新锁粒度
    pub refresh_lock: RefreshLockMode,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            token_endpoint: DEFAULT_TOKEN_ENDPOINT.to_string(),
            connect_timeout_secs: 10,
            response_header_timeout_secs: 5,
            request_timeout_secs: 15,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            max_idle_per_host: 10,
            refresh_lock: RefreshLockMode::Global,
        }
    }
}

impl UpstreamConfig {
    /// 建立连接超时
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// 响应头超时
    #[must_use]
    pub const fn response_header_timeout(&self) -> Duration {
        Duration::from_secs(self.response_header_timeout_secs)
    }

    /// 整体请求超时
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// 检测转发配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectConfig {
    /// 上报给上游的应用名
    pub app_name: String,
    /// iOS bundle id
    pub ios_bundle_id: String,
    /// Android 包名
    pub android_package: String,
    /// 小程序平台使用的包标识
    pub wx_app_id: String,
    /// 允许转发的目标主机；为空时不限制
    ///
    /// 以 `.` 开头的条目匹配该域名及其子域名。
    pub allowed_hosts: Vec<String>,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            app_name: "demo_app".to_string(),
            ios_bundle_id: String::new(),
            android_package: String::new(),
            wx_app_id: DEFAULT_WX_PACKAGE.to_string(),
            allowed_hosts: Vec::new(),
        }
    }
}

/// 单个应用的凭据配置
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialConfig {
    /// 应用 key
    pub app_key: String,
    /// 应用密钥
    pub secret: String,
    /// 是否使用沙箱环境
    #[serde(default = "default_sandbox")]
    pub sandbox: bool,
    /// 小程序 APPID
    #[serde(default)]
    pub wx_app_id: String,
    /// 是否校验 Referer
    #[serde(default)]
    pub check_referer: bool,
    /// Referer 前缀；缺省由 `wx_app_id` 推导
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referer_prefix: Option<String>,
}

const fn default_sandbox() -> bool {
    true
}

impl CredentialConfig {
    /// 创建凭据配置
    pub fn new(app_key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            app_key: app_key.into(),
            secret: secret.into(),
            sandbox: true,
            wx_app_id: String::new(),
            check_referer: false,
            referer_prefix: None,
        }
    }

    /// 实际使用的 Referer 前缀
    #[must_use]
    pub fn effective_referer_prefix(&self) -> String {
        self.referer_prefix
            .clone()
            .unwrap_or_else(|| format!("https://servicewechat.com/{}/", self.wx_app_id))
    }
}

impl std::fmt::Debug for CredentialConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialConfig")
            .field("app_key", &self.app_key)
            .field("secret", &"***")
            .field("sandbox", &self.sandbox)
            .field("wx_app_id", &self.wx_app_id)
            .field("check_referer", &self.check_referer)
            .field("referer_prefix", &self.referer_prefix)
            .finish()
    }
}

impl AppConfig {
    /// 验证配置的有效性
    pub fn validate(&self) -> crate::error::Result<()> {
        crate::ensure_config!(self.server.port > 0, "无效的服务器端口: {}", self.server.port);
        crate::ensure_config!(
            self.server.token_path.starts_with('/'),
            "token_path 必须以 / 开头: {}",
            self.server.token_path
        );
        crate::ensure_config!(
            self.server.detect_path.starts_with('/'),
            "detect_path 必须以 / 开头: {}",
            self.server.detect_path
        );
        crate::ensure_config!(
            self.server.token_path != self.server.detect_path,
            "token_path 与 detect_path 不能相同"
        );

        let endpoint = url::Url::parse(&self.upstream.token_endpoint).map_err(|e| {
            crate::error::ProxyError::config_with_source(
                format!("无效的 token_endpoint: {}", self.upstream.token_endpoint),
                e,
            )
        })?;
        crate::ensure_config!(
            matches!(endpoint.scheme(), "http" | "https"),
            "token_endpoint 必须是 http(s) 地址"
        );
        crate::ensure_config!(
            self.upstream.connect_timeout_secs > 0
                && self.upstream.response_header_timeout_secs > 0
                && self.upstream.request_timeout_secs > 0,
            "上游超时时间必须大于0"
        );
        crate::ensure_config!(self.upstream.max_body_bytes > 0, "max_body_bytes 必须大于0");

        crate::ensure_config!(!self.credentials.is_empty(), "至少需要配置一个应用凭据");
        for credential in &self.credentials {
            crate::ensure_config!(!credential.app_key.is_empty(), "app_key 不能为空");
            crate::ensure_config!(
                !credential.secret.is_empty(),
                "app_key {} 的 secret 不能为空",
                credential.app_key
            );
        }

        Ok(())
    }

    /// 重复出现的 app_key
    #[must_use]
    pub fn duplicate_app_keys(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut duplicates = Vec::new();
        for credential in &self.credentials {
            if !seen.insert(credential.app_key.as_str()) && !duplicates.contains(&credential.app_key) {
                duplicates.push(credential.app_key.clone());
            }
        }
        duplicates
    }

    /// 监听地址
    #[must_use]
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
