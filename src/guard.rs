//! # 访问控制
//!
//! - Referer 前缀校验：限制某个应用 key 只能被指定的小程序使用
//! - 转发目标校验：限制检测请求只能发往允许的主机

use url::Url;

use crate::credential::CredentialRecord;
use crate::error::{ProxyError, Result};

/// Referer 是否允许使用该凭据
///
/// 未开启校验时总是允许。
#[must_use]
pub fn referer_allowed(record: &CredentialRecord, referer: &str) -> bool {
    !record.check_referer() || referer.starts_with(record.referer_prefix())
}

/// Referer 校验，失败返回 [`ProxyError::AccessDenied`]
pub fn check_referer(record: &CredentialRecord, referer: &str) -> Result<()> {
    if referer_allowed(record, referer) {
        Ok(())
    } else {
        Err(ProxyError::access_denied(format!(
            "referer not allowed for app_key {}",
            record.app_key()
        )))
    }
}

/// 检测转发目标的主机白名单
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetPolicy {
    allowed_hosts: Vec<String>,
}

impl TargetPolicy {
    /// 由配置的主机列表创建；列表为空表示不限制主机
    #[must_use]
    pub fn new(allowed_hosts: &[String]) -> Self {
        Self {
            allowed_hosts: allowed_hosts
                .iter()
                .map(|host| host.trim().to_ascii_lowercase())
                .filter(|host| !host.is_empty())
                .collect(),
        }
    }

    /// 是否不限制主机
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.allowed_hosts.is_empty()
    }

    /// 校验并解析转发目标
    pub fn check(&self, target: &str) -> Result<Url> {
        let url = Url::parse(target)
            .map_err(|e| ProxyError::target_not_allowed(target, format!("invalid url: {e}")))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ProxyError::target_not_allowed(
                target,
                format!("unsupported scheme {}", url.scheme()),
            ));
        }

        let host = url
            .host_str()
            .ok_or_else(|| ProxyError::target_not_allowed(target, "missing host"))?
            .to_ascii_lowercase();

        if self.is_open() || self.allowed_hosts.iter().any(|allowed| host_matches(allowed, &host)) {
            Ok(url)
        } else {
            Err(ProxyError::target_not_allowed(
                target,
                format!("host {host} is not in the allow-list"),
            ))
        }
    }
}

/// `.example.com` 匹配 `example.com` 及其子域名，其余条目需完全相等
fn host_matches(allowed: &str, host: &str) -> bool {
    allowed.strip_prefix('.').map_or_else(
        || allowed == host,
        |domain| host == domain || host.ends_with(allowed),
    )
}
