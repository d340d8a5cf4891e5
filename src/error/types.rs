//! # 错误类型定义

use axum::http::StatusCode;
use thiserror::Error;

use super::ErrorCategory;

/// 应用主要错误类型
#[derive(Debug, Error)]
pub enum ProxyError {
    /// 配置相关错误
    #[error("配置错误: {message}")]
    Config {
        /// 错误描述
        message: String,
        /// 底层错误
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 未注册的应用 key
    #[error("未知的应用key: {app_key}")]
    UnknownKey {
        /// 请求中的应用 key
        app_key: String,
    },

    /// Referer 校验失败
    #[error("访问被拒绝: {message}")]
    AccessDenied {
        /// 错误描述
        message: String,
    },

    /// 客户端提供的转发地址不在允许列表内
    #[error("转发目标不被允许: {target}")]
    TargetNotAllowed {
        /// 客户端提供的地址
        target: String,
        /// 拒绝原因
        reason: String,
    },

    /// 上游不可用：非200、超时、响应过大或 JSON 格式错误
    #[error("上游服务不可用: {message}")]
    UpstreamUnavailable {
        /// 错误描述
        message: String,
        /// 底层错误
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 上游返回了格式正确但 msg 不是 "OK" 的结果
    #[error("上游拒绝请求: {message}")]
    UpstreamRejected {
        /// 错误描述
        message: String,
    },

    /// 序列化/反序列化错误
    #[error("序列化错误: {message}")]
    Serialization {
        /// 错误描述
        message: String,
        /// 底层错误
        #[source]
        source: anyhow::Error,
    },

    /// IO相关错误
    #[error("IO错误: {message}")]
    Io {
        /// 错误描述
        message: String,
        /// 底层错误
        #[source]
        source: std::io::Error,
    },

    /// 服务器启动错误
    #[error("服务器启动错误: {message}")]
    ServerStart {
        /// 错误描述
        message: String,
        /// 底层错误
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 带上下文的错误
    #[error("{context}: {source}")]
    Context {
        /// 上下文描述
        context: String,
        /// 底层错误
        #[source]
        source: Box<ProxyError>,
    },
}

impl ProxyError {
    /// 将错误转换为HTTP状态码和错误代码
    #[must_use]
    pub fn to_http_response_parts(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Config { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
            Self::UnknownKey { .. } => (StatusCode::UNAUTHORIZED, "UNKNOWN_KEY"),
            Self::AccessDenied { .. } => (StatusCode::FORBIDDEN, "ACCESS_DENIED"),
            Self::TargetNotAllowed { .. } => (StatusCode::FORBIDDEN, "TARGET_NOT_ALLOWED"),
            Self::UpstreamUnavailable { .. } => (StatusCode::BAD_GATEWAY, "UPSTREAM_UNAVAILABLE"),
            Self::UpstreamRejected { .. } => (StatusCode::BAD_GATEWAY, "UPSTREAM_REJECTED"),
            Self::Serialization { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "SERIALIZATION_ERROR"),
            Self::Io { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
            Self::ServerStart { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "SERVER_START_ERROR"),
            Self::Context { source, .. } => source.to_http_response_parts(),
        }
    }

    /// 错误归类，用于日志级别选择
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        if self.to_http_response_parts().0.is_client_error() {
            ErrorCategory::Client
        } else {
            ErrorCategory::Server
        }
    }

    /// 去掉上下文包装后的根错误
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// 创建配置错误
    pub fn config<T: Into<String>>(message: T) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// 创建带来源的配置错误
    pub fn config_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// 创建未知应用key错误
    pub fn unknown_key<T: Into<String>>(app_key: T) -> Self {
        Self::UnknownKey {
            app_key: app_key.into(),
        }
    }

    /// 创建访问拒绝错误
    pub fn access_denied<T: Into<String>>(message: T) -> Self {
        Self::AccessDenied {
            message: message.into(),
        }
    }

    /// 创建转发目标拒绝错误
    pub fn target_not_allowed<T: Into<String>, R: Into<String>>(target: T, reason: R) -> Self {
        Self::TargetNotAllowed {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// 创建上游不可用错误
    pub fn upstream_unavailable<T: Into<String>>(message: T) -> Self {
        Self::UpstreamUnavailable {
            message: message.into(),
            source: None,
        }
    }

    /// 创建带来源的上游不可用错误
    pub fn upstream_unavailable_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::UpstreamUnavailable {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// 创建上游拒绝错误
    pub fn upstream_rejected<T: Into<String>>(message: T) -> Self {
        Self::UpstreamRejected {
            message: message.into(),
        }
    }

    /// 创建服务器启动错误
    pub fn server_start_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::ServerStart {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

impl From<std::io::Error> for ProxyError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<toml::de::Error> for ProxyError {
    fn from(err: toml::de::Error) -> Self {
        Self::config_with_source("TOML解析失败", err)
    }
}

impl From<serde_json::Error> for ProxyError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
            source: err.into(),
        }
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            "上游请求超时".to_string()
        } else if err.is_connect() {
            "无法连接上游服务".to_string()
        } else if err.is_decode() {
            "上游响应解析失败".to_string()
        } else {
            "上游请求失败".to_string()
        };
        Self::upstream_unavailable_with_source(message, err)
    }
}
