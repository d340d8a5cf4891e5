//! # 日志配置模块
//!
//! 初始化 `tracing` 订阅器，并提供带阶段/组件字段的结构化日志宏

use std::env;
use std::fmt;
use tracing_subscriber::{EnvFilter, fmt as fmt_layer, layer::SubscriberExt, util::SubscriberInitExt};

/// 请求处理阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStage {
    /// 进程启动
    Startup,
    /// 进程关闭
    Shutdown,
    /// 收到客户端请求
    RequestStart,
    /// Referer / 目标地址校验
    Authentication,
    /// Token 刷新
    TokenRefresh,
    /// 调用上游服务
    UpstreamRequest,
    /// 生成客户端响应
    Response,
}

impl LogStage {
    /// 日志字段使用的名称
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Shutdown => "shutdown",
            Self::RequestStart => "request_start",
            Self::Authentication => "authentication",
            Self::TokenRefresh => "token_refresh",
            Self::UpstreamRequest => "upstream_request",
            Self::Response => "response",
        }
    }
}

impl fmt::Display for LogStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 产生日志的组件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogComponent {
    /// 主程序
    Main,
    /// 配置加载
    Config,
    /// HTTP 服务器装配
    ServerSetup,
    /// 凭据存储
    CredentialStore,
    /// Token 刷新器
    TokenRefresher,
    /// 检测请求转发
    DetectionProxy,
    /// 访问控制
    AccessGuard,
    /// 上游 HTTP 客户端
    Upstream,
    /// 客户端请求处理器
    Handler,
}

impl LogComponent {
    /// 日志字段使用的名称
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Config => "config",
            Self::ServerSetup => "server_setup",
            Self::CredentialStore => "credential_store",
            Self::TokenRefresher => "token_refresher",
            Self::DetectionProxy => "detection_proxy",
            Self::AccessGuard => "access_guard",
            Self::Upstream => "upstream",
            Self::Handler => "handler",
        }
    }
}

impl fmt::Display for LogComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 结构化 info 日志
///
/// `linfo!(request_id, stage, component, operation, message, key = value, ...)`
#[macro_export]
macro_rules! linfo {
    ($request_id:expr, $stage:expr, $component:expr, $operation:expr, $message:expr $(, $($field:tt)+)?) => {
        ::tracing::info!(
            request_id = %$request_id,
            stage = %$stage,
            component = %$component,
            operation = %$operation,
            $($($field)+,)?
            "{}",
            $message
        )
    };
}

/// 结构化 warn 日志
#[macro_export]
macro_rules! lwarn {
    ($request_id:expr, $stage:expr, $component:expr, $operation:expr, $message:expr $(, $($field:tt)+)?) => {
        ::tracing::warn!(
            request_id = %$request_id,
            stage = %$stage,
            component = %$component,
            operation = %$operation,
            $($($field)+,)?
            "{}",
            $message
        )
    };
}

/// 结构化 error 日志
#[macro_export]
macro_rules! lerror {
    ($request_id:expr, $stage:expr, $component:expr, $operation:expr, $message:expr $(, $($field:tt)+)?) => {
        ::tracing::error!(
            request_id = %$request_id,
            stage = %$stage,
            component = %$component,
            operation = %$operation,
            $($($field)+,)?
            "{}",
            $message
        )
    };
}

/// 结构化 debug 日志
#[macro_export]
macro_rules! ldebug {
    ($request_id:expr, $stage:expr, $component:expr, $operation:expr, $message:expr $(, $($field:tt)+)?) => {
        ::tracing::debug!(
            request_id = %$request_id,
            stage = %$stage,
            component = %$component,
            operation = %$operation,
            $($($field)+,)?
            "{}",
            $message
        )
    };
}

/// 默认过滤规则
fn default_filter(level: &str) -> String {
    format!("{level},credential_proxy=debug,hyper=warn,reqwest=warn,tower_http=info")
}

/// 初始化日志系统
///
/// `RUST_LOG` 优先于传入的日志级别。重复调用时静默忽略。
pub fn init_logging(log_level: Option<&str>) {
    let level = log_level.unwrap_or("info");
    let filter = env::var("RUST_LOG").unwrap_or_else(|_| default_filter(level));

    let result = tracing_subscriber::registry()
        .with(EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new(default_filter("info"))))
        .with(
            fmt_layer::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .try_init();

    if result.is_ok() {
        tracing::debug!(filter = %filter, "logging initialised");
    }
}

/// 掩码敏感值，只保留长度信息
#[must_use]
pub fn mask_secret(value: &str) -> String {
    if value.is_empty() {
        String::new()
    } else {
        format!("***({})", value.chars().count())
    }
}

/// 环境变量设置指南
pub fn print_logging_help() {
    println!("📋 日志配置指南:");
    println!("  RUST_LOG=info                           # 标准日志级别");
    println!("  RUST_LOG=debug                          # 调试级别");
    println!("  RUST_LOG=info,credential_proxy=trace    # 应用详细追踪");
    println!("  RUST_LOG=info,reqwest=debug             # 上游 HTTP 客户端调试");
}
