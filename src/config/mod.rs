//! # 配置管理模块
//!
//! 处理应用配置加载、验证和管理

mod app_config;
mod manager;

pub use app_config::{
    AppConfig, CredentialConfig, DEFAULT_MAX_BODY_BYTES, DEFAULT_TOKEN_ENDPOINT,
    DEFAULT_WX_PACKAGE, DetectConfig, RefreshLockMode, ServerConfig, UpstreamConfig,
};
pub use manager::{ConfigManager, DEFAULT_CONFIG_PATH};
