//! # 配置管理器
//!
//! 加载 TOML 配置文件，并应用环境变量覆盖

use std::collections::BTreeMap;
use std::env;
use std::path::Path;

use super::{AppConfig, CredentialConfig};
use crate::error::{ProxyError, Result};
use crate::logging::{LogComponent, LogStage, mask_secret};
use crate::{ldebug, linfo, lwarn};

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config/credential-proxy.toml";

/// 兼容旧部署方式的单应用环境变量
const LEGACY_ENV_KEYS: [&str; 7] = [
    "PORT_HTTP",
    "WXURL",
    "APPKEY",
    "SECKEY",
    "SANDBOX",
    "WXAPPID",
    "CHECKWXAPPID",
];

/// 配置管理器
#[derive(Debug, Clone)]
pub struct ConfigManager {
    /// 当前配置
    config: AppConfig,
    /// 已应用的环境变量覆盖数量
    applied_overrides: usize,
}

impl ConfigManager {
    /// 按进程环境加载配置
    ///
    /// `path` 为显式指定的配置文件时，文件必须存在；否则尝试默认路径，
    /// 默认路径不存在时使用内置默认值。
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, env::vars())
    }

    /// 使用给定的环境变量集合加载配置
    pub fn load_with_env<I>(path: Option<&Path>, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let base = match path {
            Some(path) => Self::load_config_file(path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::load_config_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => {
                linfo!(
                    "system",
                    LogStage::Startup,
                    LogComponent::Config,
                    "config_defaults",
                    "未找到配置文件，使用默认配置"
                );
                AppConfig::default()
            }
        };

        Self::from_config(base, vars)
    }

    /// 在已有配置上应用环境变量覆盖并验证
    pub fn from_config<I>(mut config: AppConfig, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let (overrides, legacy) = Self::build_env_overrides(vars);
        Self::apply_env_overrides(&mut config, &overrides)?;
        Self::apply_legacy_env(&mut config, &legacy)?;

        config.validate()?;

        for app_key in config.duplicate_app_keys() {
            lwarn!(
                "system",
                LogStage::Startup,
                LogComponent::Config,
                "duplicate_app_key",
                "app_key 重复配置，后出现的条目生效",
                app_key = %app_key
            );
        }

        let applied_overrides = overrides.len() + legacy.len();
        linfo!(
            "system",
            LogStage::Startup,
            LogComponent::Config,
            "config_loaded",
            "配置加载完成",
            credentials = config.credentials.len(),
            env_overrides = applied_overrides,
            refresh_lock = ?config.upstream.refresh_lock
        );

        Ok(Self {
            config,
            applied_overrides,
        })
    }

    /// 获取当前配置
    #[must_use]
    pub const fn get_config(&self) -> &AppConfig {
        &self.config
    }

    /// 取出配置
    #[must_use]
    pub fn into_config(self) -> AppConfig {
        self.config
    }

    /// 已应用的环境变量覆盖数量
    #[must_use]
    pub const fn applied_overrides(&self) -> usize {
        self.applied_overrides
    }

    /// 加载配置文件
    fn load_config_file(path: &Path) -> Result<AppConfig> {
        if !path.exists() {
            return Err(ProxyError::config(format!("配置文件不存在: {}", path.display())));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::config_with_source(format!("读取配置文件失败: {}", path.display()), e)
        })?;

        toml::from_str(&content).map_err(|e| {
            ProxyError::config_with_source(
                format!("TOML解析失败 - 配置文件: {}, 详细错误: {e}", path.display()),
                e,
            )
        })
    }

    /// 构建环境变量覆盖映射
    ///
    /// 返回 `PROXY_*` 覆盖（转换为配置路径）与旧版单应用变量两部分。
    fn build_env_overrides<I>(vars: I) -> (BTreeMap<String, String>, BTreeMap<String, String>)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut overrides = BTreeMap::new();
        let mut legacy = BTreeMap::new();

        for (key, value) in vars {
            if let Some(config_key) = key.strip_prefix("PROXY_") {
                // 例如: PROXY_SERVER_PORT -> server.port
                let config_path = config_key.to_lowercase().replace('_', ".");
                overrides.insert(config_path, value);
            } else if LEGACY_ENV_KEYS.contains(&key.as_str()) {
                legacy.insert(key, value);
            }
        }

        ldebug!(
            "system",
            LogStage::Startup,
            LogComponent::Config,
            "env_overrides_found",
            "发现环境变量覆盖",
            proxy_overrides = overrides.len(),
            legacy_overrides = legacy.len()
        );
        (overrides, legacy)
    }

    /// 应用环境变量覆盖
    fn apply_env_overrides(config: &mut AppConfig, overrides: &BTreeMap<String, String>) -> Result<()> {
        for (path, value) in overrides {
            let shown = if path.contains("secret") || path.contains("key") {
                mask_secret(value)
            } else {
                value.clone()
            };
            ldebug!(
                "system",
                LogStage::Startup,
                LogComponent::Config,
                "apply_env_override",
                "应用环境变量覆盖",
                path = %path,
                value = %shown
            );

            Self::apply_override_to_config(config, path, value)?;
        }
        Ok(())
    }

    /// 将环境变量覆盖应用到配置对象
    fn apply_override_to_config(config: &mut AppConfig, path: &str, value: &str) -> Result<()> {
        let parts: Vec<&str> = path.split('.').collect();

        match parts.as_slice() {
            ["server", "host"] => config.server.host = value.to_string(),
            ["server", "port"] => config.server.port = parse_value(path, value)?,
            ["server", "token", "path"] | ["server", "tokenpath"] => {
                config.server.token_path = value.to_string();
            }
            ["server", "detect", "path"] | ["server", "detectpath"] => {
                config.server.detect_path = value.to_string();
            }
            ["upstream", "token", "endpoint"] | ["upstream", "tokenendpoint"] => {
                config.upstream.token_endpoint = value.to_string();
            }
            ["upstream", "connect", "timeout", "secs"] => {
                config.upstream.connect_timeout_secs = parse_value(path, value)?;
            }
            ["upstream", "response", "header", "timeout", "secs"] => {
                config.upstream.response_header_timeout_secs = parse_value(path, value)?;
            }
            ["upstream", "request", "timeout", "secs"] => {
                config.upstream.request_timeout_secs = parse_value(path, value)?;
            }
            ["upstream", "max", "body", "bytes"] => {
                config.upstream.max_body_bytes = parse_value(path, value)?;
            }
            ["upstream", "max", "idle", "per", "host"] => {
                config.upstream.max_idle_per_host = parse_value(path, value)?;
            }
            ["upstream", "refresh", "lock"] | ["upstream", "refreshlock"] => {
                config.upstream.refresh_lock = value.parse().map_err(ProxyError::config)?;
            }
            ["detect", "app", "name"] => config.detect.app_name = value.to_string(),
            ["detect", "ios", "bundle", "id"] => config.detect.ios_bundle_id = value.to_string(),
            ["detect", "android", "package"] => config.detect.android_package = value.to_string(),
            ["detect", "wx", "app", "id"] => config.detect.wx_app_id = value.to_string(),
            ["detect", "allowed", "hosts"] => {
                config.detect.allowed_hosts = value
                    .split(',')
                    .map(str::trim)
                    .filter(|host| !host.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            _ => {
                lwarn!(
                    "system",
                    LogStage::Startup,
                    LogComponent::Config,
                    "unknown_override",
                    "未知的配置路径，忽略环境变量覆盖",
                    path = %path
                );
            }
        }

        Ok(())
    }

    /// 应用旧版单应用环境变量
    ///
    /// `APPKEY` 存在时新增或覆盖同名凭据，其余字段缺省沿用旧版默认值。
    fn apply_legacy_env(config: &mut AppConfig, legacy: &BTreeMap<String, String>) -> Result<()> {
        if let Some(port) = legacy.get("PORT_HTTP") {
            config.server.port = parse_value("PORT_HTTP", port)?;
        }
        if let Some(path) = legacy.get("WXURL").filter(|p| !p.is_empty()) {
            config.server.token_path.clone_from(path);
        }

        let Some(app_key) = legacy.get("APPKEY").filter(|k| !k.is_empty()) else {
            return Ok(());
        };

        let existing = config
            .credentials
            .iter()
            .rposition(|credential| &credential.app_key == app_key);
        let mut credential = existing
            .map(|index| config.credentials[index].clone())
            .unwrap_or_else(|| CredentialConfig::new(app_key.clone(), String::new()));

        if let Some(secret) = legacy.get("SECKEY") {
            credential.secret.clone_from(secret);
        }
        if let Some(sandbox) = legacy.get("SANDBOX") {
            credential.sandbox = sandbox != "false";
        }
        if let Some(wx_app_id) = legacy.get("WXAPPID") {
            credential.wx_app_id.clone_from(wx_app_id);
        }
        if let Some(check) = legacy.get("CHECKWXAPPID") {
            credential.check_referer = check == "true";
        }

        match existing {
            Some(index) => config.credentials[index] = credential,
            None => config.credentials.push(credential),
        }
        Ok(())
    }
}

fn parse_value<T>(path: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value.parse().map_err(|e| {
        ProxyError::config_with_source(format!("无效的配置值 {path} = {value}"), e)
    })
}
