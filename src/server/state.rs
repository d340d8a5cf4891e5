//! # 服务共享状态

use std::sync::Arc;

use crate::config::AppConfig;
use crate::credential::CredentialStore;
use crate::detect::DetectionProxy;
use crate::error::{Context, Result};
use crate::token::TokenRefresher;
use crate::upstream::UpstreamClient;

/// 处理器共享的应用状态
#[derive(Debug, Clone)]
pub struct AppState {
    store: Arc<CredentialStore>,
    refresher: Arc<TokenRefresher>,
    detector: Arc<DetectionProxy>,
}

impl AppState {
    /// 由已构建的组件组装状态
    #[must_use]
    pub const fn new(
        store: Arc<CredentialStore>,
        refresher: Arc<TokenRefresher>,
        detector: Arc<DetectionProxy>,
    ) -> Self {
        Self {
            store,
            refresher,
            detector,
        }
    }

    /// 由配置构建凭据存储、刷新服务与转发服务
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let store = Arc::new(CredentialStore::from_configs(&config.credentials));
        let upstream =
            UpstreamClient::new(&config.upstream).context("Failed to build upstream client")?;
        let refresher = Arc::new(TokenRefresher::new(
            Arc::clone(&store),
            upstream.clone(),
            &config.upstream,
        ));
        let detector = Arc::new(DetectionProxy::new(
            Arc::clone(&store),
            upstream,
            config.detect.clone(),
        ));
        Ok(Self::new(store, refresher, detector))
    }

    /// 凭据存储
    #[must_use]
    pub const fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// token 刷新服务
    #[must_use]
    pub const fn refresher(&self) -> &Arc<TokenRefresher> {
        &self.refresher
    }

    /// 检测转发服务
    #[must_use]
    pub const fn detector(&self) -> &Arc<DetectionProxy> {
        &self.detector
    }
}
