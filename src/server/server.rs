//! # 客户端服务器
//!
//! Axum HTTP服务器，按配置挂载 token 与检测接口

use std::future::Future;
use std::net::SocketAddr;

use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use super::extract::request_id_middleware;
use super::handlers::{detect_handler, method_not_allowed, ping_handler, token_handler};
use super::state::AppState;
use crate::config::ServerConfig;
use crate::error::{ProxyError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::{lerror, linfo};

/// 创建路由器
///
/// token 与检测接口只接受 GET，其他方法返回 403。
/// axum 默认把 HEAD 交给 GET 处理器，这里单独挂 403。
pub fn create_router(state: AppState, config: &ServerConfig) -> Router {
    Router::new()
        .route(
            &config.token_path,
            get(token_handler)
                .head(method_not_allowed)
                .fallback(method_not_allowed),
        )
        .route(
            &config.detect_path,
            get(detect_handler)
                .head(method_not_allowed)
                .fallback(method_not_allowed),
        )
        .route("/ping", get(ping_handler))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn(request_id_middleware)),
        )
}

/// 客户端服务器
pub struct ProxyServer {
    config: ServerConfig,
    router: Router,
}

impl ProxyServer {
    /// 创建新的服务器
    #[must_use]
    pub fn new(config: ServerConfig, state: AppState) -> Self {
        let router = create_router(state, &config);
        Self { config, router }
    }

    /// 监听地址
    #[must_use]
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    /// 路由器副本
    #[must_use]
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// 绑定配置的地址并运行，收到 Ctrl+C 后优雅退出
    pub async fn serve(self) -> Result<()> {
        let address = self.listen_address();
        let listener = TcpListener::bind(&address).await.map_err(|e| {
            ProxyError::server_start_with_source(format!("Failed to bind {address}"), e)
        })?;
        self.serve_on(listener, shutdown_signal()).await
    }

    /// 在给定监听器上运行，直到 `shutdown` 完成
    pub async fn serve_on<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local_addr = listener.local_addr()?;
        linfo!(
            "system",
            LogStage::Startup,
            LogComponent::ServerSetup,
            "server_start",
            &format!("Starting credential proxy on {local_addr}"),
            token_path = %self.config.token_path,
            detect_path = %self.config.detect_path
        );

        axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ProxyError::server_start_with_source("Server error", e))?;

        linfo!(
            "system",
            LogStage::Shutdown,
            LogComponent::ServerSetup,
            "server_stopped",
            "Credential proxy stopped"
        );
        Ok(())
    }
}

/// 等待 Ctrl+C
pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => linfo!(
            "system",
            LogStage::Shutdown,
            LogComponent::ServerSetup,
            "ctrl_c",
            "Received Ctrl+C signal, shutting down"
        ),
        Err(e) => {
            lerror!(
                "system",
                LogStage::Shutdown,
                LogComponent::ServerSetup,
                "ctrl_c_error",
                &format!("Failed to listen for Ctrl+C: {e:?}")
            );
            std::future::pending::<()>().await;
        }
    }
}
