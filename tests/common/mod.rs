//! # 集成测试公共设施
//!
//! 以 wiremock 模拟上游，构建完整路由器并通过 `oneshot` 驱动请求

#![allow(dead_code)]

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode};
use credential_proxy::config::{AppConfig, CredentialConfig, RefreshLockMode};
use credential_proxy::server::{AppState, create_router};
use serde_json::Value;
use tower::ServiceExt;
use wiremock::MockServer;

/// 未开启 Referer 校验的应用
pub const OPEN_KEY: &str = "open-key";
pub const OPEN_SECRET: &str = "open-secret";

/// 开启 Referer 校验的应用
pub const GUARDED_KEY: &str = "guarded-key";
pub const GUARDED_SECRET: &str = "guarded-secret";
pub const GUARDED_WX_APP_ID: &str = "wxAPPID";
pub const GUARDED_REFERER: &str = "https://servicewechat.com/wxAPPID/page";

pub const TOKEN_PATH: &str = "/api/token/v1";

/// 测试环境
pub struct TestProxy {
    pub upstream: MockServer,
    pub state: AppState,
    pub router: Router,
}

impl TestProxy {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    /// 启动前允许调整配置
    pub async fn start_with(customize: impl FnOnce(&mut AppConfig)) -> Self {
        let upstream = MockServer::start().await;
        let mut config = test_config(&upstream.uri());
        customize(&mut config);

        let state = AppState::from_config(&config).expect("state");
        let router = create_router(state.clone(), &config.server);
        Self {
            upstream,
            state,
            router,
        }
    }

    /// 上游检测接口地址
    pub fn detect_target(&self) -> String {
        format!("{}/detect", self.upstream.uri())
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    pub async fn get_with_headers(&self, uri: &str, headers: &[(&str, &str)]) -> (StatusCode, Value) {
        let mut builder = Request::get(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn request(&self, method: Method, uri: &str) -> StatusCode {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        self.router.clone().oneshot(request).await.unwrap().status()
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }
}

pub fn test_config(upstream_uri: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config.upstream.token_endpoint = format!("{upstream_uri}{TOKEN_PATH}");
    config.upstream.refresh_lock = RefreshLockMode::Global;
    config.detect.ios_bundle_id = "com.example.ios".to_string();
    config.detect.android_package = "com.example.android".to_string();

    let mut guarded = CredentialConfig::new(GUARDED_KEY, GUARDED_SECRET);
    guarded.wx_app_id = GUARDED_WX_APP_ID.to_string();
    guarded.check_referer = true;
    guarded.sandbox = false;

    config.credentials = vec![CredentialConfig::new(OPEN_KEY, OPEN_SECRET), guarded];
    config
}

pub fn token_ok(token: &str) -> Value {
    serde_json::json!({"msg": "OK", "token": token})
}
