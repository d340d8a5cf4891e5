//! # Token 刷新服务
//!
//! 保证每个应用 key 的 token 可用，并在并发访问下对上游刷新去重：
//! - 缓存命中：token 有效且未强制刷新时直接返回，不加锁、不发请求
//! - 刷新锁：同一时间只有一个刷新在途（全局锁或按 key 锁，由配置决定）
//! - 过期读短路：拿到锁后记录已被其他请求刷新过，则直接返回新值
//!
//! 上游失败不会作为错误返回，而是记为 [`TokenState::Failed`]。

use dashmap::DashMap;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::config::{RefreshLockMode, UpstreamConfig};
use crate::credential::{CredentialRecord, CredentialStore, TokenState};
use crate::error::{ProxyError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::upstream::UpstreamClient;
use crate::{ldebug, linfo, lwarn};

/// 上游 token 接口的成功标志
const UPSTREAM_OK: &str = "OK";

/// 上游 token 接口返回
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamTokenResponse {
    /// 结果消息，只有 "OK" 表示成功
    #[serde(default)]
    pub msg: String,
    /// 新 token
    #[serde(default)]
    pub token: String,
}

/// 调用方在请求刷新前观察到的记录状态
#[derive(Debug, Clone)]
struct RefreshAttempt {
    observed_token: TokenState,
    observed_generation: u64,
}

impl RefreshAttempt {
    fn observe(record: &CredentialRecord) -> Self {
        Self {
            observed_token: record.token().clone(),
            observed_generation: record.generation(),
        }
    }

    /// 记录是否已被其他请求刷新过
    fn is_stale(&self, current: &CredentialRecord) -> bool {
        current.generation() != self.observed_generation || current.token() != &self.observed_token
    }
}

/// 刷新锁
#[derive(Debug)]
enum RefreshLocks {
    /// 所有 key 共用一把锁
    Global(Arc<Mutex<()>>),
    /// app_key -> Mutex，按需创建
    PerKey(DashMap<String, Arc<Mutex<()>>>),
}

impl RefreshLocks {
    fn new(mode: RefreshLockMode) -> Self {
        match mode {
            RefreshLockMode::Global => Self::Global(Arc::new(Mutex::new(()))),
            RefreshLockMode::PerKey => Self::PerKey(DashMap::new()),
        }
    }

    async fn acquire(&self, app_key: &str) -> OwnedMutexGuard<()> {
        let lock = match self {
            Self::Global(lock) => Arc::clone(lock),
            Self::PerKey(locks) => locks
                .entry(app_key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone(),
        };
        lock.lock_owned().await
    }
}

/// Token 刷新服务
#[derive(Debug)]
pub struct TokenRefresher {
    store: Arc<CredentialStore>,
    upstream: UpstreamClient,
    token_endpoint: String,
    locks: RefreshLocks,
}

impl TokenRefresher {
    /// 创建刷新服务
    pub fn new(store: Arc<CredentialStore>, upstream: UpstreamClient, config: &UpstreamConfig) -> Self {
        Self {
            store,
            upstream,
            token_endpoint: config.token_endpoint.clone(),
            locks: RefreshLocks::new(config.refresh_lock),
        }
    }

    /// 凭据存储
    #[must_use]
    pub const fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// 确保 token 可用
    ///
    /// key 未注册时返回 [`ProxyError::UnknownKey`] 且不访问网络。
    /// 其余情况总是返回刷新后的 token 状态。
    pub async fn ensure_fresh(&self, app_key: &str, force_refresh: bool) -> Result<TokenState> {
        self.ensure_fresh_traced("internal", app_key, force_refresh)
            .await
    }

    /// 带请求 ID 的 [`Self::ensure_fresh`]
    pub async fn ensure_fresh_traced(
        &self,
        request_id: &str,
        app_key: &str,
        force_refresh: bool,
    ) -> Result<TokenState> {
        let record = self
            .store
            .lookup(app_key)
            .ok_or_else(|| ProxyError::unknown_key(app_key))?;

        if record.token().is_valid() && !force_refresh {
            ldebug!(
                request_id,
                LogStage::TokenRefresh,
                LogComponent::TokenRefresher,
                "cache_hit",
                "token cache hit",
                app_key = %app_key
            );
            return Ok(record.token().clone());
        }

        let attempt = RefreshAttempt::observe(&record);
        self.refresh(request_id, app_key, &attempt).await
    }

    async fn refresh(
        &self,
        request_id: &str,
        app_key: &str,
        attempt: &RefreshAttempt,
    ) -> Result<TokenState> {
        let _guard = self.locks.acquire(app_key).await;

        let current = self
            .store
            .lookup(app_key)
            .ok_or_else(|| ProxyError::unknown_key(app_key))?;

        if attempt.is_stale(&current) {
            ldebug!(
                request_id,
                LogStage::TokenRefresh,
                LogComponent::TokenRefresher,
                "refresh_short_circuit",
                "token already refreshed by a concurrent request",
                app_key = %app_key,
                generation = current.generation()
            );
            return Ok(current.token().clone());
        }

        let token = match self.request_token(&current).await {
            Ok(response) if response.msg == UPSTREAM_OK => {
                let token = TokenState::from_raw(&response.token);
                linfo!(
                    request_id,
                    LogStage::TokenRefresh,
                    LogComponent::TokenRefresher,
                    "refresh_success",
                    "upstream token refreshed",
                    app_key = %app_key,
                    token_len = response.token.len()
                );
                token
            }
            Ok(response) => {
                lwarn!(
                    request_id,
                    LogStage::TokenRefresh,
                    LogComponent::TokenRefresher,
                    "refresh_rejected",
                    "upstream rejected token request",
                    app_key = %app_key,
                    upstream_msg = %response.msg
                );
                TokenState::Failed
            }
            Err(err) => {
                lwarn!(
                    request_id,
                    LogStage::TokenRefresh,
                    LogComponent::TokenRefresher,
                    "refresh_failed",
                    "upstream token request failed",
                    app_key = %app_key,
                    error = %err
                );
                TokenState::Failed
            }
        };

        self.store.upsert(current.with_token(token.clone()));
        Ok(token)
    }

    async fn request_token(&self, record: &CredentialRecord) -> Result<UpstreamTokenResponse> {
        let nocache = rand::random::<u32>().to_string();
        let test = if record.sandbox() { "true" } else { "false" };
        let query = [
            ("appkey", record.app_key()),
            ("seckey", record.secret()),
            ("test", test),
            ("nocache", nocache.as_str()),
        ];
        self.upstream.get_json(&self.token_endpoint, &query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn refresher_for(server: &MockServer, mode: RefreshLockMode) -> Arc<TokenRefresher> {
        let config = UpstreamConfig {
            token_endpoint: format!("{}/api/token/v1", server.uri()),
            refresh_lock: mode,
            ..UpstreamConfig::default()
        };
        let store = Arc::new(CredentialStore::new());
        store.upsert(CredentialRecord::new("k1", "s1", true));
        store.upsert(CredentialRecord::new("k2", "s2", false));
        let upstream = UpstreamClient::new(&config).unwrap();
        Arc::new(TokenRefresher::new(store, upstream, &config))
    }

    fn ok_token(token: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({"msg": "OK", "token": token}))
    }

    #[tokio::test]
    async fn unknown_key_fails_without_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ok_token("T1"))
            .expect(0)
            .mount(&server)
            .await;

        let refresher = refresher_for(&server, RefreshLockMode::Global);
        let err = refresher.ensure_fresh("missing", false).await.unwrap_err();
        assert!(matches!(err, ProxyError::UnknownKey { .. }));
        let err = refresher.ensure_fresh("missing", true).await.unwrap_err();
        assert!(matches!(err, ProxyError::UnknownKey { .. }));
    }

    #[tokio::test]
    async fn ok_response_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/token/v1"))
            .and(query_param("appkey", "k1"))
            .and(query_param("seckey", "s1"))
            .and(query_param("test", "true"))
            .respond_with(ok_token("T1"))
            .expect(1)
            .mount(&server)
            .await;

        let refresher = refresher_for(&server, RefreshLockMode::Global);
        assert_eq!(
            refresher.ensure_fresh("k1", false).await.unwrap(),
            TokenState::Valid("T1".into())
        );
        // 第二次命中缓存
        assert_eq!(
            refresher.ensure_fresh("k1", false).await.unwrap(),
            TokenState::Valid("T1".into())
        );
        assert_eq!(
            refresher.store().lookup("k1").unwrap().token(),
            &TokenState::Valid("T1".into())
        );
    }

    #[tokio::test]
    async fn production_key_sends_test_false_and_nocache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("appkey", "k2"))
            .and(query_param("test", "false"))
            .respond_with(ok_token("P1"))
            .expect(1)
            .mount(&server)
            .await;

        let refresher = refresher_for(&server, RefreshLockMode::Global);
        refresher.ensure_fresh("k2", false).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let nocache = requests[0]
            .url
            .query_pairs()
            .find(|(k, _)| k == "nocache")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        assert!(nocache.parse::<u64>().is_ok());
    }

    #[rstest]
    #[case::rejected(ResponseTemplate::new(200).set_body_json(serde_json::json!({"msg": "FAIL"})))]
    #[case::missing_msg(ResponseTemplate::new(200).set_body_json(serde_json::json!({"token": "T1"})))]
    #[case::server_error(ResponseTemplate::new(500))]
    #[case::malformed(ResponseTemplate::new(200).set_body_string("{not json"))]
    #[case::oversized(ResponseTemplate::new(200).set_body_string("x".repeat(20 * 1024)))]
    #[tokio::test]
    async fn failures_store_sentinel(#[case] response: ResponseTemplate) {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(response)
            .expect(1)
            .mount(&server)
            .await;

        let refresher = refresher_for(&server, RefreshLockMode::Global);
        let state = refresher.ensure_fresh("k1", false).await.unwrap();
        assert_eq!(state, TokenState::Failed);
        assert_eq!(refresher.store().lookup("k1").unwrap().token().as_raw(), "no");
    }

    #[tokio::test]
    async fn failed_token_is_retried_on_next_call() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"msg": "FAIL"})))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ok_token("T2"))
            .expect(1)
            .mount(&server)
            .await;

        let refresher = refresher_for(&server, RefreshLockMode::Global);
        assert_eq!(refresher.ensure_fresh("k1", false).await.unwrap(), TokenState::Failed);
        assert_eq!(
            refresher.ensure_fresh("k1", false).await.unwrap(),
            TokenState::Valid("T2".into())
        );
    }

    #[tokio::test]
    async fn force_refresh_bypasses_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ok_token("T1"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ok_token("T2"))
            .mount(&server)
            .await;

        let refresher = refresher_for(&server, RefreshLockMode::Global);
        refresher.ensure_fresh("k1", false).await.unwrap();
        assert_eq!(
            refresher.ensure_fresh("k1", true).await.unwrap(),
            TokenState::Valid("T2".into())
        );
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[rstest]
    #[case::global(RefreshLockMode::Global)]
    #[case::per_key(RefreshLockMode::PerKey)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_refreshes_collapse_to_one_call(#[case] mode: RefreshLockMode) {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ok_token("T1").set_delay(std::time::Duration::from_millis(100)))
            .expect(1)
            .mount(&server)
            .await;

        let refresher = refresher_for(&server, mode);
        let calls = (0..16).map(|_| {
            let refresher = Arc::clone(&refresher);
            async move { refresher.ensure_fresh("k1", false).await.unwrap() }
        });
        let results = join_all(calls).await;

        assert!(results.iter().all(|state| state == &TokenState::Valid("T1".into())));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_forced_refreshes_collapse_to_one_call() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ok_token("T1"))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ok_token("T2").set_delay(std::time::Duration::from_millis(100)))
            .expect(1)
            .mount(&server)
            .await;

        let refresher = refresher_for(&server, RefreshLockMode::Global);
        refresher.ensure_fresh("k1", false).await.unwrap();

        let calls = (0..8).map(|_| {
            let refresher = Arc::clone(&refresher);
            async move { refresher.ensure_fresh("k1", true).await.unwrap() }
        });
        let results = join_all(calls).await;

        assert!(results.iter().all(|state| state == &TokenState::Valid("T2".into())));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_failures_do_not_retry_within_one_event() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"msg": "FAIL"}))
                    .set_delay(std::time::Duration::from_millis(100)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let refresher = refresher_for(&server, RefreshLockMode::Global);
        let calls = (0..8).map(|_| {
            let refresher = Arc::clone(&refresher);
            async move { refresher.ensure_fresh("k1", false).await.unwrap() }
        });
        let results = join_all(calls).await;

        assert!(results.iter().all(|state| state == &TokenState::Failed));
    }

    #[tokio::test]
    async fn different_keys_refresh_independently() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("appkey", "k1"))
            .respond_with(ok_token("A"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("appkey", "k2"))
            .respond_with(ok_token("B"))
            .expect(1)
            .mount(&server)
            .await;

        let refresher = refresher_for(&server, RefreshLockMode::PerKey);
        let (a, b) = tokio::join!(
            refresher.ensure_fresh("k1", false),
            refresher.ensure_fresh("k2", false)
        );
        assert_eq!(a.unwrap(), TokenState::Valid("A".into()));
        assert_eq!(b.unwrap(), TokenState::Valid("B".into()));
    }
}
