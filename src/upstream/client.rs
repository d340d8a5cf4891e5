//! # 上游 HTTP 客户端
//!
//! 统一的超时策略与响应体大小限制：
//! - 建立连接超时
//! - 等待响应头超时
//! - 整体请求超时
//! - 响应体超过上限直接失败，不做截断

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::config::UpstreamConfig;
use crate::error::{ProxyError, Result};
use crate::upstream_error;

/// 上游 HTTP 客户端
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: Client,
    response_header_timeout: Duration,
    max_body_bytes: usize,
}

impl UpstreamClient {
    /// 按上游配置构建客户端
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .pool_max_idle_per_host(config.max_idle_per_host)
            .user_agent(concat!("credential-proxy/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProxyError::config_with_source("构建上游 HTTP 客户端失败", e))?;

        Ok(Self {
            http,
            response_header_timeout: config.response_header_timeout(),
            max_body_bytes: config.max_body_bytes,
        })
    }

    /// 响应体上限
    #[must_use]
    pub const fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    /// 发送 GET 请求并解析 JSON 响应
    pub async fn get_json<T, Q>(&self, url: &str, query: &Q) -> Result<T>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let request = self.http.get(url).query(query);
        self.execute_json(request).await
    }

    /// 以 JSON 请求体发送 POST 请求并解析 JSON 响应
    pub async fn post_json<T, B>(&self, url: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let payload = serde_json::to_vec(body)?;
        let request = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload);
        self.execute_json(request).await
    }

    async fn execute_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = tokio::time::timeout(self.response_header_timeout, request.send())
            .await
            .map_err(|_| {
                upstream_error!(
                    "等待上游响应头超时 ({}s)",
                    self.response_header_timeout.as_secs()
                )
            })??;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(upstream_error!("上游返回非200状态码: {status}"));
        }

        let body = read_limited(response, self.max_body_bytes).await?;
        serde_json::from_slice(&body).map_err(|e| {
            ProxyError::upstream_unavailable_with_source("上游响应不是有效的 JSON", e)
        })
    }
}

/// 读取响应体，超过 `limit` 字节立即失败
async fn read_limited(mut response: Response, limit: usize) -> Result<Vec<u8>> {
    if let Some(length) = response.content_length() {
        if usize::try_from(length).map_or(true, |length| length > limit) {
            return Err(body_too_large(limit));
        }
    }

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if body.len() + chunk.len() > limit {
            return Err(body_too_large(limit));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

fn body_too_large(limit: usize) -> ProxyError {
    upstream_error!("上游响应体超过 {limit} 字节上限")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Deserialize, PartialEq)]
    struct Echo {
        msg: String,
    }

    fn client_with_limit(max_body_bytes: usize) -> UpstreamClient {
        let config = UpstreamConfig {
            max_body_bytes,
            ..UpstreamConfig::default()
        };
        UpstreamClient::new(&config).unwrap()
    }

    #[tokio::test]
    async fn get_json_sends_query_and_parses_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/token"))
            .and(query_param("appkey", "k"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"msg": "OK"})))
            .expect(1)
            .mount(&server)
            .await;

        let echo: Echo = client_with_limit(1024)
            .get_json(&format!("{}/token", server.uri()), &[("appkey", "k")])
            .await
            .unwrap();
        assert_eq!(echo.msg, "OK");
    }

    #[tokio::test]
    async fn post_json_sets_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/detect"))
            .and(header("content-type", "application/json"))
            .and(body_json(serde_json::json!({"a": 1})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"msg": "OK"})))
            .expect(1)
            .mount(&server)
            .await;

        let echo: Echo = client_with_limit(1024)
            .post_json(&format!("{}/detect", server.uri()), &serde_json::json!({"a": 1}))
            .await
            .unwrap();
        assert_eq!(echo.msg, "OK");
    }

    #[tokio::test]
    async fn non_200_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
            .mount(&server)
            .await;

        let err = client_with_limit(1024)
            .get_json::<Echo, _>(&server.uri(), &[("x", "y")])
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::UpstreamUnavailable { .. }));
        assert!(!err.to_string().contains("exploded"));
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let server = MockServer::start().await;
        let padding = "x".repeat(200);
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"msg": "OK", "padding": padding})),
            )
            .mount(&server)
            .await;

        let err = client_with_limit(64)
            .get_json::<Echo, _>(&server.uri(), &[("x", "y")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("64"));
    }

    #[tokio::test]
    async fn malformed_json_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = client_with_limit(1024)
            .get_json::<Echo, _>(&server.uri(), &[("x", "y")])
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::UpstreamUnavailable { .. }));
    }

    #[tokio::test]
    async fn slow_headers_time_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"msg": "OK"}))
                    .set_delay(Duration::from_millis(1500)),
            )
            .mount(&server)
            .await;

        let config = UpstreamConfig {
            response_header_timeout_secs: 1,
            ..UpstreamConfig::default()
        };
        let err = UpstreamClient::new(&config)
            .unwrap()
            .get_json::<Echo, _>(&server.uri(), &[("x", "y")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("超时"));
    }
}
