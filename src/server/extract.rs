//! # 请求上下文提取
//!
//! 为每个请求生成 `request_id`，并从请求头与连接信息中取出客户端元数据。

use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;
use std::ops::Deref;

use axum::extract::{ConnectInfo, FromRequestParts, Request};
use axum::http::header::{HeaderMap, HeaderValue, REFERER, USER_AGENT};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

/// 代理层传入的真实客户端 IP 头
pub const REAL_IP_HEADER: &str = "x-real-ip";

/// 请求ID类型
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(String);

impl RequestId {
    /// 生成新的 UUID v4 请求ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// 请求ID文本
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Deref for RequestId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// 请求ID中间件
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = RequestId::new();
    request.extensions_mut().insert(request_id.clone());

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// 客户端元数据
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientMeta {
    /// 请求ID
    pub request_id: String,
    /// Referer 头，缺失时为空
    pub referer: String,
    /// User-Agent 头，缺失时为空
    pub user_agent: String,
    /// 客户端 IP：优先 `X-real-ip`，其次连接对端地址
    pub ip: String,
}

impl ClientMeta {
    fn from_parts(parts: &Parts) -> Self {
        let request_id = parts
            .extensions
            .get::<RequestId>()
            .cloned()
            .unwrap_or_default();
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        Self {
            request_id: request_id.as_str().to_string(),
            referer: header_str(&parts.headers, REFERER.as_str()),
            user_agent: header_str(&parts.headers, USER_AGENT.as_str()),
            ip: client_ip(&parts.headers, peer),
        }
    }
}

impl<S> FromRequestParts<S> for ClientMeta
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_parts(parts))
    }
}

/// 读取请求头文本，缺失或非法时为空
fn header_str(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// 客户端 IP：`X-real-ip` 非空时原样使用，否则取对端地址（不含端口）
#[must_use]
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let real_ip = header_str(headers, REAL_IP_HEADER);
    if !real_ip.is_empty() {
        return real_ip;
    }
    peer.map(|addr| addr.ip().to_string()).unwrap_or_default()
}
