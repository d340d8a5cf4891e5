//! # 客户端接口处理器

use std::collections::HashMap;

use axum::extract::{RawQuery, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use url::form_urlencoded;

use super::extract::ClientMeta;
use super::response::{DetectMessage, DetectReply, TokenCode, TokenReply, json_reply};
use super::state::AppState;
use crate::credential::TokenState;
use crate::detect::DetectCall;
use crate::error::{ErrorCategory, ProxyError, Result};
use crate::guard::check_referer;
use crate::logging::{LogComponent, LogStage};
use crate::{ldebug, linfo, lwarn};

/// 解析查询串，同名参数只取第一个值，缺失的参数为空
fn first_values(raw: Option<&str>) -> HashMap<String, String> {
    let mut values = HashMap::new();
    for (name, value) in form_urlencoded::parse(raw.unwrap_or_default().as_bytes()) {
        values
            .entry(name.into_owned())
            .or_insert_with(|| value.into_owned());
    }
    values
}

/// token 接口查询参数
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenQuery {
    /// 应用 key
    pub appkey: String,
    /// 为 "true" 时强制刷新
    pub refresh: String,
}

impl TokenQuery {
    /// 从原始查询串解析
    #[must_use]
    pub fn parse(raw: Option<&str>) -> Self {
        let mut values = first_values(raw);
        Self {
            appkey: values.remove("appkey").unwrap_or_default(),
            refresh: values.remove("refresh").unwrap_or_default(),
        }
    }
}

/// 检测接口查询参数
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectQuery {
    /// 应用 key
    pub appkey: String,
    /// 上游检测地址
    pub url: String,
    /// 客户端平台
    pub platform: String,
    /// 设备 ID
    pub device_id: String,
}

impl DetectQuery {
    /// 从原始查询串解析
    #[must_use]
    pub fn parse(raw: Option<&str>) -> Self {
        let mut values = first_values(raw);
        Self {
            appkey: values.remove("appkey").unwrap_or_default(),
            url: values.remove("url").unwrap_or_default(),
            platform: values.remove("platform").unwrap_or_default(),
            device_id: values.remove("device_id").unwrap_or_default(),
        }
    }
}

/// 查询或刷新 token
pub async fn token_handler(
    State(state): State<AppState>,
    meta: ClientMeta,
    RawQuery(raw): RawQuery,
) -> Response {
    let query = TokenQuery::parse(raw.as_deref());
    ldebug!(
        &meta.request_id,
        LogStage::RequestStart,
        LogComponent::Handler,
        "token_request",
        "token request received",
        app_key = %query.appkey,
        refresh = %query.refresh,
        client_ip = %meta.ip
    );

    let reply = match issue_token(&state, &meta, &query).await {
        Ok(reply) => reply,
        Err(e) => {
            log_rejection(&meta.request_id, "token_rejected", &e);
            TokenReply::failure(TokenCode::from_error(&e))
        }
    };

    linfo!(
        &meta.request_id,
        LogStage::Response,
        LogComponent::Handler,
        "token_response",
        "token request finished",
        app_key = %query.appkey,
        code = reply.code.as_u16()
    );
    json_reply(&meta.request_id, &reply)
}

async fn issue_token(state: &AppState, meta: &ClientMeta, query: &TokenQuery) -> Result<TokenReply> {
    let record = state
        .store()
        .lookup(&query.appkey)
        .ok_or_else(|| ProxyError::unknown_key(&query.appkey))?;
    check_referer(&record, &meta.referer)?;

    let force_refresh = query.refresh == "true";
    let token = state
        .refresher()
        .ensure_fresh_traced(&meta.request_id, &query.appkey, force_refresh)
        .await?;

    Ok(match token {
        TokenState::Valid(token) => TokenReply::success(token),
        TokenState::Empty | TokenState::Failed => TokenReply::failure(TokenCode::Unavailable),
    })
}

/// 转发检测请求
pub async fn detect_handler(
    State(state): State<AppState>,
    meta: ClientMeta,
    RawQuery(raw): RawQuery,
) -> Response {
    let query = DetectQuery::parse(raw.as_deref());
    ldebug!(
        &meta.request_id,
        LogStage::RequestStart,
        LogComponent::Handler,
        "detect_request",
        "detect request received",
        app_key = %query.appkey,
        platform = %query.platform,
        client_ip = %meta.ip
    );

    let reply = match forward_detect(&state, &meta, query.clone()).await {
        Ok(reply) => reply,
        Err(e) => {
            log_rejection(&meta.request_id, "detect_rejected", &e);
            DetectReply::failure(DetectMessage::from_error(&e))
        }
    };

    linfo!(
        &meta.request_id,
        LogStage::Response,
        LogComponent::Handler,
        "detect_response",
        "detect request finished",
        app_key = %query.appkey,
        msg = reply.msg.as_str(),
        tag_count = reply.tags.len()
    );
    json_reply(&meta.request_id, &reply)
}

async fn forward_detect(state: &AppState, meta: &ClientMeta, query: DetectQuery) -> Result<DetectReply> {
    let record = state
        .store()
        .lookup(&query.appkey)
        .ok_or_else(|| ProxyError::unknown_key(&query.appkey))?;
    check_referer(&record, &meta.referer)?;

    let call = DetectCall {
        target_url: query.url,
        app_key: query.appkey,
        platform: query.platform,
        device_id: query.device_id,
        client_ip: meta.ip.clone(),
        user_agent: meta.user_agent.clone(),
    };
    let outcome = state
        .detector()
        .forward_traced(&meta.request_id, &call)
        .await?;

    Ok(DetectReply::success(outcome.tags, outcome.record_id))
}

/// 存活检查
pub async fn ping_handler() -> &'static str {
    "pong"
}

/// 客户端接口只接受 GET
pub async fn method_not_allowed() -> Response {
    StatusCode::FORBIDDEN.into_response()
}

/// 记录被映射为客户端状态码的错误，错误详情只进日志
fn log_rejection(request_id: &str, operation: &str, err: &ProxyError) {
    match err.category() {
        ErrorCategory::Client => lwarn!(
            request_id,
            LogStage::Authentication,
            LogComponent::AccessGuard,
            operation,
            &format!("request rejected: {err}")
        ),
        ErrorCategory::Server => lwarn!(
            request_id,
            LogStage::UpstreamRequest,
            LogComponent::Upstream,
            operation,
            &format!("upstream failure: {err:?}")
        ),
    }
}
