//! # 客户端响应结构
//!
//! token 接口返回 `{code, token}`，检测接口返回 `{msg, tags, record_id}`。
//! 两者都以 HTTP 200 发出，结果体现在 body 的状态字段里。

use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use serde::{Serialize, Serializer};

use crate::error::ProxyError;
use crate::lerror;
use crate::logging::{LogComponent, LogStage};

/// 客户端响应的 Content-Type
pub const JSON_CONTENT_TYPE: &str = "application/json;charset=utf-8";

/// token 接口状态码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCode {
    /// 成功
    Ok,
    /// 未知的应用 key
    UnknownKey,
    /// Referer 校验失败
    RefererRejected,
    /// 暂无可用 token
    Unavailable,
}

impl TokenCode {
    /// 响应体中的数值状态码
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::UnknownKey => 401,
            Self::RefererRejected => 402,
            Self::Unavailable => 404,
        }
    }

    /// 错误对应的状态码
    #[must_use]
    pub fn from_error(err: &ProxyError) -> Self {
        match err.root() {
            ProxyError::UnknownKey { .. } => Self::UnknownKey,
            ProxyError::AccessDenied { .. } => Self::RefererRejected,
            _ => Self::Unavailable,
        }
    }
}

impl Serialize for TokenCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.as_u16())
    }
}

/// token 接口响应
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenReply {
    /// 状态码
    pub code: TokenCode,
    /// token，非 200 时为空
    pub token: String,
}

impl TokenReply {
    /// 成功响应
    #[must_use]
    pub const fn success(token: String) -> Self {
        Self {
            code: TokenCode::Ok,
            token,
        }
    }

    /// 失败响应，token 为空
    #[must_use]
    pub const fn failure(code: TokenCode) -> Self {
        Self {
            code,
            token: String::new(),
        }
    }
}

/// 检测接口结果消息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectMessage {
    /// 成功
    Ok,
    /// 未知的应用 key
    UnknownKey,
    /// Referer 校验失败
    RefererRejected,
    /// 上游或转发失败
    ProxyFailure,
}

impl DetectMessage {
    /// 响应体中的消息文本
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::UnknownKey => "Error1",
            Self::RefererRejected => "Error2",
            Self::ProxyFailure => "Error3",
        }
    }

    /// 错误对应的结果消息
    #[must_use]
    pub fn from_error(err: &ProxyError) -> Self {
        match err.root() {
            ProxyError::UnknownKey { .. } => Self::UnknownKey,
            ProxyError::AccessDenied { .. } => Self::RefererRejected,
            _ => Self::ProxyFailure,
        }
    }
}

impl Serialize for DetectMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// 检测接口响应
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectReply {
    /// 结果消息
    pub msg: DetectMessage,
    /// 所有结果的标签
    pub tags: Vec<String>,
    /// 上游记录 ID，失败时为空
    pub record_id: String,
}

impl DetectReply {
    /// 成功响应
    #[must_use]
    pub const fn success(tags: Vec<String>, record_id: String) -> Self {
        Self {
            msg: DetectMessage::Ok,
            tags,
            record_id,
        }
    }

    /// 失败响应，标签与记录 ID 为空
    #[must_use]
    pub const fn failure(msg: DetectMessage) -> Self {
        Self {
            msg,
            tags: Vec::new(),
            record_id: String::new(),
        }
    }
}

/// 编码为 JSON 响应；只有编码失败时返回 500
pub fn json_reply<T: Serialize>(request_id: &str, body: &T) -> Response {
    match serde_json::to_vec(body) {
        Ok(bytes) => (StatusCode::OK, [(CONTENT_TYPE, JSON_CONTENT_TYPE)], bytes).into_response(),
        Err(e) => {
            lerror!(
                request_id,
                LogStage::Response,
                LogComponent::Handler,
                "encode_fail",
                &format!("Failed to encode client response: {e}")
            );
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn token_reply_wire_shape() {
        let ok = serde_json::to_value(TokenReply::success("T1".into())).unwrap();
        assert_eq!(ok, serde_json::json!({"code": 200, "token": "T1"}));

        let missing = serde_json::to_value(TokenReply::failure(TokenCode::Unavailable)).unwrap();
        assert_eq!(missing, serde_json::json!({"code": 404, "token": ""}));
    }

    #[test]
    fn detect_failure_has_empty_tags_array() {
        let reply = serde_json::to_value(DetectReply::failure(DetectMessage::UnknownKey)).unwrap();
        assert_eq!(
            reply,
            serde_json::json!({"msg": "Error1", "tags": [], "record_id": ""})
        );
    }

    #[test]
    fn errors_map_to_client_codes() {
        let unknown = ProxyError::unknown_key("k");
        let denied = ProxyError::access_denied("referer");
        let rejected = ProxyError::upstream_rejected("FAIL");
        let target = ProxyError::target_not_allowed("ftp://x", "scheme");

        assert_eq!(TokenCode::from_error(&unknown), TokenCode::UnknownKey);
        assert_eq!(TokenCode::from_error(&denied), TokenCode::RefererRejected);
        assert_eq!(TokenCode::from_error(&rejected), TokenCode::Unavailable);

        assert_eq!(DetectMessage::from_error(&unknown), DetectMessage::UnknownKey);
        assert_eq!(DetectMessage::from_error(&denied), DetectMessage::RefererRejected);
        assert_eq!(DetectMessage::from_error(&rejected), DetectMessage::ProxyFailure);
        assert_eq!(DetectMessage::from_error(&target), DetectMessage::ProxyFailure);
    }

    #[test]
    fn json_reply_sets_content_type() {
        let response = json_reply("req", &TokenReply::success("T".into()));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            JSON_CONTENT_TYPE
        );
    }
}
