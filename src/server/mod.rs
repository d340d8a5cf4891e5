//! # 客户端 HTTP 服务
//!
//! 对外提供 token 查询、检测转发与存活检查接口

mod extract;
mod handlers;
mod response;
mod server;
mod state;

pub use extract::{ClientMeta, RequestId, request_id_middleware};
pub use handlers::{
    DetectQuery, TokenQuery, detect_handler, method_not_allowed, ping_handler, token_handler,
};
pub use response::{DetectMessage, DetectReply, JSON_CONTENT_TYPE, TokenCode, TokenReply};
pub use server::{ProxyServer, create_router, shutdown_signal};
pub use state::AppState;
