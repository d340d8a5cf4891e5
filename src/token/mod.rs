//! # Token 模块

mod refresher;

pub use refresher::{TokenRefresher, UpstreamTokenResponse};
