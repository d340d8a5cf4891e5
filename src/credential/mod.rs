//! # 凭据模块
//!
//! 凭据记录与并发存储

mod record;
mod store;

pub use record::{CredentialRecord, FAILED_TOKEN_SENTINEL, TokenState};
pub use store::CredentialStore;
