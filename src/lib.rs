//! # Credential Proxy Library
//!
//! 凭据代理核心库：在服务端保存上游应用密钥，对客户端只发放 token
//! 并代为转发检测请求。

pub mod config;
pub mod credential;
pub mod detect;
pub mod error;
pub mod guard;
pub mod logging;
pub mod server;
pub mod token;
pub mod upstream;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{ProxyError, Result};
