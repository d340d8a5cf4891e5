//! # 上游访问模块

mod client;

pub use client::UpstreamClient;
