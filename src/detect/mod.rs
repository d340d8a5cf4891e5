//! # 检测转发模块

mod proxy;
mod types;

pub use proxy::{DetectCall, DetectionOutcome, DetectionProxy};
pub use types::{
    AppInfo, DETECT_PROTOCOL_VERSION, DetectHit, DetectRequest, DetectResponse, DeviceInfo,
    Platform, UserInfo,
};
