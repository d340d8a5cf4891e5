//! # 检测请求转发
//!
//! 把客户端拿到的检测地址连同服务端保存的 key/secret 一起 POST 给上游，
//! 并把上游的完整结果压缩为只含标签与记录 ID 的客户端结果。

use std::sync::Arc;
use uuid::Uuid;

use super::types::{
    AppInfo, DETECT_PROTOCOL_VERSION, DetectRequest, DetectResponse, DeviceInfo, Platform,
    UserInfo,
};
use crate::config::DetectConfig;
use crate::credential::{CredentialRecord, CredentialStore};
use crate::error::{ProxyError, Result};
use crate::guard::TargetPolicy;
use crate::logging::{LogComponent, LogStage};
use crate::upstream::UpstreamClient;
use crate::{ldebug, lwarn};

/// 上游检测接口的成功标志
const UPSTREAM_OK: &str = "OK";

/// 一次检测转发的客户端参数
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectCall {
    /// 客户端提供的检测地址
    pub target_url: String,
    /// 应用 key
    pub app_key: String,
    /// 平台名
    pub platform: String,
    /// 设备 ID
    pub device_id: String,
    /// 终端 IP
    pub client_ip: String,
    /// 终端 User-Agent
    pub user_agent: String,
}

/// 检测结果摘要
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionOutcome {
    /// 所有结果的标签
    pub tags: Vec<String>,
    /// 上游记录 ID
    pub record_id: String,
}

/// 检测请求转发服务
#[derive(Debug)]
pub struct DetectionProxy {
    store: Arc<CredentialStore>,
    upstream: UpstreamClient,
    config: DetectConfig,
    targets: TargetPolicy,
}

impl DetectionProxy {
    /// 创建转发服务
    pub fn new(store: Arc<CredentialStore>, upstream: UpstreamClient, config: DetectConfig) -> Self {
        let targets = TargetPolicy::new(&config.allowed_hosts);
        Self {
            store,
            upstream,
            config,
            targets,
        }
    }

    /// 目标主机策略
    #[must_use]
    pub const fn target_policy(&self) -> &TargetPolicy {
        &self.targets
    }

    /// 转发检测请求
    pub async fn forward(&self, call: &DetectCall) -> Result<DetectionOutcome> {
        self.forward_traced("internal", call).await
    }

    /// 带请求 ID 的 [`Self::forward`]
    pub async fn forward_traced(&self, request_id: &str, call: &DetectCall) -> Result<DetectionOutcome> {
        let record = self
            .store
            .lookup(&call.app_key)
            .ok_or_else(|| ProxyError::unknown_key(&call.app_key))?;

        let target = self.targets.check(&call.target_url)?;
        let request = self.build_request(&record, call);

        ldebug!(
            request_id,
            LogStage::UpstreamRequest,
            LogComponent::DetectionProxy,
            "forward_detect",
            "forwarding detection request",
            app_key = %call.app_key,
            target_host = %target.host_str().unwrap_or_default(),
            platform = %call.platform,
            upstream_request_id = %request.request_id
        );

        let response: DetectResponse = self.upstream.post_json(target.as_str(), &request).await?;

        if response.msg != UPSTREAM_OK {
            lwarn!(
                request_id,
                LogStage::UpstreamRequest,
                LogComponent::DetectionProxy,
                "detect_rejected",
                "upstream rejected detection request",
                app_key = %call.app_key,
                upstream_msg = %response.msg
            );
            return Err(ProxyError::upstream_rejected(response.msg));
        }

        Ok(DetectionOutcome {
            tags: response.flatten_tags(),
            record_id: response.response_id,
        })
    }

    /// 构建注入了凭据的上游请求体
    fn build_request(&self, record: &CredentialRecord, call: &DetectCall) -> DetectRequest {
        let platform = Platform::parse(&call.platform);
        let package_name = match platform {
            Platform::Ios => self.config.ios_bundle_id.clone(),
            Platform::Android => self.config.android_package.clone(),
            Platform::WxApp => self.config.wx_app_id.clone(),
            Platform::Other(_) => String::new(),
        };

        DetectRequest {
            version: DETECT_PROTOCOL_VERSION,
            request_id: Uuid::new_v4().to_string(),
            appkey: record.app_key().to_string(),
            seckey: record.secret().to_string(),
            test: record.sandbox(),
            ip: call.client_ip.clone(),
            user_agent: call.user_agent.clone(),
            language: String::new(),
            app: AppInfo {
                app_name: self.config.app_name.clone(),
                package_name,
                platform: platform.as_str().to_string(),
            },
            device: DeviceInfo {
                device_id: call.device_id.clone(),
                ..DeviceInfo::default()
            },
            user: UserInfo::default(),
        }
    }
}
