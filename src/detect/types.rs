//! # 检测接口数据结构
//!
//! 发往上游检测接口的请求体与上游返回结构

use serde::{Deserialize, Deserializer, Serialize};

/// 检测请求协议版本
pub const DETECT_PROTOCOL_VERSION: i32 = 1;

/// 客户端平台
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Platform {
    /// iOS 应用
    Ios,
    /// Android 应用
    Android,
    /// 微信小程序
    WxApp,
    /// 未识别的平台，原样上报
    Other(String),
}

impl Platform {
    /// 解析客户端传入的平台名（区分大小写）
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "ios" => Self::Ios,
            "android" => Self::Android,
            "wx_app" => Self::WxApp,
            other => Self::Other(other.to_string()),
        }
    }

    /// 上报给上游的平台名
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ios => "ios",
            Self::Android => "android",
            Self::WxApp => "wx_app",
            Self::Other(other) => other,
        }
    }
}

/// 检测请求
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetectRequest {
    /// 协议版本
    pub version: i32,
    /// 请求 ID，用于上游日志查询
    pub request_id: String,
    /// 应用 key
    pub appkey: String,
    /// 应用密钥
    pub seckey: String,
    /// 是否沙箱
    pub test: bool,
    /// 终端 IP
    pub ip: String,
    /// 终端 User-Agent
    pub user_agent: String,
    /// 语言
    pub language: String,
    /// 应用信息
    #[serde(rename = "App")]
    pub app: AppInfo,
    /// 设备信息
    #[serde(rename = "Device")]
    pub device: DeviceInfo,
    /// 用户信息
    #[serde(rename = "User")]
    pub user: UserInfo,
}

/// 应用信息
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AppInfo {
    /// 应用名
    pub app_name: String,
    /// 包名 / bundle id / 小程序 id
    pub package_name: String,
    /// 平台
    pub platform: String,
}

/// 设备信息
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    /// 操作系统
    pub os: String,
    /// 操作系统版本
    #[serde(rename = "osv")]
    pub os_version: String,
    /// 设备类型
    pub device_type: String,
    /// 品牌
    pub brand: String,
    /// 运营商
    pub operator: String,
    /// 网络类型
    pub network: String,
    /// 经度
    #[serde(rename = "lon")]
    pub longitude: String,
    /// 纬度
    #[serde(rename = "lat")]
    pub latitude: String,
    /// 设备 ID
    pub device_id: String,
    /// MAC 地址
    pub mac: String,
}

/// 用户信息
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserInfo {
    /// 用户 ID
    pub user_id: String,
    /// 微信 open id
    pub wx_open_id: String,
    /// 微信 union id
    pub wx_union_id: String,
}

/// 上游检测结果
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DetectResponse {
    /// 结果消息，只有 "OK" 表示成功
    #[serde(deserialize_with = "null_as_default")]
    pub msg: String,
    /// 上游记录 ID
    #[serde(deserialize_with = "null_as_default")]
    pub response_id: String,
    /// 有效结果数量
    #[serde(deserialize_with = "null_as_default")]
    pub count: i64,
    /// 检测结果
    pub result: Option<Vec<DetectHit>>,
}

/// 单条检测结果
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DetectHit {
    /// 标签
    #[serde(deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    /// 信号强度
    #[serde(deserialize_with = "null_as_default")]
    pub power: f32,
    /// 声道
    #[serde(deserialize_with = "null_as_default")]
    pub channel: i32,
    /// 距离
    #[serde(deserialize_with = "null_as_default")]
    pub distance: f32,
    /// 范围
    #[serde(deserialize_with = "null_as_default")]
    pub range: f32,
}

/// 上游对空切片、空字段输出 `null`，按默认值处理
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

impl DetectResponse {
    /// 按顺序拼接所有结果的标签，保留重复项
    #[must_use]
    pub fn flatten_tags(&self) -> Vec<String> {
        self.result
            .iter()
            .flatten()
            .flat_map(|hit| hit.tags.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn request_uses_upstream_field_names() {
        let request = DetectRequest {
            version: DETECT_PROTOCOL_VERSION,
            appkey: "k".into(),
            app: AppInfo {
                platform: "ios".into(),
                ..AppInfo::default()
            },
            device: DeviceInfo {
                device_id: "d1".into(),
                ..DeviceInfo::default()
            },
            ..DetectRequest::default()
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["version"], 1);
        assert_eq!(value["App"]["platform"], "ios");
        assert_eq!(value["Device"]["device_id"], "d1");
        assert!(value["Device"].get("osv").is_some());
        assert!(value["Device"].get("lon").is_some());
        assert!(value["User"].get("wx_open_id").is_some());
    }

    #[test]
    fn flatten_tags_keeps_order_and_duplicates() {
        let response: DetectResponse = serde_json::from_value(serde_json::json!({
            "msg": "OK",
            "response_id": "R1",
            "count": 3,
            "result": [
                {"tags": ["a", "b"], "power": 0.5},
                {"tags": []},
                {"tags": ["c", "a"], "channel": 1}
            ]
        }))
        .unwrap();

        assert_eq!(response.flatten_tags(), vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn null_fields_are_treated_as_empty() {
        let response: DetectResponse = serde_json::from_value(serde_json::json!({
            "msg": "OK",
            "response_id": "R1",
            "count": null,
            "result": [
                {"tags": ["a"]},
                {"tags": null, "power": null, "channel": null}
            ]
        }))
        .unwrap();

        assert_eq!(response.count, 0);
        assert_eq!(response.flatten_tags(), vec!["a"]);
        assert_eq!(response.result.as_ref().unwrap()[1], DetectHit::default());
    }

    #[test]
    fn missing_result_flattens_to_empty() {
        let response: DetectResponse =
            serde_json::from_value(serde_json::json!({"msg": "OK", "result": null})).unwrap();
        assert!(response.flatten_tags().is_empty());
    }

    #[test]
    fn platform_parse_is_case_sensitive() {
        assert_eq!(Platform::parse("ios"), Platform::Ios);
        assert_eq!(Platform::parse("wx_app"), Platform::WxApp);
        assert_eq!(Platform::parse("IOS"), Platform::Other("IOS".into()));
        assert_eq!(Platform::parse("IOS").as_str(), "IOS");
    }
}
