use serde::{Deserialize, Serialize};

use crate::utils::serde_helpers::flexible_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Web,
    Ios,
    Android,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Web => "web",
            DeviceType::Ios => "ios",
            DeviceType::Android => "android",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushToken {
    #[serde(deserialize_with = "flexible_id::deserialize")]
    pub id: String,
    #[serde(deserialize_with = "flexible_id::deserialize")]
    pub user_id: String,
    pub token: String,
    pub device_type: DeviceType,
    #[serde(default)]
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPushTokenRequest {
    pub user_id: String,
    pub token: String,
    pub device_type: DeviceType,
    pub is_active: bool,
}

/// 推送网关的请求体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    pub to: String,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
    #[serde(skip)]
    pub idempotency_key: String,
}

/// 一次推送分发的结果汇总，只用于日志与观测
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchSummary {
    pub tokens: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped_duplicates: usize,
    pub lookup_failed: bool,
    pub disabled: bool,
}
