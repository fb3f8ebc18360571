use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::notification::{Notification, NotificationRecord};
use crate::utils::serde_helpers::{flexible_id, flexible_id_opt};

/// 每个接收者一条的投递记录
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub id: String,
    pub user_id: String,
    pub notification_id: String,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub is_delivered: bool,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<Notification>,
}

/// 线上的投递记录；populate=notification 时带上规范通知
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRecord {
    #[serde(deserialize_with = "flexible_id::deserialize")]
    pub id: String,
    #[serde(deserialize_with = "flexible_id::deserialize")]
    pub user_id: String,
    #[serde(default, deserialize_with = "flexible_id_opt::deserialize")]
    pub notification_id: Option<String>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_delivered: bool,
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub notification: Option<NotificationRecord>,
}

impl TryFrom<DeliveryRecord> for Delivery {
    type Error = crate::error::AppError;

    fn try_from(record: DeliveryRecord) -> Result<Self> {
        let notification = record.notification.map(Notification::try_from).transpose()?;
        let notification_id = record
            .notification_id
            .or_else(|| notification.as_ref().map(|n| n.id.clone()))
            .ok_or_else(|| {
                crate::error::AppError::Validation(format!(
                    "Delivery {} has no notification reference",
                    record.id
                ))
            })?;

        Ok(Delivery {
            id: record.id,
            user_id: record.user_id,
            notification_id,
            is_read: record.is_read,
            read_at: record.read_at,
            is_delivered: record.is_delivered,
            delivered_at: record.delivered_at,
            created_at: record.created_at,
            notification,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDeliveryRequest {
    pub user_id: String,
    pub notification_id: String,
    pub is_read: bool,
    pub is_delivered: bool,
}

impl CreateDeliveryRequest {
    pub fn new(user_id: &str, notification_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            notification_id: notification_id.to_string(),
            is_read: false,
            is_delivered: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    pub is_read: bool,
    pub read_at: DateTime<Utc>,
}

impl MarkReadRequest {
    pub fn at(read_at: DateTime<Utc>) -> Self {
        Self { is_read: true, read_at }
    }
}
