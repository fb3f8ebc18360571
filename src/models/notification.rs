use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::error::Result;
use crate::models::target::{TargetInput, TargetSpec};
use crate::utils::serde_helpers::flexible_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Info,
    Success,
    Warning,
    Error,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    General,
    Maintenance,
    Update,
    Security,
    Promotion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Default for NotificationType {
    fn default() -> Self {
        NotificationType::Info
    }
}

impl Default for NotificationCategory {
    fn default() -> Self {
        NotificationCategory::General
    }
}

impl Default for NotificationPriority {
    fn default() -> Self {
        NotificationPriority::Medium
    }
}

/// 服务端持有的规范通知
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub category: NotificationCategory,
    pub priority: NotificationPriority,
    pub target: TargetSpec,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// 已激活、已到发送时间且未过期
    pub fn is_visible_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && self.scheduled_at.map_or(true, |at| at <= now)
            && self.expires_at.map_or(true, |at| at > now)
    }
}

/// 线上的通知记录，受众字段可能是历史写法
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    #[serde(deserialize_with = "flexible_id::deserialize")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type", default)]
    pub notification_type: NotificationType,
    #[serde(default)]
    pub category: NotificationCategory,
    #[serde(default)]
    pub priority: NotificationPriority,
    #[serde(flatten)]
    pub audience: TargetInput,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl TryFrom<NotificationRecord> for Notification {
    type Error = crate::error::AppError;

    fn try_from(record: NotificationRecord) -> Result<Self> {
        Ok(Notification {
            target: record.audience.normalize()?,
            id: record.id,
            title: record.title,
            message: record.message,
            notification_type: record.notification_type,
            category: record.category,
            priority: record.priority,
            scheduled_at: record.scheduled_at,
            expires_at: record.expires_at,
            is_active: record.is_active,
            created_at: record.created_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_schedule"))]
pub struct CreateNotificationRequest {
    #[validate(length(min = 1, max = 255, message = "Title must be between 1 and 255 characters"))]
    pub title: String,
    #[validate(length(min = 1, max = 5000, message = "Message must be between 1 and 5000 characters"))]
    pub message: String,
    #[serde(rename = "type", default)]
    pub notification_type: NotificationType,
    #[serde(default)]
    pub category: NotificationCategory,
    #[serde(default)]
    pub priority: NotificationPriority,
    pub target: TargetSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

impl CreateNotificationRequest {
    pub fn new(title: impl Into<String>, message: impl Into<String>, target: TargetSpec) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            notification_type: NotificationType::default(),
            category: NotificationCategory::default(),
            priority: NotificationPriority::default(),
            target,
            scheduled_at: None,
            expires_at: None,
            is_active: true,
        }
    }
}

fn validate_schedule(request: &CreateNotificationRequest) -> std::result::Result<(), ValidationError> {
    if let (Some(scheduled), Some(expires)) = (request.scheduled_at, request.expires_at) {
        if expires <= scheduled {
            let mut err = ValidationError::new("schedule");
            err.message = Some("expiresAt must be after scheduledAt".into());
            return Err(err);
        }
    }
    Ok(())
}
