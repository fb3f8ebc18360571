use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::delivery::Delivery;
use crate::models::notification::{
    Notification, NotificationCategory, NotificationPriority, NotificationType,
};

pub const LOCAL_ID_PREFIX: &str = "local_";
pub const FALLBACK_ID_PREFIX: &str = "fallback_";
pub const EXPORT_FORMAT_VERSION: u32 = 1;

/// 本地缓存的通知
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalCachedNotification {
    pub id: String,
    #[serde(default)]
    pub notification_id: Option<String>,
    /// 所属用户；为空表示设备级条目，对所有会话可见
    #[serde(default)]
    pub user_id: Option<String>,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub category: NotificationCategory,
    pub priority: NotificationPriority,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_fallback: bool,
}

impl LocalCachedNotification {
    /// 由规范通知重建的只读条目，没有对应的投递记录
    pub fn fallback_from(notification: &Notification, user_id: &str) -> Self {
        Self {
            id: format!("{}{}_{}", FALLBACK_ID_PREFIX, user_id, notification.id),
            notification_id: Some(notification.id.clone()),
            user_id: Some(user_id.to_string()),
            title: notification.title.clone(),
            message: notification.message.clone(),
            notification_type: notification.notification_type,
            category: notification.category,
            priority: notification.priority,
            is_read: false,
            read_at: None,
            created_at: notification.created_at,
            is_fallback: true,
        }
    }

    /// 投递记录需要带上 populate 的通知才能展示
    pub fn from_delivery(delivery: &Delivery) -> Option<Self> {
        let notification = delivery.notification.as_ref()?;
        Some(Self {
            id: delivery.id.clone(),
            notification_id: Some(delivery.notification_id.clone()),
            user_id: Some(delivery.user_id.clone()),
            title: notification.title.clone(),
            message: notification.message.clone(),
            notification_type: notification.notification_type,
            category: notification.category,
            priority: notification.priority,
            is_read: delivery.is_read,
            read_at: delivery.read_at,
            created_at: delivery.created_at,
            is_fallback: false,
        })
    }

    pub fn visible_to(&self, user_id: &str) -> bool {
        self.user_id.as_deref().map_or(true, |owner| owner == user_id)
    }
}

/// 仅在本地追加的通知
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLocalNotification {
    pub title: String,
    pub message: String,
    #[serde(rename = "type", default)]
    pub notification_type: NotificationType,
    #[serde(default)]
    pub category: NotificationCategory,
    #[serde(default)]
    pub priority: NotificationPriority,
    #[serde(default)]
    pub notification_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl NewLocalNotification {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            notification_type: NotificationType::default(),
            category: NotificationCategory::default(),
            priority: NotificationPriority::default(),
            notification_id: None,
            user_id: None,
        }
    }

    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreExport {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub notifications: Vec<LocalCachedNotification>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalStats {
    pub total: usize,
    pub unread: usize,
    pub by_type: BTreeMap<NotificationType, usize>,
    pub by_category: BTreeMap<NotificationCategory, usize>,
    pub by_priority: BTreeMap<NotificationPriority, usize>,
}

impl LocalStats {
    pub fn collect<'a>(items: impl IntoIterator<Item = &'a LocalCachedNotification>) -> Self {
        let mut stats = LocalStats::default();
        for item in items {
            stats.total += 1;
            if !item.is_read {
                stats.unread += 1;
            }
            *stats.by_type.entry(item.notification_type).or_default() += 1;
            *stats.by_category.entry(item.category).or_default() += 1;
            *stats.by_priority.entry(item.priority).or_default() += 1;
        }
        stats
    }
}
