use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    error::Result,
    models::{
        CreateDeliveryRequest, CreateNotificationRequest, Delivery, DeviceType, Notification,
        Page, PageRequest, PushToken, RegisterPushTokenRequest, UserFilter, UserRecord,
    },
};

/// 内容服务接口
/// 通知子系统对后端的全部依赖都经过这里
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContentApi: Send + Sync {
    async fn create_notification(&self, request: &CreateNotificationRequest) -> Result<Notification>;

    async fn create_delivery(&self, request: &CreateDeliveryRequest) -> Result<Delivery>;

    /// 查找某条通知下指定用户已有的投递记录
    async fn find_deliveries(&self, notification_id: &str, user_ids: &[String]) -> Result<Vec<Delivery>>;

    /// 按创建时间倒序，带 populate 的通知
    async fn list_user_deliveries(&self, user_id: &str, page: PageRequest) -> Result<Page<Delivery>>;

    /// 规范通知流，按创建时间倒序
    async fn list_notifications(&self, page: PageRequest) -> Result<Page<Notification>>;

    async fn mark_delivery_read(&self, delivery_id: &str, read_at: DateTime<Utc>) -> Result<Delivery>;

    async fn delete_delivery(&self, delivery_id: &str) -> Result<()>;

    async fn list_users(&self, filter: UserFilter) -> Result<Vec<UserRecord>>;

    async fn list_active_push_tokens(&self, user_ids: &[String]) -> Result<Vec<PushToken>>;

    async fn find_push_token(&self, user_id: &str, device_type: DeviceType) -> Result<Option<PushToken>>;

    async fn create_push_token(&self, request: &RegisterPushTokenRequest) -> Result<PushToken>;

    async fn update_push_token(&self, token_id: &str, request: &RegisterPushTokenRequest) -> Result<PushToken>;
}
