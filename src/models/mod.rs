pub mod cached;
pub mod delivery;
pub mod notification;
pub mod push;
pub mod response;
pub mod target;
pub mod user;

// 重新导出常用类型
pub use cached::{LocalCachedNotification, LocalStats, NewLocalNotification, StoreExport};
pub use delivery::{CreateDeliveryRequest, Delivery, MarkReadRequest};
pub use notification::{
    CreateNotificationRequest, Notification, NotificationCategory, NotificationPriority,
    NotificationType,
};
pub use push::{DeviceType, DispatchSummary, PushMessage, PushToken, RegisterPushTokenRequest};
pub use response::{Page, PageRequest};
pub use target::{ClientEvaluation, TargetInput, TargetKind, TargetSpec};
pub use user::{RoleRef, UserFilter, UserRecord};
