pub mod api;
pub mod fanout;
pub mod local_store;
pub mod notification;
pub mod push;
pub mod reconciler;
pub mod resolver;
pub mod strapi;

// 重新导出常用类型
pub use api::ContentApi;
pub use fanout::{DeliveryBatch, FailedDelivery, FanoutCreator, FanoutOutcome};
pub use local_store::{FileBackend, LocalNotificationStore, MemoryBackend, PruneReport, RetentionPolicy, StoreBackend};
pub use notification::{NotificationService, NotifyReport};
pub use push::{HttpPushGateway, PushDispatcher, PushGateway, PushTokenRegistry};
pub use reconciler::{DeliveryReconciler, MutationOutcome, PendingMutation, ViewMode};
pub use resolver::TargetResolver;
pub use strapi::{AuthProvider, StaticToken, StrapiClient};
