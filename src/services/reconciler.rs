use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{
    error::{AppError, Result},
    models::{cached::LOCAL_ID_PREFIX, LocalCachedNotification, PageRequest},
    services::{api::ContentApi, local_store::LocalNotificationStore},
    utils::Clock,
};

/// 当前视图的数据来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewMode {
    /// 按用户查询的投递记录，可修改
    Primary,
    /// 从规范通知流重建的只读条目
    Degraded,
    /// 只有本地存储
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationOutcome {
    Synced,
    AppliedLocally,
    Unchanged,
}

/// 离线期间记录的修改，回到主模式时重放
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingMutation {
    MarkRead { id: String, read_at: DateTime<Utc> },
    Delete { id: String },
}

impl PendingMutation {
    fn id(&self) -> &str {
        match self {
            PendingMutation::MarkRead { id, .. } | PendingMutation::Delete { id } => id,
        }
    }
}

/// 单个用户会话的通知视图
/// 主查询失败时依次降级到规范通知流和本地存储
pub struct DeliveryReconciler {
    api: Arc<dyn ContentApi>,
    store: Arc<LocalNotificationStore>,
    clock: Arc<dyn Clock>,
    user_id: String,
    page_size: u32,
    page: u32,
    mode: ViewMode,
    items: Vec<LocalCachedNotification>,
    pending: Vec<PendingMutation>,
}

impl DeliveryReconciler {
    pub fn new(
        api: Arc<dyn ContentApi>,
        store: Arc<LocalNotificationStore>,
        clock: Arc<dyn Clock>,
        user_id: impl Into<String>,
        page_size: u32,
    ) -> Self {
        Self {
            api,
            store,
            clock,
            user_id: user_id.into(),
            page_size: page_size.max(1),
            page: 1,
            mode: ViewMode::Offline,
            items: Vec::new(),
            pending: Vec::new(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    pub fn items(&self) -> &[LocalCachedNotification] {
        &self.items
    }

    pub fn pending(&self) -> &[PendingMutation] {
        &self.pending
    }

    pub fn unread_count(&self) -> usize {
        self.items.iter().filter(|item| !item.is_read).count()
    }

    /// 加载指定页，不会返回错误
    pub async fn load(&mut self, page: u32) -> ViewMode {
        self.page = page.max(1);
        let request = PageRequest::new(self.page, self.page_size);

        match self.api.list_user_deliveries(&self.user_id, request).await {
            Ok(deliveries) => {
                let items = deliveries
                    .items
                    .iter()
                    .filter_map(|delivery| {
                        let item = LocalCachedNotification::from_delivery(delivery);
                        if item.is_none() {
                            debug!("Delivery {} has no populated notification, skipping", delivery.id);
                        }
                        item
                    })
                    .collect();
                self.enter_primary(items).await;
            }
            Err(e) => {
                warn!(
                    "Primary notification query failed for user {}, falling back: {}",
                    self.user_id, e
                );
                self.enter_degraded(request).await;
            }
        }

        self.mode
    }

    pub async fn refresh(&mut self) -> ViewMode {
        self.load(self.page).await
    }

    pub async fn mark_read(&mut self, id: &str) -> Result<MutationOutcome> {
        let item = self.mutable_item(id)?;
        if item.is_read {
            return Ok(MutationOutcome::Unchanged);
        }

        let read_at = self.clock.now();
        let outcome = self.mark_read_at(id, read_at).await?;
        if outcome == MutationOutcome::Synced {
            self.refresh().await;
        }
        Ok(outcome)
    }

    pub async fn delete(&mut self, id: &str) -> Result<MutationOutcome> {
        self.mutable_item(id)?;

        if !is_local_only(id) {
            match self.api.delete_delivery(id).await {
                Ok(()) => {
                    self.forget_locally(id)?;
                    self.refresh().await;
                    return Ok(MutationOutcome::Synced);
                }
                Err(e) if e.is_gone() => {
                    info!("Delivery {} already removed on server", id);
                    self.forget_locally(id)?;
                    self.items.retain(|item| item.id != id);
                    return Ok(MutationOutcome::Synced);
                }
                Err(e) if e.is_network() => {
                    warn!("Failed to delete delivery {}, applying locally: {}", id, e);
                    self.pending.push(PendingMutation::Delete { id: id.to_string() });
                }
                Err(e) => return Err(e),
            }
        }

        self.forget_locally(id)?;
        self.items.retain(|item| item.id != id);
        Ok(MutationOutcome::AppliedLocally)
    }

    /// 回退条目被跳过；只要有一条落到本地就返回 AppliedLocally
    pub async fn mark_all_read(&mut self) -> Result<MutationOutcome> {
        let unread: Vec<String> = self
            .items
            .iter()
            .filter(|item| !item.is_read && !item.is_fallback)
            .map(|item| item.id.clone())
            .collect();
        if unread.is_empty() {
            return Ok(MutationOutcome::Unchanged);
        }

        let read_at = self.clock.now();
        let mut synced = 0;
        let mut local = 0;
        for id in &unread {
            match self.mark_read_at(id, read_at).await {
                Ok(MutationOutcome::Synced) => synced += 1,
                Ok(MutationOutcome::AppliedLocally) => local += 1,
                Ok(MutationOutcome::Unchanged) | Err(AppError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        if synced > 0 {
            self.refresh().await;
        }
        info!(
            "Marked {} notifications read for user {} ({} synced, {} local)",
            unread.len(),
            self.user_id,
            synced,
            local
        );

        Ok(if local > 0 {
            MutationOutcome::AppliedLocally
        } else {
            MutationOutcome::Synced
        })
    }

    async fn mark_read_at(&mut self, id: &str, read_at: DateTime<Utc>) -> Result<MutationOutcome> {
        if !is_local_only(id) {
            match self.api.mark_delivery_read(id, read_at).await {
                Ok(_) => {
                    self.read_locally(id)?;
                    self.apply_read(id, read_at);
                    return Ok(MutationOutcome::Synced);
                }
                Err(e) if e.is_gone() => {
                    info!("Delivery {} no longer exists on server, dropping it", id);
                    self.forget_locally(id)?;
                    self.items.retain(|item| item.id != id);
                    return Err(AppError::NotFound(format!("Notification {} not found", id)));
                }
                Err(e) if e.is_network() => {
                    warn!("Failed to mark delivery {} read, applying locally: {}", id, e);
                    self.pending.push(PendingMutation::MarkRead {
                        id: id.to_string(),
                        read_at,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        self.read_locally(id)?;
        self.apply_read(id, read_at);
        Ok(MutationOutcome::AppliedLocally)
    }

    /// 回退条目在任何网络请求之前就被拒绝
    fn mutable_item(&self, id: &str) -> Result<&LocalCachedNotification> {
        let item = self
            .items
            .iter()
            .find(|item| item.id == id)
            .ok_or_else(|| AppError::NotFound(format!("Notification {} not found", id)))?;
        if item.is_fallback {
            return Err(AppError::not_mutable(id));
        }
        Ok(item)
    }

    fn apply_read(&mut self, id: &str, read_at: DateTime<Utc>) {
        if let Some(item) = self.items.iter_mut().find(|item| item.id == id) {
            if !item.is_read {
                item.is_read = true;
                item.read_at = Some(read_at);
            }
        }
    }

    // 视图里的条目不一定已经写入本地存储
    fn read_locally(&self, id: &str) -> Result<()> {
        match self.store.mark_read(id) {
            Ok(_) | Err(AppError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn forget_locally(&self, id: &str) -> Result<()> {
        match self.store.delete(id) {
            Ok(()) | Err(AppError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn enter_primary(&mut self, mut items: Vec<LocalCachedNotification>) {
        // 本页可能早于重放取得，离线修改继续在视图上生效
        let queued = self.replay_pending().await;
        for mutation in &queued {
            match mutation {
                PendingMutation::MarkRead { id, read_at } => {
                    if let Some(item) = items.iter_mut().find(|item| &item.id == id) {
                        item.is_read = true;
                        item.read_at.get_or_insert(*read_at);
                    }
                }
                PendingMutation::Delete { id } => items.retain(|item| &item.id != id),
            }
        }

        // 已读状态单调
        for item in items.iter_mut().filter(|item| !item.is_read) {
            if let Some(cached) = self.store.get(&item.id).filter(|cached| cached.is_read) {
                item.is_read = true;
                item.read_at = cached.read_at;
            }
        }

        if let Err(e) = self.store.remove_fallbacks_for(&self.user_id) {
            warn!("Failed to drop fallback notifications from local store: {}", e);
        }
        if let Err(e) = self.store.upsert_many(items.clone()) {
            warn!("Failed to sync notifications into local store: {}", e);
        }

        debug!("Loaded {} notifications for user {} from primary source", items.len(), self.user_id);
        self.items = items;
        self.mode = ViewMode::Primary;
    }

    async fn enter_degraded(&mut self, request: PageRequest) {
        let feed = match self.api.list_notifications(request).await {
            Ok(feed) => feed,
            Err(e) => {
                warn!("Notification feed unavailable, using local store: {}", e);
                self.enter_offline();
                return;
            }
        };

        let now = self.clock.now();
        let user_id = self.user_id.as_str();
        // Active 与 RoleBased 无法在客户端判断，直接排除
        let items: Vec<LocalCachedNotification> = feed
            .items
            .iter()
            .filter(|n| n.is_visible_at(now) && n.target.visible_to(user_id) == Some(true))
            .map(|n| LocalCachedNotification::fallback_from(n, user_id))
            .collect();

        if let Err(e) = self.store.remove_fallbacks_for(&self.user_id) {
            warn!("Failed to drop stale fallback notifications: {}", e);
        }
        if let Err(e) = self.store.upsert_many(items.clone()) {
            warn!("Failed to cache fallback notifications: {}", e);
        }

        info!(
            "Degraded mode for user {}: {} of {} feed items visible",
            self.user_id,
            items.len(),
            feed.items.len()
        );
        self.items = items;
        self.mode = ViewMode::Degraded;
    }

    fn enter_offline(&mut self) {
        self.items = self.store.list_for_user(&self.user_id);
        self.mode = ViewMode::Offline;
    }

    async fn replay_pending(&mut self) -> Vec<PendingMutation> {
        if self.pending.is_empty() {
            return Vec::new();
        }

        let queued = std::mem::take(&mut self.pending);
        let total = queued.len();
        for mutation in queued.iter().cloned() {
            let result = match &mutation {
                PendingMutation::MarkRead { id, read_at } => {
                    self.api.mark_delivery_read(id, *read_at).await.map(|_| ())
                }
                PendingMutation::Delete { id } => self.api.delete_delivery(id).await,
            };

            match result {
                Ok(()) => debug!("Replayed offline mutation for {}", mutation.id()),
                Err(e) if e.is_network() => self.pending.push(mutation),
                Err(e) if e.is_gone() => {
                    info!("Delivery {} is gone, dropping offline mutation", mutation.id());
                    if let Err(e) = self.forget_locally(mutation.id()) {
                        warn!("Failed to drop delivery {} from local store: {}", mutation.id(), e);
                    }
                }
                Err(e) => warn!("Dropping offline mutation for {}: {}", mutation.id(), e),
            }
        }

        info!(
            "Replayed {} of {} offline mutations for user {}",
            total - self.pending.len(),
            total,
            self.user_id
        );
        queued
    }
}

fn is_local_only(id: &str) -> bool {
    id.starts_with(LOCAL_ID_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Delivery, NewLocalNotification, Notification, NotificationCategory, NotificationPriority,
        NotificationType, Page, TargetSpec,
    };
    use crate::services::api::MockContentApi;
    use crate::services::local_store::{MemoryBackend, RetentionPolicy};
    use crate::utils::ManualClock;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 14, 12, 0, 0).unwrap()
    }

    fn notification(id: &str, target: TargetSpec) -> Notification {
        Notification {
            id: id.to_string(),
            title: format!("notification {}", id),
            message: "body".into(),
            notification_type: NotificationType::Info,
            category: NotificationCategory::General,
            priority: NotificationPriority::Medium,
            target,
            scheduled_at: None,
            expires_at: None,
            is_active: true,
            created_at: now() - Duration::hours(1),
        }
    }

    fn delivery(id: &str, is_read: bool) -> Delivery {
        Delivery {
            id: id.to_string(),
            user_id: "7".into(),
            notification_id: format!("n-{}", id),
            is_read,
            read_at: None,
            is_delivered: true,
            delivered_at: None,
            created_at: now() - Duration::minutes(5),
            notification: Some(notification(&format!("n-{}", id), TargetSpec::All)),
        }
    }

    fn page<T>(items: Vec<T>) -> Page<T> {
        Page {
            items,
            page: 1,
            page_size: 25,
            total: None,
        }
    }

    fn offline() -> AppError {
        AppError::Api {
            status: 503,
            message: "unavailable".into(),
        }
    }

    fn shared_store() -> (Arc<LocalNotificationStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(now()));
        let store = Arc::new(
            LocalNotificationStore::open(
                Arc::new(MemoryBackend::new()),
                clock.clone(),
                RetentionPolicy::default(),
            )
            .unwrap(),
        );
        (store, clock)
    }

    fn reconciler(api: MockContentApi) -> (DeliveryReconciler, Arc<LocalNotificationStore>) {
        let (store, clock) = shared_store();
        let reconciler = DeliveryReconciler::new(Arc::new(api), store.clone(), clock, "7", 25);
        (reconciler, store)
    }

    fn gone() -> AppError {
        AppError::Api {
            status: 404,
            message: "Not Found".into(),
        }
    }

    #[tokio::test]
    async fn test_primary_load_syncs_store() {
        let mut api = MockContentApi::new();
        api.expect_list_user_deliveries()
            .returning(|_, _| Ok(page(vec![delivery("1", false), delivery("2", true)])));
        api.expect_list_notifications().never();

        let (mut reconciler, store) = reconciler(api);
        assert_eq!(reconciler.load(1).await, ViewMode::Primary);
        assert_eq!(reconciler.items().len(), 2);
        assert_eq!(reconciler.unread_count(), 1);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_not_found_enters_degraded_mode() {
        let mut api = MockContentApi::new();
        api.expect_list_user_deliveries().returning(|_, _| {
            Err(AppError::Api {
                status: 404,
                message: "Not Found".into(),
            })
        });
        api.expect_list_notifications().returning(|_| {
            Ok(page(vec![
                notification("all", TargetSpec::All),
                notification("mine", TargetSpec::Specific { user_ids: vec!["7".into(), "8".into()] }),
                notification("theirs", TargetSpec::Specific { user_ids: vec!["8".into()] }),
                notification("active", TargetSpec::Active),
                notification("role", TargetSpec::RoleBased { role_ids: vec!["1".into()] }),
            ]))
        });

        let (mut reconciler, _) = reconciler(api);
        assert_eq!(reconciler.load(1).await, ViewMode::Degraded);

        let ids: Vec<_> = reconciler
            .items()
            .iter()
            .map(|item| item.notification_id.clone().unwrap_or_default())
            .collect();
        assert_eq!(ids, vec!["all", "mine"]);
        assert!(reconciler.items().iter().all(|item| item.is_fallback));
        assert_eq!(reconciler.unread_count(), 2);
    }

    #[tokio::test]
    async fn test_fallback_items_are_not_mutable() {
        let mut api = MockContentApi::new();
        api.expect_list_user_deliveries().returning(|_, _| Err(offline()));
        api.expect_list_notifications()
            .returning(|_| Ok(page(vec![notification("all", TargetSpec::All)])));
        api.expect_mark_delivery_read().never();
        api.expect_delete_delivery().never();

        let (mut reconciler, _) = reconciler(api);
        reconciler.load(1).await;
        let id = reconciler.items()[0].id.clone();

        let err = reconciler.mark_read(&id).await.unwrap_err();
        assert!(matches!(err, AppError::NotMutable { .. }));
        assert_eq!(err.error_code(), "FALLBACK_NOT_MUTABLE");
        assert!(matches!(reconciler.delete(&id).await, Err(AppError::NotMutable { .. })));
        assert_eq!(reconciler.mark_all_read().await.unwrap(), MutationOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_offline_mark_read_applies_locally() {
        let mut api = MockContentApi::new();
        api.expect_list_user_deliveries()
            .times(1)
            .returning(|_, _| Ok(page(vec![delivery("1", false)])));
        api.expect_mark_delivery_read().times(1).returning(|_, _| Err(offline()));

        let (mut reconciler, store) = reconciler(api);
        reconciler.load(1).await;

        assert_eq!(reconciler.mark_read("1").await.unwrap(), MutationOutcome::AppliedLocally);
        assert_eq!(reconciler.unread_count(), 0);
        assert!(store.get("1").unwrap().is_read);
        assert_eq!(reconciler.pending().len(), 1);

        // 已读后再次调用不会触发请求
        assert_eq!(reconciler.mark_read("1").await.unwrap(), MutationOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_synced_mark_read_refreshes() {
        let mut api = MockContentApi::new();
        let mut seq = mockall::Sequence::new();
        api.expect_list_user_deliveries()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(page(vec![delivery("1", false)])));
        api.expect_mark_delivery_read()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(delivery("1", true)));
        api.expect_list_user_deliveries()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(page(vec![delivery("1", true)])));

        let (mut reconciler, _) = reconciler(api);
        reconciler.load(1).await;
        assert_eq!(reconciler.mark_read("1").await.unwrap(), MutationOutcome::Synced);
        assert_eq!(reconciler.unread_count(), 0);
        assert_eq!(reconciler.mode(), ViewMode::Primary);
    }

    #[tokio::test]
    async fn test_pending_mutations_replay_on_recovery() {
        let mut api = MockContentApi::new();
        let mut seq = mockall::Sequence::new();
        api.expect_list_user_deliveries()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(page(vec![delivery("1", false), delivery("2", false)])));
        api.expect_delete_delivery()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(offline()));
        api.expect_list_user_deliveries()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(page(vec![delivery("1", false), delivery("2", false)])));
        api.expect_delete_delivery()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|id| {
                assert_eq!(id.to_string(), "2");
                Ok(())
            });

        let (mut reconciler, store) = reconciler(api);
        reconciler.load(1).await;
        assert_eq!(reconciler.delete("2").await.unwrap(), MutationOutcome::AppliedLocally);
        assert!(store.get("2").is_none());

        reconciler.refresh().await;
        assert!(reconciler.pending().is_empty());
        let ids: Vec<_> = reconciler.items().iter().map(|item| item.id.clone()).collect();
        assert_eq!(ids, vec!["1"]);
    }

    #[tokio::test]
    async fn test_everything_down_uses_local_store() {
        let mut api = MockContentApi::new();
        api.expect_list_user_deliveries().returning(|_, _| Err(offline()));
        api.expect_list_notifications().returning(|_| Err(offline()));
        api.expect_mark_delivery_read().never();

        let (mut reconciler, store) = reconciler(api);
        let local = store.append(NewLocalNotification::new("saved", "offline")).unwrap();

        assert_eq!(reconciler.load(1).await, ViewMode::Offline);
        assert_eq!(reconciler.unread_count(), 1);

        // 本地条目没有对应的服务端记录
        assert_eq!(reconciler.mark_read(&local.id).await.unwrap(), MutationOutcome::AppliedLocally);
        assert_eq!(reconciler.unread_count(), 0);
        assert!(reconciler.pending().is_empty());
    }

    #[tokio::test]
    async fn test_client_errors_propagate() {
        let mut api = MockContentApi::new();
        api.expect_list_user_deliveries()
            .returning(|_, _| Ok(page(vec![delivery("1", false)])));
        api.expect_mark_delivery_read().returning(|_, _| {
            Err(AppError::Api {
                status: 403,
                message: "Forbidden".into(),
            })
        });

        let (mut reconciler, _) = reconciler(api);
        reconciler.load(1).await;
        let err = reconciler.mark_read("1").await.unwrap_err();
        assert_eq!(err.status(), Some(403));
        assert_eq!(reconciler.unread_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_item_is_not_found() {
        let mut api = MockContentApi::new();
        api.expect_list_user_deliveries().returning(|_, _| Ok(page(vec![])));

        let (mut reconciler, _) = reconciler(api);
        reconciler.load(1).await;
        assert!(matches!(reconciler.mark_read("missing").await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_sessions_sharing_a_store_stay_separate() {
        let (store, clock) = shared_store();
        let device = store.append(NewLocalNotification::new("device", "shared")).unwrap();

        let mut api_a = MockContentApi::new();
        let mut seq_a = mockall::Sequence::new();
        api_a
            .expect_list_user_deliveries()
            .times(1)
            .in_sequence(&mut seq_a)
            .returning(|_, _| Ok(page(vec![delivery("1", false)])));
        api_a
            .expect_list_user_deliveries()
            .times(1)
            .in_sequence(&mut seq_a)
            .returning(|_, _| Err(gone()));
        api_a.expect_list_notifications().returning(|_| {
            Ok(page(vec![notification(
                "private",
                TargetSpec::Specific { user_ids: vec!["7".into()] },
            )]))
        });

        let mut session_a = DeliveryReconciler::new(Arc::new(api_a), store.clone(), clock.clone(), "7", 25);
        assert_eq!(session_a.load(1).await, ViewMode::Primary);
        assert_eq!(session_a.refresh().await, ViewMode::Degraded);
        let fallback_id = session_a.items()[0].id.clone();
        assert!(store.get("1").is_some());
        assert!(store.get(&fallback_id).is_some());

        let mut api_b = MockContentApi::new();
        let mut seq_b = mockall::Sequence::new();
        api_b
            .expect_list_user_deliveries()
            .times(1)
            .in_sequence(&mut seq_b)
            .returning(|_, _| Err(offline()));
        api_b
            .expect_list_notifications()
            .times(1)
            .in_sequence(&mut seq_b)
            .returning(|_| Err(offline()));
        api_b
            .expect_list_user_deliveries()
            .times(1)
            .in_sequence(&mut seq_b)
            .returning(|_, _| Ok(page(vec![])));

        let mut session_b = DeliveryReconciler::new(Arc::new(api_b), store.clone(), clock, "8", 25);
        assert_eq!(session_b.load(1).await, ViewMode::Offline);
        let ids: Vec<_> = session_b.items().iter().map(|item| item.id.clone()).collect();
        assert_eq!(ids, vec![device.id.clone()]);

        // 另一个会话回到主模式不会清掉这个用户的回退条目
        assert_eq!(session_b.refresh().await, ViewMode::Primary);
        assert!(store.get(&fallback_id).is_some());
    }

    #[tokio::test]
    async fn test_deleted_delivery_stops_mark_read_retries() {
        let mut api = MockContentApi::new();
        let mut seq = mockall::Sequence::new();
        api.expect_list_user_deliveries()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(page(vec![delivery("1", false), delivery("2", false)])));
        api.expect_mark_delivery_read()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(offline()));
        api.expect_list_user_deliveries()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(page(vec![delivery("2", false)])));
        api.expect_mark_delivery_read()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(gone()));
        api.expect_list_user_deliveries()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(page(vec![delivery("2", false)])));

        let (mut reconciler, store) = reconciler(api);
        reconciler.load(1).await;
        assert_eq!(reconciler.mark_read("1").await.unwrap(), MutationOutcome::AppliedLocally);
        assert_eq!(reconciler.pending().len(), 1);

        reconciler.refresh().await;
        assert!(reconciler.pending().is_empty());
        assert!(store.get("1").is_none());

        reconciler.refresh().await;
        reconciler.refresh().await;
        assert!(reconciler.pending().is_empty());
    }

    #[tokio::test]
    async fn test_mark_read_on_deleted_delivery_is_not_queued() {
        let mut api = MockContentApi::new();
        api.expect_list_user_deliveries()
            .times(1)
            .returning(|_, _| Ok(page(vec![delivery("1", false)])));
        api.expect_mark_delivery_read().times(1).returning(|_, _| Err(gone()));

        let (mut reconciler, store) = reconciler(api);
        reconciler.load(1).await;

        assert!(matches!(reconciler.mark_read("1").await, Err(AppError::NotFound(_))));
        assert!(reconciler.pending().is_empty());
        assert!(reconciler.items().is_empty());
        assert!(store.get("1").is_none());
    }

    #[tokio::test]
    async fn test_delete_of_missing_delivery_counts_as_synced() {
        let mut api = MockContentApi::new();
        api.expect_list_user_deliveries()
            .times(1)
            .returning(|_, _| Ok(page(vec![delivery("1", false), delivery("2", false)])));
        api.expect_delete_delivery().times(1).returning(|_| Err(gone()));

        let (mut reconciler, store) = reconciler(api);
        reconciler.load(1).await;

        assert_eq!(reconciler.delete("2").await.unwrap(), MutationOutcome::Synced);
        assert!(reconciler.pending().is_empty());
        assert!(store.get("2").is_none());
        let ids: Vec<_> = reconciler.items().iter().map(|item| item.id.clone()).collect();
        assert_eq!(ids, vec!["1"]);
    }
}
