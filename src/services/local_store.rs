use chrono::{DateTime, Months, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    config::Config,
    error::{AppError, Result},
    models::{
        cached::{EXPORT_FORMAT_VERSION, LOCAL_ID_PREFIX},
        LocalCachedNotification, LocalStats, NewLocalNotification, StoreExport,
    },
    utils::Clock,
};

/// 持久化后端，只负责整份文档的读写
pub trait StoreBackend: Send + Sync {
    fn load(&self) -> Result<Option<String>>;
    fn save(&self, contents: &str) -> Result<()>;
}

/// 内存后端
#[derive(Debug, Default)]
pub struct MemoryBackend {
    contents: Mutex<Option<String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents(contents: impl Into<String>) -> Self {
        Self {
            contents: Mutex::new(Some(contents.into())),
        }
    }

    pub fn contents(&self) -> Option<String> {
        self.contents.lock().clone()
    }
}

impl StoreBackend for MemoryBackend {
    fn load(&self) -> Result<Option<String>> {
        Ok(self.contents.lock().clone())
    }

    fn save(&self, contents: &str) -> Result<()> {
        *self.contents.lock() = Some(contents.to_string());
        Ok(())
    }
}

/// 文件后端，先写临时文件再重命名
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl StoreBackend for FileBackend {
    fn load(&self) -> Result<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, contents: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_notifications: usize,
    pub max_age_months: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_notifications: 100,
            max_age_months: 1,
        }
    }
}

impl RetentionPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_notifications: config.local_store_max.max(1),
            max_age_months: config.local_store_retention_months.max(1),
        }
    }

    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_months(Months::new(self.max_age_months))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneReport {
    pub expired: usize,
    pub overflow: usize,
}

/// 持久化的文档格式
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreDocument {
    version: u32,
    #[serde(default)]
    last_pruned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    notifications: Vec<LocalCachedNotification>,
}

#[derive(Debug, Clone, Default)]
struct StoreState {
    items: Vec<LocalCachedNotification>,
    last_pruned_at: Option<DateTime<Utc>>,
}

/// 本地通知存储
/// 有上限、按时间倒序、定期自我清理；离线时作为回退数据源
pub struct LocalNotificationStore {
    state: Mutex<StoreState>,
    backend: Arc<dyn StoreBackend>,
    clock: Arc<dyn Clock>,
    policy: RetentionPolicy,
}

impl LocalNotificationStore {
    /// 打开存储并立即检查是否需要清理
    pub fn open(backend: Arc<dyn StoreBackend>, clock: Arc<dyn Clock>, policy: RetentionPolicy) -> Result<Self> {
        let state = match backend.load() {
            Ok(Some(contents)) => match serde_json::from_str::<StoreDocument>(&contents) {
                Ok(doc) => StoreState {
                    items: doc.notifications,
                    last_pruned_at: doc.last_pruned_at,
                },
                Err(e) => {
                    warn!("Local notification store is unreadable, starting empty: {}", e);
                    StoreState::default()
                }
            },
            Ok(None) => StoreState::default(),
            Err(e) => {
                error!("Failed to load local notification store: {}", e);
                return Err(e);
            }
        };

        let store = Self {
            state: Mutex::new(state),
            backend,
            clock,
            policy,
        };
        store.prune_if_due()?;
        Ok(store)
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    pub fn list(&self) -> Vec<LocalCachedNotification> {
        self.state.lock().items.clone()
    }

    /// 某个会话可见的条目：属于该用户或不属于任何用户
    pub fn list_for_user(&self, user_id: &str) -> Vec<LocalCachedNotification> {
        self.state
            .lock()
            .items
            .iter()
            .filter(|item| item.visible_to(user_id))
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<LocalCachedNotification> {
        self.state.lock().items.iter().find(|item| item.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn unread_count(&self) -> usize {
        self.state.lock().items.iter().filter(|item| !item.is_read).count()
    }

    pub fn stats(&self) -> LocalStats {
        LocalStats::collect(self.state.lock().items.iter())
    }

    pub fn last_pruned_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().last_pruned_at
    }

    /// 追加一条本地通知，分配本地 ID 与时间戳
    pub fn append(&self, new: NewLocalNotification) -> Result<LocalCachedNotification> {
        let item = LocalCachedNotification {
            id: format!("{}{}", LOCAL_ID_PREFIX, Uuid::new_v4()),
            notification_id: new.notification_id,
            user_id: new.user_id,
            title: new.title,
            message: new.message,
            notification_type: new.notification_type,
            category: new.category,
            priority: new.priority,
            is_read: false,
            read_at: None,
            created_at: self.clock.now(),
            is_fallback: false,
        };

        let max = self.policy.max_notifications;
        self.mutate(|state| {
            state.items.insert(0, item.clone());
            state.items.truncate(max);
            Ok(())
        })?;
        Ok(item)
    }

    /// 用服务端数据覆盖同 ID 的条目，其余保持时间倒序
    pub fn upsert_many(&self, incoming: Vec<LocalCachedNotification>) -> Result<()> {
        if incoming.is_empty() {
            return Ok(());
        }
        let max = self.policy.max_notifications;
        self.mutate(|state| {
            for item in incoming {
                match state.items.iter_mut().find(|existing| existing.id == item.id) {
                    Some(existing) => {
                        // 已读状态单调，不被未读的服务端数据覆盖
                        let (was_read, read_at) = (existing.is_read, existing.read_at);
                        *existing = item;
                        if was_read && !existing.is_read {
                            existing.is_read = true;
                            existing.read_at = read_at;
                        }
                    }
                    None => state.items.push(item),
                }
            }
            state.items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            state.items.truncate(max);
            Ok(())
        })
    }

    /// 标记已读，重复调用不会改变 read_at
    pub fn mark_read(&self, id: &str) -> Result<LocalCachedNotification> {
        let now = self.clock.now();
        let mut updated = None;
        self.mutate(|state| {
            let item = find_mutable(&mut state.items, id)?;
            if !item.is_read {
                item.is_read = true;
                item.read_at = Some(now);
            }
            updated = Some(item.clone());
            Ok(())
        })?;
        updated.ok_or_else(|| AppError::not_found("Notification"))
    }

    /// 回退条目不可修改，跳过
    pub fn mark_all_read(&self) -> Result<usize> {
        let now = self.clock.now();
        let mut count = 0;
        self.mutate(|state| {
            for item in state.items.iter_mut().filter(|i| !i.is_read && !i.is_fallback) {
                item.is_read = true;
                item.read_at = Some(now);
                count += 1;
            }
            Ok(())
        })?;
        Ok(count)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        self.mutate(|state| {
            find_mutable(&mut state.items, id)?;
            state.items.retain(|item| item.id != id);
            Ok(())
        })
    }

    pub fn clear(&self) -> Result<()> {
        self.mutate(|state| {
            state.items.clear();
            Ok(())
        })
    }

    /// 恢复主模式后丢弃重建的回退条目
    pub fn remove_fallbacks(&self) -> Result<usize> {
        let mut removed = 0;
        self.mutate(|state| {
            let before = state.items.len();
            state.items.retain(|item| !item.is_fallback);
            removed = before - state.items.len();
            Ok(())
        })?;
        Ok(removed)
    }

    /// 只丢弃该用户的回退条目，其他会话的不受影响
    pub fn remove_fallbacks_for(&self, user_id: &str) -> Result<usize> {
        let mut removed = 0;
        self.mutate(|state| {
            let before = state.items.len();
            state
                .items
                .retain(|item| !(item.is_fallback && item.user_id.as_deref() == Some(user_id)));
            removed = before - state.items.len();
            Ok(())
        })?;
        Ok(removed)
    }

    pub fn export(&self) -> Result<String> {
        let export = StoreExport {
            version: EXPORT_FORMAT_VERSION,
            exported_at: self.clock.now(),
            notifications: self.list(),
        };
        Ok(serde_json::to_string_pretty(&export)?)
    }

    /// 整体替换；任何格式问题都会拒绝导入且不修改现有数据
    pub fn import(&self, payload: &str) -> Result<usize> {
        let items = parse_import(payload)?;
        let max = self.policy.max_notifications;
        let mut imported = 0;
        self.mutate(|state| {
            state.items = items;
            state.items.truncate(max);
            imported = state.items.len();
            Ok(())
        })?;
        info!("Imported {} notifications into local store", imported);
        Ok(imported)
    }

    /// 删除超过保留期的条目并截断到上限
    pub fn prune(&self) -> Result<PruneReport> {
        let now = self.clock.now();
        let cutoff = self.policy.cutoff(now);
        let max = self.policy.max_notifications;
        let mut report = PruneReport::default();

        self.mutate(|state| {
            let before = state.items.len();
            state.items.retain(|item| item.created_at >= cutoff);
            report.expired = before - state.items.len();

            state.items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            if state.items.len() > max {
                report.overflow = state.items.len() - max;
                state.items.truncate(max);
            }
            state.last_pruned_at = Some(now);
            Ok(())
        })?;

        info!(
            "Local notification prune: removed {} expired, {} overflow",
            report.expired, report.overflow
        );
        Ok(report)
    }

    /// 从未清理过或距上次清理满一个月时执行
    pub fn prune_if_due(&self) -> Result<Option<PruneReport>> {
        let now = self.clock.now();
        let due = match self.last_pruned_at() {
            None => true,
            Some(last) => last
                .checked_add_months(Months::new(1))
                .map_or(true, |next| now >= next),
        };

        if !due {
            debug!("Local notification prune not due yet");
            return Ok(None);
        }
        self.prune().map(Some)
    }

    /// 后台定期检查清理计划
    pub fn spawn_prune_task(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            // 第一次 tick 立即返回，打开存储时已经检查过
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(e) = self.prune_if_due() {
                    error!("Failed to prune local notification store: {}", e);
                }
            }
        })
    }

    /// 在副本上修改，持久化成功后再提交；整个过程持有锁
    fn mutate<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut StoreState) -> Result<()>,
    {
        let mut guard = self.state.lock();
        let mut next = guard.clone();
        f(&mut next)?;

        let doc = StoreDocument {
            version: EXPORT_FORMAT_VERSION,
            last_pruned_at: next.last_pruned_at,
            notifications: next.items.clone(),
        };
        let contents = serde_json::to_string(&doc)?;
        self.backend.save(&contents).map_err(|e| {
            error!("Failed to persist local notification store: {}", e);
            e
        })?;

        *guard = next;
        Ok(())
    }
}

fn find_mutable<'a>(items: &'a mut [LocalCachedNotification], id: &str) -> Result<&'a mut LocalCachedNotification> {
    let item = items
        .iter_mut()
        .find(|item| item.id == id)
        .ok_or_else(|| AppError::NotFound(format!("Notification {} not found", id)))?;
    if item.is_fallback {
        return Err(AppError::not_mutable(id));
    }
    Ok(item)
}

fn parse_import(payload: &str) -> Result<Vec<LocalCachedNotification>> {
    let value: serde_json::Value = serde_json::from_str(payload)
        .map_err(|e| AppError::Validation(format!("Import payload is not valid JSON: {}", e)))?;

    let object = value
        .as_object()
        .ok_or_else(|| AppError::validation("Import payload must be an object"))?;

    if let Some(version) = object.get("version") {
        match version.as_u64() {
            Some(v) if v >= 1 && v <= EXPORT_FORMAT_VERSION as u64 => {}
            _ => {
                return Err(AppError::Validation(format!(
                    "Unsupported import format version: {}",
                    version
                )))
            }
        }
    }

    let entries = object
        .get("notifications")
        .and_then(|n| n.as_array())
        .ok_or_else(|| AppError::validation("Import payload field 'notifications' must be an array"))?;

    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            serde_json::from_value::<LocalCachedNotification>(entry.clone()).map_err(|e| {
                AppError::Validation(format!("Invalid notification at index {}: {}", index, e))
            })
        })
        .collect()
}
