use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error};

use crate::{
    error::{AppError, Result},
    models::{TargetSpec, UserFilter, UserRecord},
    services::api::ContentApi,
};

/// 受众解析
/// 每次都基于当前的用户快照计算，不缓存解析结果
#[derive(Clone)]
pub struct TargetResolver {
    api: Arc<dyn ContentApi>,
}

impl TargetResolver {
    pub fn new(api: Arc<dyn ContentApi>) -> Self {
        Self { api }
    }

    pub async fn resolve(&self, target: &TargetSpec) -> Result<Vec<String>> {
        let filter = match target {
            // 指定用户不做存在性校验，已删除的用户会在扇出时报告失败
            TargetSpec::Specific { user_ids } => return Ok(dedup(user_ids.iter())),
            TargetSpec::RoleBased { role_ids } if role_ids.is_empty() => return Ok(Vec::new()),
            TargetSpec::All => UserFilter::All,
            TargetSpec::Active => UserFilter::Active,
            TargetSpec::RoleBased { .. } => UserFilter::WithRoles,
        };

        let users = self.api.list_users(filter).await.map_err(|e| {
            error!("Failed to load users for {} target: {}", target.kind(), e);
            AppError::Resolution(format!("Failed to load users for {} target: {}", target.kind(), e))
        })?;

        let recipients = resolve_from_snapshot(target, &users);
        debug!(
            "Resolved {} target to {} recipients ({} users in snapshot)",
            target.kind(),
            recipients.len(),
            users.len()
        );
        Ok(recipients)
    }
}

/// 基于用户快照的纯函数解析，结果去重并保留首次出现的顺序
pub fn resolve_from_snapshot(target: &TargetSpec, users: &[UserRecord]) -> Vec<String> {
    match target {
        TargetSpec::All => dedup(users.iter().map(|u| &u.id)),
        TargetSpec::Active => dedup(users.iter().filter(|u| u.is_active()).map(|u| &u.id)),
        TargetSpec::RoleBased { role_ids } => {
            dedup(users.iter().filter(|u| u.has_role_in(role_ids)).map(|u| &u.id))
        }
        TargetSpec::Specific { user_ids } => dedup(user_ids.iter()),
    }
}

fn dedup<'a>(ids: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut seen: HashSet<&'a String> = HashSet::new();
    ids.filter(|id| seen.insert(*id)).cloned().collect()
}
