use serde::{Deserialize, Serialize};

use crate::utils::serde_helpers::flexible_id;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRef {
    #[serde(deserialize_with = "flexible_id::deserialize")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// 用户表快照中解析受众需要的字段
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(deserialize_with = "flexible_id::deserialize")]
    pub id: String,
    #[serde(default)]
    pub confirmed: bool,
    #[serde(default)]
    pub blocked: bool,
    #[serde(default)]
    pub role: Option<RoleRef>,
}

impl UserRecord {
    pub fn is_active(&self) -> bool {
        self.confirmed && !self.blocked
    }

    pub fn has_role_in(&self, role_ids: &[String]) -> bool {
        self.role
            .as_ref()
            .map_or(false, |role| role_ids.iter().any(|id| *id == role.id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserFilter {
    All,
    Active,
    WithRoles,
}
