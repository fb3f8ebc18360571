use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AppError, Result};
use crate::utils::serde_helpers::{flexible_id_list, flexible_id_list_opt};

/// 通知的受众规格
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetSpec {
    /// 所有用户
    All,
    /// 已确认且未被封禁的用户
    Active,
    /// 指定角色下的用户
    RoleBased {
        #[serde(rename = "roleIds", default, deserialize_with = "flexible_id_list::deserialize")]
        role_ids: Vec<String>,
    },
    /// 指定用户
    Specific {
        #[serde(rename = "userIds", default, deserialize_with = "flexible_id_list::deserialize")]
        user_ids: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    All,
    Active,
    RoleBased,
    Specific,
}

/// 客户端能否在没有用户表的情况下判断可见性
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvaluation {
    Evaluable,
    ServerOnly,
}

impl TargetSpec {
    pub fn kind(&self) -> TargetKind {
        match self {
            TargetSpec::All => TargetKind::All,
            TargetSpec::Active => TargetKind::Active,
            TargetSpec::RoleBased { .. } => TargetKind::RoleBased,
            TargetSpec::Specific { .. } => TargetKind::Specific,
        }
    }

    // 新增变体时这里必须显式做出选择
    pub fn client_evaluation(&self) -> ClientEvaluation {
        match self {
            TargetSpec::All | TargetSpec::Specific { .. } => ClientEvaluation::Evaluable,
            TargetSpec::Active | TargetSpec::RoleBased { .. } => ClientEvaluation::ServerOnly,
        }
    }

    /// 客户端可见性判断；需要服务端数据的变体返回 None
    pub fn visible_to(&self, user_id: &str) -> Option<bool> {
        if self.client_evaluation() == ClientEvaluation::ServerOnly {
            return None;
        }
        match self {
            TargetSpec::All => Some(true),
            TargetSpec::Specific { user_ids } => Some(user_ids.iter().any(|id| id == user_id)),
            TargetSpec::Active | TargetSpec::RoleBased { .. } => None,
        }
    }
}

impl TargetKind {
    pub fn parse(raw: &str) -> Result<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "all" | "all_users" => Ok(TargetKind::All),
            "active" | "active_users" => Ok(TargetKind::Active),
            "role" | "roles" | "role_based" | "by_role" => Ok(TargetKind::RoleBased),
            "specific" | "specific_users" | "custom" | "selected" => Ok(TargetKind::Specific),
            _ => Err(AppError::Validation(format!("Unknown recipient type: {}", raw))),
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TargetKind::All => "all",
            TargetKind::Active => "active",
            TargetKind::RoleBased => "role_based",
            TargetKind::Specific => "specific",
        };
        f.write_str(name)
    }
}

/// 受众字段的原始输入，兼容历史字段名
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TargetInput {
    #[serde(default)]
    pub target: Option<TargetSpec>,

    #[serde(default, alias = "recipientType")]
    pub recipient_type: Option<String>,
    #[serde(default, alias = "targetUsers")]
    pub target_users: Option<String>,

    #[serde(default, alias = "recipientIds", deserialize_with = "flexible_id_list_opt::deserialize")]
    pub recipient_ids: Option<Vec<String>>,
    #[serde(default, alias = "targetUserIds", deserialize_with = "flexible_id_list_opt::deserialize")]
    pub target_user_ids: Option<Vec<String>>,

    #[serde(default, alias = "roleIds", deserialize_with = "flexible_id_list_opt::deserialize")]
    pub role_ids: Option<Vec<String>>,
    #[serde(default, alias = "targetRoles", deserialize_with = "flexible_id_list_opt::deserialize")]
    pub target_roles: Option<Vec<String>>,
}

impl TargetInput {
    /// 把所有历史写法归一成唯一的 TargetSpec
    pub fn normalize(self) -> Result<TargetSpec> {
        let legacy_kind = self.legacy_kind()?;

        if let Some(target) = self.target {
            if let Some(kind) = legacy_kind {
                if kind != target.kind() {
                    return Err(AppError::Validation(format!(
                        "Conflicting recipient types: target is {} but legacy field says {}",
                        target.kind(),
                        kind
                    )));
                }
            }
            return Ok(target);
        }

        let user_ids = concat_ids(self.recipient_ids, self.target_user_ids);
        let role_ids = concat_ids(self.role_ids, self.target_roles);

        let kind = match legacy_kind {
            Some(kind) => kind,
            None if !user_ids.is_empty() => TargetKind::Specific,
            None if !role_ids.is_empty() => TargetKind::RoleBased,
            None => return Err(AppError::validation("Missing recipient type")),
        };

        Ok(match kind {
            TargetKind::All => TargetSpec::All,
            TargetKind::Active => TargetSpec::Active,
            TargetKind::RoleBased => TargetSpec::RoleBased { role_ids },
            TargetKind::Specific => TargetSpec::Specific { user_ids },
        })
    }

    fn legacy_kind(&self) -> Result<Option<TargetKind>> {
        let from_recipient = self.recipient_type.as_deref().map(TargetKind::parse).transpose()?;
        let from_target = self.target_users.as_deref().map(TargetKind::parse).transpose()?;

        match (from_recipient, from_target) {
            (Some(a), Some(b)) if a != b => Err(AppError::Validation(format!(
                "Conflicting recipient types: recipient_type={} target_users={}",
                a, b
            ))),
            (Some(kind), _) | (None, Some(kind)) => Ok(Some(kind)),
            (None, None) => Ok(None),
        }
    }
}

fn concat_ids(primary: Option<Vec<String>>, legacy: Option<Vec<String>>) -> Vec<String> {
    let mut ids = primary.unwrap_or_default();
    ids.extend(legacy.unwrap_or_default());
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn normalize(value: serde_json::Value) -> Result<TargetSpec> {
        serde_json::from_value::<TargetInput>(value).unwrap().normalize()
    }

    #[test]
    fn test_canonical_shape_round_trips() {
        let spec = TargetSpec::RoleBased { role_ids: vec!["3".into()] };
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value, json!({"kind": "role_based", "roleIds": ["3"]}));

        let parsed = normalize(json!({"target": {"kind": "specific", "userIds": [1, 2]}})).unwrap();
        assert_eq!(parsed, TargetSpec::Specific { user_ids: vec!["1".into(), "2".into()] });
    }

    #[test]
    fn test_legacy_aliases_normalize_to_same_spec() {
        let a = normalize(json!({"recipient_type": "specific", "recipient_ids": [5, 6]})).unwrap();
        let b = normalize(json!({"target_users": "specific_users", "target_user_ids": ["5", "6"]})).unwrap();
        assert_eq!(a, b);

        let roles = normalize(json!({"targetUsers": "by-role", "target_roles": [2]})).unwrap();
        assert_eq!(roles, TargetSpec::RoleBased { role_ids: vec!["2".into()] });

        assert_eq!(normalize(json!({"recipient_type": "ALL"})).unwrap(), TargetSpec::All);
        assert_eq!(normalize(json!({"target_users": "active_users"})).unwrap(), TargetSpec::Active);
    }

    #[test]
    fn test_kind_inferred_from_ids() {
        let spec = normalize(json!({"target_user_ids": [9]})).unwrap();
        assert_eq!(spec, TargetSpec::Specific { user_ids: vec!["9".into()] });

        let spec = normalize(json!({"role_ids": [1]})).unwrap();
        assert_eq!(spec, TargetSpec::RoleBased { role_ids: vec!["1".into()] });
    }

    #[test]
    fn test_conflicting_and_missing_kinds_rejected() {
        assert!(matches!(
            normalize(json!({"recipient_type": "all", "target_users": "specific"})),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            normalize(json!({"target": {"kind": "all"}, "recipient_type": "active"})),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(normalize(json!({})), Err(AppError::Validation(_))));
        assert!(matches!(
            normalize(json!({"recipient_type": "everyone"})),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_agreeing_kinds_accepted() {
        let spec = normalize(json!({"recipient_type": "all", "target_users": "all_users"})).unwrap();
        assert_eq!(spec, TargetSpec::All);
    }

    #[test]
    fn test_client_evaluation() {
        assert_eq!(TargetSpec::All.visible_to("1"), Some(true));
        let specific = TargetSpec::Specific { user_ids: vec!["1".into()] };
        assert_eq!(specific.visible_to("1"), Some(true));
        assert_eq!(specific.visible_to("2"), Some(false));
        assert_eq!(TargetSpec::Active.visible_to("1"), None);
        assert_eq!(TargetSpec::RoleBased { role_ids: vec![] }.visible_to("1"), None);
        assert_eq!(TargetSpec::Active.client_evaluation(), ClientEvaluation::ServerOnly);
    }
}
