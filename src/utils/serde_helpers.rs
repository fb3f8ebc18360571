//! Strapi 的 ID 既可能是数字也可能是字符串，这里统一成 String

use serde::{Deserialize, Deserializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum IdValue {
    String(String),
    Number(serde_json::Number),
}

impl From<IdValue> for String {
    fn from(value: IdValue) -> Self {
        match value {
            IdValue::String(s) => s,
            IdValue::Number(n) => n.to_string(),
        }
    }
}

/// 单个 ID
pub mod flexible_id {
    use super::*;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(IdValue::deserialize(deserializer)?.into())
    }
}

/// 可选 ID，null 或缺省都视为 None
pub mod flexible_id_opt {
    use super::*;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<IdValue>::deserialize(deserializer)?.map(String::from))
    }
}

/// ID 列表，null 视为空列表
pub mod flexible_id_list {
    use super::*;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ids = Option::<Vec<IdValue>>::deserialize(deserializer)?;
        Ok(ids.unwrap_or_default().into_iter().map(String::from).collect())
    }
}

/// 可选 ID 列表，用于区分"字段缺省"与"空列表"
pub mod flexible_id_list_opt {
    use super::*;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ids = Option::<Vec<IdValue>>::deserialize(deserializer)?;
        Ok(ids.map(|ids| ids.into_iter().map(String::from).collect()))
    }
}
