use serde::{Deserialize, Serialize};

/// Strapi 标准响应格式
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub data: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<PageMeta>,
}

/// 列表响应：内容类型接口带 data 包装，users-permissions 接口直接返回数组
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ListBody<T> {
    Enveloped(ApiEnvelope<Vec<T>>),
    Bare(Vec<T>),
}

impl<T> ListBody<T> {
    pub fn into_parts(self) -> (Vec<T>, Option<Pagination>) {
        match self {
            ListBody::Enveloped(envelope) => {
                (envelope.data, envelope.meta.and_then(|meta| meta.pagination))
            }
            ListBody::Bare(items) => (items, None),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageMeta {
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
    #[serde(default)]
    pub page_count: u32,
    #[serde(default)]
    pub total: u64,
}

/// 写请求体的 data 包装
#[derive(Debug, Serialize)]
pub struct DataBody<'a, T: Serialize> {
    pub data: &'a T,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.max(1),
        }
    }
}

/// 分页结果结构
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total: Option<u64>,
}

impl<T> Page<T> {
    pub fn from_parts(items: Vec<T>, request: PageRequest, pagination: Option<Pagination>) -> Self {
        Self {
            items,
            page: pagination.as_ref().map_or(request.page, |p| p.page),
            page_size: pagination.as_ref().map_or(request.page_size, |p| p.page_size),
            total: pagination.map(|p| p.total),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_list_body_shapes() {
        let enveloped: ListBody<u32> = serde_json::from_value(json!({
            "data": [1, 2],
            "meta": {"pagination": {"page": 2, "pageSize": 2, "pageCount": 3, "total": 6}}
        }))
        .unwrap();
        let (items, pagination) = enveloped.into_parts();
        assert_eq!(items, vec![1, 2]);
        assert_eq!(pagination.unwrap().total, 6);

        let bare: ListBody<u32> = serde_json::from_value(json!([4, 5, 6])).unwrap();
        let (items, pagination) = bare.into_parts();
        assert_eq!(items.len(), 3);
        assert!(pagination.is_none());
    }
}
