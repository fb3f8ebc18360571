use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};
use url::Url;

use crate::{
    config::Config,
    error::{AppError, Result},
    models::{
        delivery::DeliveryRecord,
        notification::NotificationRecord,
        response::{ApiEnvelope, DataBody, ListBody},
        CreateDeliveryRequest, CreateNotificationRequest, Delivery, DeviceType, MarkReadRequest,
        Notification, Page, PageRequest, PushToken, RegisterPushTokenRequest, UserFilter,
        UserRecord,
    },
    services::api::ContentApi,
};

/// 与 Strapi 默认的 maxLimit 一致，超过会被服务端截断
pub const MAX_PAGE_SIZE: u32 = 100;

/// 每个请求最多携带的 $in 取值，避免 URL 过长
const IN_FILTER_CHUNK: usize = 50;

/// 请求时提供 Authorization 头
pub trait AuthProvider: Send + Sync {
    fn authorization(&self) -> Option<String>;
}

/// 配置中的固定 API Token
#[derive(Debug, Clone)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: Option<String>) -> Self {
        Self(token)
    }
}

impl AuthProvider for StaticToken {
    fn authorization(&self) -> Option<String> {
        self.0.as_ref().map(|token| format!("Bearer {}", token))
    }
}

/// Strapi 内容服务客户端
#[derive(Clone)]
pub struct StrapiClient {
    http_client: Client,
    base_url: Url,
    auth: Arc<dyn AuthProvider>,
    user_page_size: u32,
}

impl StrapiClient {
    pub fn new(config: &Config) -> Result<Self> {
        let auth = Arc::new(StaticToken::new(config.api_token.clone()));
        Self::with_auth(config, auth)
    }

    pub fn with_auth(config: &Config, auth: Arc<dyn AuthProvider>) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        // 保证结尾有斜杠，join 时才不会丢掉 /api 前缀
        let mut base = config.api_base_url.trim_end_matches('/').to_string();
        base.push('/');

        Ok(Self {
            http_client,
            base_url: Url::parse(&base)?,
            auth,
            user_page_size: config.user_page_size.clamp(1, MAX_PAGE_SIZE),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.auth.authorization() {
            Some(value) => request.header("Authorization", value),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        let response = self.authorize(request).send().await.map_err(|e| {
            error!("Request to content API failed ({}): {}", what, e);
            AppError::Request(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!("Content API returned {} for {}", status, what);
            return Err(AppError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response)
    }

    async fn get_list<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(String, String)],
        what: &str,
    ) -> Result<(Vec<T>, Option<crate::models::response::Pagination>)> {
        let url = self.endpoint(path)?;
        debug!("GET {} {:?}", url, query);
        let response = self.send(self.http_client.get(url).query(query), what).await?;
        let body: ListBody<T> = response.json().await?;
        Ok(body.into_parts())
    }

    async fn write_one<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        body: &B,
        what: &str,
    ) -> Result<T> {
        let response = self.send(request.json(&DataBody { data: body }), what).await?;
        let envelope: ApiEnvelope<T> = response.json().await?;
        Ok(envelope.data)
    }

    /// 逐页读取直到最后一页；没有分页信息时以不满一页为结束
    async fn get_all_pages<T: DeserializeOwned>(
        &self,
        path: &str,
        base_query: &[(String, String)],
        what: &str,
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut page = 1u32;

        loop {
            let mut query = base_query.to_vec();
            query.push(("pagination[page]".into(), page.to_string()));
            query.push(("pagination[pageSize]".into(), MAX_PAGE_SIZE.to_string()));

            let (batch, pagination) = self.get_list::<T>(path, &query, what).await?;
            let fetched = batch.len() as u32;
            items.extend(batch);

            let last = match pagination {
                Some(meta) if meta.page_count > 0 => page >= meta.page_count,
                _ => fetched < MAX_PAGE_SIZE,
            };
            if last || fetched == 0 {
                break;
            }
            page += 1;
        }

        debug!("Fetched {} records over {} page(s) for {}", items.len(), page, what);
        Ok(items)
    }

    async fn fetch_users(&self, base_query: Vec<(String, String)>) -> Result<Vec<UserRecord>> {
        let mut users = Vec::new();
        let mut start = 0u32;

        loop {
            let mut query = base_query.clone();
            query.push(("pagination[start]".into(), start.to_string()));
            query.push(("pagination[limit]".into(), self.user_page_size.to_string()));

            let (page, _) = self.get_list::<UserRecord>("users", &query, "list users").await?;
            let fetched = page.len() as u32;
            users.extend(page);

            if fetched < self.user_page_size {
                break;
            }
            start += fetched;
        }

        Ok(users)
    }
}

fn page_query(page: PageRequest) -> Vec<(String, String)> {
    vec![
        ("pagination[page]".into(), page.page.to_string()),
        ("pagination[pageSize]".into(), page.page_size.to_string()),
        ("sort".into(), "createdAt:desc".into()),
    ]
}

fn in_filter(field: &str, values: &[String]) -> Vec<(String, String)> {
    values
        .iter()
        .enumerate()
        .map(|(i, value)| (format!("filters[{}][$in][{}]", field, i), value.clone()))
        .collect()
}

/// 单条记录无法解析时跳过并记录，不影响整页
fn convert_records<R, T>(records: Vec<R>, what: &str) -> Vec<T>
where
    T: TryFrom<R, Error = AppError>,
{
    records
        .into_iter()
        .filter_map(|record| match T::try_from(record) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("Skipping malformed {} record: {}", what, e);
                None
            }
        })
        .collect()
}

#[async_trait]
impl ContentApi for StrapiClient {
    async fn create_notification(&self, request: &CreateNotificationRequest) -> Result<Notification> {
        let url = self.endpoint("notifications")?;
        let record: NotificationRecord = self
            .write_one(self.http_client.post(url), request, "create notification")
            .await?;
        Notification::try_from(record)
    }

    async fn create_delivery(&self, request: &CreateDeliveryRequest) -> Result<Delivery> {
        let url = self.endpoint("deliveries")?;
        let record: DeliveryRecord = self
            .write_one(self.http_client.post(url), request, "create delivery")
            .await?;
        Delivery::try_from(record)
    }

    async fn find_deliveries(&self, notification_id: &str, user_ids: &[String]) -> Result<Vec<Delivery>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for chunk in user_ids.chunks(IN_FILTER_CHUNK) {
            let mut query = vec![("filters[notificationId][$eq]".to_string(), notification_id.to_string())];
            query.extend(in_filter("userId", chunk));
            records.extend(
                self.get_all_pages::<DeliveryRecord>("deliveries", &query, "find deliveries")
                    .await?,
            );
        }
        Ok(convert_records(records, "delivery"))
    }

    async fn list_user_deliveries(&self, user_id: &str, page: PageRequest) -> Result<Page<Delivery>> {
        let mut query = vec![("filters[userId][$eq]".to_string(), user_id.to_string())];
        query.extend(page_query(page));
        query.push(("populate".into(), "notification".into()));

        let (records, pagination) = self
            .get_list::<DeliveryRecord>("deliveries", &query, "list user deliveries")
            .await?;
        Ok(Page::from_parts(convert_records(records, "delivery"), page, pagination))
    }

    async fn list_notifications(&self, page: PageRequest) -> Result<Page<Notification>> {
        let (records, pagination) = self
            .get_list::<NotificationRecord>("notifications", &page_query(page), "list notifications")
            .await?;
        Ok(Page::from_parts(convert_records(records, "notification"), page, pagination))
    }

    async fn mark_delivery_read(&self, delivery_id: &str, read_at: DateTime<Utc>) -> Result<Delivery> {
        let url = self.endpoint(&format!("deliveries/{}", delivery_id))?;
        let record: DeliveryRecord = self
            .write_one(self.http_client.put(url), &MarkReadRequest::at(read_at), "mark delivery read")
            .await?;
        Delivery::try_from(record)
    }

    async fn delete_delivery(&self, delivery_id: &str) -> Result<()> {
        let url = self.endpoint(&format!("deliveries/{}", delivery_id))?;
        self.send(self.http_client.delete(url), "delete delivery").await?;
        Ok(())
    }

    async fn list_users(&self, filter: UserFilter) -> Result<Vec<UserRecord>> {
        let query = match filter {
            UserFilter::All => Vec::new(),
            UserFilter::Active => vec![
                ("filters[confirmed][$eq]".to_string(), "true".to_string()),
                ("filters[blocked][$eq]".to_string(), "false".to_string()),
            ],
            UserFilter::WithRoles => vec![("populate".to_string(), "role".to_string())],
        };
        self.fetch_users(query).await
    }

    async fn list_active_push_tokens(&self, user_ids: &[String]) -> Result<Vec<PushToken>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut tokens = Vec::new();
        for chunk in user_ids.chunks(IN_FILTER_CHUNK) {
            let mut query = in_filter("userId", chunk);
            query.push(("filters[isActive][$eq]".into(), "true".into()));
            tokens.extend(
                self.get_all_pages::<PushToken>("push-tokens", &query, "list push tokens")
                    .await?,
            );
        }
        Ok(tokens)
    }

    async fn find_push_token(&self, user_id: &str, device_type: DeviceType) -> Result<Option<PushToken>> {
        let query = vec![
            ("filters[userId][$eq]".to_string(), user_id.to_string()),
            ("filters[deviceType][$eq]".to_string(), device_type.as_str().to_string()),
            ("pagination[pageSize]".to_string(), "1".to_string()),
        ];
        let (tokens, _) = self.get_list::<PushToken>("push-tokens", &query, "find push token").await?;
        Ok(tokens.into_iter().next())
    }

    async fn create_push_token(&self, request: &RegisterPushTokenRequest) -> Result<PushToken> {
        let url = self.endpoint("push-tokens")?;
        self.write_one(self.http_client.post(url), request, "create push token").await
    }

    async fn update_push_token(&self, token_id: &str, request: &RegisterPushTokenRequest) -> Result<PushToken> {
        let url = self.endpoint(&format!("push-tokens/{}", token_id))?;
        self.write_one(self.http_client.put(url), request, "update push token").await
    }
}
