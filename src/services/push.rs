use async_trait::async_trait;
use futures::future::join_all;
use lru::LruCache;
use parking_lot::Mutex;
use reqwest::Client;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    config::Config,
    error::{AppError, Result},
    models::{DeviceType, DispatchSummary, PushMessage, PushToken, RegisterPushTokenRequest},
    services::api::ContentApi,
};

/// 推送通道
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn send(&self, message: &PushMessage) -> Result<()>;
}

/// 通过 HTTP 调用推送网关（Expo 风格的请求体）
#[derive(Clone)]
pub struct HttpPushGateway {
    http_client: Client,
    endpoint: Url,
    access_token: Option<String>,
}

impl HttpPushGateway {
    pub fn new(config: &Config, endpoint: &str) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            endpoint: Url::parse(endpoint)?,
            access_token: config.push_access_token.clone(),
        })
    }
}

#[async_trait]
impl PushGateway for HttpPushGateway {
    async fn send(&self, message: &PushMessage) -> Result<()> {
        let mut request = self
            .http_client
            .post(self.endpoint.clone())
            .header("Idempotency-Key", &message.idempotency_key)
            .json(message);
        if let Some(token) = &self.access_token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AppError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }
}

/// 本地记住的推送键上限，更早的键交给网关的幂等键去重
pub const SENT_KEY_CAPACITY: usize = 10_000;

/// 尽力而为的推送分发，任何失败都只记录日志
#[derive(Clone)]
pub struct PushDispatcher {
    api: Arc<dyn ContentApi>,
    gateway: Option<Arc<dyn PushGateway>>,
    sent_keys: Arc<Mutex<LruCache<String, ()>>>,
}

impl PushDispatcher {
    pub fn new(api: Arc<dyn ContentApi>, gateway: Option<Arc<dyn PushGateway>>) -> Self {
        Self::with_key_capacity(api, gateway, SENT_KEY_CAPACITY)
    }

    pub fn with_key_capacity(
        api: Arc<dyn ContentApi>,
        gateway: Option<Arc<dyn PushGateway>>,
        capacity: usize,
    ) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            api,
            gateway,
            sent_keys: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    pub fn remembered_keys(&self) -> usize {
        self.sent_keys.lock().len()
    }

    /// 同一 (通知, token) 的推送键固定，重试时网关和本地都能据此去重
    pub fn idempotency_key(notification_id: &str, token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(notification_id.as_bytes());
        hasher.update(b":");
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub async fn dispatch(
        &self,
        notification_id: &str,
        recipients: &[String],
        title: &str,
        message: &str,
    ) -> DispatchSummary {
        let mut summary = DispatchSummary::default();

        let Some(gateway) = self.gateway.as_ref() else {
            debug!("Push gateway not configured, skipping push for notification {}", notification_id);
            summary.disabled = true;
            return summary;
        };

        if recipients.is_empty() {
            return summary;
        }

        let tokens = match self.api.list_active_push_tokens(recipients).await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!("Failed to load push tokens for notification {}: {}", notification_id, e);
                summary.lookup_failed = true;
                return summary;
            }
        };
        summary.tokens = tokens.len();

        let mut messages = Vec::new();
        {
            // 先占位再发送，并发的重试不会重复推送
            let mut sent = self.sent_keys.lock();
            for token in tokens {
                let key = Self::idempotency_key(notification_id, &token.token);
                if sent.contains(&key) {
                    summary.skipped_duplicates += 1;
                    continue;
                }
                sent.put(key.clone(), ());
                messages.push(PushMessage {
                    to: token.token,
                    title: title.to_string(),
                    body: message.to_string(),
                    data: json!({ "notificationId": notification_id }),
                    idempotency_key: key,
                });
            }
        }

        let results = join_all(messages.iter().map(|m| gateway.send(m))).await;
        for (message, result) in messages.iter().zip(results) {
            match result {
                Ok(()) => summary.sent += 1,
                Err(e) => {
                    warn!(
                        "Push send failed for notification {}: {}",
                        notification_id, e
                    );
                    summary.failed += 1;
                    // 失败的键释放掉，调用方可以重试
                    self.sent_keys.lock().pop(&message.idempotency_key);
                }
            }
        }

        info!(
            "Push dispatch for notification {}: {} tokens, {} sent, {} failed, {} duplicates",
            notification_id, summary.tokens, summary.sent, summary.failed, summary.skipped_duplicates
        );
        summary
    }
}

/// 推送 token 登记
/// 每个 (用户, 设备类型) 只保留一条，重新订阅时原地更新
#[derive(Clone)]
pub struct PushTokenRegistry {
    api: Arc<dyn ContentApi>,
}

impl PushTokenRegistry {
    pub fn new(api: Arc<dyn ContentApi>) -> Self {
        Self { api }
    }

    pub async fn subscribe(&self, user_id: &str, token: &str, device_type: DeviceType) -> Result<PushToken> {
        if token.trim().is_empty() {
            return Err(AppError::validation("Push token must not be empty"));
        }

        let request = RegisterPushTokenRequest {
            user_id: user_id.to_string(),
            token: token.to_string(),
            device_type,
            is_active: true,
        };

        match self.api.find_push_token(user_id, device_type).await? {
            Some(existing) if existing.token == token && existing.is_active => Ok(existing),
            Some(existing) => {
                debug!("Updating {} push token for user {}", device_type.as_str(), user_id);
                self.api.update_push_token(&existing.id, &request).await
            }
            None => {
                debug!("Registering {} push token for user {}", device_type.as_str(), user_id);
                self.api.create_push_token(&request).await
            }
        }
    }

    pub async fn unsubscribe(&self, user_id: &str, device_type: DeviceType) -> Result<Option<PushToken>> {
        let Some(existing) = self.api.find_push_token(user_id, device_type).await? else {
            return Ok(None);
        };
        if !existing.is_active {
            return Ok(Some(existing));
        }

        let request = RegisterPushTokenRequest {
            user_id: existing.user_id.clone(),
            token: existing.token.clone(),
            device_type,
            is_active: false,
        };
        self.api.update_push_token(&existing.id, &request).await.map(Some)
    }
}
