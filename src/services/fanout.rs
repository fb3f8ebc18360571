use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::{
    error::Result,
    models::{CreateDeliveryRequest, CreateNotificationRequest, Notification},
    services::api::ContentApi,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedDelivery {
    pub user_id: String,
    pub error: String,
}

/// 一批投递记录的创建结果，失败的接收者可以按 (notificationId, userId) 重试
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryBatch {
    pub notification_id: String,
    pub succeeded: Vec<String>,
    pub failed: Vec<FailedDelivery>,
}

impl DeliveryBatch {
    pub fn failed_user_ids(&self) -> Vec<String> {
        self.failed.iter().map(|f| f.user_id.clone()).collect()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FanoutOutcome {
    pub notification: Notification,
    pub deliveries: DeliveryBatch,
}

/// 创建规范通知并为每个接收者扇出一条投递记录
#[derive(Clone)]
pub struct FanoutCreator {
    api: Arc<dyn ContentApi>,
}

impl FanoutCreator {
    pub fn new(api: Arc<dyn ContentApi>) -> Self {
        Self { api }
    }

    /// 规范通知创建失败时直接返回错误，不会尝试任何投递
    pub async fn create(
        &self,
        request: &CreateNotificationRequest,
        recipients: &[String],
    ) -> Result<FanoutOutcome> {
        let notification = self.api.create_notification(request).await.map_err(|e| {
            error!("Failed to create notification '{}': {}", request.title, e);
            e
        })?;
        info!(
            "Created notification {} for {} recipients",
            notification.id,
            recipients.len()
        );

        let deliveries = self.deliver(&notification.id, unique(recipients)).await;

        Ok(FanoutOutcome {
            notification,
            deliveries,
        })
    }

    /// 只为还没有投递记录的用户补建，重复调用不会产生重复记录
    pub async fn retry(&self, notification_id: &str, user_ids: &[String]) -> Result<DeliveryBatch> {
        let user_ids = unique(user_ids);
        let existing: HashSet<String> = self
            .api
            .find_deliveries(notification_id, &user_ids)
            .await?
            .into_iter()
            .map(|d| d.user_id)
            .collect();

        let (already, pending): (Vec<String>, Vec<String>) =
            user_ids.into_iter().partition(|id| existing.contains(id));
        if !already.is_empty() {
            debug!(
                "{} recipients of notification {} already have deliveries",
                already.len(),
                notification_id
            );
        }

        let mut batch = self.deliver(notification_id, pending).await;
        batch.succeeded.extend(already);
        Ok(batch)
    }

    async fn deliver(&self, notification_id: &str, recipients: Vec<String>) -> DeliveryBatch {
        let tasks = recipients.into_iter().map(|user_id| {
            let request = CreateDeliveryRequest::new(&user_id, notification_id);
            async move {
                let result = self.api.create_delivery(&request).await;
                (user_id, result)
            }
        });

        let mut batch = DeliveryBatch {
            notification_id: notification_id.to_string(),
            succeeded: Vec::new(),
            failed: Vec::new(),
        };

        for (user_id, result) in join_all(tasks).await {
            match result {
                Ok(_) => batch.succeeded.push(user_id),
                Err(e) => {
                    warn!(
                        "Failed to create delivery of notification {} for user {}: {}",
                        notification_id, user_id, e
                    );
                    batch.failed.push(FailedDelivery {
                        user_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Fan-out for notification {}: {} succeeded, {} failed",
            notification_id,
            batch.succeeded.len(),
            batch.failed.len()
        );
        batch
    }
}

fn unique(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter().filter(|id| seen.insert(id.as_str())).cloned().collect()
}
