use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use validator::Validate;

use crate::{
    error::{AppError, Result},
    models::{CreateNotificationRequest, DispatchSummary, Notification},
    services::{
        fanout::{DeliveryBatch, FanoutCreator},
        push::PushDispatcher,
        resolver::TargetResolver,
    },
};

/// 一次通知发送的完整结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyReport {
    pub notification: Notification,
    pub deliveries: DeliveryBatch,
    pub push: DispatchSummary,
}

/// 通知发送：解析受众、扇出投递记录、推送
#[derive(Clone)]
pub struct NotificationService {
    resolver: TargetResolver,
    fanout: FanoutCreator,
    push: PushDispatcher,
}

impl NotificationService {
    pub fn new(resolver: TargetResolver, fanout: FanoutCreator, push: PushDispatcher) -> Self {
        Self {
            resolver,
            fanout,
            push,
        }
    }

    /// 受众解析失败时不会创建任何记录
    pub async fn notify(&self, request: CreateNotificationRequest) -> Result<NotifyReport> {
        request.validate()?;

        let recipients = self.resolver.resolve(&request.target).await?;
        if recipients.is_empty() {
            warn!("Notification '{}' resolved to no recipients", request.title);
        }

        let fanout = self.fanout.clone();
        let push = self.push.clone();
        // 已经发出的写入不受调用方取消影响
        let task = tokio::spawn(async move {
            let outcome = fanout.create(&request, &recipients).await?;
            let summary = push
                .dispatch(
                    &outcome.notification.id,
                    &recipients,
                    &outcome.notification.title,
                    &outcome.notification.message,
                )
                .await;

            Ok::<_, AppError>(NotifyReport {
                notification: outcome.notification,
                deliveries: outcome.deliveries,
                push: summary,
            })
        });

        let report = task
            .await
            .map_err(|e| AppError::Internal(format!("Notification task failed: {}", e)))??;

        info!(
            "Notification {} sent: {} delivered, {} failed, {} pushed",
            report.notification.id,
            report.deliveries.succeeded.len(),
            report.deliveries.failed.len(),
            report.push.sent
        );
        Ok(report)
    }

    /// 重试失败的接收者，已存在的投递记录不会重复创建
    pub async fn retry_failed(&self, notification_id: &str, user_ids: &[String]) -> Result<DeliveryBatch> {
        if user_ids.is_empty() {
            return Err(AppError::validation("No recipients to retry"));
        }
        self.fanout.retry(notification_id, user_ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Delivery, NotificationCategory, NotificationPriority, NotificationType, PushToken, DeviceType,
        TargetSpec, UserRecord,
    };
    use crate::services::api::{ContentApi, MockContentApi};
    use crate::services::push::MockPushGateway;
    use chrono::Utc;
    use std::sync::Arc;

    fn user(id: &str) -> UserRecord {
        UserRecord {
            id: id.to_string(),
            confirmed: true,
            blocked: false,
            role: None,
        }
    }

    fn created(request: &CreateNotificationRequest) -> Notification {
        Notification {
            id: "100".into(),
            title: request.title.clone(),
            message: request.message.clone(),
            notification_type: NotificationType::Info,
            category: NotificationCategory::General,
            priority: NotificationPriority::Medium,
            target: request.target.clone(),
            scheduled_at: None,
            expires_at: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    fn delivery(user_id: &str, notification_id: &str) -> Delivery {
        Delivery {
            id: format!("d{}", user_id),
            user_id: user_id.to_string(),
            notification_id: notification_id.to_string(),
            is_read: false,
            read_at: None,
            is_delivered: false,
            delivered_at: None,
            created_at: Utc::now(),
            notification: None,
        }
    }

    fn service(api: MockContentApi, gateway: Option<MockPushGateway>) -> NotificationService {
        let api: Arc<dyn ContentApi> = Arc::new(api);
        let gateway = gateway.map(|g| Arc::new(g) as Arc<dyn crate::services::push::PushGateway>);
        NotificationService::new(
            TargetResolver::new(api.clone()),
            FanoutCreator::new(api.clone()),
            PushDispatcher::new(api, gateway),
        )
    }

    #[tokio::test]
    async fn test_notify_all_reaches_every_user() {
        let mut api = MockContentApi::new();
        api.expect_list_users()
            .returning(|_| Ok(vec![user("1"), user("2"), user("3")]));
        api.expect_create_notification().times(1).returning(|req| Ok(created(req)));
        api.expect_create_delivery()
            .times(3)
            .returning(|req| Ok(delivery(&req.user_id, &req.notification_id)));
        api.expect_list_active_push_tokens()
            .times(1)
            .withf(|ids| ids.len() == 3 && ["1", "2", "3"].iter().all(|id| ids.contains(&id.to_string())))
            .returning(|ids| {
                Ok(ids
                    .iter()
                    .map(|id| PushToken {
                        id: format!("t{}", id),
                        user_id: id.clone(),
                        token: format!("token-{}", id),
                        device_type: DeviceType::Ios,
                        is_active: true,
                    })
                    .collect())
            });
        let mut gateway = MockPushGateway::new();
        gateway.expect_send().times(3).returning(|_| Ok(()));

        let report = service(api, Some(gateway))
            .notify(CreateNotificationRequest::new("Hello", "World", TargetSpec::All))
            .await
            .unwrap();

        assert_eq!(report.deliveries.succeeded.len(), 3);
        assert!(report.deliveries.failed.is_empty());
        assert_eq!(report.push.sent, 3);
    }

    #[tokio::test]
    async fn test_resolution_failure_creates_nothing() {
        let mut api = MockContentApi::new();
        api.expect_list_users()
            .returning(|_| Err(AppError::Api { status: 500, message: "down".into() }));
        api.expect_create_notification().never();
        api.expect_create_delivery().never();

        let err = service(api, None)
            .notify(CreateNotificationRequest::new("Hello", "World", TargetSpec::Active))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Resolution(_)));
    }

    #[tokio::test]
    async fn test_invalid_request_is_rejected() {
        let mut api = MockContentApi::new();
        api.expect_list_users().never();
        api.expect_create_notification().never();

        let err = service(api, None)
            .notify(CreateNotificationRequest::new("", "World", TargetSpec::All))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ValidatorError(_)));
    }

    #[tokio::test]
    async fn test_push_failure_does_not_fail_notify() {
        let mut api = MockContentApi::new();
        api.expect_create_notification().returning(|req| Ok(created(req)));
        api.expect_create_delivery()
            .returning(|req| Ok(delivery(&req.user_id, &req.notification_id)));
        api.expect_list_active_push_tokens()
            .returning(|_| Err(AppError::Api { status: 502, message: "gateway".into() }));
        let gateway = MockPushGateway::new();

        let target = TargetSpec::Specific { user_ids: vec!["5".into(), "5".into()] };
        let report = service(api, Some(gateway))
            .notify(CreateNotificationRequest::new("Hi", "There", target))
            .await
            .unwrap();

        assert_eq!(report.deliveries.succeeded, vec!["5"]);
        assert!(report.push.lookup_failed);
    }

    #[tokio::test]
    async fn test_retry_requires_recipients() {
        let api = MockContentApi::new();
        let err = service(api, None).retry_failed("100", &[]).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
