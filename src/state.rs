use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

use crate::{
    config::Config,
    error::Result,
    services::{
        api::ContentApi,
        fanout::FanoutCreator,
        local_store::{FileBackend, LocalNotificationStore, MemoryBackend, RetentionPolicy, StoreBackend},
        notification::NotificationService,
        push::{HttpPushGateway, PushDispatcher, PushGateway, PushTokenRegistry},
        reconciler::DeliveryReconciler,
        resolver::TargetResolver,
        strapi::StrapiClient,
    },
    utils::{Clock, SystemClock},
};

/// 通知子系统的共享状态
/// 每个进程构造一次，各个会话从这里取服务
#[derive(Clone)]
pub struct NotificationHub {
    /// 配置
    pub config: Config,

    /// 内容服务
    pub api: Arc<dyn ContentApi>,

    /// 时钟
    pub clock: Arc<dyn Clock>,

    /// 通知发送服务
    pub notification_service: NotificationService,

    /// 推送 token 登记
    pub push_tokens: PushTokenRegistry,

    /// 本地通知存储
    pub local_store: Arc<LocalNotificationStore>,
}

impl NotificationHub {
    pub fn from_config(config: &Config) -> Result<Self> {
        let api: Arc<dyn ContentApi> = Arc::new(StrapiClient::new(config)?);

        let gateway = match &config.push_gateway_url {
            Some(url) => Some(Arc::new(HttpPushGateway::new(config, url)?) as Arc<dyn PushGateway>),
            None => {
                info!("PUSH_GATEWAY_URL not set, push dispatch disabled");
                None
            }
        };

        let backend: Arc<dyn StoreBackend> = match &config.local_store_path {
            Some(path) => Arc::new(FileBackend::new(path)),
            None => Arc::new(MemoryBackend::new()),
        };

        Self::with_parts(config, api, gateway, backend, Arc::new(SystemClock))
    }

    /// 注入各个协作者，测试和嵌入场景使用
    pub fn with_parts(
        config: &Config,
        api: Arc<dyn ContentApi>,
        gateway: Option<Arc<dyn PushGateway>>,
        backend: Arc<dyn StoreBackend>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let local_store = Arc::new(LocalNotificationStore::open(
            backend,
            clock.clone(),
            RetentionPolicy::from_config(config),
        )?);

        let notification_service = NotificationService::new(
            TargetResolver::new(api.clone()),
            FanoutCreator::new(api.clone()),
            PushDispatcher::new(api.clone(), gateway),
        );

        Ok(Self {
            config: config.clone(),
            push_tokens: PushTokenRegistry::new(api.clone()),
            api,
            clock,
            notification_service,
            local_store,
        })
    }

    /// 为一个用户会话创建通知视图
    pub fn reconciler_for(&self, user_id: &str) -> DeliveryReconciler {
        DeliveryReconciler::new(
            self.api.clone(),
            self.local_store.clone(),
            self.clock.clone(),
            user_id,
            self.config.delivery_page_size,
        )
    }

    /// 启动本地存储的定期清理
    pub fn start_background_tasks(&self) -> JoinHandle<()> {
        let every = Duration::from_secs(self.config.prune_check_interval_secs.max(1));
        info!("Scheduling local notification prune check every {:?}", every);
        self.local_store.clone().spawn_prune_task(every)
    }
}
