//! 告警事件消费者
//!
//! 从 Kafka 消费 `HazardEvent`，校验后写入一条未发送的通知。
//! 校验失败的事件记录日志后丢弃，不回退 offset 也不请求重投。
//! 存储失败先按策略有界重试，仍失败时交回消费循环原地重新投递，不提交 offset。
//! 重复投递的同一事件会产生多条独立通知。

use std::sync::Arc;

use alert_shared::error::AlertError;
use alert_shared::events::{HazardEvent, RawHazardEvent};
use alert_shared::kafka::{ConsumerMessage, KafkaConsumer, topics};
use alert_shared::observability::metrics;
use alert_shared::retry::{RetryPolicy, retry_with_policy};
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use crate::error::{NotificationError, Result};
use crate::models::Notification;
use crate::store::NotificationStore;

/// 告警事件消费者
pub struct EventConsumer {
    store: Arc<dyn NotificationStore>,
    /// 单条事件写入失败时的重试策略
    store_retry: RetryPolicy,
}

impl EventConsumer {
    /// 使用默认的指数退避重试写入
    pub fn new(store: Arc<dyn NotificationStore>) -> Self {
        Self::with_store_retry(store, RetryPolicy::default())
    }

    pub fn with_store_retry(store: Arc<dyn NotificationStore>, store_retry: RetryPolicy) -> Self {
        Self { store, store_retry }
    }

    /// 处理一条已解析的事件
    ///
    /// 不同事件可以并发调用，彼此之间没有顺序要求。
    #[instrument(skip(self, event), fields(asteroid_name = %event.asteroid_name))]
    pub async fn on_event(&self, event: HazardEvent) -> Result<Notification> {
        event.validate()?;

        let notification = Notification::from_event(event);
        retry_with_policy(
            &self.store_retry,
            "persist_notification",
            |e: &NotificationError| matches!(e, NotificationError::Persistence(_)),
            || self.store.insert(&notification),
        )
        .await?;
        metrics::record_notification_persisted();

        info!(
            notification_id = %notification.id,
            close_approach_date = %notification.close_approach_date,
            "告警通知已写入，等待投递"
        );
        Ok(notification)
    }

    /// 处理一条原始消息负载
    ///
    /// 格式错误或字段校验失败时返回 `Ok(None)` 表示已丢弃；
    /// 只有存储失败才返回错误。
    pub async fn handle_payload(&self, payload: &[u8]) -> Result<Option<Notification>> {
        let raw: RawHazardEvent = match serde_json::from_slice(payload) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "告警事件不是合法 JSON，已丢弃");
                metrics::record_event_dropped("consumer", "malformed_payload");
                return Ok(None);
            }
        };

        let event = match HazardEvent::try_from(raw) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, reason = e.reason_code(), "告警事件校验失败，已丢弃");
                metrics::record_event_dropped("consumer", e.reason_code());
                return Ok(None);
            }
        };

        match self.on_event(event).await {
            Ok(notification) => Ok(Some(notification)),
            Err(NotificationError::Validation(e)) => {
                warn!(error = %e, "告警事件校验失败，已丢弃");
                metrics::record_event_dropped("consumer", e.reason_code());
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// 消费循环的 handler
    ///
    /// 存储失败映射为可重试的 `AlertError::Storage`，由消费循环重新投递同一条消息。
    async fn handle_message(&self, msg: &ConsumerMessage) -> std::result::Result<(), AlertError> {
        if let Err(e) = self.handle_payload(&msg.payload).await {
            error!(
                error = %e,
                topic = %msg.topic,
                partition = msg.partition,
                offset = msg.offset,
                "告警事件写入失败，等待重新投递"
            );
            return Err(e.into());
        }
        Ok(())
    }

    /// 订阅告警 topic 并启动消费循环，直到收到关闭信号
    ///
    /// `redelivery` 决定存储持续不可用时重新投递同一条消息的退避间隔。
    pub async fn run(
        self,
        consumer: KafkaConsumer,
        shutdown: watch::Receiver<bool>,
        redelivery: RetryPolicy,
    ) -> Result<()> {
        consumer.subscribe(&[topics::ASTEROID_ALERT])?;
        info!(topic = topics::ASTEROID_ALERT, "告警事件消费者已启动");

        let this = &self;
        consumer
            .start(shutdown, redelivery, |msg| async move {
                this.handle_message(&msg).await
            })
            .await;

        info!("告警事件消费者已停止");
        Ok(())
    }
}
