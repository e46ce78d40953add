//! 告警事件发布
//!
//! 每条事件独立并发发布，等待全部确认后返回。
//! 部分失败时汇总失败事件的标识，已发布的事件不回滚。

use std::sync::Arc;
use std::time::Duration;

use alert_shared::config::PublisherConfig;
use alert_shared::error::{AlertError, Result as AlertResult};
use alert_shared::events::HazardEvent;
use alert_shared::kafka::{KafkaProducer, topics};
use alert_shared::observability::metrics;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::{error, info, instrument, warn};

use crate::error::PublishError;

/// 事件投递目标
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn send(&self, event: &HazardEvent) -> AlertResult<()>;
}

/// 写入告警 topic 的 Kafka 目标
pub struct KafkaEventSink {
    producer: KafkaProducer,
    topic: String,
}

impl KafkaEventSink {
    pub fn new(producer: KafkaProducer) -> Self {
        Self {
            producer,
            topic: topics::ASTEROID_ALERT.to_string(),
        }
    }
}

#[async_trait]
impl EventSink for KafkaEventSink {
    async fn send(&self, event: &HazardEvent) -> AlertResult<()> {
        self.producer
            .send_json(&self.topic, &event.key(), event)
            .await
            .map(|_| ())
    }
}

/// 告警事件发布器
pub struct EventPublisher {
    sink: Arc<dyn EventSink>,
    max_concurrency: usize,
    timeout: Duration,
}

impl EventPublisher {
    pub fn new(sink: Arc<dyn EventSink>, config: &PublisherConfig) -> Self {
        Self {
            sink,
            max_concurrency: config.max_concurrency.max(1),
            timeout: config.timeout(),
        }
    }

    /// 发布全部事件，返回成功发布的条数
    ///
    /// 任一事件失败都返回 `PublishError::Partial`，调用方应视为部分收件人可能错过该告警，
    /// 而不是整批重发。
    #[instrument(skip(self, events), fields(total = events.len()))]
    pub async fn publish(&self, events: &[HazardEvent]) -> Result<usize, PublishError> {
        if events.is_empty() {
            return Ok(0);
        }

        let workers = events.len().min(self.max_concurrency);
        let mut outcomes: Vec<(usize, AlertResult<()>)> = stream::iter(events.iter().enumerate())
            .map(|(idx, event)| async move { (idx, self.publish_one(event).await) })
            .buffer_unordered(workers)
            .collect()
            .await;
        outcomes.sort_by_key(|(idx, _)| *idx);

        let total = events.len();
        let failed: Vec<String> = outcomes
            .iter()
            .filter(|(_, outcome)| outcome.is_err())
            .map(|(idx, _)| events[*idx].key())
            .collect();
        let published = total - failed.len();

        if failed.is_empty() {
            info!(published, "告警事件已全部发布");
            Ok(published)
        } else {
            error!(published, failed = failed.len(), total, "部分告警事件发布失败");
            Err(PublishError::Partial {
                failed,
                published,
                total,
            })
        }
    }

    async fn publish_one(&self, event: &HazardEvent) -> AlertResult<()> {
        let outcome = match tokio::time::timeout(self.timeout, self.sink.send(event)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(AlertError::ExternalServiceTimeout {
                service: "kafka".to_string(),
            }),
        };

        match &outcome {
            Ok(()) => metrics::record_event_published("success"),
            Err(e) => {
                warn!(event = %event.key(), code = e.code(), error = %e, "告警事件发布失败");
                metrics::record_event_published("failure");
            }
        }
        outcome
    }
}
