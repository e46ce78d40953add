//! Kafka 基础设施封装
//!
//! 将 rdkafka 的底层 API 封装为 Producer/Consumer 抽象，
//! 统一消息序列化、错误映射和优雅关闭语义。

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::KafkaConfig;
use crate::error::AlertError;
use crate::retry::RetryPolicy;

// ---------------------------------------------------------------------------
// Topic 常量
// ---------------------------------------------------------------------------

/// 集中管理 Kafka topic 名称
pub mod topics {
    /// 危险天体告警事件
    pub const ASTEROID_ALERT: &str = "asteroid-alert";
}

// ---------------------------------------------------------------------------
// ConsumerMessage
// ---------------------------------------------------------------------------

/// 消费到的 Kafka 消息的统一表示
///
/// 将 rdkafka 的 `BorrowedMessage`（带生命周期约束）转换为拥有所有权的结构体，
/// 使消息可以安全地跨 await 点传递给异步处理函数。
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub timestamp: Option<i64>,
    pub headers: HashMap<String, String>,
}

impl ConsumerMessage {
    fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        let key = msg
            .key()
            .and_then(|k| std::str::from_utf8(k).ok())
            .map(String::from);

        let payload = msg.payload().map(|p| p.to_vec()).unwrap_or_default();

        let mut headers = HashMap::new();
        if let Some(h) = msg.headers() {
            for idx in 0..h.count() {
                let header = h.get(idx);
                if let Some(raw) = header.value
                    && let Ok(value) = std::str::from_utf8(raw)
                {
                    headers.insert(header.key.to_string(), value.to_string());
                }
            }
        }

        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key,
            payload,
            timestamp: msg.timestamp().to_millis(),
            headers,
        }
    }

    /// 将 JSON 格式负载反序列化为目标类型
    pub fn deserialize_payload<T: DeserializeOwned>(&self) -> Result<T, AlertError> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| AlertError::Serialization(format!("负载反序列化失败: {e}")))
    }
}

// ---------------------------------------------------------------------------
// KafkaProducer
// ---------------------------------------------------------------------------

/// Kafka 生产者
///
/// 封装 `FutureProducer` 并提供 JSON 发送方法，`FutureProducer` 内部为 Arc，可廉价 Clone。
#[derive(Clone)]
pub struct KafkaProducer {
    producer: FutureProducer,
    timeout: Duration,
}

impl KafkaProducer {
    /// 根据配置创建生产者
    ///
    /// `timeout` 同时作为 `message.timeout.ms` 与入队等待上限，超时后由调用方决定如何汇总失败。
    /// `acks=all` 保证返回成功时消息已被持久化。
    pub fn new(config: &KafkaConfig, timeout: Duration) -> Result<Self, AlertError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", "all")
            .create()
            .map_err(|e| AlertError::Kafka(format!("创建生产者失败: {e}")))?;

        info!(brokers = %config.brokers, "Kafka 生产者已初始化");
        Ok(Self { producer, timeout })
    }

    /// 发送原始字节消息，返回 (partition, offset)
    pub async fn send(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Result<(i32, i64), AlertError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        let delivery = self
            .producer
            .send(record, self.timeout)
            .await
            .map_err(|(e, _)| AlertError::Kafka(format!("发送消息失败: {e}")))?;

        debug!(
            topic,
            key,
            partition = delivery.partition,
            offset = delivery.offset,
            "消息已发送"
        );
        Ok((delivery.partition, delivery.offset))
    }

    /// 将值序列化为 JSON 后发送
    pub async fn send_json<T: Serialize>(
        &self,
        topic: &str,
        key: &str,
        value: &T,
    ) -> Result<(i32, i64), AlertError> {
        let payload = serde_json::to_vec(value)
            .map_err(|e| AlertError::Serialization(format!("序列化失败: {e}")))?;

        self.send(topic, key, &payload).await
    }
}

// ---------------------------------------------------------------------------
// KafkaConsumer
// ---------------------------------------------------------------------------

/// 单条消息的处理结论
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// 处理成功，提交 offset
    Handled,
    /// 不可重试的失败，记录后提交 offset 跳过
    Skipped,
    /// 重新投递期间收到关闭信号，不提交 offset，重启后从该消息继续
    Interrupted,
}

/// Kafka 消费者
///
/// 封装 `StreamConsumer` 并提供基于 `watch` channel 的优雅关闭语义。
/// 关闭了自动 offset 存储，只有处理得出结论的消息才会被提交。
pub struct KafkaConsumer {
    consumer: StreamConsumer,
}

impl KafkaConsumer {
    pub fn new(config: &KafkaConfig) -> Result<Self, AlertError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.consumer_group)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .create()
            .map_err(|e| AlertError::Kafka(format!("创建消费者失败: {e}")))?;

        info!(
            brokers = %config.brokers,
            group_id = %config.consumer_group,
            "Kafka 消费者已初始化"
        );
        Ok(Self { consumer })
    }

    pub fn subscribe(&self, topics: &[&str]) -> Result<(), AlertError> {
        self.consumer
            .subscribe(topics)
            .map_err(|e| AlertError::Kafka(format!("订阅 topic 失败: {e}")))?;

        info!(?topics, "已订阅 Kafka topics");
        Ok(())
    }

    /// 启动消费循环
    ///
    /// 使用 `tokio::select!` 同时监听消息流和关闭信号：
    /// - 收到消息时交给 [`settle_message`]，可重试的失败按 `redelivery` 退避后原地重新投递，
    ///   同一分区在该消息得出结论前不会前进。
    /// - 只有 `Handled` 与 `Skipped` 的消息会存储 offset，由自动提交写回 broker。
    /// - 关闭信号变为 `true` 时退出循环，正在执行的 handler 会自然完成。
    pub async fn start<F, Fut>(
        self,
        mut shutdown: watch::Receiver<bool>,
        redelivery: RetryPolicy,
        handler: F,
    ) where
        F: Fn(ConsumerMessage) -> Fut,
        Fut: Future<Output = Result<(), AlertError>>,
    {
        use futures::StreamExt;

        let stream = self.consumer.stream();
        futures::pin_mut!(stream);

        info!("Kafka 消费循环已启动");

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("收到关闭信号，Kafka 消费循环退出");
                        break;
                    }
                }

                msg_result = stream.next() => {
                    let Some(msg_result) = msg_result else {
                        warn!("Kafka 消息流意外结束");
                        break;
                    };

                    match msg_result {
                        Ok(borrowed_msg) => {
                            let msg = ConsumerMessage::from_borrowed(&borrowed_msg);
                            debug!(
                                topic = %msg.topic,
                                partition = msg.partition,
                                offset = msg.offset,
                                "收到 Kafka 消息"
                            );

                            match settle_message(&msg, &mut shutdown, &redelivery, &handler).await {
                                Settlement::Handled | Settlement::Skipped => {
                                    if let Err(e) =
                                        self.consumer.store_offset_from_message(&borrowed_msg)
                                    {
                                        error!(error = %e, offset = msg.offset, "存储 offset 失败");
                                    }
                                }
                                Settlement::Interrupted => {
                                    info!(
                                        partition = msg.partition,
                                        offset = msg.offset,
                                        "消息未处理成功即关闭，offset 不提交"
                                    );
                                    break;
                                }
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "接收 Kafka 消息出错");
                        }
                    }
                }
            }
        }
    }
}

/// 处理一条消息直到得出结论
///
/// handler 返回 `is_retryable()` 的错误时，按 `redelivery.delay_for_attempt` 退避后
/// 用同一条消息再次调用，不受 `max_retries` 限制；退避期间收到关闭信号返回 `Interrupted`。
pub async fn settle_message<F, Fut>(
    msg: &ConsumerMessage,
    shutdown: &mut watch::Receiver<bool>,
    redelivery: &RetryPolicy,
    handler: &F,
) -> Settlement
where
    F: Fn(ConsumerMessage) -> Fut,
    Fut: Future<Output = Result<(), AlertError>>,
{
    let mut attempt: u32 = 0;

    loop {
        let err = match handler(msg.clone()).await {
            Ok(()) => return Settlement::Handled,
            Err(e) => e,
        };

        if !err.is_retryable() {
            error!(
                code = err.code(),
                error = %err,
                topic = %msg.topic,
                partition = msg.partition,
                offset = msg.offset,
                "消息处理失败且不可重试，跳过"
            );
            return Settlement::Skipped;
        }

        let delay = redelivery.delay_for_attempt(attempt);
        warn!(
            code = err.code(),
            error = %err,
            attempt,
            delay_ms = delay.as_millis() as u64,
            offset = msg.offset,
            "消息处理失败，退避后重新投递"
        );
        attempt = attempt.saturating_add(1);

        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return Settlement::Interrupted;
                }
            }

            _ = tokio::time::sleep(delay) => {}
        }
    }
}
