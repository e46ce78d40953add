//! 通知服务错误类型
//!
//! 区分事件校验、持久化、邮件投递与内容构建等场景，
//! 投递链路据此决定重试、记为单个收件人失败或中止整个周期。

use alert_shared::error::AlertError;
use alert_shared::events::EventValidationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotificationError {
    /// 事件字段缺失或无法解析，丢弃不重试
    #[error("事件校验失败: {0}")]
    Validation(#[from] EventValidationError),

    /// 存储读写失败，中止当前周期，由下一次调度整体重试
    #[error("通知存储失败: {0}")]
    Persistence(String),

    /// 邮件投递的瞬时故障（超时、中继 5xx / 429、连接失败）
    #[error("邮件投递暂时失败: {0}")]
    TransientDelivery(String),

    /// 不可重试的投递错误（地址非法、请求被拒绝）
    #[error("邮件投递失败: {0}")]
    PermanentDelivery(String),

    #[error("附加内容获取失败: {0}")]
    Enrichment(String),

    #[error("邮件内容构建失败: {0}")]
    ContentBuild(String),

    #[error("Kafka 错误: {0}")]
    Kafka(String),

    #[error("配置错误: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, NotificationError>;

impl NotificationError {
    /// 是否为可重试的投递错误，供邮件发送的重试执行器判定
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientDelivery(_))
    }
}

impl From<sqlx::Error> for NotificationError {
    fn from(err: sqlx::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<AlertError> for NotificationError {
    fn from(err: AlertError) -> Self {
        match err {
            AlertError::Database(e) => Self::Persistence(e.to_string()),
            AlertError::Storage(msg) => Self::Persistence(msg),
            AlertError::Kafka(msg) | AlertError::Serialization(msg) => Self::Kafka(msg),
            AlertError::Config(msg) => Self::Config(msg),
            other => Self::Persistence(other.to_string()),
        }
    }
}

/// 交给 Kafka 消费循环时的映射：存储失败可重试，消费循环会原地重新投递
impl From<NotificationError> for AlertError {
    fn from(err: NotificationError) -> Self {
        match err {
            NotificationError::Persistence(msg) => Self::Storage(msg),
            NotificationError::Validation(e) => Self::Validation(e.to_string()),
            NotificationError::Kafka(msg) => Self::Kafka(msg),
            NotificationError::Config(msg) => Self::Config(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NotificationError::TransientDelivery("邮件中继返回 503".to_string());
        assert_eq!(err.to_string(), "邮件投递暂时失败: 邮件中继返回 503");

        let err = NotificationError::from(EventValidationError::MissingField("asteroidName"));
        assert_eq!(err.to_string(), "事件校验失败: 缺少必填字段: asteroidName");
    }

    #[test]
    fn test_only_transient_delivery_is_retried() {
        assert!(NotificationError::TransientDelivery("timeout".into()).is_transient());
        assert!(!NotificationError::PermanentDelivery("400".into()).is_transient());
        assert!(!NotificationError::Persistence("down".into()).is_transient());
    }

    #[test]
    fn test_database_error_maps_to_persistence() {
        let err = NotificationError::from(AlertError::Database(sqlx::Error::PoolTimedOut));
        assert!(matches!(err, NotificationError::Persistence(_)));
    }

    #[test]
    fn test_persistence_failure_is_retryable_for_consumer_loop() {
        let err = AlertError::from(NotificationError::Persistence("connection reset".into()));
        assert!(matches!(err, AlertError::Storage(_)));
        assert!(err.is_retryable());

        let err = AlertError::from(NotificationError::Validation(
            EventValidationError::MissingField("asteroidName"),
        ));
        assert!(!err.is_retryable());
    }
}
