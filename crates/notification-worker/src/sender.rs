//! 邮件发送
//!
//! `MailTransport` 抽象一次实际投递，`EmailSender` 在其上叠加有界重试、
//! 线性退避与单次尝试超时，并把所有结果收敛为 bool：发送方永远不会把错误抛给投递周期。

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use alert_shared::config::MailConfig;
use alert_shared::observability::metrics;
use alert_shared::retry::{RetryPolicy, retry_with_policy};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{NotificationError, Result};

/// 一封待发送的邮件
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

/// 邮件投递通道
///
/// 返回 `TransientDelivery` 表示可重试，`PermanentDelivery` 表示重试也无意义。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn deliver(&self, email: &OutgoingEmail) -> Result<()>;
}

// ---------------------------------------------------------------------------
// HTTP 邮件中继
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct RelayMessage<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: &'a str,
}

/// 通过 HTTP 邮件中继投递
///
/// 5xx、429、连接失败与超时视为瞬时故障；其余 4xx 视为永久失败。
pub struct HttpMailTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    from_address: String,
}

impl HttpMailTransport {
    pub fn new(endpoint: impl Into<String>, config: &MailConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.attempt_timeout_ms))
            .build()
            .map_err(|e| NotificationError::Config(format!("创建 HTTP 客户端失败: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: config.api_key.clone(),
            from_address: config.from_address.clone(),
        })
    }
}

/// 按 HTTP 状态码划分投递错误
fn classify_status(status: reqwest::StatusCode) -> NotificationError {
    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        NotificationError::TransientDelivery(format!("邮件中继返回 HTTP {status}"))
    } else {
        NotificationError::PermanentDelivery(format!("邮件中继拒绝请求 HTTP {status}"))
    }
}

#[async_trait]
impl MailTransport for HttpMailTransport {
    async fn deliver(&self, email: &OutgoingEmail) -> Result<()> {
        let message = RelayMessage {
            from: &self.from_address,
            to: &email.to,
            subject: &email.subject,
            html: &email.html_body,
        };

        let mut request = self.client.post(&self.endpoint).json(&message);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let resp = request.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() || e.is_request() {
                NotificationError::TransientDelivery(format!("请求邮件中继失败: {e}"))
            } else {
                NotificationError::PermanentDelivery(format!("请求邮件中继失败: {e}"))
            }
        })?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(classify_status(status))
        }
    }
}

// ---------------------------------------------------------------------------
// 日志发送器
// ---------------------------------------------------------------------------

/// 只记录日志不实际发送，用于本地运行
///
/// 未配置邮件中继端点时使用。
pub struct LogMailTransport;

#[async_trait]
impl MailTransport for LogMailTransport {
    async fn deliver(&self, email: &OutgoingEmail) -> Result<()> {
        let message_id = Uuid::now_v7();
        info!(
            recipient = %email.to,
            subject = %email.subject,
            message_id = %message_id,
            body_bytes = email.html_body.len(),
            "模拟发送告警邮件"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// EmailSender
// ---------------------------------------------------------------------------

/// 带重试的邮件发送器
pub struct EmailSender {
    transport: Arc<dyn MailTransport>,
    policy: RetryPolicy,
    attempt_timeout: Duration,
}

impl EmailSender {
    pub fn new(
        transport: Arc<dyn MailTransport>,
        policy: RetryPolicy,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            policy,
            attempt_timeout,
        }
    }

    /// 按邮件配置构建：`max_attempts` 次尝试，线性退避，单次尝试超时
    pub fn from_config(transport: Arc<dyn MailTransport>, config: &MailConfig) -> Self {
        Self::new(
            transport,
            RetryPolicy::linear(config.max_attempts, Duration::from_millis(config.backoff_step_ms)),
            Duration::from_millis(config.attempt_timeout_ms),
        )
    }

    /// 发送一封邮件，仅在确认投递成功时返回 true
    ///
    /// 地址不合法或内容为空属于构建错误，不发起任何尝试直接返回 false。
    #[instrument(skip(self, to, subject, html_body), fields(recipient = %to))]
    pub async fn send(&self, to: &str, subject: &str, html_body: &str) -> bool {
        if let Err(e) = validate_message(to, html_body) {
            error!(error = %e, "邮件无法构建，放弃发送");
            metrics::record_email_delivery(false, 0);
            return false;
        }

        let email = OutgoingEmail {
            to: to.trim().to_string(),
            subject: subject.to_string(),
            html_body: html_body.to_string(),
        };
        let attempts = AtomicU32::new(0);

        let result = retry_with_policy(
            &self.policy,
            "send_email",
            NotificationError::is_transient,
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                let email = &email;
                async move {
                    let delivery = self.transport.deliver(email);
                    match tokio::time::timeout(self.attempt_timeout, delivery).await {
                        Ok(outcome) => outcome,
                        Err(_) => Err(NotificationError::TransientDelivery(format!(
                            "发送超时（{} ms）",
                            self.attempt_timeout.as_millis()
                        ))),
                    }
                }
            },
        )
        .await;

        let attempts = attempts.load(Ordering::SeqCst);
        metrics::record_email_delivery(result.is_ok(), attempts);

        match result {
            Ok(()) => {
                info!(attempts, "告警邮件发送成功");
                true
            }
            Err(e) => {
                error!(attempts, error = %e, "告警邮件发送失败，本周期该收件人未收到");
                false
            }
        }
    }
}

fn validate_message(to: &str, html_body: &str) -> Result<()> {
    let to = to.trim();
    let valid_address = to
        .split_once('@')
        .is_some_and(|(local, domain)| {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        })
        && !to.chars().any(char::is_whitespace);

    if !valid_address {
        return Err(NotificationError::PermanentDelivery(format!("收件人地址无效: {to}")));
    }
    if html_body.trim().is_empty() {
        warn!("邮件正文为空");
        return Err(NotificationError::PermanentDelivery("邮件正文为空".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn sender(transport: MockMailTransport) -> EmailSender {
        EmailSender::from_config(Arc::new(transport), &MailConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retried_three_times_with_linear_backoff() {
        let mut transport = MockMailTransport::new();
        transport
            .expect_deliver()
            .times(3)
            .returning(|_| Err(NotificationError::TransientDelivery("HTTP 503".into())));

        let started = Instant::now();
        let delivered = sender(transport).send("ada@example.com", "subject", "<p>hi</p>").await;

        assert!(!delivered);
        // 第 1 次失败后等 1s，第 2 次失败后等 2s，第 3 次失败后放弃
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_one_transient_failure() {
        let mut transport = MockMailTransport::new();
        let mut calls = 0;
        transport.expect_deliver().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Err(NotificationError::TransientDelivery("connection reset".into()))
            } else {
                Ok(())
            }
        });

        let started = Instant::now();
        assert!(sender(transport).send("ada@example.com", "subject", "<p>hi</p>").await);
        assert_eq!(started.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let mut transport = MockMailTransport::new();
        transport
            .expect_deliver()
            .times(1)
            .returning(|_| Err(NotificationError::PermanentDelivery("HTTP 400".into())));

        assert!(!sender(transport).send("ada@example.com", "subject", "<p>hi</p>").await);
    }

    #[tokio::test]
    async fn test_invalid_address_makes_no_attempt() {
        let mut transport = MockMailTransport::new();
        transport.expect_deliver().never();

        let sender = sender(transport);
        assert!(!sender.send("not-an-address", "subject", "<p>hi</p>").await);
        assert!(!sender.send("ada@example.com", "subject", "   ").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_counts_as_transient() {
        struct SlowTransport;

        #[async_trait]
        impl MailTransport for SlowTransport {
            async fn deliver(&self, _email: &OutgoingEmail) -> Result<()> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }
        }

        let config = MailConfig {
            attempt_timeout_ms: 100,
            ..MailConfig::default()
        };
        let sender = EmailSender::from_config(Arc::new(SlowTransport), &config);

        let started = Instant::now();
        assert!(!sender.send("ada@example.com", "subject", "<p>hi</p>").await);
        // 3 次超时 + 1s + 2s 退避
        assert_eq!(started.elapsed(), Duration::from_millis(3300));
    }

    #[test]
    fn test_classify_status() {
        assert!(classify_status(reqwest::StatusCode::BAD_GATEWAY).is_transient());
        assert!(classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS).is_transient());
        assert!(!classify_status(reqwest::StatusCode::UNPROCESSABLE_ENTITY).is_transient());
    }

    #[test]
    fn test_validate_message() {
        assert!(validate_message("ada@example.com", "<p>x</p>").is_ok());
        assert!(validate_message("ada@localhost", "<p>x</p>").is_err());
        assert!(validate_message("@example.com", "<p>x</p>").is_err());
        assert!(validate_message("a da@example.com", "<p>x</p>").is_err());
    }
}
