//! 告警邮件投递周期
//!
//! 一个周期依次经过：加载未发送通知 → 加载收件人 → 逐个构建内容 →
//! 并发投递 → 汇总 → 按提交策略标记已发送。周期之间除通知存储外不保留任何状态。
//!
//! 同一时刻只允许一个周期执行，并发触发的周期直接跳过，
//! 避免两个周期对同一批通知重复提交。

use std::sync::Arc;
use std::time::Instant;

use alert_shared::config::DispatchConfig;
use alert_shared::observability::metrics;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::content::ContentBuilder;
use crate::error::Result;
use crate::models::{CycleOutcome, CycleResult, DeliveryResult, Notification, Recipient};
use crate::policy;
use crate::recipients::RecipientDirectory;
use crate::scheduler::AlertCycle;
use crate::sender::EmailSender;
use crate::store::NotificationStore;

/// 告警邮件投递器
pub struct EmailDispatcher {
    store: Arc<dyn NotificationStore>,
    recipients: Arc<dyn RecipientDirectory>,
    content: Arc<dyn ContentBuilder>,
    sender: Arc<EmailSender>,
    subject: String,
    /// 并发投递的收件人数上限
    max_concurrency: usize,
    cycle_lock: Mutex<()>,
}

impl EmailDispatcher {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        recipients: Arc<dyn RecipientDirectory>,
        content: Arc<dyn ContentBuilder>,
        sender: Arc<EmailSender>,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            store,
            recipients,
            content,
            sender,
            subject: config.subject.clone(),
            max_concurrency: config.max_concurrency.max(1),
            cycle_lock: Mutex::new(()),
        }
    }

    /// 执行一个投递周期
    ///
    /// 只有存储不可用导致周期无法进行时才返回错误，此时不会提交任何状态；
    /// 单个收件人的失败只体现在结果计数中。
    #[instrument(name = "run_alert_cycle", skip(self))]
    pub async fn run_alert_cycle(&self) -> Result<CycleResult> {
        let Ok(_guard) = self.cycle_lock.try_lock() else {
            info!("已有投递周期在执行，本次触发跳过");
            metrics::record_alert_cycle(CycleOutcome::Skipped.as_str(), 0.0);
            return Ok(CycleResult::no_op(CycleOutcome::Skipped, 0));
        };

        let started = Instant::now();
        let result = self.run_locked().await;
        let elapsed = started.elapsed().as_secs_f64();

        match &result {
            Ok(summary) => metrics::record_alert_cycle(summary.outcome.as_str(), elapsed),
            Err(e) => {
                warn!(error = %e, "投递周期中止，下次调度将整体重试");
                metrics::record_alert_cycle("aborted", elapsed);
            }
        }
        metrics::set_worker_last_run("email_dispatcher");

        result
    }

    async fn run_locked(&self) -> Result<CycleResult> {
        let pending = self.store.list_unsent().await?;
        if pending.is_empty() {
            debug!("没有未发送的通知");
            return Ok(CycleResult::no_op(CycleOutcome::NoPending, 0));
        }

        let recipients: Vec<Recipient> = self
            .recipients
            .list_enabled_recipients()
            .await?
            .into_iter()
            .filter(|r| r.notifications_enabled)
            .collect();
        if recipients.is_empty() {
            info!(pending = pending.len(), "没有开启通知的收件人，通知保持未发送");
            return Ok(CycleResult::no_op(CycleOutcome::NoRecipients, pending.len()));
        }

        let mut delivery = DeliveryResult::default();
        let jobs = self.build_contents(&pending, &recipients, &mut delivery).await;

        for delivered in self.dispatch(jobs).await {
            delivery.record(delivered);
        }

        let ids = policy::notifications_to_commit(&delivery, &pending);
        let committed = if ids.is_empty() {
            0
        } else {
            self.store.mark_sent(&ids).await? as usize
        };

        let outcome = if delivery.any_success() {
            CycleOutcome::Delivered
        } else {
            CycleOutcome::Undelivered
        };

        info!(
            notifications_considered = pending.len(),
            recipients = recipients.len(),
            success_count = delivery.success_count,
            failure_count = delivery.failure_count,
            committed,
            outcome = outcome.as_str(),
            "投递周期完成"
        );

        Ok(CycleResult {
            notifications_considered: pending.len(),
            success_count: delivery.success_count,
            failure_count: delivery.failure_count,
            committed,
            outcome,
        })
    }

    /// 为每位收件人构建内容，构建失败记为该收件人投递失败且不发起发送
    async fn build_contents<'a>(
        &self,
        pending: &[Notification],
        recipients: &'a [Recipient],
        delivery: &mut DeliveryResult,
    ) -> Vec<(&'a Recipient, String)> {
        let mut jobs = Vec::with_capacity(recipients.len());

        for recipient in recipients {
            match self.content.build(pending, &recipient.display_name).await {
                Ok(html) if !html.trim().is_empty() => jobs.push((recipient, html)),
                Ok(_) => {
                    warn!(recipient = %recipient.email, "邮件内容为空，跳过该收件人");
                    delivery.record(false);
                }
                Err(e) => {
                    warn!(recipient = %recipient.email, error = %e, "邮件内容构建失败，跳过该收件人");
                    delivery.record(false);
                }
            }
        }

        jobs
    }

    /// 并发投递，并发度为 min(收件人数, 上限)，全部完成后返回
    async fn dispatch<'a>(&self, jobs: Vec<(&'a Recipient, String)>) -> Vec<bool> {
        if jobs.is_empty() {
            return Vec::new();
        }
        let limit = jobs.len().min(self.max_concurrency);

        stream::iter(jobs)
            .map(|(recipient, html)| async move {
                self.sender
                    .send(&recipient.email, &self.subject, &html)
                    .await
            })
            .buffer_unordered(limit)
            .boxed()
            .collect()
            .await
    }
}

#[async_trait]
impl AlertCycle for EmailDispatcher {
    async fn run_alert_cycle(&self) -> Result<CycleResult> {
        EmailDispatcher::run_alert_cycle(self).await
    }
}
