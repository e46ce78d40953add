//! 内存协作者
//!
//! 供集成测试与本地演练使用，无需数据库或邮件中继即可驱动完整的投递周期。

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{NotificationError, Result};
use crate::models::{Notification, Recipient};
use crate::recipients::RecipientDirectory;
use crate::scheduler::Ticker;
use crate::sender::{MailTransport, OutgoingEmail};
use crate::store::NotificationStore;

// ---------------------------------------------------------------------------
// 通知存储
// ---------------------------------------------------------------------------

/// 基于 DashMap 的通知存储，语义与 PostgreSQL 实现一致
#[derive(Default)]
pub struct InMemoryNotificationStore {
    rows: DashMap<Uuid, Notification>,
    /// 置位后所有读写都返回存储错误，模拟数据库不可用
    unavailable: Mutex<bool>,
}

impl InMemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock() = unavailable;
    }

    fn check_available(&self) -> Result<()> {
        if *self.unavailable.lock() {
            return Err(NotificationError::Persistence("存储不可用".to_string()));
        }
        Ok(())
    }

    /// 按创建顺序返回所有通知
    pub fn all(&self) -> Vec<Notification> {
        let mut rows: Vec<Notification> = self.rows.iter().map(|r| r.value().clone()).collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        rows
    }

    pub fn unsent_count(&self) -> usize {
        self.rows.iter().filter(|r| !r.sent).count()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn insert(&self, notification: &Notification) -> Result<()> {
        self.check_available()?;
        self.rows.insert(notification.id, notification.clone());
        Ok(())
    }

    async fn list_unsent(&self) -> Result<Vec<Notification>> {
        self.check_available()?;
        Ok(self.all().into_iter().filter(|n| !n.sent).collect())
    }

    async fn mark_sent(&self, ids: &[Uuid]) -> Result<u64> {
        self.check_available()?;
        let now = Utc::now();
        let mut changed = 0;
        for id in ids {
            if let Some(mut row) = self.rows.get_mut(id)
                && !row.sent
            {
                row.sent = true;
                row.sent_at = Some(now);
                changed += 1;
            }
        }
        Ok(changed)
    }
}

// ---------------------------------------------------------------------------
// 收件人目录
// ---------------------------------------------------------------------------

/// 固定的收件人列表，只返回开启通知的收件人
pub struct StaticRecipientDirectory {
    recipients: Vec<Recipient>,
}

impl StaticRecipientDirectory {
    pub fn new(recipients: Vec<Recipient>) -> Self {
        Self { recipients }
    }
}

#[async_trait]
impl RecipientDirectory for StaticRecipientDirectory {
    async fn list_enabled_recipients(&self) -> Result<Vec<Recipient>> {
        Ok(self
            .recipients
            .iter()
            .filter(|r| r.notifications_enabled)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// 邮件通道
// ---------------------------------------------------------------------------

/// 单个收件人的模拟投递行为
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Accept,
    /// 每次都返回瞬时错误
    FailTransient,
    /// 返回永久错误，不会被重试
    FailPermanent,
}

/// 按收件人脚本化结果的邮件通道，记录每个地址的尝试次数
pub struct ScriptedMailTransport {
    behaviors: HashMap<String, Delivery>,
    default: Delivery,
    latency: Duration,
    attempts: DashMap<String, u32>,
    delivered: Mutex<Vec<OutgoingEmail>>,
}

impl ScriptedMailTransport {
    /// 未配置的地址默认投递成功
    pub fn new() -> Self {
        Self {
            behaviors: HashMap::new(),
            default: Delivery::Accept,
            latency: Duration::ZERO,
            attempts: DashMap::new(),
            delivered: Mutex::new(Vec::new()),
        }
    }

    pub fn with(mut self, address: impl Into<String>, behavior: Delivery) -> Self {
        self.behaviors.insert(address.into(), behavior);
        self
    }

    pub fn with_default(mut self, behavior: Delivery) -> Self {
        self.default = behavior;
        self
    }

    /// 每次投递前等待的模拟网络延迟
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn attempts_for(&self, address: &str) -> u32 {
        self.attempts.get(address).map(|a| *a).unwrap_or(0)
    }

    pub fn delivered(&self) -> Vec<OutgoingEmail> {
        self.delivered.lock().clone()
    }
}

impl Default for ScriptedMailTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MailTransport for ScriptedMailTransport {
    async fn deliver(&self, email: &OutgoingEmail) -> Result<()> {
        *self.attempts.entry(email.to.clone()).or_insert(0) += 1;
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match self.behaviors.get(&email.to).copied().unwrap_or(self.default) {
            Delivery::Accept => {
                self.delivered.lock().push(email.clone());
                Ok(())
            }
            Delivery::FailTransient => Err(NotificationError::TransientDelivery(format!(
                "模拟瞬时故障: {}",
                email.to
            ))),
            Delivery::FailPermanent => Err(NotificationError::PermanentDelivery(format!(
                "模拟拒收: {}",
                email.to
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// 手动触发源
// ---------------------------------------------------------------------------

/// 由 channel 驱动的 ticker，发送端全部关闭后结束
pub struct ChannelTicker {
    rx: mpsc::Receiver<()>,
}

impl ChannelTicker {
    pub fn new() -> (Self, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel(16);
        (Self { rx }, tx)
    }
}

#[async_trait]
impl Ticker for ChannelTicker {
    async fn tick(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }
}
