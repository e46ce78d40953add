//! 通知服务数据模型

use alert_shared::events::HazardEvent;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

/// 待投递的告警通知
///
/// 由消费端从 `HazardEvent` 一对一创建，初始为未发送；
/// 只有投递周期可以把 `sent` 从 false 改为 true，不会回退。
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Notification {
    pub id: Uuid,
    pub asteroid_name: String,
    pub close_approach_date: NaiveDate,
    pub miss_distance_km: BigDecimal,
    pub estimated_diameter_avg_m: f64,
    pub sent: bool,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl Notification {
    /// 从事件创建未发送的通知
    ///
    /// 每次调用都生成新的 id，同一事件重复投递会得到多条独立记录。
    pub fn from_event(event: HazardEvent) -> Self {
        Self {
            id: Uuid::now_v7(),
            asteroid_name: event.asteroid_name,
            close_approach_date: event.close_approach_date,
            miss_distance_km: event.miss_distance_km,
            estimated_diameter_avg_m: event.estimated_diameter_avg_m,
            sent: false,
            created_at: Utc::now(),
            sent_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Recipient
// ---------------------------------------------------------------------------

/// 订阅告警的收件人，由外部用户管理维护，本服务只读取
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Recipient {
    pub id: i64,
    pub display_name: String,
    pub email: String,
    pub notifications_enabled: bool,
}

// ---------------------------------------------------------------------------
// 周期结果
// ---------------------------------------------------------------------------

/// 单个周期内按收件人汇总的投递结果，不持久化
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryResult {
    pub success_count: usize,
    pub failure_count: usize,
}

impl DeliveryResult {
    pub fn record(&mut self, delivered: bool) {
        if delivered {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
    }

    pub fn any_success(&self) -> bool {
        self.success_count > 0
    }
}

/// 周期的结束方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// 没有未发送的通知
    NoPending,
    /// 没有开启通知的收件人
    NoRecipients,
    /// 至少一位收件人投递成功，通知已提交为已发送
    Delivered,
    /// 所有收件人均失败，通知保持未发送
    Undelivered,
    /// 已有周期在执行，本次触发被跳过
    Skipped,
}

impl CycleOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoPending => "no_pending",
            Self::NoRecipients => "no_recipients",
            Self::Delivered => "delivered",
            Self::Undelivered => "undelivered",
            Self::Skipped => "skipped",
        }
    }
}

/// 暴露给调度方的周期汇总
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleResult {
    pub notifications_considered: usize,
    pub success_count: usize,
    pub failure_count: usize,
    /// 本周期提交为已发送的通知数
    pub committed: usize,
    pub outcome: CycleOutcome,
}

impl CycleResult {
    /// 未做任何投递的空周期
    pub fn no_op(outcome: CycleOutcome, notifications_considered: usize) -> Self {
        Self {
            notifications_considered,
            success_count: 0,
            failure_count: 0,
            committed: 0,
            outcome,
        }
    }
}
