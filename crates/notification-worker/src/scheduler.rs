//! 周期调度
//!
//! 由注入的 `Ticker` 驱动投递周期，收到关闭信号后退出。
//! 周期本身是普通的异步调用，测试中可以用手动 ticker 精确控制触发次数。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{error, info};

use crate::error::Result;
use crate::models::CycleResult;

/// 可被调度的投递周期
#[async_trait]
pub trait AlertCycle: Send + Sync {
    async fn run_alert_cycle(&self) -> Result<CycleResult>;
}

/// 触发源
#[async_trait]
pub trait Ticker: Send {
    /// 等待下一次触发；返回 false 表示不会再有触发
    async fn tick(&mut self) -> bool;
}

/// 固定周期触发，首次触发立即发生；错过的触发直接跳过，不补发
pub struct IntervalTicker {
    interval: Interval,
}

impl IntervalTicker {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) -> bool {
        self.interval.tick().await;
        true
    }
}

/// 投递周期调度器
pub struct Scheduler<T: Ticker> {
    ticker: T,
    cycle: Arc<dyn AlertCycle>,
}

impl<T: Ticker> Scheduler<T> {
    pub fn new(ticker: T, cycle: Arc<dyn AlertCycle>) -> Self {
        Self { ticker, cycle }
    }

    /// 主循环：每次触发执行一个周期，直到关闭或 ticker 结束
    ///
    /// 正在执行的周期会完整结束后才响应关闭信号。
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("投递调度器已启动");

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("收到关闭信号，投递调度器退出");
                        break;
                    }
                }

                more = self.ticker.tick() => {
                    if !more {
                        info!("触发源已结束，投递调度器退出");
                        break;
                    }
                    self.fire().await;
                }
            }
        }
    }

    async fn fire(&self) {
        match self.cycle.run_alert_cycle().await {
            Ok(result) => info!(
                outcome = result.outcome.as_str(),
                notifications_considered = result.notifications_considered,
                success_count = result.success_count,
                failure_count = result.failure_count,
                "调度周期结束"
            ),
            Err(e) => error!(error = %e, "投递周期无法执行，等待下次调度"),
        }
    }
}
