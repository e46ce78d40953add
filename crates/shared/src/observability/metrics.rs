//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。
//! 所有记录函数在未安装 recorder 时都是空操作。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出，并在指定端口启动 `/metrics` 与 `/health` 端点
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    describe_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

fn describe_metrics(service_name: &str) {
    metrics::describe_counter!(
        "hazard_events_published_total",
        "Hazard events handed to the broker, by outcome"
    );
    metrics::describe_counter!(
        "hazard_events_dropped_total",
        "Detections or events dropped as invalid, by stage and reason"
    );
    metrics::describe_counter!(
        "notifications_persisted_total",
        "Notifications stored as unsent"
    );
    metrics::describe_counter!(
        "email_deliveries_total",
        "Final per-recipient delivery outcomes"
    );
    metrics::describe_histogram!(
        "email_delivery_attempts",
        "Attempts used per recipient delivery"
    );
    metrics::describe_counter!("alert_cycles_total", "Alert cycles by outcome");
    metrics::describe_histogram!(
        "alert_cycle_duration_seconds",
        "Alert cycle duration in seconds"
    );
    metrics::describe_gauge!(
        "worker_last_run_timestamp",
        "Unix timestamp of the last completed worker run"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("指标服务监听于 {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("指标服务异常退出: {}", e);
        }
    });

    Ok(server_handle)
}

// ============================================================================
// 指标记录函数
// ============================================================================

/// 记录事件发布结果，status 为 "success" 或 "failure"
#[inline]
pub fn record_event_published(status: &'static str) {
    metrics::counter!("hazard_events_published_total", "status" => status).increment(1);
}

/// 记录被丢弃的检测结果或事件
#[inline]
pub fn record_event_dropped(stage: &'static str, reason: &'static str) {
    metrics::counter!(
        "hazard_events_dropped_total",
        "stage" => stage,
        "reason" => reason
    )
    .increment(1);
}

#[inline]
pub fn record_notification_persisted() {
    metrics::counter!("notifications_persisted_total").increment(1);
}

/// 记录单个收件人的最终投递结果
#[inline]
pub fn record_email_delivery(success: bool, attempts: u32) {
    let status = if success { "success" } else { "failure" };
    metrics::counter!("email_deliveries_total", "status" => status).increment(1);
    metrics::histogram!("email_delivery_attempts").record(f64::from(attempts));
}

/// 记录一次投递周期
#[inline]
pub fn record_alert_cycle(outcome: &'static str, duration_secs: f64) {
    metrics::counter!("alert_cycles_total", "outcome" => outcome).increment(1);
    metrics::histogram!("alert_cycle_duration_seconds", "outcome" => outcome).record(duration_secs);
}

/// 更新 worker 最后一次运行的时间戳
#[inline]
pub fn set_worker_last_run(worker: &'static str) {
    metrics::gauge!("worker_last_run_timestamp", "worker" => worker)
        .set(chrono::Utc::now().timestamp() as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_functions_do_not_panic() {
        // 未初始化 recorder 时不应 panic
        record_event_published("success");
        record_event_dropped("detector", "missing_diameter");
        record_notification_persisted();
        record_email_delivery(true, 1);
        record_email_delivery(false, 3);
        record_alert_cycle("delivered", 0.25);
        set_worker_last_run("email_dispatcher");
    }
}
