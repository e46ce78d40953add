//! 告警通知工作者入口
//!
//! 同时运行事件消费循环与邮件投递调度器，收到 Ctrl-C 后两者优雅退出。

use std::sync::Arc;

use alert_shared::{
    config::AppConfig, database::Database, kafka::KafkaConsumer, observability, retry::RetryPolicy,
};
use anyhow::Result;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use notification_worker::{
    consumer::EventConsumer,
    content::{AlertContentBuilder, enrichment::ApodClient},
    dispatcher::EmailDispatcher,
    recipients::PgRecipientDirectory,
    scheduler::{IntervalTicker, Scheduler},
    sender::{EmailSender, HttpMailTransport, LogMailTransport, MailTransport},
    store::PgNotificationStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载配置并初始化可观测性
    let config = AppConfig::load("notification-worker")?;
    let obs_config = config.observability.clone().with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!(environment = %config.environment, "Starting notification-worker...");

    // 2. 数据库与迁移
    let db = Database::connect(&config.database).await?;
    db.health_check().await?;
    let pool = db.pool().clone();
    PgNotificationStore::migrate(&pool).await?;
    info!("Database connection established");

    let store = Arc::new(PgNotificationStore::new(pool.clone()));
    let recipients = Arc::new(PgRecipientDirectory::new(pool.clone()));

    // 3. 邮件通道：未配置中继时只记录日志
    let transport: Arc<dyn MailTransport> = match config.mail.endpoint.as_deref() {
        Some(endpoint) if !endpoint.is_empty() => {
            Arc::new(HttpMailTransport::new(endpoint, &config.mail)?)
        }
        _ => {
            warn!("未配置邮件中继，告警邮件只写入日志");
            Arc::new(LogMailTransport)
        }
    };
    let sender = Arc::new(EmailSender::from_config(transport, &config.mail));

    // 4. 内容构建，附加内容获取失败不影响投递
    let content = if config.apod.enabled {
        let apod = ApodClient::new(&config.apod)?;
        Arc::new(AlertContentBuilder::new(Some(Arc::new(apod))))
    } else {
        Arc::new(AlertContentBuilder::without_enrichment())
    };

    let dispatcher = Arc::new(EmailDispatcher::new(
        store.clone(),
        recipients,
        content,
        sender,
        &config.dispatch,
    ));

    // 5. 启动消费循环与调度器
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let kafka_consumer = KafkaConsumer::new(&config.kafka)?;
    let event_consumer = EventConsumer::new(store);
    let consumer_shutdown = shutdown_rx.clone();
    let consumer_handle = tokio::spawn(async move {
        event_consumer
            .run(kafka_consumer, consumer_shutdown, RetryPolicy::default())
            .await
    });

    let scheduler = Scheduler::new(IntervalTicker::new(config.dispatch.interval()), dispatcher);
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_rx));

    info!(
        interval_seconds = config.dispatch.interval_seconds,
        "notification-worker is running"
    );

    signal::ctrl_c().await?;
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);

    match consumer_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "事件消费循环异常退出"),
        Err(e) => error!(error = %e, "事件消费任务 panic"),
    }
    if let Err(e) = scheduler_handle.await {
        error!(error = %e, "调度任务 panic");
    }

    db.close().await;
    info!("notification-worker stopped");
    Ok(())
}
