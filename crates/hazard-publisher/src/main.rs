//! 危险天体告警发布入口
//!
//! 单次运行：拉取未来一周的近地天体，发布危险天体告警后退出。

use std::sync::Arc;

use alert_shared::{config::AppConfig, kafka::KafkaProducer, observability};
use anyhow::Result;
use chrono::Utc;
use tracing::{error, info};

use hazard_publisher::{
    error::PublishError,
    feed::NeoWsClient,
    publisher::{EventPublisher, KafkaEventSink},
    run::AlertRun,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load("hazard-publisher")?;
    let obs_config = config.observability.clone().with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!(environment = %config.environment, "Starting hazard-publisher...");

    let source = Arc::new(NeoWsClient::new(&config.neows)?);
    let producer = KafkaProducer::new(&config.kafka, config.publisher.timeout())?;
    let publisher = EventPublisher::new(Arc::new(KafkaEventSink::new(producer)), &config.publisher);
    let run = AlertRun::new(source, publisher, config.neows.window_days);

    match run.execute(Utc::now().date_naive()).await {
        Ok(report) => {
            info!(
                fetched = report.fetched,
                hazardous = report.hazardous,
                published = report.published,
                "hazard-publisher finished"
            );
            Ok(())
        }
        Err(e @ PublishError::Partial { .. }) => {
            // 已发布的事件不会回滚，部分收件人可能错过失败的告警
            error!(error = %e, "告警事件未能全部发布");
            Err(e.into())
        }
        Err(e) => {
            error!(error = %e, "告警发布运行失败");
            Err(e.into())
        }
    }
}
