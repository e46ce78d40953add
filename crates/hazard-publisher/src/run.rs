//! 单次发布运行：拉取 → 筛选 → 发布

use std::sync::Arc;

use chrono::{Days, NaiveDate};
use tracing::{info, instrument};

use crate::detector::HazardDetector;
use crate::error::PublishError;
use crate::feed::{DetectionSource, MAX_WINDOW_DAYS};
use crate::publisher::EventPublisher;

/// 一次运行的汇总
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub fetched: usize,
    pub hazardous: usize,
    pub published: usize,
}

pub struct AlertRun {
    source: Arc<dyn DetectionSource>,
    detector: HazardDetector,
    publisher: EventPublisher,
    window_days: u32,
}

impl AlertRun {
    pub fn new(
        source: Arc<dyn DetectionSource>,
        publisher: EventPublisher,
        window_days: u32,
    ) -> Self {
        Self {
            source,
            detector: HazardDetector::new(),
            publisher,
            // 超出上游允许的跨度时截断
            window_days: window_days.min(MAX_WINDOW_DAYS as u32),
        }
    }

    /// 查询 `[today, today + window_days]` 区间并发布其中的危险天体
    ///
    /// 没有危险天体时不发布任何事件，视为成功。
    #[instrument(skip(self))]
    pub async fn execute(&self, today: NaiveDate) -> Result<RunReport, PublishError> {
        let end = today
            .checked_add_days(Days::new(u64::from(self.window_days)))
            .unwrap_or(today);

        let objects = self.source.fetch(today, end).await?;
        let events = self.detector.detect(&objects);

        let report = RunReport {
            fetched: objects.len(),
            hazardous: events.len(),
            published: self.publisher.publish(&events).await?,
        };

        info!(
            fetched = report.fetched,
            hazardous = report.hazardous,
            published = report.published,
            "告警发布运行完成"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{
        CloseApproach, DiameterRange, EstimatedDiameter, MissDistance, MockDetectionSource,
        NearEarthObject,
    };
    use crate::publisher::MockEventSink;
    use alert_shared::config::PublisherConfig;
    use alert_shared::error::AlertError;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 14).unwrap()
    }

    fn hazardous(name: &str) -> NearEarthObject {
        NearEarthObject {
            id: None,
            name: name.to_string(),
            is_potentially_hazardous: true,
            close_approach_data: vec![CloseApproach {
                close_approach_date: Some("2026-10-16".into()),
                miss_distance: Some(MissDistance {
                    kilometers: Some("3200000.5".into()),
                }),
            }],
            estimated_diameter: Some(EstimatedDiameter {
                meters: Some(DiameterRange {
                    estimated_diameter_min: Some(40.0),
                    estimated_diameter_max: Some(90.0),
                }),
            }),
        }
    }

    fn run_with(source: MockDetectionSource, sink: MockEventSink, window_days: u32) -> AlertRun {
        AlertRun::new(
            Arc::new(source),
            EventPublisher::new(Arc::new(sink), &PublisherConfig::default()),
            window_days,
        )
    }

    #[tokio::test]
    async fn test_two_hazardous_detections_publish_two_events() {
        let mut source = MockDetectionSource::new();
        source
            .expect_fetch()
            .withf(|from, to| {
                *from == today() && *to == NaiveDate::from_ymd_opt(2026, 10, 21).unwrap()
            })
            .times(1)
            .returning(|_, _| {
                Ok(vec![
                    hazardous("(2026 AB1)"),
                    NearEarthObject {
                        name: "(2026 SAFE)".into(),
                        ..NearEarthObject::default()
                    },
                    hazardous("(2026 CD2)"),
                ])
            });

        let mut sink = MockEventSink::new();
        sink.expect_send().times(2).returning(|_| Ok(()));

        let report = run_with(source, sink, 7).execute(today()).await.unwrap();
        assert_eq!(
            report,
            RunReport {
                fetched: 3,
                hazardous: 2,
                published: 2
            }
        );
    }

    #[tokio::test]
    async fn test_no_hazardous_objects_is_success() {
        let mut source = MockDetectionSource::new();
        source.expect_fetch().returning(|_, _| {
            Ok(vec![NearEarthObject {
                name: "(2026 SAFE)".into(),
                ..NearEarthObject::default()
            }])
        });
        let mut sink = MockEventSink::new();
        sink.expect_send().never();

        let report = run_with(source, sink, 7).execute(today()).await.unwrap();
        assert_eq!(report.hazardous, 0);
        assert_eq!(report.published, 0);
    }

    #[tokio::test]
    async fn test_window_is_clamped_to_upstream_limit() {
        let mut source = MockDetectionSource::new();
        source
            .expect_fetch()
            .withf(|from, to| (*to - *from).num_days() == MAX_WINDOW_DAYS)
            .returning(|_, _| Ok(vec![]));

        let report = run_with(source, MockEventSink::new(), 30).execute(today()).await.unwrap();
        assert_eq!(report.fetched, 0);
    }

    #[tokio::test]
    async fn test_source_failure_is_propagated() {
        let mut source = MockDetectionSource::new();
        source.expect_fetch().returning(|_, _| {
            Err(AlertError::ExternalServiceTimeout {
                service: "neows".into(),
            })
        });

        let err = run_with(source, MockEventSink::new(), 7).execute(today()).await.unwrap_err();
        assert!(matches!(err, PublishError::Source(AlertError::ExternalServiceTimeout { .. })));
    }
}
