//! 危险天体筛选
//!
//! 纯函数：只保留标记为潜在危险、带有接近记录和完整直径数据的天体，
//! 为每个天体生成一条告警事件。缺少必要数据的候选记录日志后丢弃，不报错。

use alert_shared::events::{EventValidationError, HazardEvent, parse_date, parse_kilometers};
use alert_shared::observability::metrics;
use tracing::{debug, warn};

use crate::feed::NearEarthObject;

/// 候选天体被丢弃的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    NoCloseApproach,
    MissingDiameter,
    /// 直径上下界不是有限非负数
    InvalidDiameter(String),
    InvalidCloseApproach(String),
    InvalidName,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoCloseApproach => "no_close_approach",
            Self::MissingDiameter => "missing_diameter",
            Self::InvalidDiameter(_) => "invalid_diameter",
            Self::InvalidCloseApproach(_) => "invalid_close_approach",
            Self::InvalidName => "invalid_name",
        }
    }
}

/// 危险天体检测器
#[derive(Debug, Clone, Copy, Default)]
pub struct HazardDetector;

impl HazardDetector {
    pub fn new() -> Self {
        Self
    }

    /// 筛选危险天体并转换为告警事件，输出顺序与输入一致
    pub fn detect(&self, objects: &[NearEarthObject]) -> Vec<HazardEvent> {
        let events: Vec<HazardEvent> = objects
            .iter()
            .filter(|obj| {
                if !obj.is_potentially_hazardous {
                    debug!(asteroid_name = %obj.name, "非危险天体，跳过");
                }
                obj.is_potentially_hazardous
            })
            .filter_map(|obj| match Self::to_event(obj) {
                Ok(event) => Some(event),
                Err(reason) => {
                    warn!(
                        asteroid_name = %obj.name,
                        reason = reason.as_str(),
                        detail = ?reason,
                        "危险天体缺少必要数据，不生成告警"
                    );
                    metrics::record_event_dropped("detector", reason.as_str());
                    None
                }
            })
            .collect();

        debug!(input = objects.len(), hazardous = events.len(), "危险天体筛选完成");
        events
    }

    /// 取第一条接近记录，直径取上下界平均值
    fn to_event(obj: &NearEarthObject) -> Result<HazardEvent, DropReason> {
        let approach = obj
            .close_approach_data
            .first()
            .ok_or(DropReason::NoCloseApproach)?;
        let (min, max) = obj.diameter_bounds_m().ok_or(DropReason::MissingDiameter)?;

        let date = approach
            .close_approach_date
            .as_deref()
            .ok_or_else(|| DropReason::InvalidCloseApproach("缺少接近日期".into()))
            .and_then(|s| {
                parse_date(s).map_err(|e| DropReason::InvalidCloseApproach(e.to_string()))
            })?;
        let miss_distance = approach
            .miss_distance
            .as_ref()
            .and_then(|m| m.kilometers.as_deref())
            .ok_or_else(|| DropReason::InvalidCloseApproach("缺少最近距离".into()))
            .and_then(|s| {
                parse_kilometers(s).map_err(|e| DropReason::InvalidCloseApproach(e.to_string()))
            })?;

        let event = HazardEvent::new(obj.name.trim(), date, miss_distance, (min + max) / 2.0);
        event.validate().map_err(DropReason::from)?;
        Ok(event)
    }
}

impl From<EventValidationError> for DropReason {
    fn from(err: EventValidationError) -> Self {
        match err {
            EventValidationError::MissingField("asteroidName") => Self::InvalidName,
            EventValidationError::InvalidField {
                field: "estimatedDiameterAverageMeters",
                reason,
            } => Self::InvalidDiameter(reason),
            other => Self::InvalidCloseApproach(other.to_string()),
        }
    }
}
