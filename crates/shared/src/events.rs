//! 危险天体告警事件模型
//!
//! `HazardEvent` 是发布端与消费端之间唯一的消息契约：每颗满足条件的危险近地天体
//! 产生一条事件，经 Kafka topic 原样传递。线上格式为扁平 JSON 记录，
//! 反序列化统一经过 `RawHazardEvent` 校验，缺失或无法解析的字段一律拒绝，
//! 不会产生字段残缺的事件。

use std::fmt;
use std::str::FromStr;

use bigdecimal::{BigDecimal, Signed};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 当前事件 schema 版本
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// 日期在线上的格式（ISO-8601 日历日期）
const DATE_FORMAT: &str = "%Y-%m-%d";

// ---------------------------------------------------------------------------
// EventValidationError — 事件校验错误
// ---------------------------------------------------------------------------

/// 事件校验错误
///
/// 对应告警管道中的 ValidationError：事件被丢弃并记录日志，不会重试。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventValidationError {
    #[error("缺少必填字段: {0}")]
    MissingField(&'static str),

    #[error("字段格式无效: {field} - {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("不支持的事件 schema 版本: {0}")]
    UnsupportedSchemaVersion(u32),
}

impl EventValidationError {
    /// 用于指标标签的简短原因
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::MissingField(_) => "missing_field",
            Self::InvalidField { .. } => "invalid_field",
            Self::UnsupportedSchemaVersion(_) => "unsupported_version",
        }
    }
}

// ---------------------------------------------------------------------------
// HazardEvent — 告警事件
// ---------------------------------------------------------------------------

/// 危险天体告警事件
///
/// 不可变，所有字段必填。通过构造或 `TryFrom<RawHazardEvent>` 获得的实例均已校验。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawHazardEvent", into = "RawHazardEvent")]
pub struct HazardEvent {
    pub asteroid_name: String,
    pub close_approach_date: NaiveDate,
    /// 最近接近距离（公里），保留上游给出的十进制精度
    pub miss_distance_km: BigDecimal,
    /// 估计直径上下界的平均值（米）
    pub estimated_diameter_avg_m: f64,
}

impl HazardEvent {
    pub fn new(
        asteroid_name: impl Into<String>,
        close_approach_date: NaiveDate,
        miss_distance_km: BigDecimal,
        estimated_diameter_avg_m: f64,
    ) -> Self {
        Self {
            asteroid_name: asteroid_name.into(),
            close_approach_date,
            miss_distance_km,
            estimated_diameter_avg_m,
        }
    }

    /// 校验必填字段
    ///
    /// 直接构造的事件不经过线上格式解析，消费端入库前再次确认字段完整。
    pub fn validate(&self) -> Result<(), EventValidationError> {
        if self.asteroid_name.trim().is_empty() {
            return Err(EventValidationError::MissingField("asteroidName"));
        }
        if self.miss_distance_km.is_negative() {
            return Err(EventValidationError::InvalidField {
                field: "missDistanceKilometers",
                reason: format!("距离不能为负数: {}", self.miss_distance_km),
            });
        }
        if !self.estimated_diameter_avg_m.is_finite() || self.estimated_diameter_avg_m < 0.0 {
            return Err(EventValidationError::InvalidField {
                field: "estimatedDiameterAverageMeters",
                reason: format!("非法数值 {}", self.estimated_diameter_avg_m),
            });
        }
        Ok(())
    }

    /// 事件标识，用于日志与发布失败汇总
    ///
    /// 仅用于定位，不作为去重键：同一天体同一日期的重复事件会被原样处理。
    pub fn key(&self) -> String {
        format!("{}@{}", self.asteroid_name, self.close_approach_date)
    }
}

impl fmt::Display for HazardEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (接近日期 {}, 距离 {} km, 直径 {:.2} m)",
            self.asteroid_name,
            self.close_approach_date,
            self.miss_distance_km,
            self.estimated_diameter_avg_m
        )
    }
}

// ---------------------------------------------------------------------------
// RawHazardEvent — 线上格式
// ---------------------------------------------------------------------------

/// 事件的线上表示
///
/// 所有字段均为可选，以便在反序列化之后再做逐字段校验并给出明确的丢弃原因。
/// `missDistanceKilometers` 兼容数值字符串与浮点数两种写法。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawHazardEvent {
    pub schema_version: Option<u32>,
    pub asteroid_name: Option<String>,
    pub close_approach_date: Option<String>,
    pub miss_distance_kilometers: Option<serde_json::Value>,
    pub estimated_diameter_average_meters: Option<f64>,
}

impl TryFrom<RawHazardEvent> for HazardEvent {
    type Error = EventValidationError;

    fn try_from(raw: RawHazardEvent) -> Result<Self, Self::Error> {
        // 缺失版本号的旧消息按 v1 处理
        let version = raw.schema_version.unwrap_or(CURRENT_SCHEMA_VERSION);
        if version == 0 || version > CURRENT_SCHEMA_VERSION {
            return Err(EventValidationError::UnsupportedSchemaVersion(version));
        }

        let asteroid_name = raw
            .asteroid_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .ok_or(EventValidationError::MissingField("asteroidName"))?;

        let date_str = raw
            .close_approach_date
            .filter(|s| !s.trim().is_empty())
            .ok_or(EventValidationError::MissingField("closeApproachDate"))?;
        let close_approach_date = parse_date(&date_str)?;

        let miss_distance_km = raw
            .miss_distance_kilometers
            .ok_or(EventValidationError::MissingField("missDistanceKilometers"))
            .and_then(|value| parse_miss_distance(&value))?;

        let estimated_diameter_avg_m = raw
            .estimated_diameter_average_meters
            .ok_or(EventValidationError::MissingField(
                "estimatedDiameterAverageMeters",
            ))?;

        let event = Self {
            asteroid_name,
            close_approach_date,
            miss_distance_km,
            estimated_diameter_avg_m,
        };
        event.validate()?;
        Ok(event)
    }
}

impl From<HazardEvent> for RawHazardEvent {
    fn from(event: HazardEvent) -> Self {
        Self {
            schema_version: Some(CURRENT_SCHEMA_VERSION),
            asteroid_name: Some(event.asteroid_name),
            close_approach_date: Some(event.close_approach_date.format(DATE_FORMAT).to_string()),
            // 以字符串承载十进制，避免经 f64 转换丢失精度
            miss_distance_kilometers: Some(serde_json::Value::String(
                event.miss_distance_km.to_string(),
            )),
            estimated_diameter_average_meters: Some(event.estimated_diameter_avg_m),
        }
    }
}

/// 解析 ISO-8601 日历日期
pub fn parse_date(value: &str) -> Result<NaiveDate, EventValidationError> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).map_err(|e| {
        EventValidationError::InvalidField {
            field: "closeApproachDate",
            reason: format!("{value}: {e}"),
        }
    })
}

/// 解析距离数值（公里），必须为非负十进制
pub fn parse_kilometers(value: &str) -> Result<BigDecimal, EventValidationError> {
    let parsed = BigDecimal::from_str(value.trim()).map_err(|e| {
        EventValidationError::InvalidField {
            field: "missDistanceKilometers",
            reason: format!("{value}: {e}"),
        }
    })?;

    if parsed.is_negative() {
        return Err(EventValidationError::InvalidField {
            field: "missDistanceKilometers",
            reason: format!("距离不能为负数: {value}"),
        });
    }
    Ok(parsed)
}

fn parse_miss_distance(value: &serde_json::Value) -> Result<BigDecimal, EventValidationError> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => parse_kilometers(s),
        serde_json::Value::Number(n) => parse_kilometers(&n.to_string()),
        serde_json::Value::Null => Err(EventValidationError::MissingField(
            "missDistanceKilometers",
        )),
        other => Err(EventValidationError::InvalidField {
            field: "missDistanceKilometers",
            reason: format!("不支持的类型: {other}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> HazardEvent {
        HazardEvent::new(
            "(2024 AB1)",
            NaiveDate::from_ymd_opt(2026, 10, 20).unwrap(),
            BigDecimal::from_str("4512345.678901").unwrap(),
            182.5,
        )
    }

    #[test]
    fn test_serialize_flat_record_with_version() {
        let json = serde_json::to_value(sample_event()).unwrap();

        assert_eq!(json["schemaVersion"], 1);
        assert_eq!(json["asteroidName"], "(2024 AB1)");
        assert_eq!(json["closeApproachDate"], "2026-10-20");
        assert_eq!(json["missDistanceKilometers"], "4512345.678901");
        assert_eq!(json["estimatedDiameterAverageMeters"], 182.5);
    }

    #[test]
    fn test_deserialize_numeric_miss_distance() {
        let payload = r#"{
            "asteroidName": "433 Eros",
            "closeApproachDate": "2026-11-01",
            "missDistanceKilometers": 1234567.5,
            "estimatedDiameterAverageMeters": 16840.0
        }"#;

        let event: HazardEvent = serde_json::from_str(payload).unwrap();
        assert_eq!(event.asteroid_name, "433 Eros");
        assert_eq!(event.miss_distance_km, BigDecimal::from_str("1234567.5").unwrap());
    }

    #[test]
    fn test_missing_diameter_rejected() {
        let raw = RawHazardEvent {
            schema_version: Some(1),
            asteroid_name: Some("433 Eros".to_string()),
            close_approach_date: Some("2026-11-01".to_string()),
            miss_distance_kilometers: Some(serde_json::json!("100.0")),
            estimated_diameter_average_meters: None,
        };

        let err = HazardEvent::try_from(raw).unwrap_err();
        assert_eq!(
            err,
            EventValidationError::MissingField("estimatedDiameterAverageMeters")
        );
    }

    #[test]
    fn test_blank_name_rejected() {
        let raw = RawHazardEvent {
            asteroid_name: Some("   ".to_string()),
            ..RawHazardEvent::from(sample_event())
        };

        let err = HazardEvent::try_from(raw).unwrap_err();
        assert_eq!(err, EventValidationError::MissingField("asteroidName"));
        assert_eq!(err.reason_code(), "missing_field");
    }

    #[test]
    fn test_unparsable_date_rejected() {
        let raw = RawHazardEvent {
            close_approach_date: Some("2026/11/01".to_string()),
            ..RawHazardEvent::from(sample_event())
        };

        let err = HazardEvent::try_from(raw).unwrap_err();
        assert!(matches!(
            err,
            EventValidationError::InvalidField {
                field: "closeApproachDate",
                ..
            }
        ));
    }

    #[test]
    fn test_negative_distance_rejected() {
        assert!(parse_kilometers("-12.5").is_err());
        assert!(parse_kilometers("abc").is_err());
        assert!(parse_kilometers(" 42.25 ").is_ok());
    }

    #[test]
    fn test_validate_directly_built_event() {
        assert!(sample_event().validate().is_ok());

        let blank = HazardEvent {
            asteroid_name: String::new(),
            ..sample_event()
        };
        assert_eq!(
            blank.validate().unwrap_err(),
            EventValidationError::MissingField("asteroidName")
        );

        let nan = HazardEvent {
            estimated_diameter_avg_m: f64::NAN,
            ..sample_event()
        };
        assert!(nan.validate().is_err());
    }

    #[test]
    fn test_future_schema_version_rejected() {
        let raw = RawHazardEvent {
            schema_version: Some(CURRENT_SCHEMA_VERSION + 1),
            ..RawHazardEvent::from(sample_event())
        };

        let err = HazardEvent::try_from(raw).unwrap_err();
        assert_eq!(err.reason_code(), "unsupported_version");
    }

    #[test]
    fn test_missing_version_treated_as_v1() {
        let payload = r#"{
            "asteroidName": "99942 Apophis",
            "closeApproachDate": "2029-04-13",
            "missDistanceKilometers": "38017.0",
            "estimatedDiameterAverageMeters": 340.0
        }"#;

        let event: HazardEvent = serde_json::from_str(payload).unwrap();
        assert_eq!(event.key(), "99942 Apophis@2029-04-13");
    }
}
