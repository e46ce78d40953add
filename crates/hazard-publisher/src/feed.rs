//! NeoWs 近地天体数据源
//!
//! 上游按日期分组返回近地天体列表，这里只保留检测所需的字段，
//! 其余字段在反序列化时忽略。

use std::collections::BTreeMap;
use std::time::Duration;

use alert_shared::config::NeoWsConfig;
use alert_shared::error::{AlertError, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{debug, info, instrument};

/// 上游允许的最大查询跨度（天）
pub const MAX_WINDOW_DAYS: i64 = 7;

const SERVICE_NAME: &str = "neows";

// ---------------------------------------------------------------------------
// 上游数据模型
// ---------------------------------------------------------------------------

/// 一次检测到的近地天体
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NearEarthObject {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "is_potentially_hazardous_asteroid", default)]
    pub is_potentially_hazardous: bool,
    #[serde(default)]
    pub close_approach_data: Vec<CloseApproach>,
    #[serde(default)]
    pub estimated_diameter: Option<EstimatedDiameter>,
}

/// 一次接近地球的记录
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CloseApproach {
    #[serde(default)]
    pub close_approach_date: Option<String>,
    #[serde(default)]
    pub miss_distance: Option<MissDistance>,
}

/// 最近距离，上游以字符串给出以保留精度
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MissDistance {
    #[serde(default)]
    pub kilometers: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EstimatedDiameter {
    #[serde(default)]
    pub meters: Option<DiameterRange>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct DiameterRange {
    #[serde(default)]
    pub estimated_diameter_min: Option<f64>,
    #[serde(default)]
    pub estimated_diameter_max: Option<f64>,
}

impl NearEarthObject {
    /// 直径上下界（米），任一缺失时返回 None
    pub fn diameter_bounds_m(&self) -> Option<(f64, f64)> {
        let range = self.estimated_diameter.as_ref()?.meters?;
        Some((range.estimated_diameter_min?, range.estimated_diameter_max?))
    }
}

/// feed 接口响应
#[derive(Debug, Deserialize)]
struct FeedResponse {
    #[serde(default)]
    element_count: Option<u64>,
    #[serde(default)]
    near_earth_objects: BTreeMap<String, Vec<NearEarthObject>>,
}

impl FeedResponse {
    /// 按日期键的升序展开为平铺列表
    fn into_objects(self) -> Vec<NearEarthObject> {
        self.near_earth_objects.into_values().flatten().collect()
    }
}

// ---------------------------------------------------------------------------
// DetectionSource
// ---------------------------------------------------------------------------

/// 原始检测数据来源
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DetectionSource: Send + Sync {
    /// 获取 `[from, to]` 区间内的近地天体
    async fn fetch(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<NearEarthObject>>;
}

/// 校验查询区间：不能倒序，跨度不超过上游限制
pub fn validate_range(from: NaiveDate, to: NaiveDate) -> Result<()> {
    if to < from {
        return Err(AlertError::Validation(format!(
            "查询区间倒序: {from} > {to}"
        )));
    }
    let span = (to - from).num_days();
    if span > MAX_WINDOW_DAYS {
        return Err(AlertError::Validation(format!(
            "查询区间 {span} 天超过上限 {MAX_WINDOW_DAYS} 天"
        )));
    }
    Ok(())
}

/// NASA NeoWs HTTP 客户端
pub struct NeoWsClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl NeoWsClient {
    pub fn new(config: &NeoWsConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| AlertError::Config(format!("创建 HTTP 客户端失败: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn external_error(message: String) -> AlertError {
        AlertError::ExternalService {
            service: SERVICE_NAME.to_string(),
            message,
        }
    }
}

#[async_trait]
impl DetectionSource for NeoWsClient {
    #[instrument(skip(self))]
    async fn fetch(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<NearEarthObject>> {
        validate_range(from, to)?;

        let start = from.format("%Y-%m-%d").to_string();
        let end = to.format("%Y-%m-%d").to_string();

        // 错误信息中去掉 URL，避免 api_key 出现在日志里
        let resp = self
            .client
            .get(&self.base_url)
            .query(&[
                ("start_date", start.as_str()),
                ("end_date", end.as_str()),
                ("api_key", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AlertError::ExternalServiceTimeout {
                        service: SERVICE_NAME.to_string(),
                    }
                } else {
                    Self::external_error(format!("请求失败: {}", e.without_url()))
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Self::external_error(format!("HTTP {status}")));
        }

        let body: FeedResponse = resp
            .json()
            .await
            .map_err(|e| AlertError::Serialization(format!("解析 NeoWs 响应失败: {}", e.without_url())))?;

        debug!(element_count = ?body.element_count, "NeoWs 响应已解析");
        let objects = body.into_objects();
        info!(count = objects.len(), %from, %to, "近地天体数据已获取");
        Ok(objects)
    }
}
