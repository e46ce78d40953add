//! 附加内容：每日天文图片
//!
//! 获取失败不影响邮件投递，调用方只会得到 `None` 或错误并降级为无图片的邮件。

use std::time::Duration;

use alert_shared::config::ApodConfig;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::error::{NotificationError, Result};

/// 可嵌入邮件的图片信息
#[derive(Debug, Clone, PartialEq)]
pub struct PictureOfTheDay {
    pub title: String,
    pub date: String,
    pub explanation: String,
    pub url: String,
    pub hdurl: Option<String>,
    pub copyright: Option<String>,
}

/// 附加内容来源
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EnrichmentSource: Send + Sync {
    /// 获取指定日期的图片；当天没有可用图片（如视频）时返回 `Ok(None)`
    async fn fetch_for(&self, date: NaiveDate) -> Result<Option<PictureOfTheDay>>;
}

/// APOD 接口响应
#[derive(Debug, Deserialize)]
struct ApodResponse {
    copyright: Option<String>,
    date: Option<String>,
    explanation: Option<String>,
    hdurl: Option<String>,
    media_type: Option<String>,
    title: Option<String>,
    url: Option<String>,
    error: Option<serde_json::Value>,
}

impl ApodResponse {
    /// 只有图片类型且未携带 error 字段的响应才可用
    fn into_picture(self) -> Option<PictureOfTheDay> {
        if self.error.is_some() || self.media_type.as_deref() != Some("image") {
            return None;
        }
        let url = self.url.filter(|u| !u.trim().is_empty())?;

        Some(PictureOfTheDay {
            title: self.title.unwrap_or_default(),
            date: self.date.unwrap_or_default(),
            explanation: self.explanation.unwrap_or_default(),
            url,
            hdurl: self.hdurl,
            copyright: self.copyright.map(|c| c.trim().to_string()),
        })
    }
}

/// NASA APOD HTTP 客户端
pub struct ApodClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ApodClient {
    pub fn new(config: &ApodConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| NotificationError::Config(format!("创建 HTTP 客户端失败: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl EnrichmentSource for ApodClient {
    #[instrument(skip(self))]
    async fn fetch_for(&self, date: NaiveDate) -> Result<Option<PictureOfTheDay>> {
        let date_param = date.format("%Y-%m-%d").to_string();
        let resp = self
            .client
            .get(&self.base_url)
            .query(&[("api_key", self.api_key.as_str()), ("date", date_param.as_str())])
            .send()
            .await
            .map_err(|e| {
                NotificationError::Enrichment(format!("请求 APOD 失败: {}", e.without_url()))
            })?;

        if !resp.status().is_success() {
            return Err(NotificationError::Enrichment(format!(
                "APOD 返回 HTTP {}",
                resp.status()
            )));
        }

        let body: ApodResponse = resp
            .json()
            .await
            .map_err(|e| NotificationError::Enrichment(format!("解析 APOD 响应失败: {e}")))?;

        let picture = body.into_picture();
        debug!(available = picture.is_some(), "APOD 获取完成");
        Ok(picture)
    }
}
