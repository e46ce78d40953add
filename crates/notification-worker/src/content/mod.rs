//! 邮件内容构建
//!
//! 两阶段流水线：先获取可选的附加内容（允许失败），再交给纯模板渲染。
//! 附加内容按自然日缓存，同一天内只请求一次上游。

pub mod enrichment;
pub mod template;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{NotificationError, Result};
use crate::models::Notification;
use enrichment::{EnrichmentSource, PictureOfTheDay};

/// 内容构建接口
///
/// 通知非空时必须返回非空内容；返回错误或空字符串都视为该收件人的构建失败。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContentBuilder: Send + Sync {
    async fn build(&self, notifications: &[Notification], recipient_name: &str) -> Result<String>;
}

/// 告警邮件内容构建器
pub struct AlertContentBuilder {
    enrichment: Option<Arc<dyn EnrichmentSource>>,
    /// (缓存日期, 当日图片)
    cache: Mutex<Option<(NaiveDate, Option<PictureOfTheDay>)>>,
}

impl AlertContentBuilder {
    pub fn new(enrichment: Option<Arc<dyn EnrichmentSource>>) -> Self {
        Self {
            enrichment,
            cache: Mutex::new(None),
        }
    }

    /// 不附加图片的构建器
    pub fn without_enrichment() -> Self {
        Self::new(None)
    }

    /// 获取当日附加内容，失败时记录告警并降级为无图片
    ///
    /// 只缓存成功的结果，失败后下一次构建会再次尝试。
    async fn picture_for(&self, today: NaiveDate) -> Option<PictureOfTheDay> {
        let source = self.enrichment.as_ref()?;

        {
            let cache = self.cache.lock();
            if let Some((day, picture)) = cache.as_ref()
                && *day == today
            {
                return picture.clone();
            }
        }

        match source.fetch_for(today).await {
            Ok(picture) => {
                debug!(date = %today, available = picture.is_some(), "附加内容已缓存");
                *self.cache.lock() = Some((today, picture.clone()));
                picture
            }
            Err(e) => {
                warn!(date = %today, error = %e, "附加内容获取失败，邮件将不含图片");
                None
            }
        }
    }
}

#[async_trait]
impl ContentBuilder for AlertContentBuilder {
    async fn build(&self, notifications: &[Notification], recipient_name: &str) -> Result<String> {
        if notifications.is_empty() {
            return Err(NotificationError::ContentBuild("没有可投递的通知".to_string()));
        }

        let now = Utc::now();
        let picture = self.picture_for(now.date_naive()).await;
        let html = template::render(notifications, recipient_name, picture.as_ref(), now);

        if html.trim().is_empty() {
            return Err(NotificationError::ContentBuild("渲染结果为空".to_string()));
        }
        Ok(html)
    }
}
