//! 发布端错误类型

use alert_shared::error::AlertError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PublishError {
    /// 部分事件发布失败；已成功的事件不会回滚
    #[error("{} / {total} 条事件发布失败（成功 {published}）: {}", .failed.len(), .failed.join(", "))]
    Partial {
        /// 失败事件的标识，按输入顺序排列
        failed: Vec<String>,
        published: usize,
        total: usize,
    },

    /// 数据源或基础设施错误
    #[error(transparent)]
    Source(#[from] AlertError),
}

impl PublishError {
    /// 是否仅为部分失败
    pub fn is_partial(&self) -> bool {
        matches!(self, Self::Partial { .. })
    }
}
