//! 危险天体告警发布
//!
//! 从 NeoWs 拉取近地天体数据，筛选出潜在危险天体并为每个天体发布一条告警事件。

pub mod detector;
pub mod error;
pub mod feed;
pub mod publisher;
pub mod run;
