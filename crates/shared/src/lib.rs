//! 共享库
//!
//! 包含告警管道各服务共用的配置、错误处理、事件模型、数据库连接、Kafka 与可观测性等基础设施代码。

pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod kafka;
pub mod observability;
pub mod retry;
