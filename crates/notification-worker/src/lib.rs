//! 告警通知工作者
//!
//! 消费危险天体告警事件并写入通知表，按固定周期将未发送的通知汇总成
//! 一封告警邮件投递给所有开启通知的收件人。

pub mod consumer;
pub mod content;
pub mod dispatcher;
pub mod error;
pub mod models;
pub mod policy;
pub mod recipients;
pub mod scheduler;
pub mod sender;
pub mod store;
pub mod testing;
