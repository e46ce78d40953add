//! 周期提交策略
//!
//! 提交粒度为整个周期：只要有一位收件人投递成功，本周期加载的全部未发送通知
//! 都会被标记为已发送，投递失败的收件人将错过这一批。
//! 改为按收件人跟踪投递时只需替换这里。

use uuid::Uuid;

use crate::models::{DeliveryResult, Notification};

/// 计算本周期需要提交为已发送的通知 id
pub fn notifications_to_commit(result: &DeliveryResult, pending: &[Notification]) -> Vec<Uuid> {
    if !result.any_success() {
        return Vec::new();
    }

    pending.iter().filter(|n| !n.sent).map(|n| n.id).collect()
}
