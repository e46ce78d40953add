//! 通知存储
//!
//! 消费端写入未发送的通知，投递周期读取并提交已发送状态。

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::{NotificationError, Result};
use crate::models::Notification;

/// 通知存储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// 写入一条新通知
    async fn insert(&self, notification: &Notification) -> Result<()>;

    /// 列出全部未发送通知，按创建时间排序
    async fn list_unsent(&self) -> Result<Vec<Notification>>;

    /// 将给定通知标记为已发送，返回实际变更的行数
    ///
    /// 已发送的通知不受影响，重复提交同一批 id 是安全的。
    async fn mark_sent(&self, ids: &[Uuid]) -> Result<u64>;
}

/// PostgreSQL 通知存储
pub struct PgNotificationStore {
    pool: PgPool,
}

impl PgNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 执行内置的 schema 迁移
    pub async fn migrate(pool: &PgPool) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(|e| NotificationError::Persistence(format!("数据库迁移失败: {e}")))?;
        info!("通知库迁移完成");
        Ok(())
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    #[instrument(skip(self, notification), fields(notification_id = %notification.id))]
    async fn insert(&self, notification: &Notification) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notifications (id, asteroid_name, close_approach_date, miss_distance_km,
                                       estimated_diameter_avg_m, sent, created_at, sent_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(notification.id)
        .bind(&notification.asteroid_name)
        .bind(notification.close_approach_date)
        .bind(&notification.miss_distance_km)
        .bind(notification.estimated_diameter_avg_m)
        .bind(notification.sent)
        .bind(notification.created_at)
        .bind(notification.sent_at)
        .execute(&self.pool)
        .await?;

        debug!("通知已写入");
        Ok(())
    }

    async fn list_unsent(&self) -> Result<Vec<Notification>> {
        let notifications = sqlx::query_as::<_, Notification>(
            r#"
            SELECT id, asteroid_name, close_approach_date, miss_distance_km,
                   estimated_diameter_avg_m, sent, created_at, sent_at
            FROM notifications
            WHERE sent = false
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(notifications)
    }

    async fn mark_sent(&self, ids: &[Uuid]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        // 仅更新仍未发送的行，sent 只会从 false 变为 true
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET sent = true, sent_at = NOW()
            WHERE id = ANY($1) AND sent = false
            "#,
        )
        .bind(ids)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alert_shared::events::HazardEvent;
    use bigdecimal::BigDecimal;
    use chrono::NaiveDate;
    use std::str::FromStr;

    async fn test_pool() -> PgPool {
        let url = std::env::var("TEST_DATABASE_URL")
            .expect("TEST_DATABASE_URL must be set for integration tests");
        let pool = PgPool::connect(&url).await.expect("连接测试数据库失败");
        PgNotificationStore::migrate(&pool).await.expect("迁移失败");
        pool
    }

    fn notification(name: &str) -> Notification {
        Notification::from_event(HazardEvent::new(
            name,
            NaiveDate::from_ymd_opt(2026, 10, 20).unwrap(),
            BigDecimal::from_str("1234567.890123").unwrap(),
            55.5,
        ))
    }

    #[tokio::test]
    #[ignore] // 需要数据库连接
    async fn test_insert_list_and_mark_sent() {
        let pool = test_pool().await;
        let store = PgNotificationStore::new(pool);

        let first = notification("pg-store-test-a");
        let second = notification("pg-store-test-b");
        store.insert(&first).await.unwrap();
        store.insert(&second).await.unwrap();

        let unsent = store.list_unsent().await.unwrap();
        let found: Vec<_> = unsent
            .iter()
            .filter(|n| n.id == first.id || n.id == second.id)
            .collect();
        assert_eq!(found.len(), 2);
        // NUMERIC 精度保持不变
        assert_eq!(found[0].miss_distance_km, first.miss_distance_km);

        let changed = store.mark_sent(&[first.id, second.id]).await.unwrap();
        assert_eq!(changed, 2);

        // 再次提交不会重复变更
        let changed_again = store.mark_sent(&[first.id, second.id]).await.unwrap();
        assert_eq!(changed_again, 0);

        let unsent = store.list_unsent().await.unwrap();
        assert!(unsent.iter().all(|n| n.id != first.id && n.id != second.id));
    }

    #[tokio::test]
    #[ignore] // 需要数据库连接
    async fn test_mark_sent_with_no_ids_is_noop() {
        let store = PgNotificationStore::new(test_pool().await);
        assert_eq!(store.mark_sent(&[]).await.unwrap(), 0);
    }
}
