//! 收件人目录
//!
//! 收件人的增删改由外部用户管理负责，投递周期只读取开启通知的收件人。

use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::Result;
use crate::models::Recipient;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    async fn list_enabled_recipients(&self) -> Result<Vec<Recipient>>;
}

pub struct PgRecipientDirectory {
    pool: PgPool,
}

impl PgRecipientDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecipientDirectory for PgRecipientDirectory {
    async fn list_enabled_recipients(&self) -> Result<Vec<Recipient>> {
        let recipients = sqlx::query_as::<_, Recipient>(
            r#"
            SELECT id, display_name, email, notifications_enabled
            FROM recipients
            WHERE notifications_enabled = true
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(recipients)
    }
}
