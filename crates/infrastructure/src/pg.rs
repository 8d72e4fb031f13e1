//! PostgreSQL 适配器
//!
//! 实时核心自己写入的只有未读和设备令牌两张表。

use std::collections::HashMap;

use application::repository::{DeviceRepository, UnreadRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    DevicePlatform, DeviceToken, Message, MessageId, RepositoryError, Unread, UserId,
};
use sqlx::{migrate::Migrator, postgres::PgPoolOptions, FromRow, PgPool};
use uuid::Uuid;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub(crate) fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match err {
        sqlx::Error::RowNotFound => RepositoryError::NotFound,
        sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::AlreadyExists,
        other => RepositoryError::storage(other.to_string()),
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

#[derive(Debug, FromRow)]
struct UnreadRecord {
    user_id: Uuid,
    channel_id: Uuid,
    message_id: Uuid,
    noticeable: bool,
    message_created_at: DateTime<Utc>,
}

impl From<UnreadRecord> for Unread {
    fn from(value: UnreadRecord) -> Self {
        Unread {
            user_id: value.user_id.into(),
            channel_id: value.channel_id.into(),
            message_id: value.message_id.into(),
            noticeable: value.noticeable,
            message_created_at: value.message_created_at,
        }
    }
}

#[derive(Clone)]
pub struct PgUnreadRepository {
    pool: PgPool,
}

impl PgUnreadRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UnreadRepository for PgUnreadRepository {
    async fn set_message_unreads(
        &self,
        message: Message,
        targets: HashMap<UserId, bool>,
    ) -> Result<(), RepositoryError> {
        if targets.is_empty() {
            return Ok(());
        }

        let mut builder = sqlx::QueryBuilder::new(
            "INSERT INTO unreads (user_id, channel_id, message_id, noticeable, message_created_at) ",
        );
        builder.push_values(targets, |mut b, (user_id, noticeable)| {
            b.push_bind(Uuid::from(user_id))
                .push_bind(Uuid::from(message.channel_id))
                .push_bind(Uuid::from(message.id))
                .push_bind(noticeable)
                .push_bind(message.created_at);
        });
        builder.push(" ON CONFLICT (user_id, message_id) DO NOTHING");

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        tracing::debug!(message_id = %message.id, rows = result.rows_affected(), "未读已写入");
        Ok(())
    }

    async fn delete_unreads_by_message(
        &self,
        message_id: MessageId,
    ) -> Result<Vec<Unread>, RepositoryError> {
        let records = sqlx::query_as::<_, UnreadRecord>(
            r#"
            DELETE FROM unreads WHERE message_id = $1
            RETURNING user_id, channel_id, message_id, noticeable, message_created_at
            "#,
        )
        .bind(Uuid::from(message_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(records.into_iter().map(Unread::from).collect())
    }

    async fn get_unread_message_count(&self, user_id: UserId) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM unreads WHERE user_id = $1")
            .bind(Uuid::from(user_id))
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(count.max(0) as u64)
    }
}

#[derive(Debug, FromRow)]
struct DeviceRecord {
    user_id: Uuid,
    token: String,
    platform: String,
    created_at: DateTime<Utc>,
}

fn platform_to_str(platform: DevicePlatform) -> &'static str {
    match platform {
        DevicePlatform::Android => "android",
        DevicePlatform::Ios => "ios",
        DevicePlatform::Web => "web",
    }
}

impl From<DeviceRecord> for DeviceToken {
    fn from(value: DeviceRecord) -> Self {
        let platform = match value.platform.as_str() {
            "ios" => DevicePlatform::Ios,
            "web" => DevicePlatform::Web,
            _ => DevicePlatform::Android,
        };
        DeviceToken {
            user_id: value.user_id.into(),
            token: value.token,
            platform,
            created_at: value.created_at,
        }
    }
}

#[derive(Clone)]
pub struct PgDeviceRepository {
    pool: PgPool,
}

impl PgDeviceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeviceRepository for PgDeviceRepository {
    async fn register_device(&self, token: DeviceToken) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO device_tokens (token, user_id, platform, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (token) DO UPDATE SET user_id = EXCLUDED.user_id, platform = EXCLUDED.platform
            "#,
        )
        .bind(&token.token)
        .bind(Uuid::from(token.user_id))
        .bind(platform_to_str(token.platform))
        .bind(token.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn get_device_tokens(
        &self,
        user_ids: Vec<UserId>,
    ) -> Result<Vec<DeviceToken>, RepositoryError> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = user_ids.into_iter().map(Uuid::from).collect();
        let records = sqlx::query_as::<_, DeviceRecord>(
            r#"SELECT user_id, token, platform, created_at FROM device_tokens WHERE user_id = ANY($1)"#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(records.into_iter().map(DeviceToken::from).collect())
    }

    async fn delete_device_tokens(&self, tokens: Vec<String>) -> Result<(), RepositoryError> {
        if tokens.is_empty() {
            return Ok(());
        }
        sqlx::query("DELETE FROM device_tokens WHERE token = ANY($1)")
            .bind(tokens)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_platform_falls_back_to_android() {
        let token = DeviceToken::from(DeviceRecord {
            user_id: Uuid::new_v4(),
            token: "t".to_string(),
            platform: "symbian".to_string(),
            created_at: Utc::now(),
        });
        assert_eq!(token.platform, DevicePlatform::Android);

        for platform in [DevicePlatform::Android, DevicePlatform::Ios, DevicePlatform::Web] {
            let record = DeviceRecord {
                user_id: Uuid::new_v4(),
                token: "t".to_string(),
                platform: platform_to_str(platform).to_string(),
                created_at: Utc::now(),
            };
            assert_eq!(DeviceToken::from(record).platform, platform);
        }
    }

    #[test]
    fn row_not_found_maps_to_not_found() {
        assert_eq!(map_sqlx_err(sqlx::Error::RowNotFound), RepositoryError::NotFound);
    }
}
