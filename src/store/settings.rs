//! Key→text app settings, also the durable backing for the AH token pair.

use super::Db;
use crate::clients::ah::TokenSink;
use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

pub const SETTING_AH_USER_TOKEN: &str = "ah_user_token";
pub const SETTING_AH_REFRESH_TOKEN: &str = "ah_refresh_token";
pub const SETTING_VERBOSE_LOGGING: &str = "verbose_logging";

impl Db {
    /// Absent keys read as the empty string, not as an error.
    pub async fn get_setting(&self, key: &str) -> Result<String> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM app_settings WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value.unwrap_or_default())
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO app_settings (key, value) VALUES (?, ?)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        debug!(key, "setting saved");
        Ok(())
    }
}

/// Token sink persisting refreshed AH tokens into the settings table, so a
/// rotated pair survives process restarts.
#[derive(Clone)]
pub struct SettingsTokenSink {
    db: Db,
}

impl SettingsTokenSink {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TokenSink for SettingsTokenSink {
    async fn persist(&self, access: &str, refresh: &str) -> Result<()> {
        self.db.set_setting(SETTING_AH_USER_TOKEN, access).await?;
        self.db
            .set_setting(SETTING_AH_REFRESH_TOKEN, refresh)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_db;

    #[tokio::test]
    async fn absent_key_reads_as_empty() {
        let db = test_db().await;
        assert_eq!(db.get_setting("does_not_exist").await.unwrap(), "");
    }

    #[tokio::test]
    async fn set_setting_upserts_by_key() {
        let db = test_db().await;
        db.set_setting("ah_user_token", "tok-1").await.unwrap();
        db.set_setting("ah_user_token", "tok-2").await.unwrap();
        assert_eq!(db.get_setting("ah_user_token").await.unwrap(), "tok-2");

        let n: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM app_settings WHERE key = 'ah_user_token'")
                .fetch_one(&db.pool)
                .await
                .unwrap();
        assert_eq!(n, 1);
    }

    #[tokio::test]
    async fn token_sink_writes_both_keys() {
        let db = test_db().await;
        let sink = SettingsTokenSink::new(db.clone());
        sink.persist("new-access", "new-refresh").await.unwrap();
        assert_eq!(
            db.get_setting(SETTING_AH_USER_TOKEN).await.unwrap(),
            "new-access"
        );
        assert_eq!(
            db.get_setting(SETTING_AH_REFRESH_TOKEN).await.unwrap(),
            "new-refresh"
        );
    }
}
