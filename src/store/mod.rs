use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};

pub mod mappings;
pub mod settings;

pub use mappings::{MappingRow, MappingStats, MappingStatus, SaveMapping};
pub use settings::SettingsTokenSink;

/// Embedded migrations, applied in order by version. The runner tracks
/// applied versions in `_mealcart_migrations` so re-running is a no-op.
const MIGRATIONS: &[(i64, &str, &str)] = &[
    (1, "initial", include_str!("migrations/001_initial.sql")),
    (
        2,
        "add_refresh_token",
        include_str!("migrations/002_add_refresh_token.sql"),
    ),
];

#[derive(Clone)]
pub struct Db {
    pub pool: SqlitePool,
}

impl Db {
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let connect_options =
            SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(connect_options)
            .await?;
        info!("connected to db");

        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<()> {
        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS _mealcart_migrations (
                version INTEGER PRIMARY KEY,
                description TEXT,
                installed_at TEXT DEFAULT (datetime('now'))
             )",
        )
        .execute(pool)
        .await?;

        let applied_rows = sqlx::query("SELECT version FROM _mealcart_migrations")
            .fetch_all(pool)
            .await?;
        let mut applied = std::collections::HashSet::new();
        for r in applied_rows {
            applied.insert(r.try_get::<i64, _>(0)?);
        }

        for (version, desc, sql) in MIGRATIONS {
            if applied.contains(version) {
                continue;
            }
            info!(version, desc, "applying migration");
            sqlx::raw_sql(sql).execute(pool).await?;
            sqlx::query("INSERT INTO _mealcart_migrations (version, description) VALUES (?, ?)")
                .bind(version)
                .bind(desc)
                .execute(pool)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) async fn test_db() -> Db {
    // Single connection keeps the in-memory database alive and shared.
    Db::connect("sqlite::memory:", 1)
        .await
        .expect("in-memory db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let db = test_db().await;
        Db::run_migrations(&db.pool).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _mealcart_migrations")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as i64);
    }

    #[tokio::test]
    async fn seed_settings_present() {
        let db = test_db().await;
        for key in ["verbose_logging", "ah_user_token", "ah_refresh_token"] {
            let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM app_settings WHERE key = ?")
                .bind(key)
                .fetch_one(&db.pool)
                .await
                .unwrap();
            assert_eq!(n, 1, "missing seed setting {key}");
        }
    }
}
