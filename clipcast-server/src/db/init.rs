//! Database initialization
//!
//! Creates required tables when missing and seeds default settings.

use crate::error::Result;
use sqlx::{Pool, Sqlite};
use tracing::info;

/// Initialize all required database structures.
pub async fn initialize_database(pool: &Pool<Sqlite>) -> Result<()> {
    create_tables(pool).await?;
    init_settings_defaults(pool).await?;
    Ok(())
}

/// Create the nodes and settings tables if they do not exist.
pub async fn create_tables(pool: &Pool<Sqlite>) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS nodes (
            id TEXT PRIMARY KEY,
            parent TEXT,
            kind TEXT NOT NULL,
            name TEXT NOT NULL,
            icon TEXT,
            tags TEXT NOT NULL DEFAULT '[]',
            children TEXT,
            watermark TEXT,
            storage_key TEXT,
            duration_ms INTEGER,
            valid INTEGER,
            voice TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Initialize settings table with default values.
pub async fn init_settings_defaults(pool: &Pool<Sqlite>) -> Result<()> {
    // Settings with their default values
    let defaults = vec![
        // Volume cooperation scalars (0-100)
        ("volume_level", "100"),
        ("volume_ceiling", "100"),
        // Comma-separated phrases for the reserved voice stop target
        ("voice_stop_phrases", "stop"),
    ];

    for (key, default_value) in defaults {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM settings WHERE key = ?)")
                .bind(key)
                .fetch_one(pool)
                .await?;

        if !exists {
            sqlx::query("INSERT INTO settings (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(default_value)
                .execute(pool)
                .await?;

            info!("Initialized setting '{}' with default value: {}", key, default_value);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();

        initialize_database(&pool).await.unwrap();
        initialize_database(&pool).await.unwrap();

        let level: String = sqlx::query_scalar("SELECT value FROM settings WHERE key = 'volume_level'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(level, "100");
    }
}
