//! Settings database access
//!
//! Read/write settings from the settings table (key-value store).
//! All settings are global/system-wide.

use crate::error::{Error, Result};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;

/// Get volume level (0-100), defaulting to 100 when absent.
pub async fn get_volume_level(db: &Pool<Sqlite>) -> Result<u8> {
    match get_setting::<u8>(db, "volume_level").await? {
        Some(level) => Ok(level.min(100)),
        None => {
            set_volume_level(db, 100).await?;
            Ok(100)
        }
    }
}

/// Set volume level (0-100).
pub async fn set_volume_level(db: &Pool<Sqlite>, level: u8) -> Result<()> {
    set_setting(db, "volume_level", level.min(100)).await
}

/// Get volume ceiling (0-100), defaulting to 100 when absent.
pub async fn get_volume_ceiling(db: &Pool<Sqlite>) -> Result<u8> {
    match get_setting::<u8>(db, "volume_ceiling").await? {
        Some(ceiling) => Ok(ceiling.min(100)),
        None => {
            set_volume_ceiling(db, 100).await?;
            Ok(100)
        }
    }
}

/// Set volume ceiling (0-100).
pub async fn set_volume_ceiling(db: &Pool<Sqlite>, ceiling: u8) -> Result<()> {
    set_setting(db, "volume_ceiling", ceiling.min(100)).await
}

/// Phrases recognized as the reserved voice stop target.
pub async fn get_stop_phrases(db: &Pool<Sqlite>) -> Result<Vec<String>> {
    let raw = get_setting::<String>(db, "voice_stop_phrases")
        .await?
        .unwrap_or_else(|| "stop".to_string());
    Ok(raw
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect())
}

/// Generic setting getter
///
/// Returns None if key doesn't exist in database.
/// Parses value from string using FromStr trait.
pub async fn get_setting<T: FromStr>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await?;

    match value {
        Some(s) => match s.parse::<T>() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(_) => Err(Error::Config(format!(
                "Failed to parse setting '{}' value: {}",
                key, s
            ))),
        },
        None => Ok(None),
    }
}

/// Generic setting setter
///
/// Inserts or updates setting in database.
pub async fn set_setting<T: ToString>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()> {
    let value_str = value.to_string();

    sqlx::query(
        r#"
        INSERT INTO settings (key, value)
        VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
    )
    .bind(key)
    .bind(value_str)
    .execute(db)
    .await?;

    Ok(())
}
