//! Database layer
//!
//! SQLite access via sqlx: connection setup, schema initialization, node
//! row mapping, and the settings key-value store.

pub mod init;
pub mod nodes;
pub mod settings;

use crate::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use tracing::info;

/// Open (creating if missing) the server database.
pub async fn connect(db_path: &Path) -> Result<Pool<Sqlite>> {
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    info!("Database opened at {}", db_path.display());
    Ok(pool)
}
