mod models;

pub use models::*;

use anyhow::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::{debug, info};

pub type DbPool = SqlitePool;

/// Schema migrations embedded at compile time, applied in order at startup.
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_initial",
        include_str!("../../migrations/001_initial.sql"),
    ),
    (
        "002_processors",
        include_str!("../../migrations/002_processors.sql"),
    ),
];

/// Open (or create) the service database under `data_dir`.
pub async fn init(data_dir: &Path) -> Result<DbPool> {
    let db_path = data_dir.join("vestibule.db");
    info!("Opening database at {}", db_path.display());
    connect(&format!("sqlite:{}?mode=rwc", db_path.display())).await
}

/// Connect to a SQLite URL, set pragmas, and run migrations. Tests go
/// through here with `sqlite::memory:`.
pub async fn connect(db_url: &str) -> Result<DbPool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await?;

    // WAL for concurrent readers during writes
    for pragma in [
        "PRAGMA journal_mode = WAL",
        "PRAGMA synchronous = NORMAL",
        "PRAGMA foreign_keys = ON",
    ] {
        sqlx::query(pragma).execute(&pool).await?;
    }

    for (name, sql) in MIGRATIONS {
        debug!("Applying migration {}", name);
        execute_sql(&pool, sql).await?;
    }
    info!("Database ready ({} migrations)", MIGRATIONS.len());

    Ok(pool)
}

/// Run a migration file statement by statement, skipping comment lines.
async fn execute_sql(pool: &SqlitePool, sql: &str) -> Result<()> {
    for statement in sql.split(';') {
        let cleaned: String = statement
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        let trimmed = cleaned.trim();
        if !trimmed.is_empty() {
            sqlx::query(trimmed).execute(pool).await?;
        }
    }
    Ok(())
}
