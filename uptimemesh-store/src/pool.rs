use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use uptimemesh_core::Result;

/// Opens (creating if absent) the SQLite database at `path`, enables WAL
/// mode and foreign keys, and runs pending migrations.
///
/// `path` may be `:memory:` for tests; a shared in-memory connection is not
/// used, so callers that need the data visible across connections should
/// keep the pool's max size at 1 for `:memory:` databases.
pub async fn connect(path: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))
        .map_err(|e| uptimemesh_core::MonitorError::validation(format!("invalid database path: {e}")))?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let max_connections = if path == ":memory:" { 1 } else { 5 };
    let pool = SqlitePoolOptions::new().max_connections(max_connections).connect_with(options).await?;

    sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
        uptimemesh_core::MonitorError::Database(sqlx::Error::Migrate(Box::new(e)))
    })?;

    Ok(pool)
}
