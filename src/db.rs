use std::path::Path;

use diesel::sqlite::SqliteConnection;
use diesel::Connection;
use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use crate::error::VerdantError;
use crate::Result;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

pub type SqliteAsyncConn = SyncConnectionWrapper<SqliteConnection>;
pub type SqlitePool = Pool<SqliteAsyncConn>;
pub type SqlitePooledConn<'a> = PooledConnection<'a, SqliteAsyncConn>;

/// Opens (creating if needed) the garden database, runs pending migrations,
/// and builds the shared connection pool all stores clone from.
pub async fn connect(sqlite_path: impl AsRef<str>) -> Result<SqlitePool> {
    let sqlite_path = sqlite_path.as_ref();
    ensure_parent_dir(sqlite_path)?;
    run_migrations(sqlite_path).await?;

    let manager = AsyncDieselConnectionManager::<SqliteAsyncConn>::new(sqlite_path);
    Pool::builder()
        .build(manager)
        .await
        .map_err(|e| VerdantError::Runtime(e.to_string()))
}

/// Checks a connection out of the pool with per-connection pragmas applied.
/// `foreign_keys` is off by default in SQLite and the plant-deletion cascade
/// depends on it.
pub async fn checkout(pool: &SqlitePool) -> Result<SqlitePooledConn<'_>> {
    let mut conn = pool
        .get()
        .await
        .map_err(|e| VerdantError::Runtime(e.to_string()))?;
    apply_connection_pragmas(&mut conn).await?;
    Ok(conn)
}

async fn apply_connection_pragmas(conn: &mut SqliteAsyncConn) -> Result<()> {
    for pragma in ["PRAGMA busy_timeout = 5000", "PRAGMA foreign_keys = ON"] {
        diesel_async::RunQueryDsl::execute(diesel::sql_query(pragma), conn)
            .await
            .map_err(|e| VerdantError::Runtime(e.to_string()))?;
    }
    Ok(())
}

/// Timestamps are stored as RFC 3339 UTC text in a fixed width, so lexical
/// column order matches chronological order and stores can ORDER BY the raw
/// column.
pub(crate) fn format_ts(ts: chrono::DateTime<chrono::Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub(crate) fn parse_ts(raw: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| VerdantError::Runtime(format!("bad stored timestamp `{raw}`: {e}")))
}

pub(crate) fn parse_ts_opt(raw: Option<&str>) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
    raw.map(parse_ts).transpose()
}

fn ensure_parent_dir(path: &str) -> Result<()> {
    let path = Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| VerdantError::Runtime(e.to_string()))?;
    }
    Ok(())
}

async fn run_migrations(database_url: &str) -> Result<()> {
    let database_url = database_url.to_string();
    tokio::task::spawn_blocking(move || {
        let mut conn = SqliteConnection::establish(&database_url)
            .map_err(|e| VerdantError::Runtime(e.to_string()))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| VerdantError::Runtime(e.to_string()))?;
        Ok::<_, VerdantError>(())
    })
    .await
    .map_err(|e| VerdantError::Runtime(e.to_string()))??;
    Ok(())
}
