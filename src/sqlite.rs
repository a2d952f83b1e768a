use anyhow::{Context, Result};
use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::network::{self, Cidr};

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS inet_log (
    log_id      INTEGER PRIMARY KEY,
    dst_ipaddr  TEXT,
    src_ipaddr  TEXT NOT NULL,
    src_port    INTEGER,
    log_event   TEXT NOT NULL CHECK (log_event IN ('auth', 'open_session', 'close_session')),
    uid         INTEGER NOT NULL,
    log_date    TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX IF NOT EXISTS inet_log_log_date_idx ON inet_log (log_date);
CREATE INDEX IF NOT EXISTS inet_log_src_ipaddr_idx ON inet_log (src_ipaddr);
CREATE INDEX IF NOT EXISTS inet_log_uid_idx ON inet_log (uid);
CREATE TABLE IF NOT EXISTS block_now (
    ip_entity   TEXT PRIMARY KEY
);
";

/// How a unit of database work is allowed to affect persisted state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// Commit on success unless this is a dry run; roll back on error.
    GuardedMutation,
    /// Roll back at exit no matter what happened inside.
    AlwaysRollback,
    /// No transaction; every statement takes effect immediately.
    AutoCommit,
}

/// Open the shared session for a run. The database must already exist.
pub fn open_session(path: &Path, local_networks: &[Cidr]) -> Result<Connection> {
    let start_time = Instant::now();
    info!(action = "start", component = "database_session", path = ?path, "Connecting to database");

    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(path, flags)
        .with_context(|| format!("Unable to connect to database at {:?}", path))?;
    conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| row.get::<_, i64>(0))
        .with_context(|| format!("Unable to read database at {:?}", path))?;
    enable_wal(&conn)?;
    register_functions(&conn, local_networks)?;

    info!(
        action = "complete",
        component = "database_session",
        duration_ms = start_time.elapsed().as_millis(),
        "Database session established"
    );
    Ok(conn)
}

pub fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)
        .context("Failed to create iptracking schema")?;
    Ok(())
}

/// Switch the database to write-ahead logging. Readers holding a report scope
/// open then no longer block the tracking daemons' inserts.
pub fn enable_wal(conn: &Connection) -> Result<()> {
    let mode: String = conn
        .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
        .context("Failed to enable write-ahead logging")?;
    debug!(action = "journal_mode", component = "database_session", mode = %mode, "Journal mode set");
    Ok(())
}

/// Create a new database file holding the event log schema.
pub fn init_database(path: &Path) -> Result<()> {
    if path.exists() {
        anyhow::bail!(
            "{:?} already exists. Remove it first if you want to reinitialize.",
            path
        );
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to create {:?}", path))?;
    enable_wal(&conn)?;
    create_schema(&conn)?;
    info!(action = "init", component = "database_session", path = ?path, "Created iptracking database");
    Ok(())
}

/// Register `is_local_ipaddr(addr)`, true when `addr` falls inside one of the local networks.
/// Unparseable addresses are never local.
pub fn register_functions(conn: &Connection, local_networks: &[Cidr]) -> Result<()> {
    let networks = local_networks.to_vec();
    conn.create_scalar_function(
        "is_local_ipaddr",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        move |ctx| {
            let text: Option<String> = ctx.get(0)?;
            Ok(text
                .as_deref()
                .and_then(network::parse_address)
                .is_some_and(|addr| network::is_local(&addr, &networks)))
        },
    )
    .context("Failed to register is_local_ipaddr()")?;
    debug!(action = "register", component = "database_session", network_count = local_networks.len(), "Registered local network function");
    Ok(())
}

/// Run `work` inside a transaction scope governed by `mode`.
///
/// Scopes do not nest: opening one while another is active on the same
/// connection fails.
pub fn scoped<T, F>(conn: &Connection, mode: TransactionMode, is_dry_run: bool, work: F) -> Result<T>
where
    F: FnOnce(&Connection) -> Result<T>,
{
    if mode == TransactionMode::AutoCommit {
        return work(conn);
    }

    let tx = conn
        .unchecked_transaction()
        .context("Failed to open transaction")?;
    let outcome = work(&*tx);

    match (mode, &outcome) {
        (TransactionMode::GuardedMutation, Ok(_)) if !is_dry_run => {
            tx.commit().context("Failed to commit transaction")?;
            info!(action = "commit", component = "transaction_scope", "Production run: committed changes");
        }
        (TransactionMode::GuardedMutation, Ok(_)) => {
            tx.rollback().context("Failed to roll back transaction")?;
            info!(action = "rollback", component = "transaction_scope", "Dry run: rolled back changes");
        }
        (_, Err(e)) => {
            if let Err(rollback_err) = tx.rollback() {
                warn!(action = "rollback", component = "transaction_scope", error = %rollback_err, "Rollback after failure did not complete");
            }
            debug!(action = "rollback", component = "transaction_scope", error = %e, "Rolled back after failure");
        }
        _ => {
            tx.rollback().context("Failed to roll back transaction")?;
            debug!(action = "rollback", component = "transaction_scope", "Read-only scope rolled back");
        }
    }

    outcome
}

pub fn count_events(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM inet_log", [], |row| row.get(0))
        .context("Failed to count logged events")
}
