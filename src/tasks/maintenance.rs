use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use tracing::info;

use super::RunContext;

/// Delete events older than the purge window. Runs inside a guarded scope, so
/// a dry run reports what would have gone without keeping the deletion.
pub fn pre_maintenance(conn: &Connection, ctx: &mut RunContext<'_>) -> Result<Vec<String>> {
    let days = ctx.config.purge_day_count;
    let removed = conn
        .execute(
            "DELETE FROM inet_log WHERE log_date < date('now', ?1)",
            params![format!("-{} day", days)],
        )
        .with_context(|| format!("Failed to remove logged events older than {} day(s)", days))?;

    info!(action = "purge", component = "maintenance", days, removed, dry_run = ctx.config.is_dry_run, "Removed expired events");
    Ok(vec![
        "## Event removal".to_string(),
        format!(
            "Removed logged events older than {} day(s): {} tuples",
            days, removed
        ),
    ])
}

/// Compact the database file and refresh planner statistics. Neither has a
/// logical rollback, so this runs outside any transaction.
pub fn post_maintenance(conn: &Connection, _ctx: &mut RunContext<'_>) -> Result<Vec<String>> {
    conn.execute_batch("VACUUM; ANALYZE;")
        .context("Failed to vacuum and analyze database")?;
    info!(action = "vacuum", component = "maintenance", "Database compacted and analyzed");
    Ok(vec![
        "## Database compaction".to_string(),
        "Vacuum and statistics refresh completed.".to_string(),
    ])
}
