use rusqlite::{params, Row};

use crate::db::models::RollbackLogEntry;
use crate::db::DbPool;
use crate::error::AppError;

fn row_to_entry(row: &Row) -> rusqlite::Result<RollbackLogEntry> {
    Ok(RollbackLogEntry {
        id: row.get("id")?,
        component_name: row.get("component_name")?,
        snapshot_id: row.get("snapshot_id")?,
        reason: row.get("reason")?,
        success: row.get::<_, i64>("success")? != 0,
        error_message: row.get("error_message")?,
        created_at: row.get("created_at")?,
    })
}

/// Append a rollback event. Write-once, like the attempt log.
pub fn append(
    pool: &DbPool,
    component: &str,
    snapshot_id: &str,
    reason: &str,
    success: bool,
    error_message: Option<&str>,
) -> Result<RollbackLogEntry, AppError> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();

    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO rollback_log
         (id, component_name, snapshot_id, reason, success, error_message, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id,
            component,
            snapshot_id,
            reason,
            success as i64,
            error_message,
            now,
        ],
    )?;

    conn.query_row(
        "SELECT * FROM rollback_log WHERE id = ?1",
        params![id],
        row_to_entry,
    )
    .map_err(AppError::Database)
}

/// Rollback events for one component, most-recent-first.
pub fn for_component(pool: &DbPool, component: &str) -> Result<Vec<RollbackLogEntry>, AppError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT * FROM rollback_log WHERE component_name = ?1 ORDER BY created_at DESC",
    )?;
    let rows = stmt.query_map(params![component], row_to_entry)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(AppError::Database)
}

/// Rollbacks since the RFC 3339 cutoff, for the activity rollup.
pub fn count_since(pool: &DbPool, since: &str) -> Result<i64, AppError> {
    let conn = pool.get()?;
    conn.query_row(
        "SELECT COUNT(*) FROM rollback_log WHERE created_at >= ?1",
        params![since],
        |row| row.get(0),
    )
    .map_err(AppError::Database)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_test_db;

    #[test]
    fn test_append_and_query() {
        let pool = init_test_db().unwrap();

        let ok = append(&pool, "svc", "snap-1", "post-repair validation failed", true, None).unwrap();
        assert!(ok.success);
        assert!(ok.error_message.is_none());

        let failed = append(
            &pool,
            "svc",
            "snap-2",
            "emergency rollback",
            false,
            Some("store directory vanished"),
        )
        .unwrap();
        assert!(!failed.success);
        assert_eq!(failed.error_message.as_deref(), Some("store directory vanished"));

        let entries = for_component(&pool, "svc").unwrap();
        assert_eq!(entries.len(), 2);
        assert!(for_component(&pool, "other").unwrap().is_empty());

        let since = super::super::history::window_start(std::time::Duration::from_secs(60));
        assert_eq!(count_since(&pool, &since).unwrap(), 2);
    }
}
