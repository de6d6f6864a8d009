use rusqlite::{params, Row};

use crate::db::models::SnapshotRecord;
use crate::db::DbPool;
use crate::error::AppError;

fn row_to_snapshot(row: &Row) -> rusqlite::Result<SnapshotRecord> {
    Ok(SnapshotRecord {
        id: row.get("id")?,
        reason: row.get("reason")?,
        path: row.get("path")?,
        created_at: row.get("created_at")?,
    })
}

pub fn insert(pool: &DbPool, id: &str, reason: &str, path: &str) -> Result<SnapshotRecord, AppError> {
    let now = chrono::Utc::now().to_rfc3339();
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO snapshots (id, reason, path, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![id, reason, path, now],
    )?;
    get_by_id(pool, id)
}

pub fn get_by_id(pool: &DbPool, id: &str) -> Result<SnapshotRecord, AppError> {
    let conn = pool.get()?;
    conn.query_row(
        "SELECT * FROM snapshots WHERE id = ?1",
        params![id],
        row_to_snapshot,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => AppError::NotFound(format!("Snapshot {id}")),
        other => AppError::Database(other),
    })
}

/// All snapshots, oldest first (the pruning order).
pub fn all_oldest_first(pool: &DbPool) -> Result<Vec<SnapshotRecord>, AppError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare("SELECT * FROM snapshots ORDER BY created_at ASC, id ASC")?;
    let rows = stmt.query_map([], row_to_snapshot)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(AppError::Database)
}

/// Remove a snapshot metadata row (retention pruning). The attempt and
/// rollback logs keep their soft references for audit.
pub fn delete(pool: &DbPool, id: &str) -> Result<bool, AppError> {
    let conn = pool.get()?;
    let rows = conn.execute("DELETE FROM snapshots WHERE id = ?1", params![id])?;
    Ok(rows > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_test_db;

    #[test]
    fn test_snapshot_metadata_crud() {
        let pool = init_test_db().unwrap();

        insert(&pool, "snap-1", "pre-repair: scheduler", "/tmp/store/snap-1").unwrap();
        insert(&pool, "snap-2", "pre-repair: scheduler", "/tmp/store/snap-2").unwrap();

        let fetched = get_by_id(&pool, "snap-1").unwrap();
        assert_eq!(fetched.path, "/tmp/store/snap-1");

        let all = all_oldest_first(&pool).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "snap-1");

        assert!(delete(&pool, "snap-1").unwrap());
        assert!(!delete(&pool, "snap-1").unwrap());
        assert!(matches!(get_by_id(&pool, "snap-1"), Err(AppError::NotFound(_))));
    }
}
