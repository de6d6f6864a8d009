use rusqlite::{params, Row};

use crate::db::models::{ComponentHealth, ComponentStatus};
use crate::db::DbPool;
use crate::error::AppError;

fn row_to_health(row: &Row) -> rusqlite::Result<ComponentHealth> {
    let status_raw: String = row.get("status")?;
    let status = ComponentStatus::parse(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unknown component status '{status_raw}'").into(),
        )
    })?;
    Ok(ComponentHealth {
        component_name: row.get("component_name")?,
        status,
        consecutive_failures: row.get("consecutive_failures")?,
        total_failures: row.get("total_failures")?,
        last_check_at: row.get("last_check_at")?,
        last_failure_at: row.get("last_failure_at")?,
    })
}

/// Point query by component name. Absent components are not an error.
pub fn get(pool: &DbPool, component: &str) -> Result<Option<ComponentHealth>, AppError> {
    let conn = pool.get()?;
    let result = conn.query_row(
        "SELECT * FROM component_health WHERE component_name = ?1",
        params![component],
        row_to_health,
    );
    match result {
        Ok(health) => Ok(Some(health)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(AppError::Database(e)),
    }
}

/// Record a status observation for a component, creating the record on
/// first sight.
///
/// A non-Healthy status increments both failure counters and stamps
/// `last_failure_at`; Healthy resets `consecutive_failures` and leaves
/// `total_failures` and `last_failure_at` untouched. `last_check_at` is
/// always stamped.
pub fn upsert(
    pool: &DbPool,
    component: &str,
    status: ComponentStatus,
) -> Result<ComponentHealth, AppError> {
    let conn = pool.get()?;
    let now = chrono::Utc::now().to_rfc3339();
    let failing = status != ComponentStatus::Healthy;

    // Try to update existing record
    let updated = if failing {
        conn.execute(
            "UPDATE component_health SET
                status = ?1,
                consecutive_failures = consecutive_failures + 1,
                total_failures = total_failures + 1,
                last_check_at = ?2,
                last_failure_at = ?2
             WHERE component_name = ?3",
            params![status.as_str(), now, component],
        )?
    } else {
        conn.execute(
            "UPDATE component_health SET
                status = ?1,
                consecutive_failures = 0,
                last_check_at = ?2
             WHERE component_name = ?3",
            params![status.as_str(), now, component],
        )?
    };

    if updated == 0 {
        // First sight of this component: seed the record
        let failures = if failing { 1 } else { 0 };
        let failure_at: Option<&str> = if failing { Some(&now) } else { None };
        conn.execute(
            "INSERT INTO component_health
             (component_name, status, consecutive_failures, total_failures, last_check_at, last_failure_at)
             VALUES (?1, ?2, ?3, ?3, ?4, ?5)",
            params![component, status.as_str(), failures, now, failure_at],
        )?;
    }

    conn.query_row(
        "SELECT * FROM component_health WHERE component_name = ?1",
        params![component],
        row_to_health,
    )
    .map_err(AppError::Database)
}

/// All tracked components, most recently checked first.
pub fn all(pool: &DbPool) -> Result<Vec<ComponentHealth>, AppError> {
    let conn = pool.get()?;
    let mut stmt =
        conn.prepare("SELECT * FROM component_health ORDER BY last_check_at DESC")?;
    let rows = stmt.query_map([], row_to_health)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(AppError::Database)
}
