use std::time::Duration;

use rusqlite::{params, Row};

use crate::db::models::{NewRepairAttempt, RepairAttempt, RepairOutcome, RepairTier};
use crate::db::DbPool;
use crate::error::AppError;

fn row_to_attempt(row: &Row) -> rusqlite::Result<RepairAttempt> {
    let tier_raw: i64 = row.get("repair_tier")?;
    let repair_tier = RepairTier::from_level(tier_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Integer,
            format!("unknown repair tier {tier_raw}").into(),
        )
    })?;
    let outcome_raw: String = row.get("outcome")?;
    let outcome = RepairOutcome::parse(&outcome_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unknown outcome '{outcome_raw}'").into(),
        )
    })?;
    Ok(RepairAttempt {
        id: row.get("id")?,
        component_name: row.get("component_name")?,
        error_message: row.get("error_message")?,
        error_type: row.get("error_type")?,
        repair_tier,
        repair_action: row.get("repair_action")?,
        outcome,
        execution_details: row.get("execution_details")?,
        duration_seconds: row.get("duration_seconds")?,
        snapshot_id: row.get("snapshot_id")?,
        created_at: row.get("created_at")?,
    })
}

/// RFC 3339 timestamp `window` ago, for time-range queries. RFC 3339 UTC
/// strings compare lexicographically in timestamp order.
pub fn window_start(window: Duration) -> String {
    let delta = chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero());
    (chrono::Utc::now() - delta).to_rfc3339()
}

/// Append an attempt to the log. Write-once: there is no update path.
pub fn append(pool: &DbPool, new: &NewRepairAttempt) -> Result<RepairAttempt, AppError> {
    if new.component_name.trim().is_empty() {
        return Err(AppError::Validation("Component name cannot be empty".into()));
    }
    if new.outcome != RepairOutcome::Pending && new.duration_seconds.is_none() {
        return Err(AppError::Validation(
            "Finalized attempts must record duration_seconds".into(),
        ));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let created_at = new
        .started_at
        .clone()
        .unwrap_or_else(|| chrono::Utc::now().to_rfc3339());

    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO repair_attempts
         (id, component_name, error_message, error_type, repair_tier, repair_action,
          outcome, execution_details, duration_seconds, snapshot_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            id,
            new.component_name,
            new.error_message,
            new.error_type,
            new.repair_tier.level(),
            new.repair_action,
            new.outcome.as_str(),
            new.execution_details,
            new.duration_seconds,
            new.snapshot_id,
            created_at,
        ],
    )?;

    conn.query_row(
        "SELECT * FROM repair_attempts WHERE id = ?1",
        params![id],
        row_to_attempt,
    )
    .map_err(AppError::Database)
}

/// Attempts for one component since the given RFC 3339 cutoff,
/// most-recent-first. Drives tier selection and reporting.
pub fn for_component_since(
    pool: &DbPool,
    component: &str,
    since: &str,
) -> Result<Vec<RepairAttempt>, AppError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT * FROM repair_attempts
         WHERE component_name = ?1 AND created_at >= ?2
         ORDER BY created_at DESC",
    )?;
    let rows = stmt.query_map(params![component, since], row_to_attempt)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(AppError::Database)
}

/// Attempts started across all components since the cutoff. Guard input
/// for the system-wide repair burst cap.
pub fn count_started_since(pool: &DbPool, since: &str) -> Result<i64, AppError> {
    let conn = pool.get()?;
    conn.query_row(
        "SELECT COUNT(*) FROM repair_attempts WHERE created_at >= ?1",
        params![since],
        |row| row.get(0),
    )
    .map_err(AppError::Database)
}

/// Most recent attempts across all components, for reporting.
pub fn recent(pool: &DbPool, limit: i64) -> Result<Vec<RepairAttempt>, AppError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT * FROM repair_attempts ORDER BY created_at DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit], row_to_attempt)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(AppError::Database)
}

/// Successful attempts since the cutoff, for the 24h activity rollup.
pub fn count_by_outcome_since(
    pool: &DbPool,
    outcome: RepairOutcome,
    since: &str,
) -> Result<i64, AppError> {
    let conn = pool.get()?;
    conn.query_row(
        "SELECT COUNT(*) FROM repair_attempts WHERE outcome = ?1 AND created_at >= ?2",
        params![outcome.as_str(), since],
        |row| row.get(0),
    )
    .map_err(AppError::Database)
}
