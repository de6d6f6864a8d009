use rusqlite::Connection;

use crate::error::AppError;

/// Run the consolidated schema migration. Every statement is
/// `IF NOT EXISTS`, so this is safe to run on every startup.
pub fn run(conn: &Connection) -> Result<(), AppError> {
    tracing::debug!("Running database migrations");

    conn.execute_batch(SCHEMA)?;

    tracing::info!("Database migrations complete");
    Ok(())
}

const SCHEMA: &str = r#"

-- ============================================================================
-- Component Health
--
-- One row per component ever reported failing. Rows are never deleted:
-- the health record doubles as the escalation input and the audit trail.
-- ============================================================================

CREATE TABLE IF NOT EXISTS component_health (
    component_name          TEXT PRIMARY KEY,
    status                  TEXT NOT NULL DEFAULT 'healthy',
    consecutive_failures    INTEGER NOT NULL DEFAULT 0,
    total_failures          INTEGER NOT NULL DEFAULT 0,
    last_check_at           TEXT,
    last_failure_at         TEXT
);
CREATE INDEX IF NOT EXISTS idx_health_status ON component_health(status);

-- ============================================================================
-- Repair Attempts (append-only)
--
-- snapshot_id is a soft reference: snapshots are pruned by retention while
-- the attempt log is immutable, so no FK is enforced here.
-- ============================================================================

CREATE TABLE IF NOT EXISTS repair_attempts (
    id                  TEXT PRIMARY KEY,
    component_name      TEXT NOT NULL,
    error_message       TEXT NOT NULL,
    error_type          TEXT NOT NULL DEFAULT 'unknown',
    repair_tier         INTEGER NOT NULL,
    repair_action       TEXT NOT NULL,
    outcome             TEXT NOT NULL DEFAULT 'pending',
    execution_details   TEXT,
    duration_seconds    REAL,
    snapshot_id         TEXT,
    created_at          TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_attempts_component_time ON repair_attempts(component_name, created_at);
CREATE INDEX IF NOT EXISTS idx_attempts_time           ON repair_attempts(created_at);

-- ============================================================================
-- Rollback Log (append-only, distinct from repair_attempts for audit)
-- ============================================================================

CREATE TABLE IF NOT EXISTS rollback_log (
    id              TEXT PRIMARY KEY,
    component_name  TEXT NOT NULL,
    snapshot_id     TEXT NOT NULL,
    reason          TEXT NOT NULL,
    success         INTEGER NOT NULL DEFAULT 0,
    error_message   TEXT,
    created_at      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_rollbacks_component ON rollback_log(component_name, created_at);
CREATE INDEX IF NOT EXISTS idx_rollbacks_time      ON rollback_log(created_at);

-- ============================================================================
-- Snapshots (metadata; captured trees live on disk under the store dir)
-- ============================================================================

CREATE TABLE IF NOT EXISTS snapshots (
    id          TEXT PRIMARY KEY,
    reason      TEXT NOT NULL,
    path        TEXT NOT NULL,
    created_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_snapshots_time ON snapshots(created_at);

"#;
