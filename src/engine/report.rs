//! Read-only health reporting for dashboards and alerting.
//!
//! Pure queries over the durable stores; nothing here mutates state.

use std::time::Duration;

use serde::Serialize;

use crate::db::models::{ComponentHealth, ComponentStatus, RepairAttempt, RepairOutcome, RollbackLogEntry};
use crate::db::repos::{health, history, rollbacks};
use crate::db::DbPool;
use crate::error::AppError;

/// Most-failing components included in the rollup.
const MOST_FAILING_LIMIT: usize = 5;
/// Recent attempts included in a component summary.
const SUMMARY_ATTEMPT_LIMIT: usize = 20;

/// Everything a dashboard needs about one component.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentSummary {
    pub health: ComponentHealth,
    pub recent_attempts: Vec<RepairAttempt>,
    pub rollbacks: Vec<RollbackLogEntry>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusCounts {
    pub healthy: usize,
    pub degraded: usize,
    pub failing: usize,
    pub critical: usize,
}

/// System-wide rollup for alerting.
#[derive(Debug, Clone, Serialize)]
pub struct SystemRollup {
    pub components: usize,
    pub status_counts: StatusCounts,
    /// (component_name, total_failures), worst first.
    pub most_failing: Vec<(String, i64)>,
    pub attempts_24h: i64,
    pub successes_24h: i64,
    pub rollbacks_24h: i64,
}

/// Per-component view: current health plus the recent repair and
/// rollback history. `None` for components never reported failing.
pub fn component_summary(
    pool: &DbPool,
    component: &str,
) -> Result<Option<ComponentSummary>, AppError> {
    let Some(health) = health::get(pool, component)? else {
        return Ok(None);
    };

    let since = history::window_start(Duration::from_secs(24 * 3600));
    let mut recent_attempts = history::for_component_since(pool, component, &since)?;
    recent_attempts.truncate(SUMMARY_ATTEMPT_LIMIT);
    let rollbacks = rollbacks::for_component(pool, component)?;

    Ok(Some(ComponentSummary {
        health,
        recent_attempts,
        rollbacks,
    }))
}

/// System-wide counts and 24h activity.
pub fn system_rollup(pool: &DbPool) -> Result<SystemRollup, AppError> {
    let all = health::all(pool)?;

    let mut status_counts = StatusCounts::default();
    for h in &all {
        match h.status {
            ComponentStatus::Healthy => status_counts.healthy += 1,
            ComponentStatus::Degraded => status_counts.degraded += 1,
            ComponentStatus::Failing => status_counts.failing += 1,
            ComponentStatus::Critical => status_counts.critical += 1,
        }
    }

    let mut most_failing: Vec<(String, i64)> = all
        .iter()
        .filter(|h| h.total_failures > 0)
        .map(|h| (h.component_name.clone(), h.total_failures))
        .collect();
    most_failing.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    most_failing.truncate(MOST_FAILING_LIMIT);

    let since = history::window_start(Duration::from_secs(24 * 3600));
    let attempts_24h = history::count_started_since(pool, &since)?;
    let successes_24h = history::count_by_outcome_since(pool, RepairOutcome::Success, &since)?;
    let rollbacks_24h = rollbacks::count_since(pool, &since)?;

    Ok(SystemRollup {
        components: all.len(),
        status_counts,
        most_failing,
        attempts_24h,
        successes_24h,
        rollbacks_24h,
    })
}
