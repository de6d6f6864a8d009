//! Tier 1 (restart) and Tier 2 (dependency verification & fix) executors.
//!
//! Executors never return `Err`: every path folds into a [`TierResult`]
//! the orchestrator records. The only way a repair "crashes" is if the
//! store itself is down, and that is handled a level up.

use crate::config::RepairConfig;
use crate::db::models::RepairOutcome;

use super::exec;
use super::registry::ProcedureRegistry;

/// What a tier executor did and how it went.
#[derive(Debug, Clone)]
pub struct TierResult {
    pub outcome: RepairOutcome,
    /// Human-readable description of what was attempted.
    pub action: String,
    /// Structured text: what actually happened.
    pub details: String,
}

impl TierResult {
    pub fn failure(action: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            outcome: RepairOutcome::Failure,
            action: action.into(),
            details: details.into(),
        }
    }
}

// =============================================================================
// Tier 1: Restart
// =============================================================================

/// Run the component's registered restart procedure with a bounded
/// timeout. Success iff the procedure exits 0.
pub async fn run_restart(
    registry: &ProcedureRegistry,
    config: &RepairConfig,
    component: &str,
) -> TierResult {
    let Some(procedures) = registry.get(component) else {
        return TierResult::failure(
            format!("restart '{component}'"),
            format!("no action registered for component '{component}'"),
        );
    };

    let action = procedures.restart_action.clone();
    tracing::info!(component, action = %action, "Tier 1: running restart procedure");

    let report = exec::run_action(&action, config.restart_timeout, None).await;
    let outcome = if report.success {
        RepairOutcome::Success
    } else {
        RepairOutcome::Failure
    };

    TierResult {
        outcome,
        action: format!("restart '{component}' via `{action}`"),
        details: format!("restart: {}", report.summary()),
    }
}

// =============================================================================
// Tier 2: Dependency verification & fix
// =============================================================================

/// Verify the component's dependencies, fix what has a known remediation,
/// then re-run the Tier-1 restart.
///
/// - all issues fixed (or none found) + restart exits 0 → Success
/// - some issues fixed but unfixable ones remain → Partial
/// - nothing fixable, or the final restart fails → Failure
///
/// Credential-gated issues are never retried: they are reported as
/// "manual intervention required".
pub async fn run_dependency_fix(
    registry: &ProcedureRegistry,
    config: &RepairConfig,
    component: &str,
) -> TierResult {
    let Some(procedures) = registry.get(component) else {
        return TierResult::failure(
            format!("dependency check '{component}'"),
            format!("no action registered for component '{component}'"),
        );
    };

    let mut found = Vec::new();
    let mut fixed = Vec::new();
    let mut unfixed = Vec::new();

    for check in &procedures.dependency_checks {
        let report = exec::run_action(&check.check_action, config.dependency_timeout, None).await;
        if report.success {
            continue;
        }
        tracing::info!(
            component,
            dependency = %check.name,
            "Tier 2: dependency check failed",
        );
        found.push(check.name.clone());

        if check.needs_credential {
            unfixed.push(format!(
                "{}: requires a credential the controller cannot obtain — manual intervention required",
                check.name
            ));
            continue;
        }

        match &check.fix_action {
            Some(fix) => {
                let fix_report = exec::run_action(fix, config.dependency_timeout, None).await;
                if fix_report.success {
                    fixed.push(check.name.clone());
                } else {
                    unfixed.push(format!("{}: fix failed ({})", check.name, fix_report.summary()));
                }
            }
            None => {
                unfixed.push(format!("{}: no automatic fix available", check.name));
            }
        }
    }

    let action = format!(
        "verify {} dependencies of '{component}' and restart",
        procedures.dependency_checks.len()
    );

    let mut details = format!(
        "issues found: [{}]; fixed: [{}]; unfixed: [{}]",
        found.join(", "),
        fixed.join(", "),
        unfixed.join("; "),
    );

    if !unfixed.is_empty() {
        // Restart is pointless while known issues remain unfixed
        let outcome = if fixed.is_empty() {
            RepairOutcome::Failure
        } else {
            RepairOutcome::Partial
        };
        return TierResult {
            outcome,
            action,
            details,
        };
    }

    let restart = run_restart(registry, config, component).await;
    details.push_str("; ");
    details.push_str(&restart.details);

    TierResult {
        outcome: restart.outcome,
        action,
        details,
    }
}
