//! Tier selection: pure functions over recent repair history.
//!
//! No DB or async dependencies: the orchestrator queries the escalation
//! window and hands the slice in, which keeps the policy trivially testable.

use crate::config::RepairConfig;
use crate::db::models::{RepairAttempt, RepairTier};

fn count_tier(history: &[RepairAttempt], tier: RepairTier) -> u32 {
    history.iter().filter(|a| a.repair_tier == tier).count() as u32
}

/// Select the next repair tier from the attempts already made inside the
/// escalation window (the caller applies the window).
///
/// Escalation is monotonic within a window: tier-1 attempts up to
/// `max_tier1_attempts`, then tier-2 up to `max_tier2_attempts`, then
/// tier 3. Nothing in the window resets the progression; a tier-1
/// success simply stops new failure reports from arriving.
pub fn select_tier(history: &[RepairAttempt], config: &RepairConfig) -> RepairTier {
    let t1 = count_tier(history, RepairTier::Restart);
    let t2 = count_tier(history, RepairTier::DependencyCheck);

    if t1 < config.max_tier1_attempts {
        RepairTier::Restart
    } else if t2 < config.max_tier2_attempts {
        RepairTier::DependencyCheck
    } else {
        RepairTier::AiResearch
    }
}

/// True when the window already holds the configured maximum of tier-3
/// attempts and the policy would select tier 3 again. The orchestrator
/// refuses such repairs and demands manual intervention.
///
/// `max_tier3_attempts = None` restores the unbounded behavior.
pub fn escalation_exhausted(history: &[RepairAttempt], config: &RepairConfig) -> bool {
    let Some(cap) = config.max_tier3_attempts else {
        return false;
    };
    select_tier(history, config) == RepairTier::AiResearch
        && count_tier(history, RepairTier::AiResearch) >= cap
}
