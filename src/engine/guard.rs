//! Pre-repair safety gate: resource pressure, repair-burst concurrency,
//! critical-component advisories, and high-risk error detection.

use std::time::Duration;

use crate::config::RepairConfig;
use crate::db::repos::history;
use crate::db::DbPool;
use crate::error::AppError;

use super::exec;
use super::registry::ProcedureRegistry;

/// Timeout for the active-use probe, which is a quick process/handle
/// check rather than a remediation.
const ACTIVE_USE_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Error substrings that mark a failure as high-risk: repairs proceed
/// but are flagged for audit.
const HIGH_RISK_KEYWORDS: &[&str] = &["corrupt", "segfault", "memory leak", "deadlock"];

// =============================================================================
// Resource sampling
// =============================================================================

/// Point-in-time system resource usage, in percent.
#[derive(Debug, Clone, Copy)]
pub struct ResourceSample {
    pub memory_pct: f32,
    pub disk_pct: f32,
    pub cpu_pct: f32,
}

/// Source of resource samples. The production impl reads the host via
/// sysinfo; tests inject synthetic pressure.
pub trait ResourceSampler: Send + Sync {
    fn sample(&self) -> ResourceSample;
}

/// sysinfo-backed sampler. Disk usage reports the fullest mounted disk;
/// any full volume can wedge a repair that writes snapshots or logs.
pub struct SysinfoSampler;

impl ResourceSampler for SysinfoSampler {
    fn sample(&self) -> ResourceSample {
        use sysinfo::{Disks, System};

        let mut sys = System::new();
        sys.refresh_memory();
        sys.refresh_cpu_usage();

        let memory_pct = if sys.total_memory() > 0 {
            sys.used_memory() as f32 / sys.total_memory() as f32 * 100.0
        } else {
            0.0
        };

        let disks = Disks::new_with_refreshed_list();
        let disk_pct = disks
            .iter()
            .filter(|d| d.total_space() > 0)
            .map(|d| {
                let used = d.total_space().saturating_sub(d.available_space());
                used as f32 / d.total_space() as f32 * 100.0
            })
            .fold(0.0_f32, f32::max);

        ResourceSample {
            memory_pct,
            disk_pct,
            cpu_pct: sys.global_cpu_usage(),
        }
    }
}

/// Fixed sample, for tests and embedders that meter resources themselves.
pub struct StaticSampler(pub ResourceSample);

impl ResourceSampler for StaticSampler {
    fn sample(&self) -> ResourceSample {
        self.0
    }
}

// =============================================================================
// Guard decision
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    Low,
    High,
    Critical,
}

/// Verdict of the pre-repair gate.
#[derive(Debug, Clone)]
pub struct GuardDecision {
    pub allowed: bool,
    pub risk: RiskLevel,
    pub reasons: Vec<String>,
    pub recommendation: Option<String>,
}

impl GuardDecision {
    fn blocked(reason: String) -> Self {
        Self {
            allowed: false,
            risk: RiskLevel::Critical,
            reasons: vec![reason],
            recommendation: None,
        }
    }
}

/// Coarse error classification recorded as `error_type` on the attempt.
pub fn classify_error_type(error: &str) -> &'static str {
    let lower = error.to_lowercase();

    if lower.contains("corrupt") || lower.contains("malformed") {
        return "corruption";
    }
    if lower.contains("segfault") || lower.contains("segmentation fault") {
        return "crash";
    }
    if lower.contains("deadlock") {
        return "deadlock";
    }
    if lower.contains("memory leak") || lower.contains("out of memory") || lower.contains("oom") {
        return "resource";
    }
    if lower.contains("timed out") || lower.contains("timeout") {
        return "timeout";
    }
    if lower.contains("connection refused")
        || lower.contains("connection reset")
        || lower.contains("unreachable")
        || lower.contains("refused")
    {
        return "connection";
    }
    if lower.contains("not found") || lower.contains("enoent") || lower.contains("no such file") {
        return "missing";
    }
    if lower.contains("permission") || lower.contains("unauthorized") || lower.contains("credential")
    {
        return "auth";
    }
    "unknown"
}

fn is_high_risk_error(error: &str) -> bool {
    let lower = error.to_lowercase();
    HIGH_RISK_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Evaluate whether a repair may start, in the documented order:
///
/// 1. Memory at/above the block threshold → block, risk critical.
/// 2. Disk at/above the block threshold → block, risk critical.
/// 3. More than `max_repair_burst` attempts started system-wide inside
///    the trailing burst window → block, risk high (anti-thrashing).
/// 4. Critical-set component currently in active use → proceed, risk
///    high, with an advisory recommendation.
/// 5. High-risk keyword in the error → proceed, risk high.
///
/// Storage errors propagate: the gate cannot be evaluated without the
/// attempt log, and repairs never run without durable tracking.
pub async fn evaluate(
    pool: &DbPool,
    config: &RepairConfig,
    registry: &ProcedureRegistry,
    sample: ResourceSample,
    component: &str,
    error: &str,
) -> Result<GuardDecision, AppError> {
    if sample.memory_pct >= config.memory_block_pct {
        return Ok(GuardDecision::blocked(format!(
            "memory usage {:.1}% >= {:.1}% block threshold",
            sample.memory_pct, config.memory_block_pct
        )));
    }

    if sample.disk_pct >= config.disk_block_pct {
        return Ok(GuardDecision::blocked(format!(
            "disk usage {:.1}% >= {:.1}% block threshold",
            sample.disk_pct, config.disk_block_pct
        )));
    }

    let since = history::window_start(config.burst_window);
    let recent = history::count_started_since(pool, &since)?;
    if recent > config.max_repair_burst {
        let mut decision = GuardDecision::blocked(format!(
            "{recent} repair attempts started in the last {}s (cap {})",
            config.burst_window.as_secs(),
            config.max_repair_burst
        ));
        decision.risk = RiskLevel::High;
        return Ok(decision);
    }

    let mut risk = RiskLevel::Low;
    let mut reasons = Vec::new();
    let mut recommendation = None;

    if config.critical_components.iter().any(|c| c == component) {
        let in_use = match registry.get(component).and_then(|p| p.active_use_probe.as_deref()) {
            Some(probe) => {
                exec::run_action(probe, ACTIVE_USE_PROBE_TIMEOUT, None)
                    .await
                    .success
            }
            None => false,
        };
        if in_use {
            risk = RiskLevel::High;
            reasons.push(format!("critical component '{component}' is in active use"));
            recommendation = Some(format!(
                "Drain active usage of '{component}' before repairing, or schedule the repair in a quiet window."
            ));
        }
    }

    if is_high_risk_error(error) {
        risk = RiskLevel::High;
        reasons.push("error message matches high-risk keywords".into());
    }

    Ok(GuardDecision {
        allowed: true,
        risk,
        reasons,
        recommendation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_test_db;
    use crate::db::models::{NewRepairAttempt, RepairOutcome, RepairTier};

    fn sample(memory: f32, disk: f32) -> ResourceSample {
        ResourceSample {
            memory_pct: memory,
            disk_pct: disk,
            cpu_pct: 10.0,
        }
    }

    fn log_attempt(pool: &crate::db::DbPool) {
        crate::db::repos::history::append(
            pool,
            &NewRepairAttempt {
                component_name: "any".into(),
                error_message: "boom".into(),
                error_type: "unknown".into(),
                repair_tier: RepairTier::Restart,
                repair_action: "restart".into(),
                outcome: RepairOutcome::Failure,
                execution_details: None,
                duration_seconds: Some(0.1),
                snapshot_id: None,
                started_at: None,
            },
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_memory_pressure_blocks() {
        let pool = init_test_db().unwrap();
        let cfg = RepairConfig::default();
        let reg = ProcedureRegistry::new();

        let d = evaluate(&pool, &cfg, &reg, sample(95.0, 10.0), "svc", "boom")
            .await
            .unwrap();
        assert!(!d.allowed);
        assert_eq!(d.risk, RiskLevel::Critical);
        assert!(d.reasons[0].contains("memory"));
    }

    #[tokio::test]
    async fn test_disk_pressure_blocks() {
        let pool = init_test_db().unwrap();
        let cfg = RepairConfig::default();
        let reg = ProcedureRegistry::new();

        let d = evaluate(&pool, &cfg, &reg, sample(10.0, 97.0), "svc", "boom")
            .await
            .unwrap();
        assert!(!d.allowed);
        assert!(d.reasons[0].contains("disk"));
    }

    #[tokio::test]
    async fn test_repair_burst_blocks() {
        let pool = init_test_db().unwrap();
        let cfg = RepairConfig::default();
        let reg = ProcedureRegistry::new();

        for _ in 0..4 {
            log_attempt(&pool);
        }

        let d = evaluate(&pool, &cfg, &reg, sample(10.0, 10.0), "svc", "boom")
            .await
            .unwrap();
        assert!(!d.allowed);
        assert_eq!(d.risk, RiskLevel::High);

        // At the cap (3) the gate still admits
        let pool2 = init_test_db().unwrap();
        for _ in 0..3 {
            log_attempt(&pool2);
        }
        let d2 = evaluate(&pool2, &cfg, &reg, sample(10.0, 10.0), "svc", "boom")
            .await
            .unwrap();
        assert!(d2.allowed);
    }

    #[tokio::test]
    async fn test_high_risk_error_proceeds_flagged() {
        let pool = init_test_db().unwrap();
        let cfg = RepairConfig::default();
        let reg = ProcedureRegistry::new();

        let d = evaluate(
            &pool,
            &cfg,
            &reg,
            sample(10.0, 10.0),
            "svc",
            "database file corruption detected",
        )
        .await
        .unwrap();
        assert!(d.allowed);
        assert_eq!(d.risk, RiskLevel::High);
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_critical_component_in_use_gets_advisory() {
        use crate::engine::registry::ComponentProcedures;

        let pool = init_test_db().unwrap();
        let mut cfg = RepairConfig::default();
        cfg.critical_components = vec!["content_db".into()];

        let mut reg = ProcedureRegistry::new();
        reg.insert(
            "content_db",
            ComponentProcedures {
                restart_action: "exit 0".into(),
                dependency_checks: vec![],
                live_probe: None,
                active_use_probe: Some("exit 0".into()),
                isolated_env: None,
            },
        );

        let d = evaluate(&pool, &cfg, &reg, sample(10.0, 10.0), "content_db", "boom")
            .await
            .unwrap();
        assert!(d.allowed);
        assert_eq!(d.risk, RiskLevel::High);
        assert!(d.recommendation.is_some());

        // Probe reporting "not in use" keeps risk low
        reg.insert(
            "content_db",
            ComponentProcedures {
                restart_action: "exit 0".into(),
                dependency_checks: vec![],
                live_probe: None,
                active_use_probe: Some("exit 1".into()),
                isolated_env: None,
            },
        );
        let d2 = evaluate(&pool, &cfg, &reg, sample(10.0, 10.0), "content_db", "boom")
            .await
            .unwrap();
        assert_eq!(d2.risk, RiskLevel::Low);
    }

    #[test]
    fn test_classify_error_type() {
        assert_eq!(classify_error_type("connection refused"), "connection");
        assert_eq!(classify_error_type("Execution timed out after 30s"), "timeout");
        assert_eq!(classify_error_type("database disk image is malformed"), "corruption");
        assert_eq!(classify_error_type("Segmentation fault (core dumped)"), "crash");
        assert_eq!(classify_error_type("possible memory leak in worker"), "resource");
        assert_eq!(classify_error_type("model file not found"), "missing");
        assert_eq!(classify_error_type("401 unauthorized"), "auth");
        assert_eq!(classify_error_type("something odd"), "unknown");
    }
}
