//! Post-repair stability gate.
//!
//! Runs only after a tier executor reports Success. A repair that
//! "worked" but left the component dead or the store corrupted is worse
//! than no repair; an unstable verdict triggers the rollback path.

use std::time::Duration;

use crate::config::RepairConfig;
use crate::db::DbPool;

use super::exec;
use super::guard::ResourceSample;
use super::registry::{LiveProbe, ProcedureRegistry};

/// Timeout for a single live probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Verdict of the stability gate.
#[derive(Debug, Clone)]
pub struct StabilityReport {
    pub stable: bool,
    pub issues: Vec<String>,
}

/// Run the cumulative post-repair checks:
///
/// 1. Store integrity (`PRAGMA quick_check`), fatal on failure.
/// 2. Component live probe from the registry, fatal on failure.
/// 3. Memory at/above the advisory threshold, advisory only.
/// 4. Grace delay, then the live probe again to catch errors that
///    surface immediately after the repair; fatal on failure.
///
/// `stable` is false iff a fatal check failed; advisory issues ride
/// along in `issues` either way.
pub async fn post_repair_validation(
    pool: &DbPool,
    config: &RepairConfig,
    registry: &ProcedureRegistry,
    sample: ResourceSample,
    component: &str,
) -> StabilityReport {
    let mut issues = Vec::new();
    let mut stable = true;

    match crate::db::integrity_check(pool) {
        Ok(true) => {}
        Ok(false) => {
            stable = false;
            issues.push("store integrity check failed".into());
        }
        Err(e) => {
            stable = false;
            issues.push(format!("store unreachable: {e}"));
        }
    }

    let probe = registry.get(component).and_then(|p| p.live_probe.as_ref());

    if let Some(probe) = probe {
        if let Err(detail) = run_probe(probe).await {
            stable = false;
            issues.push(format!("live check failed: {detail}"));
        }
    }

    if sample.memory_pct >= config.memory_advisory_pct {
        issues.push(format!(
            "memory usage {:.1}% >= {:.1}% advisory threshold — consider freeing memory before further repairs",
            sample.memory_pct, config.memory_advisory_pct
        ));
    }

    // Grace period: some components come up, then immediately fall over
    if stable {
        if let Some(probe) = probe {
            tokio::time::sleep(config.stability_grace).await;
            if let Err(detail) = run_probe(probe).await {
                stable = false;
                issues.push(format!("component failed after grace period: {detail}"));
            }
        }
    }

    StabilityReport { stable, issues }
}

async fn run_probe(probe: &LiveProbe) -> Result<(), String> {
    match probe {
        LiveProbe::Http { url } => {
            let client = reqwest::Client::builder()
                .timeout(PROBE_TIMEOUT)
                .build()
                .map_err(|e| format!("HTTP client error: {e}"))?;
            match client.get(url).send().await {
                Ok(resp) if resp.status().is_success() => Ok(()),
                Ok(resp) => Err(format!("probe returned HTTP {}", resp.status().as_u16())),
                Err(e) => Err(format!("probe request failed: {e}")),
            }
        }
        LiveProbe::Action { action } => {
            let report = exec::run_action(action, PROBE_TIMEOUT, None).await;
            if report.success {
                Ok(())
            } else {
                Err(report.summary())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_test_db;
    use crate::engine::registry::ComponentProcedures;

    fn quick_config() -> RepairConfig {
        let mut cfg = RepairConfig::default();
        cfg.stability_grace = Duration::from_millis(0);
        cfg
    }

    fn sample(memory: f32) -> ResourceSample {
        ResourceSample {
            memory_pct: memory,
            disk_pct: 10.0,
            cpu_pct: 10.0,
        }
    }

    fn registry_with_probe(action: &str) -> ProcedureRegistry {
        let mut reg = ProcedureRegistry::new();
        reg.insert(
            "svc",
            ComponentProcedures {
                restart_action: "exit 0".into(),
                dependency_checks: vec![],
                live_probe: Some(LiveProbe::Action {
                    action: action.into(),
                }),
                active_use_probe: None,
                isolated_env: None,
            },
        );
        reg
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_stable_when_all_checks_pass() {
        let pool = init_test_db().unwrap();
        let reg = registry_with_probe("exit 0");
        let report =
            post_repair_validation(&pool, &quick_config(), &reg, sample(20.0), "svc").await;
        assert!(report.stable);
        assert!(report.issues.is_empty());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_failing_probe_is_fatal() {
        let pool = init_test_db().unwrap();
        let reg = registry_with_probe("exit 1");
        let report =
            post_repair_validation(&pool, &quick_config(), &reg, sample(20.0), "svc").await;
        assert!(!report.stable);
        assert!(report.issues.iter().any(|i| i.contains("live check failed")));
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_memory_advisory_is_not_fatal() {
        let pool = init_test_db().unwrap();
        let reg = registry_with_probe("exit 0");
        let report =
            post_repair_validation(&pool, &quick_config(), &reg, sample(88.0), "svc").await;
        assert!(report.stable, "advisory issues must not fail the gate");
        assert!(report.issues.iter().any(|i| i.contains("advisory")));
    }

    #[tokio::test]
    async fn test_component_without_probe_relies_on_store_check() {
        let pool = init_test_db().unwrap();
        let reg = ProcedureRegistry::new();
        let report =
            post_repair_validation(&pool, &quick_config(), &reg, sample(20.0), "svc").await;
        assert!(report.stable);
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_probe_that_dies_after_grace_period() {
        let pool = init_test_db().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("first_call");
        // Passes on the first call, fails on the second
        let action = format!(
            "if test -f {m}; then exit 1; else touch {m}; exit 0; fi",
            m = marker.to_string_lossy()
        );
        let reg = registry_with_probe(&action);
        let report =
            post_repair_validation(&pool, &quick_config(), &reg, sample(20.0), "svc").await;
        assert!(!report.stable);
        assert!(report
            .issues
            .iter()
            .any(|i| i.contains("failed after grace period")));
    }
}
