//! Repair engine: the orchestrator and its collaborators.
//!
//! The control loop per failure report:
//! Guard → health(Failing) → Snapshot → Tier selection → Tier execution
//! → Post-repair validation → Commit or Rollback → Health update →
//! History append. Every step folds its failures into typed outcomes;
//! the orchestrator never propagates an error to the caller and never
//! finishes without recording what happened.

pub mod exec;
pub mod guard;
pub mod policy;
pub mod registry;
pub mod report;
pub mod research;
pub mod snapshot;
pub mod tiers;
pub mod validate;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;

use crate::config::RepairConfig;
use crate::db::models::{ComponentStatus, NewRepairAttempt, RepairAttempt, RepairOutcome, RepairTier};
use crate::db::repos::{health, history};
use crate::db::DbPool;
use crate::error::AppError;

use self::guard::{ResourceSample, ResourceSampler, RiskLevel, SysinfoSampler};
use self::registry::ProcedureRegistry;
use self::research::InferenceClient;
use self::snapshot::SnapshotManager;
use self::tiers::TierResult;

/// The progressive self-repair controller.
///
/// Cheap to clone (all state is behind `Arc`), so repairs for different
/// components can run concurrently from independent tasks. Repairs for
/// the *same* component are serialized by a per-component lock held
/// across the whole snapshot → execute → validate → rollback span.
#[derive(Clone)]
pub struct RepairController {
    pool: DbPool,
    config: Arc<RepairConfig>,
    registry: Arc<ProcedureRegistry>,
    snapshots: Arc<SnapshotManager>,
    inference: Arc<InferenceClient>,
    sampler: Arc<dyn ResourceSampler>,
    component_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl RepairController {
    /// Controller with the stock registry and the sysinfo-backed sampler.
    pub fn new(pool: DbPool, config: RepairConfig) -> Result<Self, AppError> {
        Self::with_parts(
            pool,
            config,
            ProcedureRegistry::with_defaults(),
            Arc::new(SysinfoSampler),
        )
    }

    /// Controller with a custom registry and resource sampler. Tests use
    /// this to inject synthetic resource pressure and scripted procedures.
    pub fn with_parts(
        pool: DbPool,
        config: RepairConfig,
        registry: ProcedureRegistry,
        sampler: Arc<dyn ResourceSampler>,
    ) -> Result<Self, AppError> {
        let inference = InferenceClient::new(&config)?;
        let snapshots = SnapshotManager::new(pool.clone(), &config);
        Ok(Self {
            pool,
            config: Arc::new(config),
            registry: Arc::new(registry),
            snapshots: Arc::new(snapshots),
            inference: Arc::new(inference),
            sampler,
            component_locks: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Sole failure-report intake. Returns whether the component ended in
    /// a Healthy state; full diagnostics live in the history and rollback
    /// logs, not in the return value.
    ///
    /// Never returns an error and never panics out of a tier executor: a
    /// panic inside the repair pipeline is caught, triggers an emergency
    /// rollback when a snapshot exists, and finalizes like any failure.
    pub async fn handle_component_failure(
        &self,
        component: &str,
        error: &str,
        context: Option<serde_json::Value>,
    ) -> bool {
        let started_at = chrono::Utc::now().to_rfc3339();
        let start = Instant::now();

        // Single-writer discipline per component: snapshot and rollback
        // must never interleave with another repair of the same target.
        let lock = self.component_lock(component).await;
        let _guard = lock.lock().await;

        let sample = self.sampler.sample();

        let decision = match guard::evaluate(
            &self.pool,
            &self.config,
            &self.registry,
            sample,
            component,
            error,
        )
        .await
        {
            Ok(d) => d,
            Err(e) => {
                // InfrastructureFailure: no repair without durable tracking
                tracing::error!(component, error = %e, "Attempt log unreachable — aborting repair");
                return false;
            }
        };

        if !decision.allowed {
            tracing::warn!(
                component,
                reasons = ?decision.reasons,
                "Repair blocked by pre-validation",
            );
            if let Err(e) = health::upsert(&self.pool, component, ComponentStatus::Critical) {
                tracing::error!(component, error = %e, "Failed to record blocked status");
            }
            return false;
        }

        if decision.risk >= RiskLevel::High {
            tracing::warn!(
                component,
                reasons = ?decision.reasons,
                recommendation = ?decision.recommendation,
                "Proceeding with high-risk repair",
            );
        }

        // Stamp the reported failure and load the escalation window
        let window = history::window_start(self.config.escalation_window);
        let attempts = {
            let loaded = health::upsert(&self.pool, component, ComponentStatus::Failing)
                .and_then(|_| history::for_component_since(&self.pool, component, &window));
            match loaded {
                Ok(rows) => rows,
                Err(e) => {
                    tracing::error!(component, error = %e, "Health store unreachable — aborting repair");
                    return false;
                }
            }
        };

        if policy::escalation_exhausted(&attempts, &self.config) {
            tracing::error!(
                component,
                cap = ?self.config.max_tier3_attempts,
                "Escalation exhausted — manual intervention required",
            );
            if let Err(e) = health::upsert(&self.pool, component, ComponentStatus::Critical) {
                tracing::error!(component, error = %e, "Failed to record exhausted status");
            }
            return false;
        }

        let tier = policy::select_tier(&attempts, &self.config);
        tracing::info!(component, tier = tier.level(), error, "Starting repair attempt");

        // Unknown components fail immediately: nothing to execute, no
        // point capturing a snapshot for it.
        if !self.registry.contains(component) {
            let result = TierResult::failure(
                format!("{} '{component}'", tier.label()),
                format!("no action registered for component '{component}'"),
            );
            return self.finalize(
                component,
                error,
                tier,
                result,
                &decision.reasons,
                context,
                None,
                &started_at,
                start,
            );
        }

        let snapshot = self
            .snapshots
            .create_snapshot(&format!("pre-repair: {component} (tier {})", tier.level()));
        let snapshot_id = snapshot.map(|s| s.id);

        let tier_result = self
            .run_pipeline(component, error, tier, &attempts, snapshot_id.as_deref(), sample)
            .await;

        self.finalize(
            component,
            error,
            tier,
            tier_result,
            &decision.reasons,
            context,
            snapshot_id,
            &started_at,
            start,
        )
    }

    /// Per-component health summary (read-only collaborator surface).
    pub fn component_summary(
        &self,
        component: &str,
    ) -> Result<Option<report::ComponentSummary>, AppError> {
        report::component_summary(&self.pool, component)
    }

    /// System-wide health rollup (read-only collaborator surface).
    pub fn system_rollup(&self) -> Result<report::SystemRollup, AppError> {
        report::system_rollup(&self.pool)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn component_lock(&self, component: &str) -> Arc<Mutex<()>> {
        let mut locks = self.component_locks.lock().await;
        locks
            .entry(component.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Execute the selected tier and validate the result, on a separate
    /// task so a panic anywhere inside surfaces as a `JoinError` instead
    /// of unwinding through the caller. The panic path gets an emergency
    /// rollback when a snapshot exists.
    async fn run_pipeline(
        &self,
        component: &str,
        error: &str,
        tier: RepairTier,
        attempts: &[RepairAttempt],
        snapshot_id: Option<&str>,
        sample: ResourceSample,
    ) -> TierResult {
        let this = self.clone();
        let component_owned = component.to_string();
        let error_owned = error.to_string();
        let attempts_owned = attempts.to_vec();
        let snapshot_owned = snapshot_id.map(str::to_string);

        let handle = tokio::spawn(async move {
            this.execute_and_validate(
                &component_owned,
                &error_owned,
                tier,
                &attempts_owned,
                snapshot_owned.as_deref(),
                sample,
            )
            .await
        });

        match handle.await {
            Ok(result) => result,
            Err(join_err) => {
                tracing::error!(
                    component,
                    error = %join_err,
                    "Repair pipeline panicked — taking emergency path",
                );
                let mut details = format!("repair pipeline aborted: {join_err}");
                if let Some(id) = snapshot_id {
                    let rb = self
                        .snapshots
                        .rollback_to(component, id, "emergency rollback after pipeline abort");
                    if rb.success {
                        details.push_str("; emergency rollback succeeded");
                    } else {
                        details.push_str(&format!(
                            "; emergency rollback failed: {} — manual intervention required",
                            rb.error_message.unwrap_or_default()
                        ));
                    }
                }
                TierResult {
                    outcome: RepairOutcome::Failure,
                    action: format!("{} (aborted)", tier.label()),
                    details,
                }
            }
        }
    }

    async fn execute_and_validate(
        &self,
        component: &str,
        error: &str,
        tier: RepairTier,
        attempts: &[RepairAttempt],
        snapshot_id: Option<&str>,
        sample: ResourceSample,
    ) -> TierResult {
        let mut result = match tier {
            RepairTier::Restart => {
                tiers::run_restart(&self.registry, &self.config, component).await
            }
            RepairTier::DependencyCheck => {
                tiers::run_dependency_fix(&self.registry, &self.config, component).await
            }
            RepairTier::AiResearch => {
                research::run_research(
                    &self.registry,
                    &self.config,
                    &self.inference,
                    component,
                    error,
                    attempts,
                )
                .await
            }
        };

        // Stability gate only guards claimed successes
        if result.outcome != RepairOutcome::Success {
            return result;
        }

        let report = validate::post_repair_validation(
            &self.pool,
            &self.config,
            &self.registry,
            sample,
            component,
        )
        .await;

        if report.stable {
            if !report.issues.is_empty() {
                result
                    .details
                    .push_str(&format!("; advisories: [{}]", report.issues.join("; ")));
            }
            return result;
        }

        // Unstable: the executor's Success is overruled
        result.outcome = RepairOutcome::Failure;
        result.details.push_str(&format!(
            "; post-repair validation failed: [{}]",
            report.issues.join("; ")
        ));

        match snapshot_id {
            Some(id) => {
                let rb = self
                    .snapshots
                    .rollback_to(component, id, "post-repair validation failed");
                if rb.success {
                    result.details.push_str("; rolled back to snapshot");
                } else {
                    result.details.push_str(&format!(
                        "; rollback failed: {} — manual intervention required",
                        rb.error_message.unwrap_or_default()
                    ));
                }
            }
            None => {
                result
                    .details
                    .push_str("; no snapshot available — failure recorded without rollback");
            }
        }

        result
    }

    /// Always runs, whatever happened upstream: the final health update
    /// and the single attempt-log append for this invocation.
    #[allow(clippy::too_many_arguments)]
    fn finalize(
        &self,
        component: &str,
        error: &str,
        tier: RepairTier,
        tier_result: TierResult,
        risk_reasons: &[String],
        context: Option<serde_json::Value>,
        snapshot_id: Option<String>,
        started_at: &str,
        start: Instant,
    ) -> bool {
        let final_status = match tier_result.outcome {
            RepairOutcome::Success => ComponentStatus::Healthy,
            RepairOutcome::Partial => ComponentStatus::Degraded,
            RepairOutcome::Failure | RepairOutcome::Pending => ComponentStatus::Critical,
        };

        let mut details = tier_result.details;
        if !risk_reasons.is_empty() {
            details = format!("risk flags: [{}]; {}", risk_reasons.join("; "), details);
        }
        if let Some(ctx) = context {
            details.push_str(&format!("; context: {ctx}"));
        }

        let duration = start.elapsed().as_secs_f64();

        if let Err(e) = health::upsert(&self.pool, component, final_status) {
            tracing::error!(component, error = %e, "Failed to record final health status");
        }

        let attempt = NewRepairAttempt {
            component_name: component.to_string(),
            error_message: error.to_string(),
            error_type: guard::classify_error_type(error).to_string(),
            repair_tier: tier,
            repair_action: tier_result.action,
            outcome: tier_result.outcome,
            execution_details: Some(details),
            duration_seconds: Some(duration),
            snapshot_id,
            started_at: Some(started_at.to_string()),
        };
        if let Err(e) = history::append(&self.pool, &attempt) {
            tracing::error!(component, error = %e, "Failed to append repair attempt");
        }

        tracing::info!(
            component,
            tier = tier.level(),
            outcome = attempt.outcome.as_str(),
            duration_secs = duration,
            "Repair attempt finalized",
        );

        final_status == ComponentStatus::Healthy
    }
}
