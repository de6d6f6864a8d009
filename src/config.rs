use std::path::PathBuf;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Memory usage at or above this percentage blocks any new repair.
const DEFAULT_MEMORY_BLOCK_PCT: f32 = 90.0;
/// Disk usage at or above this percentage blocks any new repair.
const DEFAULT_DISK_BLOCK_PCT: f32 = 95.0;
/// Repairs started system-wide within the burst window before blocking.
const DEFAULT_MAX_REPAIR_BURST: i64 = 3;
/// Trailing window for the system-wide repair burst cap: 5 minutes.
const DEFAULT_BURST_WINDOW_SECS: u64 = 300;
/// Tier-1 attempts per component per escalation window.
const DEFAULT_MAX_TIER1_ATTEMPTS: u32 = 3;
/// Tier-2 attempts per component per escalation window.
const DEFAULT_MAX_TIER2_ATTEMPTS: u32 = 2;
/// Tier-3 attempts per component per escalation window before the
/// controller refuses and demands manual intervention.
const DEFAULT_MAX_TIER3_ATTEMPTS: u32 = 5;
/// Escalation window: 1 hour.
const DEFAULT_ESCALATION_WINDOW_SECS: u64 = 3600;
/// Restart procedure timeout: 30 seconds.
const DEFAULT_RESTART_TIMEOUT_SECS: u64 = 30;
/// Per-check/per-fix timeout for dependency verification: 60 seconds.
const DEFAULT_DEPENDENCY_TIMEOUT_SECS: u64 = 60;
/// Timeout for AI-generated shell fragments: 60 seconds.
const DEFAULT_SHELL_FRAGMENT_TIMEOUT_SECS: u64 = 60;
/// Timeout for AI-generated python fragments: 300 seconds.
const DEFAULT_PYTHON_FRAGMENT_TIMEOUT_SECS: u64 = 300;
/// Inference request timeout: 120 seconds (local models can be slow to load).
const DEFAULT_INFERENCE_TIMEOUT_SECS: u64 = 120;
/// Snapshots retained before oldest-first pruning.
const DEFAULT_MAX_SNAPSHOTS: usize = 5;
/// Memory usage that raises a post-repair advisory issue.
const DEFAULT_MEMORY_ADVISORY_PCT: f32 = 85.0;
/// Grace delay before the final stability probe: 2 seconds.
const DEFAULT_STABILITY_GRACE_MS: u64 = 2000;

// ---------------------------------------------------------------------------
// RepairConfig
// ---------------------------------------------------------------------------

/// Runtime configuration for the repair controller.
///
/// `Default` carries the documented defaults; `from_env` layers
/// `CUSTODIAN_*` environment overrides on top (a `.env` file in the
/// working directory is honored).
#[derive(Debug, Clone)]
pub struct RepairConfig {
    /// Root directory for the database, snapshot store, and crash logs.
    pub data_dir: PathBuf,
    /// Project tree captured by snapshots and restored by rollbacks.
    pub snapshot_source: PathBuf,

    // Guard thresholds
    pub memory_block_pct: f32,
    pub disk_block_pct: f32,
    pub max_repair_burst: i64,
    pub burst_window: Duration,
    /// Components whose active use downgrades a repair to risk=high.
    pub critical_components: Vec<String>,

    // Tier policy
    pub max_tier1_attempts: u32,
    pub max_tier2_attempts: u32,
    /// `None` disables the cap (original unbounded behavior).
    pub max_tier3_attempts: Option<u32>,
    pub escalation_window: Duration,

    // Executor timeouts
    pub restart_timeout: Duration,
    pub dependency_timeout: Duration,
    pub shell_fragment_timeout: Duration,
    pub python_fragment_timeout: Duration,

    // Tier-3 inference service
    pub inference_base_url: String,
    pub inference_model: String,
    pub inference_timeout: Duration,

    // Snapshots
    pub max_snapshots: usize,

    // Post-repair validation
    pub memory_advisory_pct: f32,
    pub stability_grace: Duration,
}

impl Default for RepairConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("custodian");

        Self {
            data_dir,
            snapshot_source: PathBuf::from("."),
            memory_block_pct: DEFAULT_MEMORY_BLOCK_PCT,
            disk_block_pct: DEFAULT_DISK_BLOCK_PCT,
            max_repair_burst: DEFAULT_MAX_REPAIR_BURST,
            burst_window: Duration::from_secs(DEFAULT_BURST_WINDOW_SECS),
            critical_components: vec!["content_db".into(), "ollama_service".into()],
            max_tier1_attempts: DEFAULT_MAX_TIER1_ATTEMPTS,
            max_tier2_attempts: DEFAULT_MAX_TIER2_ATTEMPTS,
            max_tier3_attempts: Some(DEFAULT_MAX_TIER3_ATTEMPTS),
            escalation_window: Duration::from_secs(DEFAULT_ESCALATION_WINDOW_SECS),
            restart_timeout: Duration::from_secs(DEFAULT_RESTART_TIMEOUT_SECS),
            dependency_timeout: Duration::from_secs(DEFAULT_DEPENDENCY_TIMEOUT_SECS),
            shell_fragment_timeout: Duration::from_secs(DEFAULT_SHELL_FRAGMENT_TIMEOUT_SECS),
            python_fragment_timeout: Duration::from_secs(DEFAULT_PYTHON_FRAGMENT_TIMEOUT_SECS),
            inference_base_url: "http://127.0.0.1:11434".into(),
            inference_model: "qwen2.5-coder:7b".into(),
            inference_timeout: Duration::from_secs(DEFAULT_INFERENCE_TIMEOUT_SECS),
            max_snapshots: DEFAULT_MAX_SNAPSHOTS,
            memory_advisory_pct: DEFAULT_MEMORY_ADVISORY_PCT,
            stability_grace: Duration::from_millis(DEFAULT_STABILITY_GRACE_MS),
        }
    }
}

impl RepairConfig {
    /// Build a config from defaults plus `CUSTODIAN_*` environment overrides.
    pub fn from_env() -> Self {
        // Best-effort .env loading; absence is not an error
        let _ = dotenvy::dotenv();

        let mut cfg = Self::default();

        if let Some(dir) = env_var("CUSTODIAN_DATA_DIR") {
            cfg.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env_var("CUSTODIAN_SNAPSHOT_SOURCE") {
            cfg.snapshot_source = PathBuf::from(dir);
        }
        if let Some(v) = env_parse::<f32>("CUSTODIAN_MEMORY_BLOCK_PCT") {
            cfg.memory_block_pct = v.clamp(50.0, 100.0);
        }
        if let Some(v) = env_parse::<f32>("CUSTODIAN_DISK_BLOCK_PCT") {
            cfg.disk_block_pct = v.clamp(50.0, 100.0);
        }
        if let Some(v) = env_parse::<i64>("CUSTODIAN_MAX_REPAIR_BURST") {
            cfg.max_repair_burst = v.max(1);
        }
        if let Some(v) = env_parse::<u64>("CUSTODIAN_BURST_WINDOW_SECS") {
            cfg.burst_window = Duration::from_secs(v.max(30));
        }
        if let Some(list) = env_var("CUSTODIAN_CRITICAL_COMPONENTS") {
            cfg.critical_components = list
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(v) = env_parse::<u32>("CUSTODIAN_MAX_TIER1_ATTEMPTS") {
            cfg.max_tier1_attempts = v.max(1);
        }
        if let Some(v) = env_parse::<u32>("CUSTODIAN_MAX_TIER2_ATTEMPTS") {
            cfg.max_tier2_attempts = v.max(1);
        }
        if let Some(v) = env_parse::<u32>("CUSTODIAN_MAX_TIER3_ATTEMPTS") {
            // 0 = uncapped
            cfg.max_tier3_attempts = if v == 0 { None } else { Some(v) };
        }
        if let Some(v) = env_parse::<u64>("CUSTODIAN_ESCALATION_WINDOW_SECS") {
            cfg.escalation_window = Duration::from_secs(v.max(60));
        }
        if let Some(v) = env_parse::<u64>("CUSTODIAN_RESTART_TIMEOUT_SECS") {
            cfg.restart_timeout = Duration::from_secs(v.max(1));
        }
        if let Some(url) = env_var("CUSTODIAN_INFERENCE_URL") {
            cfg.inference_base_url = url;
        }
        if let Some(model) = env_var("CUSTODIAN_INFERENCE_MODEL") {
            cfg.inference_model = model;
        }
        if let Some(v) = env_parse::<usize>("CUSTODIAN_MAX_SNAPSHOTS") {
            cfg.max_snapshots = v.max(1);
        }

        cfg
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_var(key).and_then(|v| v.parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_thresholds() {
        let cfg = RepairConfig::default();
        assert_eq!(cfg.memory_block_pct, 90.0);
        assert_eq!(cfg.disk_block_pct, 95.0);
        assert_eq!(cfg.max_repair_burst, 3);
        assert_eq!(cfg.burst_window, Duration::from_secs(300));
        assert_eq!(cfg.max_tier1_attempts, 3);
        assert_eq!(cfg.max_tier2_attempts, 2);
        assert_eq!(cfg.max_tier3_attempts, Some(5));
        assert_eq!(cfg.escalation_window, Duration::from_secs(3600));
        assert_eq!(cfg.restart_timeout, Duration::from_secs(30));
        assert_eq!(cfg.max_snapshots, 5);
        assert_eq!(cfg.memory_advisory_pct, 85.0);
    }

    #[test]
    fn test_env_override_tier3_zero_means_uncapped() {
        std::env::set_var("CUSTODIAN_MAX_TIER3_ATTEMPTS", "0");
        let cfg = RepairConfig::from_env();
        assert_eq!(cfg.max_tier3_attempts, None);
        std::env::remove_var("CUSTODIAN_MAX_TIER3_ATTEMPTS");
    }
}
