use serde::{Deserialize, Serialize};

// ============================================================================
// Enums
// ============================================================================

/// Current health of a tracked component, most severe last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Failing,
    Critical,
}

impl ComponentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentStatus::Healthy => "healthy",
            ComponentStatus::Degraded => "degraded",
            ComponentStatus::Failing => "failing",
            ComponentStatus::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "healthy" => Some(ComponentStatus::Healthy),
            "degraded" => Some(ComponentStatus::Degraded),
            "failing" => Some(ComponentStatus::Failing),
            "critical" => Some(ComponentStatus::Critical),
            _ => None,
        }
    }
}

/// Escalation tier of a repair attempt. Stored as its numeric level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairTier {
    Restart = 1,
    DependencyCheck = 2,
    AiResearch = 3,
}

impl RepairTier {
    pub fn level(&self) -> i64 {
        *self as i64
    }

    pub fn from_level(level: i64) -> Option<Self> {
        match level {
            1 => Some(RepairTier::Restart),
            2 => Some(RepairTier::DependencyCheck),
            3 => Some(RepairTier::AiResearch),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RepairTier::Restart => "restart",
            RepairTier::DependencyCheck => "dependency_check",
            RepairTier::AiResearch => "ai_research",
        }
    }
}

/// Final verdict of a repair attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepairOutcome {
    Success,
    Failure,
    /// Some dependency issues were fixed but unfixable ones remain.
    Partial,
    Pending,
}

impl RepairOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepairOutcome::Success => "success",
            RepairOutcome::Failure => "failure",
            RepairOutcome::Partial => "partial",
            RepairOutcome::Pending => "pending",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(RepairOutcome::Success),
            "failure" => Some(RepairOutcome::Failure),
            "partial" => Some(RepairOutcome::Partial),
            "pending" => Some(RepairOutcome::Pending),
            _ => None,
        }
    }
}

// ============================================================================
// Component Health
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub component_name: String,
    pub status: ComponentStatus,
    pub consecutive_failures: i64,
    pub total_failures: i64,
    pub last_check_at: Option<String>,
    pub last_failure_at: Option<String>,
}

// ============================================================================
// Repair Attempts
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairAttempt {
    pub id: String,
    pub component_name: String,
    pub error_message: String,
    pub error_type: String,
    pub repair_tier: RepairTier,
    pub repair_action: String,
    pub outcome: RepairOutcome,
    pub execution_details: Option<String>,
    pub duration_seconds: Option<f64>,
    pub snapshot_id: Option<String>,
    pub created_at: String,
}

/// Input for appending to the attempt log. The repo stamps the id;
/// `started_at` becomes `created_at` so the guard's trailing-window count
/// sees when the attempt began, not when it finalized.
#[derive(Debug, Clone)]
pub struct NewRepairAttempt {
    pub component_name: String,
    pub error_message: String,
    pub error_type: String,
    pub repair_tier: RepairTier,
    pub repair_action: String,
    pub outcome: RepairOutcome,
    pub execution_details: Option<String>,
    pub duration_seconds: Option<f64>,
    pub snapshot_id: Option<String>,
    /// RFC 3339 start time; `None` stamps the append time.
    pub started_at: Option<String>,
}

// ============================================================================
// Rollback Log
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackLogEntry {
    pub id: String,
    pub component_name: String,
    pub snapshot_id: String,
    pub reason: String,
    pub success: bool,
    pub error_message: Option<String>,
    pub created_at: String,
}

// ============================================================================
// Snapshots
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub id: String,
    pub reason: String,
    pub path: String,
    pub created_at: String,
}
