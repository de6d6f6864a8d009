//! Tier 3: AI-assisted research and code synthesis.
//!
//! Builds a prompt from the component's failure and its recent attempt
//! history, asks the local inference service for a remedy, extracts a
//! fenced shell/python fragment from the completion, and executes it in
//! an isolated context. The fragment is untrusted input: it runs in a
//! separate process with a scrubbed environment, a fresh working
//! directory, and a hard timeout.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::config::RepairConfig;
use crate::db::models::{RepairAttempt, RepairOutcome};
use crate::error::AppError;

use super::exec;
use super::registry::ProcedureRegistry;
use super::tiers::TierResult;

/// Prior attempts summarized into the prompt.
const HISTORY_PROMPT_LIMIT: usize = 10;

// =============================================================================
// Inference client
// =============================================================================

/// Thin client for the local inference service. Treated as an unreliable
/// external dependency: any transport or decode problem becomes a Tier-3
/// Failure, never a crash.
pub struct InferenceClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(serde::Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(serde::Deserialize)]
struct GenerateResponse {
    /// Some gateways name the field `completion`, Ollama names it
    /// `response`; accept either.
    #[serde(default)]
    completion: Option<String>,
    #[serde(default)]
    response: Option<String>,
}

impl InferenceClient {
    pub fn new(config: &RepairConfig) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(config.inference_timeout)
            .build()?;
        Ok(Self {
            base_url: config.inference_base_url.trim_end_matches('/').to_string(),
            model: config.inference_model.clone(),
            client,
        })
    }

    /// Request a free-text completion for the prompt.
    pub async fn complete(&self, prompt: &str) -> Result<String, AppError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
        };

        let resp = self.client.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(AppError::Execution(format!(
                "inference service returned HTTP {}",
                resp.status().as_u16()
            )));
        }

        let parsed: GenerateResponse = resp.json().await?;
        parsed
            .completion
            .or(parsed.response)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| AppError::Execution("inference service returned an empty completion".into()))
    }
}

// =============================================================================
// Prompt assembly
// =============================================================================

/// Build the research prompt: component, current error, and a summary of
/// what has already been tried. Fresh history each invocation keeps
/// repeated Tier-3 calls from re-proposing the same dead ends, though
/// nothing enforces non-repetition.
pub fn build_research_prompt(
    component: &str,
    error: &str,
    history: &[RepairAttempt],
) -> String {
    let mut prompt = format!(
        "You are repairing a failing software component on a production host.\n\
         Component: {component}\n\
         Current error: {}\n\n",
        truncate(error, 500),
    );

    if history.is_empty() {
        prompt.push_str("No prior repair attempts.\n");
    } else {
        prompt.push_str("Prior repair attempts (most recent first):\n");
        for attempt in history.iter().take(HISTORY_PROMPT_LIMIT) {
            prompt.push_str(&format!(
                "- tier {} ({}): {} — {}\n",
                attempt.repair_tier.level(),
                attempt.repair_tier.label(),
                truncate(&attempt.repair_action, 120),
                attempt.outcome.as_str(),
            ));
        }
    }

    prompt.push_str(
        "\nPropose a single concrete fix that has not been tried above.\n\
         Reply with exactly one fenced code block tagged `bash` or `python` \
         containing a self-contained script that applies the fix. \
         The script must exit 0 on success and non-zero on failure.\n",
    );

    prompt
}

// =============================================================================
// Fragment extraction
// =============================================================================

/// Interpreter family of an extracted fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    Shell,
    Python,
}

fn fence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^```\s*([A-Za-z0-9_+-]*)\s*$").unwrap())
}

/// Extract the first executable fenced block from a completion.
///
/// Recognized tags: `bash`/`sh`/`shell`/`zsh` → Shell, `python`/
/// `python3`/`py` → Python. Untagged or otherwise-tagged blocks are
/// skipped; prose fences (```text, ```json) are not executable.
pub fn extract_repair_script(completion: &str) -> Option<(ScriptKind, String)> {
    let mut in_block: Option<ScriptKind> = None;
    let mut body = String::new();

    for line in completion.lines() {
        let trimmed = line.trim();
        if let Some(caps) = fence_regex().captures(trimmed) {
            match in_block {
                None => {
                    let tag = caps.get(1).map(|m| m.as_str().to_lowercase()).unwrap_or_default();
                    in_block = match tag.as_str() {
                        "bash" | "sh" | "shell" | "zsh" => Some(ScriptKind::Shell),
                        "python" | "python3" | "py" => Some(ScriptKind::Python),
                        _ => None,
                    };
                    body.clear();
                    continue;
                }
                Some(kind) => {
                    if !body.trim().is_empty() {
                        return Some((kind, body));
                    }
                    in_block = None;
                    body.clear();
                    continue;
                }
            }
        }
        if in_block.is_some() {
            body.push_str(line);
            body.push('\n');
        }
    }

    None
}

// =============================================================================
// Executor
// =============================================================================

/// Run the full Tier-3 flow. Every failure mode (unreachable inference
/// service, no code block, staging IO, execution failure, timeout) is
/// folded into the returned [`TierResult`].
pub async fn run_research(
    registry: &ProcedureRegistry,
    config: &RepairConfig,
    client: &InferenceClient,
    component: &str,
    error: &str,
    history: &[RepairAttempt],
) -> TierResult {
    let action = format!("AI-assisted research for '{component}'");

    let prompt = build_research_prompt(component, error, history);
    tracing::info!(component, prompt_chars = prompt.len(), "Tier 3: querying inference service");

    let completion = match client.complete(&prompt).await {
        Ok(text) => text,
        Err(e) => {
            return TierResult::failure(action, format!("inference service unavailable: {e}"));
        }
    };

    let Some((kind, script)) = extract_repair_script(&completion) else {
        return TierResult::failure(action, "no executable code found in completion");
    };

    let isolated_env = registry.get(component).and_then(|p| p.isolated_env.clone());
    match execute_fragment(config, kind, &script, isolated_env.as_deref()).await {
        Ok(report) => {
            let outcome = if report.success {
                RepairOutcome::Success
            } else {
                RepairOutcome::Failure
            };
            TierResult {
                outcome,
                action: format!(
                    "{action}: executed generated {} fragment ({} bytes)",
                    kind_label(kind),
                    script.len(),
                ),
                details: format!("{} fragment: {}", kind_label(kind), report.summary()),
            }
        }
        Err(e) => TierResult::failure(action, format!("failed to stage fragment: {e}")),
    }
}

/// Stage the fragment in a temp directory and run it isolated.
async fn execute_fragment(
    config: &RepairConfig,
    kind: ScriptKind,
    script: &str,
    isolated_env: Option<&Path>,
) -> Result<exec::ActionReport, AppError> {
    let workdir = tempfile::tempdir()?;

    let (file_name, interpreter, timeout) = match kind {
        ScriptKind::Shell => (
            "repair.sh",
            PathBuf::from("/bin/sh"),
            config.shell_fragment_timeout,
        ),
        ScriptKind::Python => {
            let interpreter = match isolated_env {
                Some(env) => env.join("bin").join("python"),
                None => PathBuf::from("python3"),
            };
            ("repair.py", interpreter, config.python_fragment_timeout)
        }
    };

    let script_path = workdir.path().join(file_name);
    std::fs::write(&script_path, script)?;

    Ok(exec::run_isolated(&interpreter, &script_path, timeout, workdir.path()).await)
}

fn kind_label(kind: ScriptKind) -> &'static str {
    match kind {
        ScriptKind::Shell => "shell",
        ScriptKind::Python => "python",
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        s
    } else {
        // Find the largest byte index <= max that is a valid char boundary
        let mut end = max;
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        &s[..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::RepairTier;

    fn attempt(tier: RepairTier, action: &str, outcome: RepairOutcome) -> RepairAttempt {
        RepairAttempt {
            id: uuid::Uuid::new_v4().to_string(),
            component_name: "svc".into(),
            error_message: "connection refused".into(),
            error_type: "connection".into(),
            repair_tier: tier,
            repair_action: action.into(),
            outcome,
            execution_details: None,
            duration_seconds: Some(1.0),
            snapshot_id: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    // --- prompt ---

    #[test]
    fn test_prompt_contains_component_error_and_history() {
        let history = vec![
            attempt(RepairTier::Restart, "restart ollama", RepairOutcome::Failure),
            attempt(RepairTier::DependencyCheck, "verify deps", RepairOutcome::Failure),
        ];
        let prompt = build_research_prompt("ollama_service", "connection refused", &history);
        assert!(prompt.contains("ollama_service"));
        assert!(prompt.contains("connection refused"));
        assert!(prompt.contains("tier 1 (restart): restart ollama — failure"));
        assert!(prompt.contains("tier 2 (dependency_check)"));
        assert!(prompt.contains("fenced code block"));
    }

    #[test]
    fn test_prompt_caps_history() {
        let history: Vec<_> = (0..25)
            .map(|i| attempt(RepairTier::AiResearch, &format!("fix #{i}"), RepairOutcome::Failure))
            .collect();
        let prompt = build_research_prompt("svc", "boom", &history);
        assert!(prompt.contains("fix #9"));
        assert!(!prompt.contains("fix #10"));
    }

    #[test]
    fn test_prompt_without_history() {
        let prompt = build_research_prompt("svc", "boom", &[]);
        assert!(prompt.contains("No prior repair attempts"));
    }

    // --- extraction ---

    #[test]
    fn test_extract_bash_block() {
        let completion = "Here is the fix:\n```bash\nsystemctl restart ollama\n```\nGood luck!";
        let (kind, script) = extract_repair_script(completion).unwrap();
        assert_eq!(kind, ScriptKind::Shell);
        assert_eq!(script.trim(), "systemctl restart ollama");
    }

    #[test]
    fn test_extract_python_block() {
        let completion = "```python\nimport os\nos.remove('stale.lock')\n```";
        let (kind, script) = extract_repair_script(completion).unwrap();
        assert_eq!(kind, ScriptKind::Python);
        assert!(script.contains("stale.lock"));
    }

    #[test]
    fn test_extract_skips_non_executable_fences() {
        let completion = "```json\n{\"not\": \"code\"}\n```\n```sh\nexit 0\n```";
        let (kind, script) = extract_repair_script(completion).unwrap();
        assert_eq!(kind, ScriptKind::Shell);
        assert_eq!(script.trim(), "exit 0");
    }

    #[test]
    fn test_extract_none_without_code_block() {
        assert!(extract_repair_script("Try restarting the service manually.").is_none());
        assert!(extract_repair_script("```text\nnot runnable\n```").is_none());
        // Empty block is not executable either
        assert!(extract_repair_script("```bash\n\n```").is_none());
    }

    #[test]
    fn test_extract_first_of_multiple_blocks() {
        let completion = "```sh\necho first\n```\n```sh\necho second\n```";
        let (_, script) = extract_repair_script(completion).unwrap();
        assert_eq!(script.trim(), "echo first");
    }

    // --- execution ---

    #[tokio::test]
    #[cfg(unix)]
    async fn test_execute_shell_fragment() {
        let cfg = RepairConfig::default();
        let report = execute_fragment(&cfg, ScriptKind::Shell, "exit 0\n", None)
            .await
            .unwrap();
        assert!(report.success);

        let report = execute_fragment(&cfg, ScriptKind::Shell, "exit 7\n", None)
            .await
            .unwrap();
        assert!(!report.success);
        assert_eq!(report.exit_code, Some(7));
    }

    #[tokio::test]
    async fn test_unreachable_inference_is_failure_outcome() {
        let mut cfg = RepairConfig::default();
        // Nothing listens here; connection is refused immediately
        cfg.inference_base_url = "http://127.0.0.1:1".into();
        cfg.inference_timeout = std::time::Duration::from_secs(2);

        let client = InferenceClient::new(&cfg).unwrap();
        let reg = ProcedureRegistry::new();
        let result = run_research(&reg, &cfg, &client, "svc", "boom", &[]).await;
        assert_eq!(result.outcome, RepairOutcome::Failure);
        assert!(result.details.contains("inference service unavailable"));
    }
}
