//! Per-component repair procedures, looked up by name.
//!
//! Replaces scattered per-component branching with a data-driven table:
//! adding a component is a registry entry, not a code change. Unknown
//! components fail immediately with "no action registered".

use std::collections::HashMap;
use std::path::PathBuf;

/// A named dependency with a check and an optional known remediation.
#[derive(Debug, Clone)]
pub struct DependencyCheck {
    pub name: String,
    /// Shell action; exit 0 means the dependency is satisfied.
    pub check_action: String,
    /// Known remediation. `None` means no automatic fix exists.
    pub fix_action: Option<String>,
    /// Remediation requires a secret the controller cannot obtain;
    /// never retried, reported as "manual intervention required".
    pub needs_credential: bool,
}

/// Lightweight liveness probe for post-repair validation.
#[derive(Debug, Clone)]
pub enum LiveProbe {
    /// Success = HTTP 2xx on a GET.
    Http { url: String },
    /// Success = exit 0.
    Action { action: String },
}

/// Everything the controller knows how to do for one component.
#[derive(Debug, Clone)]
pub struct ComponentProcedures {
    /// Tier-1 restart procedure.
    pub restart_action: String,
    /// Tier-2 dependency checks, run in order.
    pub dependency_checks: Vec<DependencyCheck>,
    /// Post-repair liveness probe.
    pub live_probe: Option<LiveProbe>,
    /// Exit 0 = the component has open handles / an active consumer.
    pub active_use_probe: Option<String>,
    /// Isolated interpreter environment for AI-generated python
    /// fragments (a venv root); `<env>/bin/python` must exist.
    pub isolated_env: Option<PathBuf>,
}

/// Component name → procedures table.
#[derive(Debug, Clone, Default)]
pub struct ProcedureRegistry {
    entries: HashMap<String, ComponentProcedures>,
}

impl ProcedureRegistry {
    /// Empty registry. Every lookup fails with "no action registered"
    /// until entries are inserted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-seeded for the stock deployment: the local inference
    /// service, the content store, the publisher's isolated runtime, and
    /// the scheduler. Embedders override or extend per deployment.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        registry.insert(
            "ollama_service",
            ComponentProcedures {
                restart_action: "systemctl --user restart ollama".into(),
                dependency_checks: vec![
                    DependencyCheck {
                        name: "service_process".into(),
                        check_action: "pgrep -x ollama".into(),
                        fix_action: Some("systemctl --user start ollama".into()),
                        needs_credential: false,
                    },
                    DependencyCheck {
                        name: "api_endpoint".into(),
                        check_action: "curl -sf --max-time 5 http://127.0.0.1:11434/api/tags"
                            .into(),
                        fix_action: Some("systemctl --user restart ollama && sleep 2".into()),
                        needs_credential: false,
                    },
                ],
                live_probe: Some(LiveProbe::Http {
                    url: "http://127.0.0.1:11434/api/tags".into(),
                }),
                active_use_probe: Some("pgrep -f 'ollama run'".into()),
                isolated_env: None,
            },
        );

        registry.insert(
            "content_db",
            ComponentProcedures {
                restart_action: "sqlite3 data/content.db 'PRAGMA wal_checkpoint(TRUNCATE);'"
                    .into(),
                dependency_checks: vec![
                    DependencyCheck {
                        name: "db_file".into(),
                        check_action: "test -s data/content.db".into(),
                        fix_action: Some(
                            "sqlite3 data/content.db < schema/content.sql".into(),
                        ),
                        needs_credential: false,
                    },
                    DependencyCheck {
                        name: "db_integrity".into(),
                        check_action: "sqlite3 data/content.db 'PRAGMA quick_check;' | grep -q ok"
                            .into(),
                        fix_action: None,
                        needs_credential: false,
                    },
                ],
                live_probe: Some(LiveProbe::Action {
                    action: "sqlite3 data/content.db 'SELECT 1;'".into(),
                }),
                active_use_probe: Some("fuser data/content.db".into()),
                isolated_env: None,
            },
        );

        registry.insert(
            "publisher_env",
            ComponentProcedures {
                restart_action: "pkill -f publisher_daemon; publisher_env/bin/python -m publisher_daemon &".into(),
                dependency_checks: vec![
                    DependencyCheck {
                        name: "venv_imports".into(),
                        check_action: "publisher_env/bin/python -c 'import requests, feedparser'"
                            .into(),
                        fix_action: Some(
                            "python3 -m venv publisher_env && publisher_env/bin/pip install -r requirements.txt"
                                .into(),
                        ),
                        needs_credential: false,
                    },
                    DependencyCheck {
                        name: "publish_api_token".into(),
                        check_action: "test -n \"$PUBLISH_API_TOKEN\"".into(),
                        fix_action: None,
                        needs_credential: true,
                    },
                ],
                live_probe: Some(LiveProbe::Action {
                    action: "publisher_env/bin/python -c 'import publisher_daemon'".into(),
                }),
                active_use_probe: None,
                isolated_env: Some(PathBuf::from("publisher_env")),
            },
        );

        registry.insert(
            "scheduler",
            ComponentProcedures {
                restart_action: "systemctl --user restart content-scheduler".into(),
                dependency_checks: vec![DependencyCheck {
                    name: "unit_loaded".into(),
                    check_action: "systemctl --user cat content-scheduler".into(),
                    fix_action: None,
                    needs_credential: false,
                }],
                live_probe: Some(LiveProbe::Action {
                    action: "systemctl --user is-active content-scheduler".into(),
                }),
                active_use_probe: None,
                isolated_env: None,
            },
        );

        registry
    }

    pub fn insert(&mut self, name: &str, procedures: ComponentProcedures) {
        self.entries.insert(name.to_string(), procedures);
    }

    pub fn get(&self, name: &str) -> Option<&ComponentProcedures> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn component_names(&self) -> Vec<&str> {
        self.entries.keys().map(|k| k.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_stock_components() {
        let reg = ProcedureRegistry::with_defaults();
        for name in ["ollama_service", "content_db", "publisher_env", "scheduler"] {
            assert!(reg.contains(name), "missing default entry for {name}");
        }
        assert!(!reg.contains("unknown_component"));
    }

    #[test]
    fn test_insert_overrides() {
        let mut reg = ProcedureRegistry::with_defaults();
        reg.insert(
            "ollama_service",
            ComponentProcedures {
                restart_action: "docker restart ollama".into(),
                dependency_checks: vec![],
                live_probe: None,
                active_use_probe: None,
                isolated_env: None,
            },
        );
        assert_eq!(
            reg.get("ollama_service").unwrap().restart_action,
            "docker restart ollama"
        );
    }

    #[test]
    fn test_credential_gated_check_is_marked() {
        let reg = ProcedureRegistry::with_defaults();
        let publisher = reg.get("publisher_env").unwrap();
        assert!(publisher
            .dependency_checks
            .iter()
            .any(|c| c.needs_credential && c.fix_action.is_none()));
    }
}
