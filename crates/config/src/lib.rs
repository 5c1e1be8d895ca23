use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

// ── Tool approval mode ────────────────────────────────────────────────────────

/// Controls when the executor consults the approval gate before running a tool.
///
/// | Mode       | Behaviour                                                          |
/// |------------|--------------------------------------------------------------------|
/// | `advisory` | Approval requirements are logged; the gate is never consulted.     |
/// | `gated`    | Tools flagged `requires_approval` wait for the gate's decision.    |
/// | `strict`   | As `gated`, plus every high-risk tool regardless of its flag.      |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalMode {
    #[default]
    Advisory,
    Gated,
    Strict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameworkConfig {
    /// Workspace host of the managed database platform.  Overridden by
    /// `LAKEOPS_WORKSPACE_HOST` when set.
    pub workspace_host: String,
    /// Back every collaborator with the in-memory mocks.
    pub mock_mode: bool,
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self {
            workspace_host: String::new(),
            mock_mode: true,
        }
    }
}

// ── Executor config ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub approval_mode: ApprovalMode,
    /// Deadline applied to every tool without a more specific one.
    /// `0` (the default) means tools may run indefinitely.
    pub default_timeout_secs: u64,
    /// Tools that are never invoked; calls produce a `skipped` result.
    pub tool_denylist: Vec<String>,
    /// Results retained per agent before the oldest are evicted.
    pub result_log_capacity: usize,
    /// Per-tool deadlines in seconds, keyed by tool name.
    pub tool_timeouts: HashMap<String, u64>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            approval_mode: ApprovalMode::Advisory,
            default_timeout_secs: 0,
            tool_timeouts: HashMap::new(),
            tool_denylist: vec![],
            result_log_capacity: 10_000,
        }
    }
}

impl ExecutorConfig {
    pub fn default_timeout(&self) -> Option<Duration> {
        (self.default_timeout_secs > 0).then(|| Duration::from_secs(self.default_timeout_secs))
    }

    pub fn tool_timeout(&self, tool: &str) -> Option<Duration> {
        self.tool_timeouts
            .get(tool)
            .filter(|secs| **secs > 0)
            .map(|secs| Duration::from_secs(*secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Events retained in the bus log before the oldest are evicted.
    pub log_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            log_capacity: 10_000,
        }
    }
}

// ── Cycle defaults ────────────────────────────────────────────────────────────

/// Values agents fall back to when a cycle context omits a key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    pub project_id: String,
    pub domain: String,
    pub catalog: String,
    pub branches: Vec<String>,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            project_id: "supply-chain-prod".to_string(),
            domain: "supply-chain".to_string(),
            catalog: "ops_catalog".to_string(),
            branches: vec!["production".to_string()],
        }
    }
}

/// Warning and critical levels for the metrics the health agent evaluates.
///
/// Ratios are fractions (`0.99` = 99 %); times are seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdsConfig {
    pub cache_hit_warning: f64,
    pub cache_hit_critical: f64,
    pub conn_util_warning: f64,
    pub conn_util_critical: f64,
    pub dead_tuple_warning: f64,
    pub dead_tuple_critical: f64,
    pub lock_wait_warning: f64,
    pub lock_wait_critical: f64,
    /// Deadlocks per hour.
    pub deadlock_warning: f64,
    pub deadlock_critical: f64,
    pub slow_query_warning: f64,
    pub slow_query_critical: f64,
    pub txid_age_warning: f64,
    pub txid_age_critical: f64,
    pub repl_lag_warning: f64,
    pub repl_lag_critical: f64,
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            cache_hit_warning: 0.99,
            cache_hit_critical: 0.95,
            conn_util_warning: 0.70,
            conn_util_critical: 0.85,
            dead_tuple_warning: 0.10,
            dead_tuple_critical: 0.25,
            lock_wait_warning: 30.0,
            lock_wait_critical: 120.0,
            deadlock_warning: 2.0,
            deadlock_critical: 5.0,
            slow_query_warning: 5.0,
            slow_query_critical: 30.0,
            txid_age_warning: 500_000_000.0,
            txid_age_critical: 1_000_000_000.0,
            repl_lag_warning: 10.0,
            repl_lag_critical: 60.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Seconds between cycles in `lakeops watch`.
    pub cycle_interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub framework: FrameworkConfig,
    pub executor: ExecutorConfig,
    pub events: EventsConfig,
    pub cycle: CycleConfig,
    pub thresholds: ThresholdsConfig,
    pub schedule: ScheduleConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        if let Ok(host) = env::var("LAKEOPS_WORKSPACE_HOST") {
            if !host.is_empty() {
                config.framework.workspace_host = host;
            }
        }

        if let Ok(value) = env::var("LAKEOPS_MOCK_MODE") {
            match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => config.framework.mock_mode = true,
                "0" | "false" | "no" | "off" => config.framework.mock_mode = false,
                _ => {}
            }
        }

        if let Ok(level) = env::var("LAKEOPS_LOG_LEVEL") {
            if !level.is_empty() {
                config.telemetry.log_level = level;
            }
        }

        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    /// `cycle_interval_secs` as a [`Duration`], never shorter than one second.
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.schedule.cycle_interval_secs.max(1))
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    // ── Defaults ──────────────────────────────────────────────────────────
    // Advisory approval and no timeouts reproduce the plain execution
    // semantics; changing them alters every deployment.

    #[test]
    fn executor_defaults_are_advisory_without_deadlines() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.executor.approval_mode, ApprovalMode::Advisory);
        assert_eq!(cfg.executor.default_timeout(), None);
        assert!(cfg.executor.tool_denylist.is_empty());
        assert_eq!(cfg.executor.result_log_capacity, 10_000);
        assert_eq!(cfg.events.log_capacity, 10_000);
    }

    #[test]
    fn cycle_and_framework_defaults() {
        let cfg = AppConfig::default();
        assert!(cfg.framework.mock_mode);
        assert_eq!(cfg.cycle.project_id, "supply-chain-prod");
        assert_eq!(cfg.cycle.domain, "supply-chain");
        assert_eq!(cfg.cycle.catalog, "ops_catalog");
        assert_eq!(cfg.cycle.branches, vec!["production".to_string()]);
        assert_eq!(cfg.schedule.cycle_interval_secs, 300);
        assert_eq!(cfg.telemetry.log_level, "info");
    }

    #[test]
    fn threshold_defaults() {
        let t = ThresholdsConfig::default();
        assert!((t.cache_hit_warning - 0.99).abs() < f64::EPSILON);
        assert!((t.dead_tuple_critical - 0.25).abs() < f64::EPSILON);
        assert!(t.txid_age_warning < t.txid_age_critical);
        assert!(t.conn_util_warning < t.conn_util_critical);
    }

    // ── Timeouts ───────────────────────────────────────────────────────────

    #[test]
    fn tool_timeout_ignores_zero_and_unknown_tools() {
        let mut exec = ExecutorConfig::default();
        exec.tool_timeouts.insert("slow".to_string(), 5);
        exec.tool_timeouts.insert("zero".to_string(), 0);
        assert_eq!(exec.tool_timeout("slow"), Some(Duration::from_secs(5)));
        assert_eq!(exec.tool_timeout("zero"), None);
        assert_eq!(exec.tool_timeout("other"), None);

        exec.default_timeout_secs = 30;
        assert_eq!(exec.default_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn cycle_interval_is_at_least_one_second() {
        let mut cfg = AppConfig::default();
        cfg.schedule.cycle_interval_secs = 0;
        assert_eq!(cfg.cycle_interval(), Duration::from_secs(1));
    }

    // ── load_from ──────────────────────────────────────────────────────────

    #[test]
    fn load_from_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = AppConfig::load_from(dir.path().join("nonexistent.toml")).unwrap();
        assert_eq!(cfg.cycle.project_id, "supply-chain-prod");
        assert_eq!(cfg.executor.approval_mode, ApprovalMode::Advisory);
    }

    #[test]
    fn load_from_valid_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.toml");
        fs::write(
            &path,
            r#"
[executor]
approval_mode = "strict"
default_timeout_secs = 60
tool_denylist = ["schedule_vacuum_full"]

[executor.tool_timeouts]
run_full_index_analysis = 600

[cycle]
project_id = "retail-prod"
branches = ["production", "staging"]

[thresholds]
dead_tuple_warning = 0.2
"#,
        )
        .unwrap();

        let cfg = AppConfig::load_from(&path).unwrap();
        assert_eq!(cfg.executor.approval_mode, ApprovalMode::Strict);
        assert_eq!(cfg.executor.default_timeout(), Some(Duration::from_secs(60)));
        assert_eq!(cfg.executor.tool_denylist, vec!["schedule_vacuum_full"]);
        assert_eq!(
            cfg.executor.tool_timeout("run_full_index_analysis"),
            Some(Duration::from_secs(600))
        );
        assert_eq!(cfg.cycle.project_id, "retail-prod");
        assert_eq!(cfg.cycle.branches, vec!["production", "staging"]);
        assert!((cfg.thresholds.dead_tuple_warning - 0.2).abs() < f64::EPSILON);
        // Unspecified fields keep their defaults
        assert_eq!(cfg.cycle.domain, "supply-chain");
        assert!((cfg.thresholds.dead_tuple_critical - 0.25).abs() < f64::EPSILON);
        assert_eq!(cfg.events.log_capacity, 10_000);
    }

    #[test]
    fn load_from_invalid_toml_returns_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "this is not valid toml {{{{").unwrap();
        assert!(AppConfig::load_from(&path).is_err());
    }

    #[test]
    fn shipped_default_toml_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/default.toml");
        let raw = fs::read_to_string(path).unwrap();
        let cfg: AppConfig = toml::from_str(&raw).unwrap();
        assert_eq!(cfg.cycle.branches, vec!["production"]);
        assert!((cfg.thresholds.txid_age_critical - 1e9).abs() < 1.0);
        assert_eq!(cfg.executor.approval_mode, ApprovalMode::Advisory);
    }

    #[test]
    fn load_from_unknown_approval_mode_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mode.toml");
        fs::write(&path, "[executor]\napproval_mode = \"sometimes\"\n").unwrap();
        assert!(AppConfig::load_from(&path).is_err());
    }

    // ── save_to + roundtrip ────────────────────────────────────────────────

    #[test]
    fn save_and_reload_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub/config.toml");

        let mut cfg = AppConfig::default();
        cfg.executor.approval_mode = ApprovalMode::Gated;
        cfg.executor.tool_timeouts.insert("monitor_system_health".to_string(), 15);
        cfg.cycle.branches = vec!["production".to_string(), "ci-pr-42".to_string()];
        cfg.schedule.cycle_interval_secs = 60;

        cfg.save_to(&path).unwrap();
        assert!(path.exists());

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.executor.approval_mode, ApprovalMode::Gated);
        assert_eq!(
            loaded.executor.tool_timeout("monitor_system_health"),
            Some(Duration::from_secs(15))
        );
        assert_eq!(loaded.cycle.branches, cfg.cycle.branches);
        assert_eq!(loaded.schedule.cycle_interval_secs, 60);
    }

    // ── ApprovalMode serde ─────────────────────────────────────────────────

    #[test]
    fn approval_mode_serde_roundtrip() {
        for (mode, label) in [
            (ApprovalMode::Advisory, "\"advisory\""),
            (ApprovalMode::Gated, "\"gated\""),
            (ApprovalMode::Strict, "\"strict\""),
        ] {
            let json = serde_json::to_string(&mode).unwrap();
            assert_eq!(json, label);
            let back: ApprovalMode = serde_json::from_str(&json).unwrap();
            assert_eq!(back, mode);
        }
    }

    // ── Env var overrides ──────────────────────────────────────────────────
    // All LAKEOPS_* variables are exercised in one test so parallel tests
    // never observe each other's values.

    #[test]
    fn env_overrides_apply_after_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("env.toml");
        fs::write(
            &path,
            r#"
[framework]
workspace_host = "https://from-file"
mock_mode = true

[telemetry]
log_level = "warn"
"#,
        )
        .unwrap();

        // SAFETY: no other test reads or writes LAKEOPS_* variables.
        unsafe {
            env::set_var("LAKEOPS_WORKSPACE_HOST", "https://from-env");
            env::set_var("LAKEOPS_MOCK_MODE", "false");
            env::set_var("LAKEOPS_LOG_LEVEL", "debug");
        }
        let cfg = AppConfig::load_from(&path).unwrap();
        unsafe {
            env::remove_var("LAKEOPS_WORKSPACE_HOST");
            env::remove_var("LAKEOPS_MOCK_MODE");
            env::remove_var("LAKEOPS_LOG_LEVEL");
        }

        assert_eq!(cfg.framework.workspace_host, "https://from-env");
        assert!(!cfg.framework.mock_mode);
        assert_eq!(cfg.telemetry.log_level, "debug");
    }
}
