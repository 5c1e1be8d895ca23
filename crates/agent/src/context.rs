use serde::Serialize;
use serde_json::Value;

use lakeops_config::CycleConfig;
use lakeops_core::Payload;

/// Parameters for one automation pass.
///
/// An open map of caller-supplied keys.  Each agent reads the keys it knows
/// and falls back to the `[cycle]` defaults for the common ones.
///
/// | Key                  | Read by      | Default                         |
/// |----------------------|--------------|---------------------------------|
/// | `project_id`         | all          | `cycle.project_id`              |
/// | `branches`           | perf, health | `cycle.branches`                |
/// | `domain`             | provisioning | `cycle.domain`                  |
/// | `catalog`            | provisioning | `cycle.catalog`                 |
/// | `is_new_project`     | provisioning | `true`                          |
/// | `pending_prs`        | provisioning | `[]` (`{action, number}`)       |
/// | `pending_migrations` | provisioning | `[]` (`{pr_number, files}`)     |
/// | `sync_table_pairs`   | health       | orders and events delta copies  |
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleContext {
    values: Payload,
    #[serde(skip)]
    defaults: CycleConfig,
}

impl CycleContext {
    pub fn new(defaults: CycleConfig) -> Self {
        Self {
            values: Payload::new(),
            defaults,
        }
    }

    pub fn from_payload(values: Payload, defaults: CycleConfig) -> Self {
        Self { values, defaults }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key).filter(|v| !v.is_null())
    }

    pub fn as_payload(&self) -> &Payload {
        &self.values
    }

    pub fn project_id(&self) -> &str {
        self.str_or("project_id", &self.defaults.project_id)
    }

    pub fn domain(&self) -> &str {
        self.str_or("domain", &self.defaults.domain)
    }

    pub fn catalog(&self) -> &str {
        self.str_or("catalog", &self.defaults.catalog)
    }

    /// Branches to sweep.  An explicit empty list means none.
    pub fn branches(&self) -> Vec<String> {
        match self.get("branches") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(Value::String(single)) => vec![single.clone()],
            _ => self.defaults.branches.clone(),
        }
    }

    /// First branch, for once-per-cycle tools.
    pub fn primary_branch(&self) -> String {
        self.branches()
            .into_iter()
            .next()
            .unwrap_or_else(|| "production".to_string())
    }

    pub fn str_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).and_then(Value::as_str).unwrap_or(default)
    }

    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(Value::as_bool).unwrap_or(default)
    }

    /// Object entries of an array-valued key; anything else is empty.
    pub fn records(&self, key: &str) -> Vec<Payload> {
        match self.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_object().cloned())
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn falls_back_to_cycle_defaults() {
        let ctx = CycleContext::new(CycleConfig::default());
        assert_eq!(ctx.project_id(), "supply-chain-prod");
        assert_eq!(ctx.domain(), "supply-chain");
        assert_eq!(ctx.catalog(), "ops_catalog");
        assert_eq!(ctx.branches(), vec!["production"]);
        assert!(ctx.bool_or("is_new_project", true));
    }

    #[test]
    fn explicit_values_win() {
        let ctx = CycleContext::new(CycleConfig::default())
            .with("project_id", "retail")
            .with("branches", json!(["staging", "dev"]))
            .with("is_new_project", false);
        assert_eq!(ctx.project_id(), "retail");
        assert_eq!(ctx.branches(), vec!["staging", "dev"]);
        assert_eq!(ctx.primary_branch(), "staging");
        assert!(!ctx.bool_or("is_new_project", true));
    }

    #[test]
    fn empty_branch_list_is_respected() {
        let ctx = CycleContext::new(CycleConfig::default()).with("branches", json!([]));
        assert!(ctx.branches().is_empty());
        assert_eq!(ctx.primary_branch(), "production");
    }

    #[test]
    fn null_counts_as_absent() {
        let ctx = CycleContext::new(CycleConfig::default()).with("project_id", Value::Null);
        assert_eq!(ctx.project_id(), "supply-chain-prod");
    }

    #[test]
    fn records_keep_objects_only() {
        let ctx = CycleContext::new(CycleConfig::default())
            .with("pending_prs", json!([{"action": "opened", "number": 1}, 7]));
        let prs = ctx.records("pending_prs");
        assert_eq!(prs.len(), 1);
        assert_eq!(prs[0]["number"], 1);
        assert!(ctx.records("missing").is_empty());
    }
}
