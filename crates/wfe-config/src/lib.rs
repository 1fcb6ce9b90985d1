//! Layered configuration for the engine-wide tunables: a project JSON file
//! overlaid by environment variables overlaid by CLI overrides, the same
//! layering order (lowest to highest precedence) as a typical project/env/
//! runtime config store, scoped down to just the knobs this engine reads at
//! startup instead of a whole provider-and-channel settings tree.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use wfe_types::limits;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_max_steps_per_tick")]
    pub max_steps_per_tick: usize,
    #[serde(default = "default_scheduled_tick_concurrency")]
    pub scheduled_tick_concurrency: usize,
    #[serde(default = "default_user_tick_concurrency")]
    pub user_tick_concurrency: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    #[serde(default = "default_stall_threshold_ms")]
    pub stall_threshold_ms: i64,
    #[serde(default = "default_retry_cap")]
    pub default_retry_cap: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_jitter_fraction")]
    pub jitter_fraction: f64,
    #[serde(default = "default_payment_max_atomic")]
    pub default_payment_max_atomic: u128,
    #[serde(default = "default_network")]
    pub default_network: String,
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default = "default_tool_discovery_max_results")]
    pub tool_discovery_max_results: usize,
}

fn default_max_steps_per_tick() -> usize {
    limits::MAX_STEPS_PER_TICK
}
fn default_scheduled_tick_concurrency() -> usize {
    limits::SCHEDULED_TICK_CONCURRENCY
}
fn default_user_tick_concurrency() -> usize {
    limits::USER_TICK_CONCURRENCY
}
fn default_poll_interval_ms() -> u64 {
    limits::POLL_INTERVAL_MS
}
fn default_ping_interval_ms() -> u64 {
    limits::PING_INTERVAL_MS
}
fn default_stall_threshold_ms() -> i64 {
    limits::STALL_THRESHOLD_MS
}
fn default_retry_cap() -> u32 {
    limits::DEFAULT_RETRY_CAP
}
fn default_backoff_base_ms() -> u64 {
    limits::BACKOFF_BASE_MS
}
fn default_backoff_max_ms() -> u64 {
    limits::BACKOFF_MAX_MS
}
fn default_jitter_fraction() -> f64 {
    limits::JITTER_FRACTION
}
fn default_payment_max_atomic() -> u128 {
    limits::DEFAULT_PAYMENT_MAX_ATOMIC
}
fn default_network() -> String {
    limits::DEFAULT_NETWORK.to_string()
}
fn default_timeout_ms() -> u64 {
    limits::DEFAULT_TIMEOUT_MS
}
fn default_tool_discovery_max_results() -> usize {
    limits::TOOL_DISCOVERY_MAX_RESULTS
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps_per_tick: default_max_steps_per_tick(),
            scheduled_tick_concurrency: default_scheduled_tick_concurrency(),
            user_tick_concurrency: default_user_tick_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            ping_interval_ms: default_ping_interval_ms(),
            stall_threshold_ms: default_stall_threshold_ms(),
            default_retry_cap: default_retry_cap(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            jitter_fraction: default_jitter_fraction(),
            default_payment_max_atomic: default_payment_max_atomic(),
            default_network: default_network(),
            default_timeout_ms: default_timeout_ms(),
            tool_discovery_max_results: default_tool_discovery_max_results(),
        }
    }
}

/// Reads the recognized `WFE_*` environment options, falling back to the
/// compiled-in default for anything unset or unparseable.
pub fn env_layer() -> Value {
    let mut root = empty_object();
    set_env_usize(&mut root, "max_steps_per_tick", "WFE_MAX_STEPS_PER_TICK");
    set_env_usize(&mut root, "scheduled_tick_concurrency", "WFE_MAX_CONCURRENCY");
    set_env_usize(&mut root, "user_tick_concurrency", "WFE_USER_TICK_CONCURRENCY");
    set_env_u64(&mut root, "poll_interval_ms", "WFE_POLL_INTERVAL_MS");
    set_env_u64(&mut root, "ping_interval_ms", "WFE_PING_INTERVAL_MS");
    set_env_i64(&mut root, "stall_threshold_ms", "WFE_STALL_THRESHOLD_MS");
    set_env_u32(&mut root, "default_retry_cap", "WFE_DEFAULT_RETRY_CAP");
    set_env_u64(&mut root, "backoff_base_ms", "WFE_BACKOFF_BASE_MS");
    set_env_u64(&mut root, "backoff_max_ms", "WFE_BACKOFF_MAX_MS");
    set_env_f64(&mut root, "jitter_fraction", "WFE_JITTER_FRACTION");
    set_env_u128_as_str(&mut root, "default_payment_max_atomic", "WFE_DEFAULT_PAYMENT_MAX_ATOMIC");
    if let Ok(network) = std::env::var("WFE_DEFAULT_NETWORK") {
        if !network.trim().is_empty() {
            deep_merge(&mut root, &json!({ "default_network": network }));
        }
    }
    set_env_u64(&mut root, "default_timeout_ms", "WFE_DEFAULT_TIMEOUT_MS");
    set_env_usize(&mut root, "tool_discovery_max_results", "WFE_TOOL_DISCOVERY_MAX_RESULTS");
    root
}

fn set_env_usize(root: &mut Value, key: &str, env_name: &str) {
    if let Some(parsed) = parsed_env::<usize>(env_name) {
        deep_merge(root, &json!({ key: parsed }));
    }
}
fn set_env_u32(root: &mut Value, key: &str, env_name: &str) {
    if let Some(parsed) = parsed_env::<u32>(env_name) {
        deep_merge(root, &json!({ key: parsed }));
    }
}
fn set_env_u64(root: &mut Value, key: &str, env_name: &str) {
    if let Some(parsed) = parsed_env::<u64>(env_name) {
        deep_merge(root, &json!({ key: parsed }));
    }
}
fn set_env_i64(root: &mut Value, key: &str, env_name: &str) {
    if let Some(parsed) = parsed_env::<i64>(env_name) {
        deep_merge(root, &json!({ key: parsed }));
    }
}
fn set_env_f64(root: &mut Value, key: &str, env_name: &str) {
    if let Some(parsed) = parsed_env::<f64>(env_name) {
        deep_merge(root, &json!({ key: parsed }));
    }
}
fn set_env_u128_as_str(root: &mut Value, key: &str, env_name: &str) {
    if let Some(parsed) = parsed_env::<u128>(env_name) {
        deep_merge(root, &json!({ key: parsed }));
    }
}

fn parsed_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|raw| raw.trim().parse::<T>().ok())
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base_value, overlay_value) => {
            *base_value = overlay_value.clone();
        }
    }
}

/// Loads `EngineConfig` from a project JSON file (if present), overlaid by
/// `WFE_*` environment variables, overlaid by `cli_overrides` — the same
/// three layers SPEC_FULL's ambient config component calls for, lowest to
/// highest precedence.
pub async fn load(project_path: impl AsRef<Path>, cli_overrides: Option<Value>) -> anyhow::Result<EngineConfig> {
    let project_path: PathBuf = project_path.as_ref().to_path_buf();
    let mut merged = empty_object();
    if let Ok(raw) = tokio::fs::read_to_string(&project_path).await {
        if let Ok(project) = serde_json::from_str::<Value>(&raw) {
            deep_merge(&mut merged, &project);
        }
    }
    deep_merge(&mut merged, &env_layer());
    if let Some(cli) = cli_overrides {
        deep_merge(&mut merged, &cli);
    }
    Ok(serde_json::from_value(merged)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_compiled_in_limits() {
        let config = EngineConfig::default();
        assert_eq!(config.default_retry_cap, limits::DEFAULT_RETRY_CAP);
        assert_eq!(config.default_timeout_ms, limits::DEFAULT_TIMEOUT_MS);
        assert_eq!(config.default_network, limits::DEFAULT_NETWORK);
    }

    #[test]
    fn env_layer_overrides_only_set_variables() {
        std::env::set_var("WFE_DEFAULT_RETRY_CAP", "7");
        std::env::remove_var("WFE_DEFAULT_TIMEOUT_MS");
        let layer = env_layer();
        assert_eq!(layer["default_retry_cap"], json!(7));
        assert!(layer.get("default_timeout_ms").is_none());
        std::env::remove_var("WFE_DEFAULT_RETRY_CAP");
    }

    #[tokio::test]
    async fn load_falls_back_to_defaults_when_nothing_is_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = load(&path, None).await.unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[tokio::test]
    async fn cli_overrides_win_over_env_and_project_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, r#"{"max_steps_per_tick": 4}"#).await.unwrap();
        std::env::set_var("WFE_MAX_STEPS_PER_TICK", "8");
        let config = load(&path, Some(json!({ "max_steps_per_tick": 16 }))).await.unwrap();
        assert_eq!(config.max_steps_per_tick, 16);
        std::env::remove_var("WFE_MAX_STEPS_PER_TICK");
    }
}
