// crates/flotilla-config/tests/common/mod.rs
// =============================================================================
// Module: Config Test Helpers
// Description: Shared helpers for config validation tests.
// Purpose: Reduce duplication across integration tests for flotilla-config.
// =============================================================================

#![allow(dead_code, reason = "Test helpers are selectively used across suites.")]

use flotilla_config::AgentConfig;
use flotilla_config::AgentRuntimeKind;
use flotilla_config::ConfigError;
use flotilla_config::FlotillaConfig;

/// Parses a TOML string into a `FlotillaConfig` without validating it.
pub fn config_from_toml(toml_str: &str) -> Result<FlotillaConfig, toml::de::Error> {
    toml::from_str(toml_str)
}

/// Returns a minimal config with all defaults applied.
pub fn minimal_config() -> Result<FlotillaConfig, toml::de::Error> {
    config_from_toml("")
}

/// Returns a valid agent section.
pub fn agent_config() -> AgentConfig {
    AgentConfig {
        node_id: "node-1".to_string(),
        address: "10.0.0.1".to_string(),
        control_url: "http://127.0.0.1:4523".to_string(),
        tick_interval_ms: 1_000,
        request_timeout_ms: 90_000,
        runtime: AgentRuntimeKind::Simulated,
    }
}

/// Checks that `result` failed with a message containing `needle`.
pub fn assert_invalid(result: Result<(), ConfigError>, needle: &str) -> Result<(), String> {
    match result {
        Err(error) => {
            let message = error.to_string();
            if message.contains(needle) {
                Ok(())
            } else {
                Err(format!("error {message} did not contain {needle}"))
            }
        }
        Ok(()) => Err("expected invalid config".to_string()),
    }
}
