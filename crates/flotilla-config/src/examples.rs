// crates/flotilla-config/src/examples.rs
// ============================================================================
// Module: Config Examples
// Description: Canonical example configuration payloads.
// Purpose: Deterministic examples for docs and tooling.
// Dependencies: std
// ============================================================================

//! ## Overview
//! Canonical example for `flotilla.toml`. The output is deterministic and is
//! parsed by the test suite so it cannot drift from the config model.

/// Returns a canonical example `flotilla.toml` configuration.
#[must_use]
pub fn config_toml_example() -> String {
    String::from(
        r#"[server]
bind = "127.0.0.1:4523"
max_body_bytes = 1048576
max_wait_ms = 60000

[audit]
enabled = true
# path = "flotilla-audit.jsonl"

[store]
type = "sqlite"
path = "flotilla.db"
journal_mode = "wal"
sync_mode = "full"
busy_timeout_ms = 5000
max_versions = 1000

[agent]
node_id = "node-1"
address = "10.0.0.1"
control_url = "http://127.0.0.1:4523"
tick_interval_ms = 1000
request_timeout_ms = 90000
runtime = "simulated"

[probe]
image = "busybox"
timeout_ms = 60000
prefetch_image = false
"#,
    )
}
