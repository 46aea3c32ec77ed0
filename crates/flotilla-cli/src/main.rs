// crates/flotilla-cli/src/main.rs
// ============================================================================
// Module: Flotilla CLI Entry Point
// Description: Command dispatcher for the control service, agents, and tools.
// Purpose: Run cluster processes and drive the control API from a shell.
// Dependencies: clap, flotilla-core, flotilla-server, flotilla-store-sqlite,
//               flotilla-diagnostics, tokio.
// ============================================================================

//! ## Overview
//! The `flotilla` binary starts the control service (`serve`) and node agents
//! (`agent`), submits configuration deltas (`propose`), inspects and waits on
//! cluster state (`state`, `wait`), measures a container create round trip
//! (`probe`), validates configuration files, inspects the durable
//! configuration history (`history`), and exports or verifies diagnostics
//! archives. Client commands talk to the control service over HTTP; `history`
//! opens the `SQLite` store named by the config file directly.

// ============================================================================
// SECTION: Modules
// ============================================================================

#[cfg(test)]
mod main_tests;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::ArgAction;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use flotilla_config::AgentRuntimeKind;
use flotilla_config::FlotillaConfig;
use flotilla_core::AgentSettings;
use flotilla_core::Clock;
use flotilla_core::ConfigVersion;
use flotilla_core::ConfigurationDelta;
use flotilla_core::ControlClient;
use flotilla_core::CreateContainer;
use flotilla_core::ImageRef;
use flotilla_core::NodeRuntime;
use flotilla_core::Node;
use flotilla_core::Operation;
use flotilla_core::ProbeError;
use flotilla_core::ReconciliationAgent;
use flotilla_core::SimulatedNodeRuntime;
use flotilla_core::SystemClock;
use flotilla_core::run_probe;
use flotilla_core::runtime::await_cluster_state;
use flotilla_diagnostics::DiagnosticsInputs;
use flotilla_diagnostics::FLOTILLA_VERSION;
use flotilla_diagnostics::HostFacts;
use flotilla_diagnostics::build_bundle;
use flotilla_diagnostics::verify_archive_file;
use flotilla_server::ControlServer;
use flotilla_server::HttpControlClient;
use flotilla_server::build_audit_sink;
use flotilla_store_sqlite::SqliteClusterStore;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default control service URL for client commands.
const DEFAULT_CONTROL_URL: &str = "http://127.0.0.1:4523";

/// Timeout for non-waiting client requests.
const CLIENT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum size of a delta file read by `propose`.
const MAX_DELTA_FILE_BYTES: u64 = 16 * 1024 * 1024;

/// Maximum size of an audit log read by `diagnostics export`.
const MAX_AUDIT_LOG_BYTES: u64 = 64 * 1024 * 1024;

/// Audit event prefix that marks agent activity.
const AGENT_EVENT_PREFIX: &str = "agent_";

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "flotilla", disable_help_subcommand = true, version)]
struct Cli {
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the control service.
    Serve(ConfigArgs),
    /// Run a node agent against a control service.
    Agent(ConfigArgs),
    /// Submit a configuration delta.
    Propose(ProposeCommand),
    /// Print the current cluster state.
    State(StateCommand),
    /// Wait until the cluster matches the current configuration.
    Wait(WaitCommand),
    /// Create a probe container, wait for it to run, then remove it.
    Probe(ProbeCommand),
    /// Inspect or prune the stored configuration history.
    History {
        /// Selected history subcommand.
        #[command(subcommand)]
        command: HistoryCommand,
    },
    /// Configuration utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Diagnostics archive utilities.
    Diagnostics {
        /// Selected diagnostics subcommand.
        #[command(subcommand)]
        command: DiagnosticsCommand,
    },
}

/// Config file selection shared by several commands.
#[derive(Args, Debug)]
struct ConfigArgs {
    /// Optional config file path (defaults to flotilla.toml or `FLOTILLA_CONFIG`).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Control service location shared by client commands.
#[derive(Args, Debug)]
struct ControlArgs {
    /// Control service base URL.
    #[arg(long, value_name = "URL", default_value = DEFAULT_CONTROL_URL)]
    control_url: String,
}

/// Arguments for `propose`.
#[derive(Args, Debug)]
struct ProposeCommand {
    /// Control service location.
    #[command(flatten)]
    control: ControlArgs,
    /// Path to a JSON `ConfigurationDelta`.
    #[arg(long, value_name = "PATH")]
    delta: PathBuf,
    /// Replace the delta's base version with the current version.
    #[arg(long, action = ArgAction::SetTrue)]
    rebase: bool,
}

/// Arguments for `state`.
#[derive(Args, Debug)]
struct StateCommand {
    /// Control service location.
    #[command(flatten)]
    control: ControlArgs,
    /// Print the convergence report instead of raw state.
    #[arg(long, action = ArgAction::SetTrue)]
    convergence: bool,
}

/// Arguments for `wait`.
#[derive(Args, Debug)]
struct WaitCommand {
    /// Control service location.
    #[command(flatten)]
    control: ControlArgs,
    /// Maximum time to wait in milliseconds.
    #[arg(long, value_name = "MS", default_value_t = 60_000)]
    timeout_ms: u64,
}

/// Arguments for `probe`.
#[derive(Args, Debug)]
struct ProbeCommand {
    /// Control service location.
    #[command(flatten)]
    control: ControlArgs,
    /// Optional config file supplying probe defaults.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Image override.
    #[arg(long, value_name = "IMAGE")]
    image: Option<String>,
    /// Convergence timeout override in milliseconds.
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,
    /// Pull the image with a throwaway container before measuring.
    #[arg(long, action = ArgAction::SetTrue)]
    prefetch_image: bool,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Validate a configuration file.
    Validate(ConfigArgs),
    /// Print a canonical example configuration.
    Example,
}

/// History subcommands.
#[derive(Subcommand, Debug)]
enum HistoryCommand {
    /// List stored configuration versions, oldest first.
    List(ConfigArgs),
    /// Print one stored configuration version.
    Show(HistoryShowCommand),
    /// Delete all but the newest stored versions.
    Prune(HistoryPruneCommand),
}

/// Arguments for `history show`.
#[derive(Args, Debug)]
struct HistoryShowCommand {
    /// Config file naming the store.
    #[command(flatten)]
    config: ConfigArgs,
    /// Configuration version to print.
    #[arg(long, value_name = "VERSION")]
    version: u64,
}

/// Arguments for `history prune`.
#[derive(Args, Debug)]
struct HistoryPruneCommand {
    /// Config file naming the store.
    #[command(flatten)]
    config: ConfigArgs,
    /// Number of newest versions to keep.
    #[arg(long, value_name = "COUNT")]
    keep: u64,
}

/// Diagnostics subcommands.
#[derive(Subcommand, Debug)]
enum DiagnosticsCommand {
    /// Write a diagnostics archive.
    Export(DiagnosticsExportCommand),
    /// Check that an archive holds exactly the expected entries.
    Verify(DiagnosticsVerifyCommand),
}

/// Arguments for `diagnostics export`.
#[derive(Args, Debug)]
struct DiagnosticsExportCommand {
    /// Output archive path; must not exist.
    #[arg(long, value_name = "PATH")]
    output: PathBuf,
    /// Control service to snapshot; skipped when unreachable.
    #[arg(long, value_name = "URL", default_value = DEFAULT_CONTROL_URL)]
    control_url: String,
    /// Audit log (JSON lines) to split into service logs.
    #[arg(long, value_name = "PATH")]
    audit_log: Option<PathBuf>,
    /// System log to include.
    #[arg(long, value_name = "PATH", default_value = "/var/log/syslog")]
    syslog: PathBuf,
}

/// Arguments for `diagnostics verify`.
#[derive(Args, Debug)]
struct DiagnosticsVerifyCommand {
    /// Archive to check.
    #[arg(long, value_name = "PATH")]
    archive: PathBuf,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper for user-facing messages.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
async fn run(cli: Cli) -> CliResult<ExitCode> {
    match cli.command {
        Commands::Serve(args) => command_serve(args).await,
        Commands::Agent(args) => command_agent(args).await,
        Commands::Propose(command) => command_propose(command).await,
        Commands::State(command) => command_state(command).await,
        Commands::Wait(command) => command_wait(command).await,
        Commands::Probe(command) => command_probe(command).await,
        Commands::History {
            command,
        } => command_history(&command),
        Commands::Config {
            command,
        } => command_config(command),
        Commands::Diagnostics {
            command,
        } => command_diagnostics(command).await,
    }
}

// ============================================================================
// SECTION: Process Commands
// ============================================================================

/// Executes the `serve` command.
async fn command_serve(args: ConfigArgs) -> CliResult<ExitCode> {
    let config = load_config(args.config.as_deref())?;
    let server = ControlServer::from_config(&config)
        .map_err(|err| CliError::new(format!("control service init failed: {err}")))?;
    let listener = server.bind().await.map_err(|err| CliError::new(err.to_string()))?;
    let addr = listener.local_addr().map_err(|err| CliError::new(err.to_string()))?;
    write_stderr_line(&format!("flotilla control service listening on http://{addr}"))
        .map_err(|err| CliError::new(output_error("stderr", &err)))?;
    server
        .serve_on(listener, shutdown_signal())
        .await
        .map_err(|err| CliError::new(format!("control service failed: {err}")))?;
    Ok(ExitCode::SUCCESS)
}

/// Executes the `agent` command.
async fn command_agent(args: ConfigArgs) -> CliResult<ExitCode> {
    let config = load_config(args.config.as_deref())?;
    let agent_config =
        config.require_agent().map_err(|err| CliError::new(err.to_string()))?.clone();
    let address = agent_config.address().map_err(|err| CliError::new(err.to_string()))?;
    let client: Arc<dyn ControlClient> = Arc::new(
        HttpControlClient::new(&agent_config.control_url, agent_config.request_timeout())
            .map_err(|err| CliError::new(err.to_string()))?,
    );
    client
        .register_node(Node::new(agent_config.node_id(), address))
        .await
        .map_err(|err| CliError::new(format!("node registration failed: {err}")))?;
    let audit = build_audit_sink(&config.audit).map_err(|err| CliError::new(err.to_string()))?;
    let settings = AgentSettings::new(agent_config.node_id())
        .with_tick_interval(agent_config.tick_interval());
    let runtime: Arc<dyn NodeRuntime> = match agent_config.runtime {
        AgentRuntimeKind::Simulated => Arc::new(SimulatedNodeRuntime::new()),
    };
    let agent = ReconciliationAgent::new(
        settings,
        client,
        runtime,
        Arc::new(SystemClock),
        audit,
    );
    write_stderr_line(&format!(
        "flotilla agent {} reconciling against {}",
        agent_config.node_id, agent_config.control_url
    ))
    .map_err(|err| CliError::new(output_error("stderr", &err)))?;

    let (stop, signal) = watch::channel(false);
    let task = tokio::spawn(agent.run(signal));
    shutdown_signal().await;
    let _ = stop.send(true);
    task.await.map_err(|err| CliError::new(format!("agent task failed: {err}")))?;
    Ok(ExitCode::SUCCESS)
}

/// Resolves when the process receives Ctrl-C.
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

// ============================================================================
// SECTION: Client Commands
// ============================================================================

/// Executes the `propose` command.
async fn command_propose(command: ProposeCommand) -> CliResult<ExitCode> {
    let client = http_client(&command.control)?;
    let mut delta = read_delta(&command.delta)?;
    if command.rebase {
        let current = client
            .current_configuration()
            .await
            .map_err(|err| CliError::new(format!("configuration fetch failed: {err}")))?;
        delta.base_version = current.version;
    }
    let version = client
        .propose(delta)
        .await
        .map_err(|err| CliError::new(format!("proposal rejected: {err}")))?;
    write_json(&serde_json::json!({ "version": version }))?;
    Ok(ExitCode::SUCCESS)
}

/// Executes the `state` command.
async fn command_state(command: StateCommand) -> CliResult<ExitCode> {
    let client = http_client(&command.control)?;
    let state = client
        .current_state()
        .await
        .map_err(|err| CliError::new(format!("state fetch failed: {err}")))?;
    if command.convergence {
        let configuration = client
            .current_configuration()
            .await
            .map_err(|err| CliError::new(format!("configuration fetch failed: {err}")))?;
        write_json(&configuration.convergence(&state))?;
    } else {
        write_json(&state)?;
    }
    Ok(ExitCode::SUCCESS)
}

/// Executes the `wait` command.
async fn command_wait(command: WaitCommand) -> CliResult<ExitCode> {
    let client = http_client(&command.control)?;
    let configuration = client
        .current_configuration()
        .await
        .map_err(|err| CliError::new(format!("configuration fetch failed: {err}")))?;
    let timeout = Duration::from_millis(command.timeout_ms);
    let result = await_cluster_state(
        client.as_ref(),
        &SystemClock,
        |state| configuration.convergence(state).is_converged(),
        timeout,
    )
    .await;
    match result {
        Ok(state) => {
            write_json(&configuration.convergence(&state))?;
            Ok(ExitCode::SUCCESS)
        }
        Err(ProbeError::Timeout(_)) => {
            let state = client
                .current_state()
                .await
                .map_err(|err| CliError::new(format!("state fetch failed: {err}")))?;
            write_json(&configuration.convergence(&state))?;
            write_stderr_line(&format!(
                "cluster did not converge to version {} within {} ms",
                configuration.version, command.timeout_ms
            ))
            .map_err(|err| CliError::new(output_error("stderr", &err)))?;
            Ok(ExitCode::FAILURE)
        }
        Err(err) => Err(CliError::new(format!("wait failed: {err}"))),
    }
}

/// Probe result printed by `probe`.
#[derive(Debug, Serialize)]
struct ProbeReport {
    /// Version the probe container was published in.
    version: u64,
    /// Milliseconds from proposal to observed convergence.
    elapsed_ms: u128,
}

/// Executes the `probe` command.
async fn command_probe(command: ProbeCommand) -> CliResult<ExitCode> {
    let defaults = match &command.config {
        Some(path) => load_config(Some(path))?.probe,
        None => FlotillaConfig::default().probe,
    };
    let client = http_client(&command.control)?;
    let image = command.image.map_or_else(|| defaults.image(), ImageRef::new);
    let timeout = command.timeout_ms.map_or_else(|| defaults.timeout(), Duration::from_millis);
    let operation = CreateContainer::new(client, Arc::new(SystemClock))
        .with_image(image)
        .with_timeout(timeout)
        .with_image_prefetch(command.prefetch_image || defaults.prefetch_image);
    let mut probe = operation
        .get_probe()
        .await
        .map_err(|err| CliError::new(format!("probe setup failed: {err}")))?;
    let outcome = run_probe(probe.as_mut())
        .await
        .map_err(|err| CliError::new(format!("probe failed: {err}")))?;
    write_json(&ProbeReport {
        version: outcome.version.get(),
        elapsed_ms: outcome.elapsed.as_millis(),
    })?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: History Commands
// ============================================================================

/// Executes history subcommands.
fn command_history(command: &HistoryCommand) -> CliResult<ExitCode> {
    let args = match command {
        HistoryCommand::List(args) => args,
        HistoryCommand::Show(show) => &show.config,
        HistoryCommand::Prune(prune) => &prune.config,
    };
    let config = load_config(args.config.as_deref())?;
    let store = open_history_store(&config)?;
    write_json(&history_report(&store, command)?)?;
    Ok(ExitCode::SUCCESS)
}

/// Opens the durable store named by `config`.
fn open_history_store(config: &FlotillaConfig) -> CliResult<SqliteClusterStore> {
    let sqlite = config
        .store
        .sqlite()
        .ok_or_else(|| CliError::new("configuration history requires a sqlite store".to_string()))?;
    SqliteClusterStore::new(sqlite).map_err(|err| CliError::new(format!("store open failed: {err}")))
}

/// Runs a history subcommand against `store` and returns its JSON output.
fn history_report(store: &SqliteClusterStore, command: &HistoryCommand) -> CliResult<Value> {
    let rendered = match command {
        HistoryCommand::List(_) => serde_json::to_value(
            store.list_configuration_versions().map_err(|err| CliError::new(err.to_string()))?,
        ),
        HistoryCommand::Show(show) => {
            let configuration = store
                .load_configuration_version(ConfigVersion::new(show.version))
                .map_err(|err| CliError::new(err.to_string()))?
                .ok_or_else(|| {
                    CliError::new(format!("configuration version {} is not stored", show.version))
                })?;
            serde_json::to_value(configuration)
        }
        HistoryCommand::Prune(prune) => {
            let deleted =
                store.prune_versions(prune.keep).map_err(|err| CliError::new(err.to_string()))?;
            Ok(serde_json::json!({ "deleted": deleted }))
        }
    };
    rendered.map_err(|err| CliError::new(format!("json output failed: {err}")))
}

// ============================================================================
// SECTION: Config Commands
// ============================================================================

/// Executes config subcommands.
fn command_config(command: ConfigCommand) -> CliResult<ExitCode> {
    match command {
        ConfigCommand::Validate(args) => {
            load_config(args.config.as_deref())?;
            write_stdout_line("config ok").map_err(|err| CliError::new(output_error("stdout", &err)))?;
        }
        ConfigCommand::Example => {
            write_stdout_bytes(flotilla_config::config_toml_example().as_bytes())
                .map_err(|err| CliError::new(output_error("stdout", &err)))?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Diagnostics Commands
// ============================================================================

/// Executes diagnostics subcommands.
async fn command_diagnostics(command: DiagnosticsCommand) -> CliResult<ExitCode> {
    match command {
        DiagnosticsCommand::Export(command) => command_diagnostics_export(command).await,
        DiagnosticsCommand::Verify(command) => command_diagnostics_verify(&command),
    }
}

/// Executes `diagnostics export`.
async fn command_diagnostics_export(command: DiagnosticsExportCommand) -> CliResult<ExitCode> {
    let mut inputs = DiagnosticsInputs::new(SystemClock.now(), HostFacts::gather());
    if let Err(err) = inputs.read_syslog(&command.syslog) {
        write_stderr_line(&format!("skipping {}: {err}", command.syslog.display()))
            .map_err(|err| CliError::new(output_error("stderr", &err)))?;
    }
    if let Some(path) = &command.audit_log {
        let contents = read_bounded(path, MAX_AUDIT_LOG_BYTES)?;
        let (control, agent) = split_audit_log(&contents);
        inputs.control_service.insert("audit.jsonl".to_string(), control);
        inputs.dataset_agent.insert("agent.jsonl".to_string(), agent.clone());
        inputs.container_agent.insert("agent.jsonl".to_string(), agent);
    }
    inputs.runtime_version = format!("simulated {FLOTILLA_VERSION}\n").into_bytes();
    inputs.service_status = snapshot_control_service(&command.control_url, &mut inputs).await;

    let bundle = build_bundle(&inputs).map_err(|err| CliError::new(err.to_string()))?;
    bundle.write_file(&command.output).map_err(|err| CliError::new(err.to_string()))?;
    write_stdout_line(&command.output.display().to_string())
        .map_err(|err| CliError::new(output_error("stdout", &err)))?;
    Ok(ExitCode::SUCCESS)
}

/// Copies control service state into `inputs` and returns the status text.
async fn snapshot_control_service(control_url: &str, inputs: &mut DiagnosticsInputs) -> Vec<u8> {
    let client = match HttpControlClient::new(control_url, CLIENT_REQUEST_TIMEOUT) {
        Ok(client) => client,
        Err(err) => return format!("control-service: invalid url: {err}\n").into_bytes(),
    };
    let configuration = match client.current_configuration().await {
        Ok(configuration) => configuration,
        Err(err) => return format!("control-service: unreachable at {control_url}: {err}\n").into_bytes(),
    };
    let state = client.current_state().await.unwrap_or_default();
    let nodes = client.nodes().await.unwrap_or_default();
    if let Ok(bytes) = serde_json::to_vec_pretty(configuration.as_ref()) {
        inputs.control_service.insert("configuration.json".to_string(), bytes);
    }
    if let Ok(bytes) = serde_json::to_vec_pretty(&state) {
        inputs.control_service.insert("state.json".to_string(), bytes);
    }
    let runtime_info = serde_json::json!({ "runtime": "simulated", "nodes": nodes });
    if let Ok(bytes) = serde_json::to_vec_pretty(&runtime_info) {
        inputs.runtime_info = bytes;
    }
    let report = configuration.convergence(&state);
    format!(
        "control-service: reachable at {control_url}\nconfiguration-version: {}\nstate-revision: {}\nnodes: {}\npending: {}\nfailed: {}\n",
        configuration.version,
        state.revision,
        nodes.len(),
        report.pending.len(),
        report.failed.len()
    )
    .into_bytes()
}

/// Executes `diagnostics verify`.
fn command_diagnostics_verify(command: &DiagnosticsVerifyCommand) -> CliResult<ExitCode> {
    let verification =
        verify_archive_file(&command.archive).map_err(|err| CliError::new(err.to_string()))?;
    write_json(&verification)?;
    if verification.is_complete() {
        Ok(ExitCode::SUCCESS)
    } else {
        write_stderr_line(&verification.to_string())
            .map_err(|err| CliError::new(output_error("stderr", &err)))?;
        Ok(ExitCode::FAILURE)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Loads and validates configuration.
fn load_config(path: Option<&Path>) -> CliResult<FlotillaConfig> {
    FlotillaConfig::load(path).map_err(|err| CliError::new(format!("config load failed: {err}")))
}

/// Builds an HTTP control client.
fn http_client(args: &ControlArgs) -> CliResult<Arc<HttpControlClient>> {
    HttpControlClient::new(&args.control_url, CLIENT_REQUEST_TIMEOUT)
        .map(Arc::new)
        .map_err(|err| CliError::new(err.to_string()))
}

/// Reads a file, refusing anything larger than `limit`.
fn read_bounded(path: &Path, limit: u64) -> CliResult<Vec<u8>> {
    let metadata = fs::metadata(path)
        .map_err(|err| CliError::new(format!("failed to read {}: {err}", path.display())))?;
    if metadata.len() > limit {
        return Err(CliError::new(format!(
            "{} exceeds size limit ({} > {limit} bytes)",
            path.display(),
            metadata.len()
        )));
    }
    fs::read(path).map_err(|err| CliError::new(format!("failed to read {}: {err}", path.display())))
}

/// Reads a JSON configuration delta.
fn read_delta(path: &Path) -> CliResult<ConfigurationDelta> {
    let bytes = read_bounded(path, MAX_DELTA_FILE_BYTES)?;
    serde_json::from_slice(&bytes)
        .map_err(|err| CliError::new(format!("invalid delta {}: {err}", path.display())))
}

/// Splits an audit log into control service lines and agent lines.
///
/// Lines that are not JSON objects with an `event` field go to the control
/// service log unchanged.
fn split_audit_log(contents: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let mut control = Vec::new();
    let mut agent = Vec::new();
    for line in contents.split(|byte| *byte == b'\n').filter(|line| !line.is_empty()) {
        let is_agent = serde_json::from_slice::<Value>(line).ok().is_some_and(|value| {
            value
                .get("event")
                .and_then(Value::as_str)
                .is_some_and(|event| event.starts_with(AGENT_EVENT_PREFIX))
        });
        let target = if is_agent { &mut agent } else { &mut control };
        target.extend_from_slice(line);
        target.push(b'\n');
    }
    (control, agent)
}

/// Writes a value as pretty JSON to stdout.
fn write_json<T: Serialize>(value: &T) -> CliResult<()> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| CliError::new(format!("json output failed: {err}")))?;
    write_stdout_line(&rendered).map_err(|err| CliError::new(output_error("stdout", &err)))
}

/// Writes a single line to stdout.
fn write_stdout_line(message: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

/// Writes raw bytes to stdout without adding a newline.
fn write_stdout_bytes(bytes: &[u8]) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    stdout.write_all(bytes)
}

/// Writes a single line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Formats an output error message.
fn output_error(stream: &str, error: &std::io::Error) -> String {
    format!("failed to write to {stream}: {error}")
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}
