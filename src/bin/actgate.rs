//! actgate CLI: inspect gate configs and replay call scenarios.

use actgate::config::{Config, GateConfig};
use actgate::telemetry::{TelemetryConfig, init_telemetry};
use actgate::{ActionError, DispatchCall, DispatchGate, DispatchOptions, dispatch_fn};
use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Parser)]
#[command(name = "actgate", about = "Namespace locking and dedupe for action dispatch")]
struct Cli {
    /// Gate config file (overrides ACTGATE_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a gate config and print the effective settings
    Check,
    /// Replay a scripted call scenario against a simulated host
    Simulate {
        /// Scenario TOML file
        scenario: PathBuf,
    },
}

/// A scripted run: host action behaviour plus timed calls.
#[derive(Debug, Deserialize)]
struct Scenario {
    #[serde(default)]
    actions: HashMap<String, ActionScript>,
    #[serde(default, rename = "call")]
    calls: Vec<ScriptedCall>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ActionScript {
    #[serde(default)]
    duration_ms: u64,
    #[serde(default)]
    fail: bool,
    /// Actions dispatched (and awaited) from inside this one.
    #[serde(default)]
    nested: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ScriptedCall {
    at_ms: u64,
    action: String,
    payload: Option<Value>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let env = Config::from_env();

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: env.otel_endpoint.clone(),
        service_name: "actgate".to_string(),
        log_level: env.log_level.clone(),
    })?;

    let gate_config = match cli.config {
        Some(ref path) => GateConfig::load(path)?,
        None => env.gate()?,
    };

    match cli.command {
        Command::Check => cmd_check(&gate_config),
        Command::Simulate { scenario } => cmd_simulate(gate_config, &scenario).await,
    }
}

fn cmd_check(config: &GateConfig) -> anyhow::Result<()> {
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

async fn cmd_simulate(config: GateConfig, path: &Path) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(path)?;
    let scenario: Scenario = toml::from_str(&content)?;
    let actions = Arc::new(scenario.actions);
    let t0 = Instant::now();
    let runs: Arc<Mutex<Vec<(String, u64, u64)>>> = Arc::new(Mutex::new(Vec::new()));

    // The host needs the gate for nested calls; fill it in after construction.
    let gate_slot: Arc<Mutex<Option<DispatchGate>>> = Arc::new(Mutex::new(None));

    let host = {
        let actions = Arc::clone(&actions);
        let runs = Arc::clone(&runs);
        let gate_slot = Arc::clone(&gate_slot);
        dispatch_fn(move |call: DispatchCall| {
            let actions = Arc::clone(&actions);
            let runs = Arc::clone(&runs);
            let gate = gate_slot.lock().clone();
            async move {
                let key = call.action.key().unwrap_or_default().to_string();
                let script = actions.get(&key).cloned().unwrap_or_default();
                let start = elapsed_ms(t0);
                tokio::time::sleep(Duration::from_millis(script.duration_ms)).await;
                if let Some(gate) = gate {
                    for nested in &script.nested {
                        gate.dispatch(nested.as_str(), None, DispatchOptions::default())
                            .await
                            .map_err(ActionError::new)?;
                    }
                }
                let end = elapsed_ms(t0);
                runs.lock().push((key.clone(), start, end));
                if script.fail {
                    return Err(ActionError::msg(format!("{key} failed")));
                }
                Ok::<Value, ActionError>(json!({ "action": key, "payload": call.effective_payload() }))
            }
        })
    };

    let gate = DispatchGate::new(host, config);
    *gate_slot.lock() = Some(gate.clone());

    let mut handles = Vec::new();
    for (idx, call) in scenario.calls.into_iter().enumerate() {
        let gate = gate.clone();
        handles.push(tokio::spawn(async move {
            tokio::time::sleep_until(t0 + Duration::from_millis(call.at_ms)).await;
            let outcome = gate
                .dispatch(call.action.as_str(), call.payload, DispatchOptions::default())
                .await;
            let done = elapsed_ms(t0);
            (idx, call.at_ms, call.action, done, outcome)
        }));
    }

    println!(
        "{:<4}  {:<8}  {:<28}  {:<8}  RESULT",
        "#", "AT_MS", "ACTION", "DONE_MS"
    );
    println!("{}", "-".repeat(80));
    for handle in handles {
        let (idx, at_ms, action, done, outcome) = handle.await?;
        let result = match outcome {
            Ok(Some(value)) => value.to_string(),
            Ok(None) => "(no result)".to_string(),
            Err(e) => format!("error: {e}"),
        };
        println!("{idx:<4}  {at_ms:<8}  {action:<28}  {done:<8}  {result}");
    }

    println!("\nexecutions:");
    for (action, start, end) in runs.lock().iter() {
        println!("  {action:<28}  {start:>6} → {end:>6} ms");
    }

    *gate_slot.lock() = None;
    println!("\n{}", serde_json::to_string_pretty(&gate.snapshot())?);
    Ok(())
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}
