//! Agent script sandbox.
//!
//! Serves the suspend/resume bridge over stdio and validates agent scripts
//! (static check, dry run against synthetic data, behavioral diff) before
//! they are allowed near real primitives.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sandbox::bridge::Bridge;
use sandbox::core::signature::SignatureTable;
use sandbox::core::types::RecordedAction;
use sandbox::exit_codes;
use sandbox::host::Primitives;
use sandbox::io::call_log::CallLog;
use sandbox::io::catalog::load_signatures;
use sandbox::io::config::{DEFAULT_CONFIG_FILE, HostConfig, SandboxConfig, load_config};
use sandbox::io::process::{BridgeProcess, bridge_command};
use sandbox::io::responses;
use sandbox::logging;
use sandbox::pipeline::Validator;
use sandbox::report;
use sandbox::synthetic::SyntheticTable;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "sandbox",
    version,
    about = "Suspend/resume script bridge and agent script validation"
)]
struct Cli {
    /// Sandbox configuration file. Missing file means defaults.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Primitive signature catalog (JSON). Defaults to the bookkeeping set.
    #[arg(long, global = true)]
    primitives: Option<PathBuf>,

    /// JSON object of primitive name to fixed synthetic response.
    #[arg(long, global = true)]
    responses: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the bridge protocol on stdin/stdout until shutdown or EOF.
    Bridge,
    /// Static check only: syntax, primitive signatures, forbidden constructs.
    Check { script: PathBuf },
    /// Run a script against synthetic primitives and check invariants.
    DryRun {
        script: PathBuf,
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Compare the behavior of two scripts over identical synthetic data.
    Diff { old: PathBuf, new: PathBuf },
    /// Full pipeline: static check, dry run, then an optional diff.
    Validate {
        script: PathBuf,
        /// Previous version to diff against.
        #[arg(long)]
        previous: Option<PathBuf>,
        /// Print the verdict as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Run a script through a bridge child process against synthetic primitives.
    Run {
        script: PathBuf,
        /// Append every handled primitive call to this JSONL file.
        #[arg(long)]
        log: Option<PathBuf>,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    let table = load_signatures(cli.primitives.as_deref())?;
    let inputs = Inputs {
        config,
        table,
        primitives_path: cli.primitives,
        responses_path: cli.responses,
    };
    match cli.command {
        Command::Bridge => cmd_bridge(&inputs),
        Command::Check { script } => cmd_check(&inputs, &script),
        Command::DryRun { script, json } => cmd_dry_run(&inputs, &script, json),
        Command::Diff { old, new } => cmd_diff(&inputs, &old, &new),
        Command::Validate {
            script,
            previous,
            json,
        } => cmd_validate(&inputs, &script, previous.as_deref(), json),
        Command::Run { script, log } => cmd_run(&inputs, &script, log.as_deref()),
    }
}

struct Inputs {
    config: SandboxConfig,
    table: SignatureTable,
    primitives_path: Option<PathBuf>,
    responses_path: Option<PathBuf>,
}

impl Inputs {
    fn synthetic(&self) -> Result<SyntheticTable> {
        let mut responses = SyntheticTable::ledger_default(&self.config.ledger);
        responses::apply_file(&mut responses, self.responses_path.as_deref())?;
        Ok(responses)
    }

    fn validator(&self) -> Result<Validator> {
        Ok(Validator::ledger(
            self.table.clone(),
            self.synthetic()?,
            &self.config.ledger,
            self.config.diff.clone(),
        ))
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("start tokio runtime")
}

fn read_script(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("read script {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}

fn cmd_bridge(inputs: &Inputs) -> Result<i32> {
    let bridge = Bridge::with_table(&inputs.table);
    let stats = runtime()?.block_on(bridge.serve(tokio::io::stdin(), tokio::io::stdout()))?;
    info!(?stats, "bridge stopped");
    Ok(exit_codes::OK)
}

fn cmd_check(inputs: &Inputs, script: &Path) -> Result<i32> {
    let source = read_script(script)?;
    let issues = inputs.validator()?.check(&source);
    println!("{}", report::render_issues(&issues)?);
    if sandbox::static_check::has_errors(&issues) {
        return Ok(exit_codes::REJECTED);
    }
    Ok(exit_codes::OK)
}

fn cmd_dry_run(inputs: &Inputs, script: &Path, json: bool) -> Result<i32> {
    let source = read_script(script)?;
    let dry_run = inputs
        .validator()?
        .dry_run(&source)
        .with_context(|| format!("dry run {}", script.display()))?;
    if json {
        print_json(&dry_run)?;
    } else {
        println!("{}", report::render_dry_run(&dry_run)?);
    }
    if dry_run.success {
        Ok(exit_codes::OK)
    } else {
        Ok(exit_codes::REJECTED)
    }
}

fn cmd_diff(inputs: &Inputs, old: &Path, new: &Path) -> Result<i32> {
    let old_source = read_script(old)?;
    let new_source = read_script(new)?;
    let changes = inputs
        .validator()?
        .diff(&old_source, &new_source)
        .context("behavioral diff")?;
    println!("{}", sandbox::core::diff::format_changes(&changes));
    Ok(exit_codes::OK)
}

fn cmd_validate(inputs: &Inputs, script: &Path, previous: Option<&Path>, json: bool) -> Result<i32> {
    let source = read_script(script)?;
    let previous = previous.map(read_script).transpose()?;
    let verdict = inputs.validator()?.validate(&source, previous.as_deref());
    if json {
        print_json(&verdict)?;
    } else {
        println!("{}", report::render_verdict(&verdict)?);
    }
    if verdict.passed {
        Ok(exit_codes::OK)
    } else {
        Ok(exit_codes::REJECTED)
    }
}

fn cmd_run(inputs: &Inputs, script: &Path, log: Option<&Path>) -> Result<i32> {
    let source = read_script(script)?;
    let names = inputs.table.names();

    let mut primitives = Primitives::new();
    Arc::new(inputs.synthetic()?).register(&mut primitives, &names);
    if let Some(path) = log {
        let call_log = CallLog::open(path)?;
        primitives.observe(move |call, result| {
            if let Err(err) = call_log.append(&RecordedAction::new(call, result.clone())) {
                warn!(%err, "call log append failed");
            }
        });
    }

    let exe = std::env::current_exe().context("locate sandbox executable")?;
    let cmd = bridge_command(&exe, inputs.primitives_path.as_deref());
    let host = inputs.config.host.clone();
    runtime()?.block_on(rehearse(cmd, primitives, &host, &source, names))
}

async fn rehearse(
    cmd: tokio::process::Command,
    primitives: Primitives,
    host: &HostConfig,
    source: &str,
    names: Vec<String>,
) -> Result<i32> {
    let process = BridgeProcess::spawn(cmd, primitives, host)?;
    let outcome = process.client().run_script(source, Some(names)).await;
    let status = process.shutdown().await?;
    info!(exit_code = ?status.code(), "bridge child finished");
    match outcome {
        Ok(output) => {
            print_json(&output)?;
            Ok(exit_codes::OK)
        }
        Err(err) => {
            eprintln!("{err}");
            if let Some(kind) = err.failure_type() {
                eprintln!("type: {kind}");
            }
            Ok(exit_codes::INVALID)
        }
    }
}
