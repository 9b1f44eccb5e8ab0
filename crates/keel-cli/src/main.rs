use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use keel_runtime::{CodeUnit, LifecycleCoordinator, RuntimeConfig, RuntimeError};
use tracing_subscriber::{EnvFilter, fmt};

mod report;

#[derive(Parser)]
#[command(name = "keel", about = "Evaluate code units on an embedded Wasm runtime")]
struct Cli {
    /// Expressions to evaluate, in order
    exprs: Vec<String>,

    /// Source files to evaluate after the expressions, one unit per file
    #[arg(short, long = "file", value_name = "PATH")]
    files: Vec<PathBuf>,

    /// Configuration file (default: <config dir>/keel/config.toml if present)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print one JSON object per outcome instead of plain text
    #[arg(long)]
    json: bool,

    /// Only the initializing thread may evaluate
    #[arg(long)]
    no_serialize: bool,

    /// Allow initialization from a thread other than the primary one
    #[arg(long)]
    allow_any_thread: bool,

    /// Instruction budget per evaluation
    #[arg(long, value_name = "UNITS")]
    fuel: Option<u64>,
}

impl Cli {
    fn runtime_config(&self) -> Result<RuntimeConfig> {
        let mut config = match &self.config {
            Some(path) => RuntimeConfig::from_file(path)?,
            None => match default_config_path().filter(|p| p.is_file()) {
                Some(path) => {
                    tracing::debug!(path = %path.display(), "Loading configuration");
                    RuntimeConfig::from_file(&path)?
                }
                None => RuntimeConfig::default(),
            },
        };

        if self.no_serialize {
            config.serialize_calls = false;
        }
        if self.allow_any_thread {
            config.require_init_on_main_thread = false;
        }
        if let Some(fuel) = self.fuel {
            config.engine.fuel = Some(fuel);
        }
        Ok(config)
    }

    /// Expressions first, then files; stdin when neither was given.
    fn code_units(&self) -> Result<Vec<CodeUnit>> {
        let mut units: Vec<CodeUnit> = self
            .exprs
            .iter()
            .enumerate()
            .map(|(i, src)| CodeUnit::new(format!("expr#{}", i + 1), src.as_str()))
            .collect();

        for path in &self.files {
            let source = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            units.push(CodeUnit::new(path.display().to_string(), source));
        }

        if units.is_empty() {
            let mut source = String::new();
            std::io::stdin()
                .read_to_string(&mut source)
                .context("failed to read stdin")?;
            if !source.trim().is_empty() {
                units.push(CodeUnit::new("<stdin>", source));
            }
        }
        Ok(units)
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("keel").join("config.toml"))
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Interrupt,
    Terminate,
}

impl Signal {
    fn exit_code(self) -> u8 {
        match self {
            Signal::Interrupt => 130,
            Signal::Terminate => 143,
        }
    }
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() -> Signal {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!("Cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => Signal::Interrupt,
        () = terminate => Signal::Terminate,
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Logs go to stderr so stdout carries only results
    fmt()
        .with_env_filter(EnvFilter::from_env("KEEL_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.runtime_config()?;
    let units = cli.code_units()?;
    let labels: Vec<String> = units.iter().map(|u| u.label().to_string()).collect();

    tracing::info!(
        units = units.len(),
        serialize_calls = config.serialize_calls,
        fuel = ?config.engine.fuel,
        "Starting keel"
    );

    // The blocking worker is the first thread to register, so it owns the
    // runtime under the primary-thread rule.
    let coordinator = LifecycleCoordinator::new(config);
    let stop = coordinator.stop_handle();
    let mut run = tokio::task::spawn_blocking(move || coordinator.run(&units));

    let (result, interrupted) = tokio::select! {
        joined = &mut run => (joined?, None),
        signal = shutdown_signal() => {
            tracing::warn!(?signal, "Stop requested, finishing the current unit before shutdown");
            stop.request();
            tokio::select! {
                joined = &mut run => (joined?, Some(signal)),
                again = shutdown_signal() => {
                    // The in-flight foreign call cannot be cancelled; it is
                    // abandoned together with the runtime's exit hook.
                    tracing::error!(signal = ?again, "Second stop request, exiting without shutdown");
                    eprintln!("keel: stopped during an evaluation, runtime not shut down");
                    std::process::exit(i32::from(again.exit_code()));
                }
            }
        }
    };

    let code = match result {
        Ok(outcomes) => {
            report::print(&labels, &outcomes, cli.json)?;
            interrupted.map_or(0, Signal::exit_code)
        }
        Err(RuntimeError::UnrecoverableRuntimeFault(msg)) => {
            eprintln!("FATAL: {msg}");
            2
        }
        Err(e) => {
            eprintln!("keel: {e}");
            1
        }
    };

    tracing::info!(code, "keel shutting down");
    Ok(ExitCode::from(code))
}
