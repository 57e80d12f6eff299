//! Scan CLI
//!
//! Reads a JSON array of rate tuples from a file, runs one scan, prints the
//! report as JSON. Exit codes: 0 ok, 2 invalid input, 3 cancelled/timeout,
//! 4 internal engine error.

use arbscope_backend::engine::allocator::AllocatorMode;
use arbscope_backend::engine::pipeline::{scan, EdgeInput, ScanOptions};
use arbscope_backend::{CancellationToken, EngineContext, EngineError};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::error;

#[derive(Parser, Debug)]
#[command(name = "scan_cli", about = "Run one arbitrage scan against a JSON edge file")]
struct Args {
    /// Path to a JSON array of {from_token, to_token, rate, fee, liquidity, venue}.
    input: PathBuf,

    /// Working capital.
    #[arg(long, default_value_t = 1_000.0)]
    capital: f64,

    /// Maximum cycles to emit.
    #[arg(long, default_value_t = 10)]
    max_cycles: usize,

    /// Monte Carlo samples per cycle.
    #[arg(long, default_value_t = 500)]
    mc_samples: usize,

    /// RNG seed for reproducible output.
    #[arg(long)]
    seed: Option<u64>,

    /// Allocator mode: greedy | lp | risk_parity.
    #[arg(long, default_value = "greedy")]
    allocator: String,

    /// Skip the Monte Carlo phase.
    #[arg(long)]
    no_monte_carlo: bool,

    /// Skip the stress battery.
    #[arg(long)]
    no_stress: bool,

    /// Scan timeout in milliseconds.
    #[arg(long, default_value_t = 5_000)]
    timeout_ms: u64,

    /// Pretty-print the report.
    #[arg(long)]
    pretty: bool,
}

fn run(args: &Args) -> Result<String, EngineError> {
    let raw = std::fs::read_to_string(&args.input)
        .map_err(|e| EngineError::InvalidInput(format!("cannot read {}: {e}", args.input.display())))?;
    let edges: Vec<EdgeInput> = serde_json::from_str(&raw)
        .map_err(|e| EngineError::InvalidInput(format!("malformed edge file: {e}")))?;
    let allocator_mode: AllocatorMode = args.allocator.parse()?;

    let options = ScanOptions {
        max_cycles: args.max_cycles,
        run_monte_carlo: !args.no_monte_carlo,
        mc_samples: args.mc_samples,
        run_stress: !args.no_stress,
        allocator_mode,
        seed: args.seed,
        ..ScanOptions::default()
    };

    let ctx = EngineContext::new();
    let cancel = CancellationToken::new();
    let watchdog_token = cancel.clone();
    let timeout = Duration::from_millis(args.timeout_ms);
    std::thread::spawn(move || {
        std::thread::sleep(timeout);
        watchdog_token.cancel();
    });

    let report = scan(&ctx, &edges, args.capital, &options, &cancel)?;
    let json = if args.pretty {
        serde_json::to_string_pretty(&report)
    } else {
        serde_json::to_string(&report)
    }
    .map_err(|e| EngineError::Internal(format!("report serialization failed: {e}")))?;
    Ok(json)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(kind = e.kind(), "{e}");
            eprintln!("{e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
