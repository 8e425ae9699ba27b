//! # rust_flyscan
//!
//! Runs a snake grid fly scan against the simulated PMAC described by the
//! `[simulation]` section of the configuration and prints a summary.
//!
//! # Usage
//!
//! ```bash
//! # 10 x 4 grid, 0.1 s per point, every-point triggers
//! rust_flyscan
//!
//! # Larger grid with row gates and JSON output
//! rust_flyscan --columns 200 --rows 50 --duration 0.01 --triggers row_gate --json
//!
//! # Show the effective configuration
//! rust_flyscan --config config/flyscan.toml --print-config
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{error, info};

use rust_flyscan::config::{FlyscanConfig, DEFAULT_CONFIG_PATH};
use rust_flyscan::hardware::MockPmac;
use rust_flyscan::logging;
use rust_flyscan::pmac::{MotionTrigger, ScanController, ScanSettings, ScanState};
use rust_flyscan::scan::{CompoundGenerator, Dimension, LineGenerator, TrajectoryModel};
use rust_flyscan::ScanError;

/// PMAC fly scan against a simulated controller
#[derive(Parser, Debug)]
#[command(name = "rust_flyscan")]
#[command(version)]
#[command(about = "Compile and run a PMAC trajectory fly scan on a simulated controller")]
struct Args {
    /// Configuration file (missing file means defaults)
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Points per row along x
    #[arg(long, default_value_t = 10)]
    columns: usize,

    /// Rows along y
    #[arg(long, default_value_t = 4)]
    rows: usize,

    /// Extent of the grid along x
    #[arg(long, default_value_t = 1.0)]
    width: f64,

    /// Extent of the grid along y
    #[arg(long, default_value_t = 0.5)]
    height: f64,

    /// Seconds per point
    #[arg(short, long, default_value_t = 0.1)]
    duration: f64,

    /// Trigger mode (none, row_gate, every_point); overrides the configuration
    #[arg(short, long)]
    triggers: Option<MotionTrigger>,

    /// Output logs and the summary as JSON
    #[arg(long)]
    json: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run(Args::parse()).await {
        error!("fly scan failed: {e:#}");
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let mut config = FlyscanConfig::load_from(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if args.json {
        config.application.log_format = "json".to_string();
    }
    if let Some(triggers) = args.triggers {
        config.scan.output_triggers = triggers;
    }
    if args.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }
    logging::init_from_config(&config.application);
    if args.columns == 0 || args.rows == 0 {
        bail!("the grid needs at least one row and one column");
    }

    info!(
        "{} v{} starting: {} x {} grid, {} s per point",
        config.application.name,
        env!("CARGO_PKG_VERSION"),
        args.columns,
        args.rows,
        args.duration
    );

    let generator = CompoundGenerator::new(
        vec![
            Dimension::Line(LineGenerator::new("y", "mm", 0.0, args.height, args.rows)),
            Dimension::Line(
                LineGenerator::new("x", "mm", 0.0, args.width, args.columns).with_alternate(true),
            ),
        ],
        args.duration,
    );
    let model = TrajectoryModel::all_steps(Box::new(generator));

    let pmac = Arc::new(MockPmac::from_config(&config.simulation));
    let mut controller = ScanController::new(pmac, ScanSettings::from(&config.scan));
    let summary = match controller.scan_points(model).await {
        Ok(summary) => summary,
        Err(e) => return Err(abort_after_failure(&mut controller, e).await),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("completed steps : {}", summary.completed_steps);
        println!(
            "point duration  : {} s{}",
            summary.duration,
            if summary.revised { " (revised)" } else { "" }
        );
        println!(
            "coordinate sys  : {}",
            summary.cs_port.as_deref().unwrap_or("-")
        );
        println!("chunks written  : {}", summary.chunks);
        println!("segments        : {}", summary.segments);
    }
    Ok(())
}

/// Stop a trajectory left building or running by a failed scan.
///
/// A failed abort is logged and attached to the returned error.
async fn abort_after_failure(controller: &mut ScanController, err: ScanError) -> anyhow::Error {
    if !matches!(controller.state(), ScanState::Building | ScanState::Executing) {
        return err.into();
    }
    match controller.abort().await {
        Ok(()) => err.into(),
        Err(abort_err) => {
            error!(state = %controller.state(), "abort after failed scan also failed: {abort_err}");
            anyhow::Error::new(err).context(format!("abort failed: {abort_err}"))
        }
    }
}
