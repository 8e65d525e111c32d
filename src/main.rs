//! Setu - upload mapping tables or weight blocks to one MCU
//!
//! Usage:
//!   setu /dev/ttyACM0 coordinator 1
//!   setu /dev/ttyACM1 worker 3 --data-dir ./partition
//!   setu - worker 3 --dry-run

use clap::Parser;
use setu::devices::DeviceSimulator;
use setu::input::{load_records, resolve_input_path};
use setu::transport::SerialTransport;
use setu::{DriverOutcome, Mode, Result, SessionDriver, UploadConfig};
use std::path::PathBuf;
use std::process::ExitCode;

/// Upload coordinator mappings or worker weights over a serial link
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Serial port of the target MCU (ignored with --dry-run)
    port: String,

    /// Upload mode: coordinator|c or worker|w
    mode: Mode,

    /// MCU index; selects the mapping per line (coordinator) or the input file (worker)
    id: usize,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Input file, overriding the data directory naming convention
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Directory holding Coordinator.json and worker_<id>.json
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Serial baud rate
    #[arg(short, long)]
    baud: Option<u32>,

    /// Upload to an in-process simulated device instead of the port
    #[arg(long)]
    dry_run: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => match UploadConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load config {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => UploadConfig::default(),
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();

    log::info!("Setu v{} starting...", env!("CARGO_PKG_VERSION"));

    let success = match upload(&args, config) {
        Ok(outcome) => {
            let report = &outcome.report;
            println!(
                "{} upload {}: {} records, {} lines skipped, {} bytes, {} response timeouts",
                report.mode,
                report.state,
                report.records_sent,
                report.lines_skipped,
                report.bytes_sent,
                report.timeouts()
            );
            if let Some(response) = outcome.last_response() {
                println!("Last response: {}", response);
            }
            if let Some(e) = &outcome.failure {
                eprintln!("Error: {}", e);
            }
            outcome.is_success()
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            false
        }
    };

    println!("Upload finished");
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Load the input, open the target, and run one session
fn upload(args: &Args, mut config: UploadConfig) -> Result<DriverOutcome> {
    if let Some(dir) = &args.data_dir {
        config.input.data_dir = dir.clone();
    }
    if let Some(baud) = args.baud {
        config.serial.baud_rate = baud;
    }

    // Parse everything before touching the device
    let path = args
        .input
        .clone()
        .unwrap_or_else(|| resolve_input_path(&config.input, args.mode, args.id));
    let records = load_records(&path, args.mode)?;

    let driver = SessionDriver::new(config.timing.clone());

    if args.dry_run {
        log::info!("Dry run: uploading to simulated device");
        let device = DeviceSimulator::new();
        let outcome = driver.run(device.clone(), args.mode, args.id, &records);
        log::info!(
            "Simulated device decoded {} mappings, {} weight lines",
            device.mappings().len(),
            device.weight_lines().len()
        );
        for error in device.errors() {
            log::warn!("Simulated device error: {}", error);
        }
        return Ok(outcome);
    }

    if let Some(configured) = config.serial.port.as_deref().filter(|p| *p != args.port) {
        log::info!("Port {} overrides configured {}", args.port, configured);
    }
    log::info!(
        "Opening {} at {} baud",
        args.port,
        config.serial.baud_rate
    );
    let transport = SerialTransport::open(
        &args.port,
        config.serial.baud_rate,
        config.serial.read_timeout(),
    )?;

    Ok(driver.run(transport, args.mode, args.id, &records))
}
