//! CLI Entry Point for ringdown-daq
//!
//! Provides command-line interface for:
//! - Running one ring-down acquisition (`run`)
//! - Printing the memory layout without touching hardware (`plan`)
//! - Reading the FPGA identity and register snapshot (`identify`)
//! - Printing the effective layered configuration (`show-config`)
//!
//! # Usage
//!
//! ```bash
//! ringdown-daq plan
//! ringdown-daq run --frequency 4.2e6 --relaxation-us 2000 --output data/
//! RINGDOWN_ACQUISITION__COMPLETION=sleep ringdown-daq run --yes
//! ```

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ringdown_daq::acquisition::Acquisition;
use ringdown_daq::config::{RingdownConfig, DEFAULT_CONFIG_PATH};
use ringdown_daq::device::DeviceController;
use ringdown_daq::hardware::MmioRegion;
use ringdown_daq::layout::MemoryLayout;
use ringdown_daq::tracing_setup::{self, OutputFormat, TracingConfig};
use tracing::info;

#[derive(Parser)]
#[command(name = "ringdown-daq", version)]
#[command(about = "Hardware-timed ring-down acquisition on an FPGA data converter", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Pretty)]
    log_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one ring-down acquisition
    Run {
        /// Start without asking for confirmation
        #[arg(long, short = 'y')]
        yes: bool,

        /// Abort if the identity register does not match
        #[arg(long)]
        strict_identity: bool,

        /// Excitation frequency in Hz
        #[arg(long)]
        frequency: Option<f64>,

        /// Excitation window in microseconds
        #[arg(long)]
        excitation_us: Option<u32>,

        /// Relaxation (capture) window in microseconds
        #[arg(long)]
        relaxation_us: Option<u32>,

        /// Output directory
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Print the memory layout as JSON without touching hardware
    Plan,

    /// Read the identity register and print a register snapshot
    Identify,

    /// Print the effective configuration as TOML
    ShowConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = RingdownConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    if let Commands::Run {
        strict_identity,
        frequency,
        excitation_us,
        relaxation_us,
        output,
        ..
    } = &cli.command
    {
        config.hardware.strict_identity |= *strict_identity;
        if let Some(hz) = frequency {
            config.excitation.frequency_hz = *hz;
        }
        if let Some(us) = excitation_us {
            config.excitation.excitation_time_us = *us;
        }
        if let Some(us) = relaxation_us {
            config.excitation.relaxation_time_us = *us;
        }
        if let Some(dir) = output {
            config.output.directory.clone_from(dir);
        }
    }

    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("Invalid configuration")?;

    let tracing_config = TracingConfig::from_config(&config)
        .map_err(anyhow::Error::msg)?
        .with_format(cli.log_format);
    tracing_setup::init(tracing_config).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Run { yes, .. } => run(&config, yes),
        Commands::Plan => plan(&config),
        Commands::Identify => identify(&config),
        Commands::ShowConfig => {
            print!("{}", config.to_toml().context("Failed to render configuration")?);
            Ok(())
        }
    }
}

fn open(config: &RingdownConfig) -> Result<DeviceController<MmioRegion, MmioRegion>> {
    let hw = &config.hardware;
    let ram_size = usize::try_from(hw.ram_size).context("ram_size does not fit in memory")?;
    DeviceController::open(
        &hw.device_path,
        hw.register_base,
        hw.ram_base,
        ram_size,
        config.controller_settings(),
    )
    .context("Failed to open FPGA interface")
}

fn run(config: &RingdownConfig, yes: bool) -> Result<()> {
    info!(
        frequency_hz = config.excitation.frequency_hz,
        excitation_us = config.excitation.excitation_time_us,
        relaxation_us = config.excitation.relaxation_time_us,
        "Starting ring-down acquisition"
    );

    let acquisition = Acquisition::new(config);
    // Plan before mapping anything so a bad layout never touches hardware.
    acquisition.prepare().context("Invalid acquisition parameters")?;

    let controller = open(config)?;
    let report = acquisition
        .run(controller, |layout| yes || confirm(layout))
        .context("Ring-down acquisition failed")?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn plan(config: &RingdownConfig) -> Result<()> {
    let prepared = Acquisition::new(config)
        .prepare()
        .context("Invalid acquisition parameters")?;
    println!("{}", serde_json::to_string_pretty(&prepared.layout)?);
    Ok(())
}

fn identify(config: &RingdownConfig) -> Result<()> {
    let mut controller = open(config)?;
    let result = (|| -> Result<()> {
        let report = controller.verify_identity()?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        for (name, value) in controller.snapshot()? {
            println!("{name:<24} {value:#010x}");
        }
        Ok(())
    })();
    controller.shutdown();
    result
}

/// Ask on stdin before releasing reset. Anything but an empty line or "y"
/// declines.
fn confirm(layout: &MemoryLayout) -> bool {
    println!(
        "FPGA configured: {} waveform bursts, {} capture bursts ({} bytes).",
        layout.waveform_burst_count, layout.capture_burst_count, layout.capture_byte_length
    );
    print!("Press ENTER to start measurement (n to abort): ");
    if io::stdout().flush().is_err() {
        return false;
    }
    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => false,
        Ok(_) => matches!(line.trim().to_lowercase().as_str(), "" | "y" | "yes"),
    }
}
