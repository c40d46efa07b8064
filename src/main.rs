//! xyctl command-line front end
//!
//! # Usage
//!
//! ```bash
//! # List serial ports
//! xyctl ports
//!
//! # Identify the firmware on the auto-selected port
//! xyctl info
//!
//! # Three jog steps in +X against the simulated GRBL
//! xyctl --simulate grbl jog --dx 1 --steps 3
//!
//! # Stream a file, treating the current position as the origin
//! xyctl --port /dev/ttyUSB0 stream part.nc --speed 80
//!
//! # Back up and restore GRBL parameters
//! xyctl backup
//! xyctl restore
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use xyctl::{
    init_json_logging, init_logging, list_ports, spawn_stream, ControllerConfig, MotionController,
    SimulatedFirmware, SimulatedMachine, SimulatedOpener, BUILD_DATE, VERSION,
};

/// Two-axis GRBL/Marlin controller client
#[derive(Parser, Debug)]
#[command(name = "xyctl")]
#[command(author, version, about = "Serial motion-controller client for GRBL and Marlin", long_about = None)]
struct Cli {
    /// Serial port (default: configured port, else auto-detect)
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Configuration file (TOML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Talk to a simulated board instead of a serial port
    #[arg(long, global = true, value_enum)]
    simulate: Option<SimulateKind>,

    /// Log as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SimulateKind {
    Grbl,
    Marlin,
}

impl From<SimulateKind> for SimulatedFirmware {
    fn from(kind: SimulateKind) -> Self {
        match kind {
            SimulateKind::Grbl => SimulatedFirmware::Grbl,
            SimulateKind::Marlin => SimulatedFirmware::Marlin,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List serial ports
    Ports,

    /// Connect, identify the firmware and report status
    Info,

    /// Jog in steps of the configured size
    Jog {
        /// X direction (-1, 0, 1)
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        dx: i8,

        /// Y direction (-1, 0, 1)
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        dy: i8,

        /// Number of steps
        #[arg(short, long, default_value_t = 1)]
        steps: u32,
    },

    /// Stream a G-code file from the current position
    Stream {
        /// G-code file
        file: PathBuf,

        /// Mirror X coordinates
        #[arg(long)]
        invert_x: bool,

        /// Target feed override in percent (10-200)
        #[arg(long)]
        speed: Option<i32>,
    },

    /// Back up GRBL parameters
    Backup,

    /// Restore GRBL parameters (default: latest backup)
    Restore {
        /// Backup file
        file: Option<PathBuf>,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<ControllerConfig> {
    let config = match path {
        Some(path) => ControllerConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ControllerConfig::load_or_default()?,
    };
    Ok(config)
}

fn build_controller(cli: &Cli) -> anyhow::Result<MotionController> {
    let config = load_config(cli.config.as_ref())?;
    Ok(match cli.simulate {
        Some(kind) => {
            let machine = SimulatedMachine::new(kind.into());
            MotionController::new(config, Arc::new(SimulatedOpener::new(machine)))?
        }
        None => MotionController::serial(config)?,
    })
}

fn log_events(ctl: &MotionController) {
    for event in ctl.drain_events() {
        info!("event {}", event.description());
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if cli.json_logs {
        init_json_logging()?;
    } else {
        init_logging()?;
    }
    info!("xyctl v{} (built {})", VERSION, BUILD_DATE);

    if let Commands::Ports = cli.command {
        for port in list_ports()? {
            println!("{}\t{}", port.port_name, port.description);
        }
        return Ok(());
    }

    let ctl = Arc::new(build_controller(&cli)?);
    let connection = ctl.connect(cli.port.as_deref())?;
    println!(
        "{} on {} ({})",
        connection.firmware, connection.port, connection.firmware_info
    );

    let result = run(&cli.command, &ctl).await;
    log_events(&ctl);
    ctl.disconnect();
    result
}

async fn run(command: &Commands, ctl: &Arc<MotionController>) -> anyhow::Result<()> {
    match command {
        Commands::Ports => {}
        Commands::Info => {
            let alive = ctl.is_alive();
            let (feed_override, feed_rate) = ctl.poll()?;
            let position = ctl.position();
            println!("alive: {}", alive);
            println!("feed override: {}%  feed rate: {}", feed_override, feed_rate);
            println!(
                "logical position: X{} Y{} ({:?})",
                position.x, position.y, position.mode
            );
        }
        Commands::Jog { dx, dy, steps } => {
            for _ in 0..*steps {
                ctl.move_step(*dx, *dy)?;
            }
            let position = ctl.position();
            println!("X{} Y{}", position.x, position.y);
        }
        Commands::Stream {
            file,
            invert_x,
            speed,
        } => {
            let content = std::fs::read_to_string(file)
                .with_context(|| format!("reading {}", file.display()))?;
            let lines: Vec<String> = content.lines().map(str::to_string).collect();

            if let Some(speed) = speed {
                ctl.set_target_speed(*speed);
            }
            ctl.establish_origin()?;
            ctl.apply_override()?;

            let mut events = ctl.subscribe();
            let printer = tokio::spawn(async move {
                while let Ok(event) = events.recv().await {
                    info!("event {}", event.description());
                }
            });

            let mut handle = spawn_stream(ctl.clone(), lines, *invert_x);
            let report = tokio::select! {
                joined = &mut handle => joined??,
                _ = tokio::signal::ctrl_c() => {
                    warn!("Interrupted, stopping motion");
                    ctl.emergency_stop()?;
                    printer.abort();
                    anyhow::bail!("stream interrupted; machine held");
                }
            };
            printer.abort();
            ctl.drain_events();

            println!(
                "sent {} lines, skipped {}, rejected {}",
                report.lines_sent, report.lines_skipped, report.lines_rejected
            );
        }
        Commands::Backup => {
            let path = ctl.backup_parameters()?;
            println!("{}", path.display());
        }
        Commands::Restore { file } => {
            let report = ctl.restore_parameters(file.as_deref())?;
            println!(
                "restored {}/{} parameters from {}",
                report.applied,
                report.total,
                report.source.display()
            );
            for command in &report.failed {
                println!("not applied: {}", command);
            }
        }
    }
    Ok(())
}
