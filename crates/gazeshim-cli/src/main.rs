#![deny(unsafe_code)]

//! gazeshim CLI: run the acquisition device against a console host, probe a
//! gaze server, and inspect configuration and stored calibrations.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{Level, debug, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use gazeshim_config::AppConfig;
use gazeshim_core::host::{
    ComponentHandle, ContainerHandle, EyeTrackingData, EyeTrackingInput, HostError,
    InterfaceCandidate, InterfaceKind, OperationTable,
};
use gazeshim_core::{
    Calibrator, DefaultProbe, GazeDevice, GazeTracker, HostContext, HostLog, HostLogLayer,
    TargetId, build_info,
};

/// gazeshim: eye-gaze acquisition shim for a gaze server.
#[derive(Parser)]
#[command(name = "gazeshim", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "gazeshim.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Also append log lines to this file, as a host log would receive them.
    #[arg(long)]
    host_log: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the acquisition device until Ctrl-C.
    Run,

    /// Connect to the gaze server and print gaze snapshots as JSON.
    Check {
        /// Number of snapshots to print.
        #[arg(short, long, default_value_t = 10)]
        samples: u32,
    },

    /// Validate and display configuration.
    Config {
        /// Show the resolved configuration.
        #[arg(long)]
        show: bool,
    },

    /// Report which stored calibrations load.
    Calibration,
}

fn verbosity_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, found) = load_config(&cli.config).await?;

    let default_filter = match cli.verbose {
        0 => config.logging.level.as_str(),
        n => verbosity_filter(n),
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let host_log = match &cli.host_log {
        Some(path) => Some(HostLogLayer::new(
            Arc::new(FileLog::create(path)?),
            Level::INFO,
        )),
        None => None,
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(host_log)
        .init();

    if !found {
        info!(path = %cli.config.display(), "Config file not found, using defaults");
    }

    match cli.command {
        Commands::Run => cmd_run(config).await?,
        Commands::Check { samples } => cmd_check(&config, samples).await?,
        Commands::Config { show } => cmd_config(&config, &cli.config, show)?,
        Commands::Calibration => cmd_calibration(&config).await?,
    }

    Ok(())
}

async fn cmd_run(config: AppConfig) -> Result<()> {
    let mut host = ConsoleHost {
        version: config.host.min_interface_version,
    };
    let probe = DefaultProbe::from_config(&config.host);
    let device = GazeDevice::activate(&config, &mut host, &probe)?;
    info!(
        version = %build_info::version_string(),
        publishing = ?device.publishing(),
        "Gaze device running, press Ctrl-C to stop"
    );

    let mut reader = device.reader();
    let mut connected = reader.is_connected();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            alive = reader.changed() => {
                if !alive {
                    break;
                }
                let now = reader.is_connected();
                if now != connected {
                    info!(connected = now, "Gaze server connection changed");
                    connected = now;
                }
            }
        }
    }

    info!("Shutting down");
    tokio::task::spawn_blocking(move || {
        let mut device = device;
        device.deactivate();
    })
    .await?;
    Ok(())
}

async fn cmd_check(config: &AppConfig, samples: u32) -> Result<()> {
    let mut tracker = GazeTracker::from_config(config);
    let endpoint = tracker.client().endpoint();
    tracker
        .connect()
        .await
        .with_context(|| format!("cannot reach gaze server at {endpoint}"))?;
    tracker.set_enabled(true);

    let period = Duration::from_millis(config.poller.period_ms);
    for _ in 0..samples {
        tracker.update_gazes().await.context("gaze request failed")?;
        println!("{}", serde_json::to_string(&tracker.snapshot())?);
        tokio::time::sleep(period).await;
    }
    tracker.disconnect().await;
    Ok(())
}

fn cmd_config(config: &AppConfig, config_path: &Path, show: bool) -> Result<()> {
    config.validate()?;
    if show {
        let toml_str =
            toml::to_string_pretty(config).map_err(|e| anyhow::anyhow!("TOML error: {e}"))?;
        println!("# gazeshim {}", build_info::version_string());
        println!("{toml_str}");
    } else {
        println!("Configuration at '{}' is valid.", config_path.display());
    }
    Ok(())
}

async fn cmd_calibration(config: &AppConfig) -> Result<()> {
    let mut calibrator = Calibrator::new(&config.calibration);
    println!(
        "Calibration directory: {}",
        calibrator.store().dir().display()
    );
    for id in TargetId::ALL {
        let status = if !calibrator.is_enabled(id) {
            "disabled"
        } else if calibrator.load(id).await {
            "loaded"
        } else {
            "not available"
        };
        println!("  {:<9} {status}", id.as_str());
    }
    Ok(())
}

/// Load `path`, or defaults when it does not exist. The flag reports
/// whether the file was found.
async fn load_config(path: &Path) -> Result<(AppConfig, bool)> {
    if path.exists() {
        let config = AppConfig::load(path).await.map_err(|e| anyhow::anyhow!(e))?;
        Ok((config, true))
    } else {
        Ok((AppConfig::default(), false))
    }
}

/// Stand-in host for running outside a real one. Offers the primary
/// interface and logs every update.
struct ConsoleHost {
    version: u32,
}

impl HostContext for ConsoleHost {
    fn container(&self) -> ContainerHandle {
        ContainerHandle(0)
    }

    fn find_interface(&mut self, kind: InterfaceKind) -> Option<InterfaceCandidate> {
        (kind == InterfaceKind::Primary).then(|| InterfaceCandidate {
            kind,
            version: Some(self.version),
            table: OperationTable::default(),
            input: Box::new(ConsoleInput),
        })
    }
}

struct ConsoleInput;

impl EyeTrackingInput for ConsoleInput {
    fn create_component(
        &mut self,
        _container: ContainerHandle,
        name: &str,
    ) -> Result<ComponentHandle, HostError> {
        info!(component = name, "Console component registered");
        Ok(ComponentHandle(1))
    }

    fn update_component(
        &mut self,
        _handle: ComponentHandle,
        data: &EyeTrackingData,
    ) -> Result<(), HostError> {
        let [x, y, z, _] = data.vector;
        debug!(available = data.is_available(), x, y, z, "Eye tracking update");
        Ok(())
    }
}

/// Appends forwarded log lines to a file.
struct FileLog {
    file: Mutex<std::fs::File>,
}

impl FileLog {
    fn create(path: &Path) -> Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("cannot open host log {}", path.display()))?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl HostLog for FileLog {
    fn log(&self, _level: Level, line: &str) {
        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(file, "{line}");
        }
    }
}
