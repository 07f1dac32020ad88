use anyhow::Context;
use ble_motion_pointer::domain::settings::{OutputBackendKind, Settings, SettingsSource};
use ble_motion_pointer::infrastructure::backoff::Backoff;
use ble_motion_pointer::infrastructure::bluetooth::BtleTransport;
use ble_motion_pointer::infrastructure::logging::init_logger;
use ble_motion_pointer::infrastructure::virtual_pointer::{backend_for, PointerOutput};
use ble_motion_pointer::runtime::PointerBridge;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "ble_motion_pointer", version)]
#[command(about = "Drive the host pointer from a BLE motion controller")]
struct Cli {
    /// Settings file (default: per-user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log pointer activity instead of creating a virtual device
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Run the bridge until Ctrl-C (default)
    Run,
    /// Write the default settings file and exit
    InitConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let path = match cli.config {
        Some(path) => path,
        None => Settings::default_path()?,
    };

    match cli.command.unwrap_or(Command::Run) {
        Command::InitConfig => init_config(&path),
        Command::Run => run(&path, cli.dry_run).await,
    }
}

fn init_config(path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        anyhow::bail!("{} already exists, not overwriting", path.display());
    }
    Settings::default()
        .save(path)
        .with_context(|| format!("writing {}", path.display()))?;
    println!("Wrote default settings to {}", path.display());
    Ok(())
}

async fn run(path: &Path, dry_run: bool) -> anyhow::Result<()> {
    let (mut settings, source) = Settings::load(path)
        .with_context(|| format!("loading settings from {}", path.display()))?;
    if dry_run {
        settings.output.backend = OutputBackendKind::Log;
    }

    let _guard = init_logger(&settings.log_settings)?;
    info!("Starting BLE motion pointer");
    match source {
        SettingsSource::File => info!("Loaded settings from {}", path.display()),
        SettingsSource::Defaults => {
            info!("No settings file at {}, using defaults", path.display())
        }
    }

    if settings.button_bindings.is_empty() {
        warn!(
            "No button bindings configured, clicks are disabled. Add mask/button pairs to \
             button_bindings in {}",
            path.display()
        );
    }

    let reopen_backoff = Backoff::new(
        Duration::from_millis(settings.link.backoff_min_ms),
        Duration::from_millis(settings.link.backoff_max_ms),
    );
    let output = PointerOutput::open(
        backend_for(&settings.output),
        Duration::from_millis(settings.output.emit_timeout_ms),
        reopen_backoff,
    )
    .context("cannot create the virtual pointing device")?;

    let transport = BtleTransport::new(&settings).await?;
    let mut bridge = PointerBridge::start(&settings, transport, output);

    let signal = tokio::signal::ctrl_c().await;
    info!("Ctrl-C received");
    bridge.shutdown().await;
    signal.context("waiting for Ctrl-C")?;

    Ok(())
}
