use anyhow::Context;
use clap::Parser;
use gear_vr_session::domain::mapping::{ControlMode, InputMapper, TracingSink};
use gear_vr_session::domain::models::{ConnectionState, SessionEvent};
use gear_vr_session::infrastructure::bluetooth::protocol::{format_address, parse_address};
use gear_vr_session::infrastructure::bluetooth::BleTransport;
use gear_vr_session::infrastructure::logging::init_logger;
use gear_vr_session::infrastructure::settings_file::JsonSettingsStore;
use gear_vr_session::{Session, SessionOptions, Settings};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Drive a Gear VR Controller as a pointer and presentation remote
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Controller address (AA:BB:CC:DD:EE:FF or hex); defaults to the last one used
    #[arg(long)]
    address: Option<String>,

    /// How long to look for the controller
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,

    /// Settings file instead of the per-user one
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Overrides the saved control mode
    #[arg(long, value_enum)]
    mode: Option<ControlMode>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let store = match &args.settings {
        Some(path) => JsonSettingsStore::open(path),
        None => JsonSettingsStore::new().context("locating the settings file")?,
    };
    let settings = store.settings();
    let _logging = init_logger(&settings.log_settings)?;
    info!("Starting Gear VR Controller session");
    info!("Settings file: {}", store.path().display());

    let address = match args.address.as_deref() {
        Some(text) => parse_address(text).with_context(|| format!("invalid address {:?}", text))?,
        None => settings
            .last_connected_address
            .context("no --address given and no controller remembered")?,
    };

    #[cfg(windows)]
    {
        use gear_vr_session::infrastructure::bluetooth::winrt::WinRtTransport;
        run(WinRtTransport::new(), Arc::new(store), settings, &args, address).await
    }

    #[cfg(not(windows))]
    {
        let _ = (store, settings, address);
        anyhow::bail!("no Bluetooth LE transport is available on this platform")
    }
}

#[cfg_attr(not(windows), allow(dead_code))]
async fn run<T: BleTransport>(
    transport: T,
    store: Arc<JsonSettingsStore>,
    settings: Settings,
    args: &Args,
    address: u64,
) -> anyhow::Result<()> {
    let mut config = settings.input.clone();
    if let Some(mode) = args.mode {
        config.control_mode = mode;
    }

    let options = SessionOptions::from_settings(&settings);
    let (handle, mut events) = Session::spawn_with(transport, store, config.clone(), options);

    info!("Connecting to {}", format_address(address));
    handle.connect(address, Duration::from_secs(args.timeout_secs))?;

    let mut mapper = InputMapper::new(config.control_mode);
    let mut sink = TracingSink;
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match &event {
                    SessionEvent::Connection(status) => {
                        if status.terminal {
                            error!("{}", status.status_text());
                            handle.shutdown();
                        } else if status.state == ConnectionState::Ready || status.error.is_none() {
                            info!("{}", status.status_text());
                        } else {
                            warn!("{}", status.status_text());
                        }
                    }
                    SessionEvent::Status(message) => info!(severity = ?message.severity, "{}", message.message),
                    _ => {}
                }
                if let Err(e) = mapper.dispatch(&event, &mut sink) {
                    warn!("Input injection failed: {:#}", e);
                }
            }
            result = tokio::signal::ctrl_c() => {
                result.context("waiting for Ctrl+C")?;
                info!("Shutting down");
                handle.shutdown();
            }
        }
    }

    info!("Session closed");
    Ok(())
}
