use anyhow::{bail, Result};
use std::io::IsTerminal as _;
use std::time::Duration;
use std::{env, path::Path};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use farmlab_twin::api::{FarmApi, HttpApi};
use farmlab_twin::config::{self, Config};
use farmlab_twin::devices::{run_reconcile, DeviceController};
use farmlab_twin::login;
use farmlab_twin::scheduler::{Automation, AutomationConfig};
use farmlab_twin::state::{self, Channel, Device, RangeStatus, Signal, SignalTx};
use farmlab_twin::stores::Stores;
use farmlab_twin::telemetry::TelemetryPoller;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    // ── Config ──────────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "twin.toml".to_string());
    let cfg = if Path::new(&config_path).exists() {
        config::load(&config_path)?
    } else {
        info!("no config file at {config_path}, using defaults");
        Config::default()
    };

    // ── Demo login gate ─────────────────────────────────────────────
    match (env::var("TWIN_USERNAME"), env::var("TWIN_PASSWORD")) {
        (Ok(user), Ok(pass)) => {
            if !login::verify(&user, &pass) {
                bail!("invalid username or password");
            }
            info!("operator logged in (demo gate)");
        }
        _ => warn!("demo login gate skipped: TWIN_USERNAME/TWIN_PASSWORD not set"),
    }

    let api = HttpApi::new(&cfg.api.base_url, Duration::from_secs(cfg.api.timeout_secs))?;
    let (state, signals) = state::new_shared();
    info!(base_url = %cfg.api.base_url, "twin core starting");

    // ── Visual binder stand-in ──────────────────────────────────────
    // The real scene layer subscribes the same way; here the decisions
    // are rendered as log lines.
    spawn_binder(signals.clone());

    // ── Store preload ───────────────────────────────────────────────
    let stores = Stores::new(api.clone(), state.clone(), signals.clone());
    stores.load_settings().await;
    stores.load_thresholds().await;
    stores.load_irrigation_schedule().await;

    // ── One-shot weather display ────────────────────────────────────
    match api.fetch_weather().await {
        Ok(weather) => {
            let condition = weather["current"]["condition"]["text"]
                .as_str()
                .unwrap_or("unknown");
            match weather["current"]["temp_c"].as_f64() {
                Some(temp) => info!(condition, temp_c = temp, "outside weather"),
                None => info!(condition, "outside weather"),
            }
        }
        Err(e) => warn!("weather fetch failed: {e:#}"),
    }

    // ── Background tasks ────────────────────────────────────────────
    let ctrl = DeviceController::new(api.clone(), state.clone(), signals.clone());
    let automation = Automation::new(
        ctrl.clone(),
        state.clone(),
        signals.clone(),
        AutomationConfig {
            light_check: Duration::from_secs(cfg.poll.light_check_secs),
            irrigation_check: Duration::from_secs(cfg.poll.irrigation_check_secs),
            match_window_secs: cfg.pump.match_window_secs,
        },
    );

    let poller = TelemetryPoller::new(
        api,
        state.clone(),
        signals.clone(),
        Duration::from_secs(cfg.poll.warmup_secs),
    );
    tokio::spawn(poller.run(Duration::from_secs(cfg.poll.telemetry_secs)));
    tokio::spawn(run_reconcile(
        ctrl,
        automation.clone(),
        Duration::from_secs(cfg.poll.device_state_secs),
    ));

    // ── Run until interrupted ───────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    automation.stop().await;

    let st = state.read().await;
    for event in st.recent_events(20) {
        info!(kind = ?event.kind, ts = %event.ts, "session event: {}", event.detail);
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .init();
}

/// Subscribe to the core's signals and narrate what the 3D scene would
/// do with them.
fn spawn_binder(signals: SignalTx) {
    let mut rx = signals.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(signal) => render(&signal),
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "visual binder lagged behind the signal stream");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn render(signal: &Signal) {
    match signal {
        Signal::DeviceChanged { device, state } => {
            let scene = match device {
                Device::Fan => {
                    if state.is_on() {
                        "cold-wind loop visible"
                    } else {
                        "cold-wind loop hidden"
                    }
                }
                Device::PlantLight => {
                    if state.is_on() {
                        "grow lights at full intensity"
                    } else {
                        "grow lights dark"
                    }
                }
                Device::Pump => {
                    if state.is_on() {
                        "water spray loop visible"
                    } else {
                        "water spray loop hidden"
                    }
                }
                Device::Autobot => {
                    if state.is_on() {
                        "mode button shows Auto"
                    } else {
                        "mode button shows Manual"
                    }
                }
            };
            info!(target: "binder", device = device.wire_name(), state = %state, "{scene}");
        }
        Signal::WarningChanged { channel, status } => {
            let scene = match (channel, status) {
                (Channel::Temperature, RangeStatus::High) => "thermometer shows high mark",
                (Channel::Temperature, RangeStatus::Low) => "thermometer shows low mark",
                (Channel::Temperature, RangeStatus::Normal) => "thermometer shows normal mark",
                (Channel::Co2, RangeStatus::High) => "co2 cloud visible and pulsing",
                (Channel::Co2, _) => "co2 cloud hidden",
                (Channel::Moisture, RangeStatus::High) => "moisture overlay on, berries ripe",
                (Channel::Moisture, RangeStatus::Low) => "moisture overlay off, berries unripe",
                (Channel::Moisture, RangeStatus::Normal) => "moisture overlay off, berries ripe",
                _ => {
                    if status.out_of_range() {
                        "warning badge pulsing"
                    } else {
                        "warning badge hidden"
                    }
                }
            };
            info!(target: "binder", channel = channel.label(), status = ?status, "{scene}");
        }
        Signal::AutomationChanged { active } => {
            if *active {
                info!(target: "binder", "manual device controls hidden");
            } else {
                info!(target: "binder", "manual device controls shown");
            }
        }
        Signal::UserWarning { title, message } => {
            warn!(target: "binder", "{title}: {message}");
        }
    }
}
