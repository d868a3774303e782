//! Device state machine: optimistic manual toggles with revert-on-failure,
//! write-through paths for the automation scheduler, and the periodic
//! authoritative reconciliation against the server.
//!
//! Writes to a given device are serialized through a per-device lock, so
//! a second toggle issued before the first round-trip completes waits
//! instead of racing it.  The 5-second reconciliation poll remains the
//! final authority either way: optimistic client mutations are transient
//! and always eventually overwritten by server truth.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::api::FarmApi;
use crate::scheduler::Automation;
use crate::state::{Device, DeviceStates, SharedState, Signal, SignalTx, Toggle};

#[derive(Clone)]
pub struct DeviceController<A: FarmApi> {
    api: A,
    state: SharedState,
    signals: SignalTx,
    write_locks: Arc<[Mutex<()>; 4]>,
}

impl<A: FarmApi> DeviceController<A> {
    pub fn new(api: A, state: SharedState, signals: SignalTx) -> Self {
        Self {
            api,
            state,
            signals,
            write_locks: Arc::new([
                Mutex::new(()),
                Mutex::new(()),
                Mutex::new(()),
                Mutex::new(()),
            ]),
        }
    }

    pub(crate) fn api(&self) -> &A {
        &self.api
    }

    /// Manual toggle.  Flips local state immediately (optimistic), then
    /// writes to the server; on failure the local state and visuals are
    /// reverted and no retry is attempted.  Returns the resulting state.
    pub async fn toggle(&self, device: Device) -> Toggle {
        if device == Device::Autobot {
            return self.toggle_autobot().await;
        }

        let _guard = self.write_locks[device.index()].lock().await;

        let target = {
            let mut st = self.state.write().await;
            let target = st.devices.get(device).flipped();
            st.record_device(device, target);
            target
        };
        let _ = self.signals.send(Signal::DeviceChanged {
            device,
            state: target,
        });

        match self.api.update_device_state(device, target).await {
            Ok(()) => target,
            Err(e) => {
                error!(
                    device = device.wire_name(),
                    "device update failed, reverting: {e:#}"
                );
                let prev = target.flipped();
                {
                    let mut st = self.state.write().await;
                    st.record_device(device, prev);
                    st.record_error(format!(
                        "{} update failed, reverted to {prev}",
                        device.wire_name()
                    ));
                }
                let _ = self.signals.send(Signal::DeviceChanged {
                    device,
                    state: prev,
                });
                prev
            }
        }
    }

    /// Autobot toggle.  Enabling is refused while the light schedule still
    /// equals the unconfigured default.  Unlike the other devices the
    /// write goes to the server first; local state only changes on
    /// success, so there is nothing to revert.
    pub async fn toggle_autobot(&self) -> Toggle {
        let _guard = self.write_locks[Device::Autobot.index()].lock().await;

        let (current, unconfigured) = {
            let st = self.state.read().await;
            (st.devices.autobot, st.light_schedule.is_unconfigured())
        };
        let target = current.flipped();

        if target == Toggle::On && unconfigured {
            warn!("refusing to enable autobot: light schedule is unconfigured");
            {
                let mut st = self.state.write().await;
                st.record_system("autobot enable refused: schedule unconfigured".to_string());
            }
            let _ = self.signals.send(Signal::UserWarning {
                title: "Configuration required".to_string(),
                message: "Reconfigure the schedule settings before enabling auto mode."
                    .to_string(),
            });
            return current;
        }

        match self.api.update_device_state(Device::Autobot, target).await {
            Ok(()) => {
                {
                    let mut st = self.state.write().await;
                    st.record_device(Device::Autobot, target);
                }
                let _ = self.signals.send(Signal::DeviceChanged {
                    device: Device::Autobot,
                    state: target,
                });
                info!(state = %target, "autobot toggled");
                target
            }
            Err(e) => {
                error!("autobot update failed: {e:#}");
                let mut st = self.state.write().await;
                st.record_error(format!("autobot update failed: {e:#}"));
                current
            }
        }
    }

    /// Scheduler-driven set.  Flips local state and visuals and writes
    /// through; a failed write is logged but the local state is kept —
    /// the automation already considers the device correct, and the next
    /// reconciliation poll resolves any divergence.
    pub async fn set_device(&self, device: Device, target: Toggle) {
        let _guard = self.write_locks[device.index()].lock().await;

        {
            let mut st = self.state.write().await;
            st.record_device(device, target);
        }
        let _ = self.signals.send(Signal::DeviceChanged {
            device,
            state: target,
        });

        if let Err(e) = self.api.update_device_state(device, target).await {
            error!(
                device = device.wire_name(),
                "scheduled device write failed: {e:#}"
            );
            let mut st = self.state.write().await;
            st.record_error(format!(
                "scheduled {} write failed",
                device.wire_name()
            ));
        }
    }

    /// Server-first set used by pump runs: local state mutates only when
    /// the write succeeds.
    pub async fn set_device_checked(&self, device: Device, target: Toggle) -> Result<()> {
        let _guard = self.write_locks[device.index()].lock().await;

        self.api.update_device_state(device, target).await?;
        {
            let mut st = self.state.write().await;
            st.record_device(device, target);
        }
        let _ = self.signals.send(Signal::DeviceChanged {
            device,
            state: target,
        });
        Ok(())
    }

    /// Overwrite the local cache and every dependent visual with the
    /// server's authoritative snapshot, unconditionally.
    pub async fn apply_authoritative(&self, fetched: DeviceStates) {
        let changed = {
            let mut st = self.state.write().await;
            let changed = st.devices != fetched;
            st.devices = fetched;
            if changed {
                st.record_system("device states reconciled from server".to_string());
            }
            changed
        };
        // Visuals and button labels refresh every poll, changed or not.
        for device in Device::ALL {
            let _ = self.signals.send(Signal::DeviceChanged {
                device,
                state: fetched.get(device),
            });
        }
        if changed {
            info!(
                fan = %fetched.fan,
                plant_light = %fetched.plant_light,
                pump = %fetched.pump,
                autobot = %fetched.autobot,
                "device states reconciled"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Reconciliation loop
// ---------------------------------------------------------------------------

/// One reconciliation cycle: fetch authoritative device states, overwrite
/// the cache, and drive the automation scheduler from the fetched autobot
/// value (idempotent start/stop).
pub async fn reconcile_once<A: FarmApi>(
    ctrl: &DeviceController<A>,
    automation: &Automation<A>,
) -> Result<()> {
    let fetched = ctrl.api.fetch_device_states().await?;
    ctrl.apply_authoritative(fetched).await;
    if fetched.autobot.is_on() {
        automation.start().await;
    } else {
        automation.stop().await;
    }
    Ok(())
}

/// Periodic reconciliation.  Intended to be `tokio::spawn`-ed; first
/// cycle fires immediately.
pub async fn run_reconcile<A: FarmApi>(
    ctrl: DeviceController<A>,
    automation: Automation<A>,
    every: Duration,
) {
    let mut ticker = tokio::time::interval(every);
    info!(every_sec = every.as_secs(), "device reconciliation started");
    loop {
        ticker.tick().await;
        if let Err(e) = reconcile_once(&ctrl, &automation).await {
            warn!("device state poll failed: {e:#}");
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
