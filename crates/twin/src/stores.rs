//! Cached-fetch-with-fallback stores for warning thresholds and the two
//! schedules.
//!
//! The fallback policy is intentionally asymmetric: a failed threshold
//! load resets the in-memory value to the hardcoded defaults, while a
//! failed schedule load keeps whatever was cached before.  Saves validate
//! nothing client-side; a successful save updates the local cache, a
//! failed one leaves it untouched and raises an operator-facing warning.

use tracing::{error, info, warn};

use crate::api::{FarmApi, PumpScheduleUpdate, SettingsUpdate};
use crate::state::{
    IrrigationSchedule, LightSchedule, SharedState, Signal, SignalTx, WarningThresholds,
};

pub struct Stores<A: FarmApi> {
    api: A,
    state: SharedState,
    signals: SignalTx,
}

impl<A: FarmApi> Stores<A> {
    pub fn new(api: A, state: SharedState, signals: SignalTx) -> Self {
        Self {
            api,
            state,
            signals,
        }
    }

    /// Load warning thresholds.  On failure the store falls back to the
    /// hardcoded defaults, discarding any previously fetched values.
    pub async fn load_thresholds(&self) {
        match self.api.fetch_thresholds().await {
            Ok(t) => {
                let mut st = self.state.write().await;
                st.thresholds = t;
                info!("warning thresholds loaded");
            }
            Err(e) => {
                error!("threshold fetch failed, restoring defaults: {e:#}");
                let mut st = self.state.write().await;
                st.thresholds = WarningThresholds::default();
                st.record_error("threshold fetch failed, defaults restored".to_string());
            }
        }
    }

    /// Load the light schedule.  On failure the cached value is kept.
    pub async fn load_light_schedule(&self) {
        match self.api.fetch_light_schedule().await {
            Ok(s) => {
                let mut st = self.state.write().await;
                st.light_schedule = s;
                info!(start = %s.start, end = %s.end, "light schedule loaded");
            }
            Err(e) => warn!("light schedule fetch failed, keeping cached value: {e:#}"),
        }
    }

    /// Load the irrigation schedule.  On failure the cached value is kept.
    pub async fn load_irrigation_schedule(&self) {
        match self.api.fetch_pump_schedule().await {
            Ok(s) => {
                let mut st = self.state.write().await;
                st.irrigation = s;
                info!(
                    first = %s.first,
                    second = %s.second,
                    duration_secs = s.duration_secs,
                    "irrigation schedule loaded"
                );
            }
            Err(e) => warn!("irrigation schedule fetch failed, keeping cached value: {e:#}"),
        }
    }

    /// Load the combined settings payload.  Absent fields skip their
    /// update; on failure everything cached is kept.
    pub async fn load_settings(&self) {
        match self.api.fetch_settings().await {
            Ok(settings) => {
                let mut st = self.state.write().await;
                if let Some(light) = settings.light_schedule {
                    st.light_schedule = light.into();
                }
                if let Some(thresholds) = settings.warning_thresholds {
                    st.thresholds = thresholds;
                }
                info!("settings loaded");
            }
            Err(e) => warn!("settings fetch failed, keeping cached values: {e:#}"),
        }
    }

    /// Save the light schedule and thresholds.  Refused while autobot is
    /// driving the room.  Returns whether the save was applied.
    pub async fn save_settings(
        &self,
        light: LightSchedule,
        thresholds: WarningThresholds,
    ) -> bool {
        if self.settings_locked().await {
            return false;
        }

        let update = SettingsUpdate {
            light_schedule: light.into(),
            warning_thresholds: thresholds,
        };
        match self.api.save_settings(&update).await {
            Ok(ack) if ack.success => {
                let mut st = self.state.write().await;
                st.light_schedule = light;
                st.thresholds = thresholds;
                st.record_system("settings saved".to_string());
                info!("settings saved");
                true
            }
            Ok(ack) => {
                let message = ack
                    .error
                    .unwrap_or_else(|| "failed to save settings".to_string());
                warn!("settings save rejected: {message}");
                self.raise("Settings error", format!("Failed to save settings: {message}"))
                    .await;
                false
            }
            Err(e) => {
                error!("settings save failed: {e:#}");
                self.raise("Settings error", format!("Failed to save settings: {e:#}"))
                    .await;
                false
            }
        }
    }

    /// Save the irrigation schedule.  Same lock and failure policy as
    /// [`save_settings`](Self::save_settings).
    pub async fn save_pump_schedule(&self, schedule: IrrigationSchedule) -> bool {
        if self.settings_locked().await {
            return false;
        }

        let update: PumpScheduleUpdate = schedule.into();
        match self.api.save_pump_schedule(&update).await {
            Ok(()) => {
                let mut st = self.state.write().await;
                st.irrigation = schedule;
                st.record_system("pump schedule saved".to_string());
                info!("pump schedule saved");
                true
            }
            Err(e) => {
                error!("pump schedule save failed: {e:#}");
                self.raise(
                    "Settings error",
                    format!("Failed to save pump schedule: {e:#}"),
                )
                .await;
                false
            }
        }
    }

    async fn settings_locked(&self) -> bool {
        let locked = self.state.read().await.devices.autobot.is_on();
        if locked {
            warn!("settings save refused while autobot is on");
            self.raise(
                "Settings locked",
                "Switch to manual mode first to reconfigure settings.".to_string(),
            )
            .await;
        }
        locked
    }

    async fn raise(&self, title: &str, message: String) {
        {
            let mut st = self.state.write().await;
            st.record_error(format!("{title}: {message}"));
        }
        let _ = self.signals.send(Signal::UserWarning {
            title: title.to_string(),
            message,
        });
    }
}

// ===========================================================================
// Tests
// ===========================================================================
