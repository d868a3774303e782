//! In-memory [`FarmApi`] mock with per-endpoint failure injection,
//! shared by the unit tests of every component that talks to the server.

use anyhow::{bail, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::api::{
    DataPayload, FarmApi, LightScheduleWire, PumpScheduleUpdate, SaveAck, SettingsUpdate,
    SettingsWire,
};
use crate::state::{
    Device, DeviceStates, IrrigationSchedule, LightSchedule, Toggle, WarningThresholds,
};

#[derive(Clone, Default)]
pub(crate) struct MockApi {
    pub inner: Arc<MockInner>,
}

#[derive(Default)]
pub(crate) struct MockInner {
    pub device_states: Mutex<DeviceStates>,
    /// Every `update_device_state` call, in order, including failed ones.
    pub device_updates: Mutex<Vec<(Device, Toggle)>>,
    pub fail_device_updates: AtomicBool,
    /// When nonzero, device updates succeed this many times, then fail.
    pub device_updates_before_failure: AtomicUsize,

    pub pump_schedule: Mutex<IrrigationSchedule>,
    pub fail_pump_schedule: AtomicBool,
    pub pump_schedule_fetches: AtomicUsize,

    pub thresholds: Mutex<WarningThresholds>,
    pub fail_thresholds: AtomicBool,

    pub light_schedule: Mutex<LightSchedule>,
    pub fail_light_schedule: AtomicBool,
    pub fail_settings: AtomicBool,

    pub saved_settings: Mutex<Vec<SettingsUpdate>>,
    pub saved_pump_schedules: Mutex<Vec<PumpScheduleUpdate>>,
    pub fail_saves: AtomicBool,
    /// Transport succeeds but the server acks `success: false`.
    pub reject_saves: AtomicBool,

    pub data: Mutex<DataPayload>,
    pub fail_data: AtomicBool,
}

impl MockApi {
    pub fn with_devices(devices: DeviceStates) -> Self {
        let mock = Self::default();
        *mock.inner.device_states.lock().unwrap() = devices;
        mock
    }

    pub fn updates(&self) -> Vec<(Device, Toggle)> {
        self.inner.device_updates.lock().unwrap().clone()
    }
}

impl FarmApi for MockApi {
    async fn fetch_data(&self) -> Result<DataPayload> {
        if self.inner.fail_data.load(Ordering::SeqCst) {
            bail!("injected data fetch failure");
        }
        Ok(self.inner.data.lock().unwrap().clone())
    }

    async fn fetch_device_states(&self) -> Result<DeviceStates> {
        Ok(*self.inner.device_states.lock().unwrap())
    }

    async fn fetch_thresholds(&self) -> Result<WarningThresholds> {
        if self.inner.fail_thresholds.load(Ordering::SeqCst) {
            bail!("injected threshold fetch failure");
        }
        Ok(*self.inner.thresholds.lock().unwrap())
    }

    async fn fetch_light_schedule(&self) -> Result<LightSchedule> {
        if self.inner.fail_light_schedule.load(Ordering::SeqCst) {
            bail!("injected light schedule fetch failure");
        }
        Ok(*self.inner.light_schedule.lock().unwrap())
    }

    async fn fetch_pump_schedule(&self) -> Result<IrrigationSchedule> {
        self.inner.pump_schedule_fetches.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_pump_schedule.load(Ordering::SeqCst) {
            bail!("injected pump schedule fetch failure");
        }
        Ok(*self.inner.pump_schedule.lock().unwrap())
    }

    async fn fetch_settings(&self) -> Result<SettingsWire> {
        if self.inner.fail_settings.load(Ordering::SeqCst) {
            bail!("injected settings fetch failure");
        }
        let light = *self.inner.light_schedule.lock().unwrap();
        Ok(SettingsWire {
            light_schedule: Some(LightScheduleWire {
                start_hour: light.start.hour,
                start_minute: light.start.minute,
                end_hour: light.end.hour,
                end_minute: light.end.minute,
            }),
            warning_thresholds: Some(*self.inner.thresholds.lock().unwrap()),
        })
    }

    async fn save_settings(&self, update: &SettingsUpdate) -> Result<SaveAck> {
        if self.inner.fail_saves.load(Ordering::SeqCst) {
            bail!("injected settings save failure");
        }
        if self.inner.reject_saves.load(Ordering::SeqCst) {
            return Ok(SaveAck {
                success: false,
                error: Some("rejected by server".to_string()),
            });
        }
        self.inner.saved_settings.lock().unwrap().push(update.clone());
        Ok(SaveAck {
            success: true,
            error: None,
        })
    }

    async fn save_pump_schedule(&self, update: &PumpScheduleUpdate) -> Result<()> {
        if self.inner.fail_saves.load(Ordering::SeqCst) {
            bail!("injected pump schedule save failure");
        }
        self.inner
            .saved_pump_schedules
            .lock()
            .unwrap()
            .push(update.clone());
        Ok(())
    }

    async fn update_device_state(&self, device: Device, state: Toggle) -> Result<()> {
        let call_number = {
            let mut updates = self.inner.device_updates.lock().unwrap();
            updates.push((device, state));
            updates.len()
        };
        if self.inner.fail_device_updates.load(Ordering::SeqCst) {
            bail!("injected device update failure");
        }
        let allowed = self.inner.device_updates_before_failure.load(Ordering::SeqCst);
        if allowed != 0 && call_number > allowed {
            bail!("injected device update failure after {allowed} calls");
        }
        // Mirror the write so a later fetch reflects it, like the server.
        self.inner.device_states.lock().unwrap().set(device, state);
        Ok(())
    }

    async fn fetch_weather(&self) -> Result<serde_json::Value> {
        Ok(serde_json::Value::Null)
    }
}
