//! Remote greenhouse API: wire types, the [`FarmApi`] port trait, and the
//! reqwest-backed [`HttpApi`] adapter.
//!
//! Wire casing follows the server as observed: GET payloads use
//! snake_case, POST bodies camelCase, and the device-state record
//! camelCase keys with `"ON"`/`"OFF"` values.  Numeric readings may
//! arrive as JSON numbers or as strings and are coerced leniently; a
//! value that parses as neither skips that field's update instead of
//! failing the whole payload.

use anyhow::{Context, Result};
use chrono::DateTime;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use crate::state::{
    Channel, Device, DeviceStates, IrrigationSchedule, LightSchedule, TimeOfDay, Toggle,
    WarningThresholds,
};

// ---------------------------------------------------------------------------
// Lenient scalar wire types
// ---------------------------------------------------------------------------

/// A number that the server may serialize as a JSON number or a string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WireNumber {
    Num(f64),
    Text(String),
}

impl WireNumber {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            WireNumber::Num(v) => Some(*v),
            WireNumber::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// A timestamp that may arrive as unix seconds, unix milliseconds, or an
/// RFC 3339 string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WireTimestamp {
    Unix(i64),
    Text(String),
}

impl WireTimestamp {
    pub fn as_unix_seconds(&self) -> Option<i64> {
        match self {
            // Heuristic: values this large can only be milliseconds.
            WireTimestamp::Unix(v) if *v > 100_000_000_000 => Some(v / 1000),
            WireTimestamp::Unix(v) => Some(*v),
            WireTimestamp::Text(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|d| d.timestamp()),
        }
    }
}

// ---------------------------------------------------------------------------
// GET /api/data
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct WireReading {
    pub metric: String,
    pub value: WireNumber,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SensorBlock {
    #[serde(default)]
    pub readings: Vec<WireReading>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryPoint {
    pub time: WireTimestamp,
    pub value: WireNumber,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraShot {
    pub id: Option<serde_json::Value>,
    pub timestamp: Option<String>,
    #[serde(rename = "imageUrl")]
    pub image_url: Option<String>,
}

/// Combined telemetry payload.  Every field is optional on the wire;
/// absent fields simply skip their update.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPayload {
    #[serde(default)]
    pub sensor1: SensorBlock,
    #[serde(default)]
    pub sensor2: SensorBlock,
    #[serde(default)]
    pub sensor3: SensorBlock,
    pub temp_history: Option<Vec<HistoryPoint>>,
    pub humidity_history: Option<Vec<HistoryPoint>>,
    pub co2_history: Option<Vec<HistoryPoint>>,
    pub atmospheric_press_history: Option<Vec<HistoryPoint>>,
    pub moisture_history: Option<Vec<HistoryPoint>>,
    #[serde(rename = "soilECHistory")]
    pub soil_ec_history: Option<Vec<HistoryPoint>>,
    #[serde(rename = "poreECHistory")]
    pub pore_ec_history: Option<Vec<HistoryPoint>>,
    pub last_camera_shot: Option<CameraShot>,
}

impl DataPayload {
    pub fn history_for(&self, channel: Channel) -> Option<&[HistoryPoint]> {
        let h = match channel {
            Channel::Temperature => &self.temp_history,
            Channel::Humidity => &self.humidity_history,
            Channel::Co2 => &self.co2_history,
            Channel::AtmosphericPress => &self.atmospheric_press_history,
            Channel::Moisture => &self.moisture_history,
            Channel::SoilEc => &self.soil_ec_history,
            Channel::PoreEc => &self.pore_ec_history,
        };
        h.as_deref()
    }

    /// Latest scalar for a channel, located by metric code across the
    /// per-sensor reading lists.
    pub fn latest_reading(&self, channel: Channel) -> Option<f64> {
        let code = channel.metric_code();
        self.sensor1
            .readings
            .iter()
            .chain(&self.sensor2.readings)
            .chain(&self.sensor3.readings)
            .find(|r| r.metric == code)
            .and_then(|r| r.value.as_f64())
    }
}

// ---------------------------------------------------------------------------
// Threshold / schedule wire types
// ---------------------------------------------------------------------------

/// `GET /api/warning-thresholds` (snake_case on the wire).
#[derive(Debug, Clone, Deserialize)]
pub struct ThresholdsWire {
    pub temp_high: WireNumber,
    pub temp_low: WireNumber,
    pub humid_high: WireNumber,
    pub humid_low: WireNumber,
    pub co2_high: WireNumber,
    pub co2_low: WireNumber,
    pub moisture_high: WireNumber,
    pub moisture_low: WireNumber,
}

impl From<ThresholdsWire> for WarningThresholds {
    fn from(w: ThresholdsWire) -> Self {
        // An unparseable bound disables that warning (NaN never compares
        // out of range) rather than failing the load.
        let num = |n: &WireNumber| n.as_f64().unwrap_or(f64::NAN);
        Self {
            temp_high: num(&w.temp_high),
            temp_low: num(&w.temp_low),
            humid_high: num(&w.humid_high),
            humid_low: num(&w.humid_low),
            co2_high: num(&w.co2_high),
            co2_low: num(&w.co2_low),
            moisture_high: num(&w.moisture_high),
            moisture_low: num(&w.moisture_low),
        }
    }
}

/// `GET /api/light-schedule`.
#[derive(Debug, Clone, Deserialize)]
pub struct LightScheduleWire {
    pub start_hour: u8,
    pub start_minute: u8,
    pub end_hour: u8,
    pub end_minute: u8,
}

impl From<LightScheduleWire> for LightSchedule {
    fn from(w: LightScheduleWire) -> Self {
        Self {
            start: TimeOfDay::new(w.start_hour, w.start_minute),
            end: TimeOfDay::new(w.end_hour, w.end_minute),
        }
    }
}

/// `GET /api/pump-schedule`.
#[derive(Debug, Clone, Deserialize)]
pub struct PumpScheduleWire {
    pub first_irrigation_hour: u8,
    pub first_irrigation_minute: u8,
    pub second_irrigation_hour: u8,
    pub second_irrigation_minute: u8,
    pub duration_seconds: u32,
}

impl From<PumpScheduleWire> for IrrigationSchedule {
    fn from(w: PumpScheduleWire) -> Self {
        Self {
            first: TimeOfDay::new(w.first_irrigation_hour, w.first_irrigation_minute),
            second: TimeOfDay::new(w.second_irrigation_hour, w.second_irrigation_minute),
            duration_secs: w.duration_seconds,
        }
    }
}

/// `GET /api/settings` — combined, camelCase wrapper keys.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsWire {
    pub light_schedule: Option<LightScheduleWire>,
    pub warning_thresholds: Option<WarningThresholds>,
}

// ---------------------------------------------------------------------------
// POST bodies (camelCase)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LightScheduleUpdate {
    pub start_hour: u8,
    pub start_minute: u8,
    pub end_hour: u8,
    pub end_minute: u8,
}

impl From<LightSchedule> for LightScheduleUpdate {
    fn from(s: LightSchedule) -> Self {
        Self {
            start_hour: s.start.hour,
            start_minute: s.start.minute,
            end_hour: s.end.hour,
            end_minute: s.end.minute,
        }
    }
}

/// `POST /api/settings`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    pub light_schedule: LightScheduleUpdate,
    pub warning_thresholds: WarningThresholds,
}

/// `POST /api/pump-schedule`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PumpScheduleUpdate {
    pub first_irrigation_hour: u8,
    pub first_irrigation_minute: u8,
    pub second_irrigation_hour: u8,
    pub second_irrigation_minute: u8,
    pub duration_seconds: u32,
}

impl From<IrrigationSchedule> for PumpScheduleUpdate {
    fn from(s: IrrigationSchedule) -> Self {
        Self {
            first_irrigation_hour: s.first.hour,
            first_irrigation_minute: s.first.minute,
            second_irrigation_hour: s.second.hour,
            second_irrigation_minute: s.second.minute,
            duration_seconds: s.duration_secs,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SaveAck {
    #[serde(default)]
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
struct DeviceUpdate<'a> {
    device: &'a str,
    state: Toggle,
}

// ---------------------------------------------------------------------------
// The port trait
// ---------------------------------------------------------------------------

/// Everything the core needs from the remote API.  Components consume
/// this via generics, so tests swap in an in-memory mock and the
/// production wiring uses [`HttpApi`].
pub trait FarmApi: Clone + Send + Sync + 'static {
    fn fetch_data(&self) -> impl Future<Output = Result<DataPayload>> + Send;
    fn fetch_device_states(&self) -> impl Future<Output = Result<DeviceStates>> + Send;
    fn fetch_thresholds(&self) -> impl Future<Output = Result<WarningThresholds>> + Send;
    fn fetch_light_schedule(&self) -> impl Future<Output = Result<LightSchedule>> + Send;
    fn fetch_pump_schedule(&self) -> impl Future<Output = Result<IrrigationSchedule>> + Send;
    fn fetch_settings(&self) -> impl Future<Output = Result<SettingsWire>> + Send;
    fn save_settings(&self, update: &SettingsUpdate)
        -> impl Future<Output = Result<SaveAck>> + Send;
    fn save_pump_schedule(
        &self,
        update: &PumpScheduleUpdate,
    ) -> impl Future<Output = Result<()>> + Send;
    fn update_device_state(
        &self,
        device: Device,
        state: Toggle,
    ) -> impl Future<Output = Result<()>> + Send;
    fn fetch_weather(&self) -> impl Future<Output = Result<serde_json::Value>> + Send;
}

// ---------------------------------------------------------------------------
// HTTP adapter
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct HttpApi {
    client: reqwest::Client,
    base: String,
}

impl HttpApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            client,
            base: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self
            .client
            .get(self.url(path))
            .send()
            .await
            .with_context(|| format!("GET {path} failed"))?
            .error_for_status()
            .with_context(|| format!("GET {path} returned an error status"))?;
        resp.json()
            .await
            .with_context(|| format!("GET {path} returned an unreadable body"))
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let resp = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {path} failed"))?
            .error_for_status()
            .with_context(|| format!("POST {path} returned an error status"))?;
        resp.json()
            .await
            .with_context(|| format!("POST {path} returned an unreadable body"))
    }
}

impl FarmApi for HttpApi {
    async fn fetch_data(&self) -> Result<DataPayload> {
        self.get_json("/api/data").await
    }

    async fn fetch_device_states(&self) -> Result<DeviceStates> {
        self.get_json("/api/device-states").await
    }

    async fn fetch_thresholds(&self) -> Result<WarningThresholds> {
        let wire: ThresholdsWire = self.get_json("/api/warning-thresholds").await?;
        Ok(wire.into())
    }

    async fn fetch_light_schedule(&self) -> Result<LightSchedule> {
        let wire: LightScheduleWire = self.get_json("/api/light-schedule").await?;
        Ok(wire.into())
    }

    async fn fetch_pump_schedule(&self) -> Result<IrrigationSchedule> {
        let wire: PumpScheduleWire = self.get_json("/api/pump-schedule").await?;
        Ok(wire.into())
    }

    async fn fetch_settings(&self) -> Result<SettingsWire> {
        self.get_json("/api/settings").await
    }

    async fn save_settings(&self, update: &SettingsUpdate) -> Result<SaveAck> {
        self.post_json("/api/settings", update).await
    }

    async fn save_pump_schedule(&self, update: &PumpScheduleUpdate) -> Result<()> {
        let _ack: serde_json::Value = self.post_json("/api/pump-schedule", update).await?;
        Ok(())
    }

    async fn update_device_state(&self, device: Device, state: Toggle) -> Result<()> {
        let body = DeviceUpdate {
            device: device.wire_name(),
            state,
        };
        let _ack: serde_json::Value = self.post_json("/api/update-device-state", &body).await?;
        Ok(())
    }

    async fn fetch_weather(&self) -> Result<serde_json::Value> {
        self.get_json("/api/weather").await
    }
}

// ===========================================================================
// Tests
// ===========================================================================
