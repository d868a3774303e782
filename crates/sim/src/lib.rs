//! In-memory stand-in for the remote greenhouse API.
//!
//! Serves every endpoint the twin core polls, with the same wire casing
//! the real backend uses (snake_case GET payloads, camelCase POST
//! bodies).  Telemetry is jittered around plausible grow-room values and
//! every `/api/data` request appends a fresh reading to each channel's
//! history, so a client polling the sim sees a live-looking room.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::RwLock;

pub type SharedSim = Arc<RwLock<FarmSim>>;

/// Readings retained per channel, matching the dashboard's buffer bound.
const HISTORY_LEN: usize = 120;

/// Seconds between seeded history points.
const HISTORY_STEP_SECS: i64 = 30;

// ---------------------------------------------------------------------------
// Channel table
// ---------------------------------------------------------------------------

struct ChannelSpec {
    history_key: &'static str,
    metric: &'static str,
    /// Which sensor block the latest reading lives in (1..=3).
    sensor: u8,
    base: f64,
    spread: f64,
}

const CHANNELS: &[ChannelSpec] = &[
    ChannelSpec {
        history_key: "tempHistory",
        metric: "1",
        sensor: 1,
        base: 21.5,
        spread: 1.6,
    },
    ChannelSpec {
        history_key: "humidityHistory",
        metric: "2",
        sensor: 1,
        base: 68.0,
        spread: 6.0,
    },
    ChannelSpec {
        history_key: "co2History",
        metric: "3",
        sensor: 3,
        base: 600.0,
        spread: 30.0,
    },
    ChannelSpec {
        history_key: "atmosphericPressHistory",
        metric: "4",
        sensor: 3,
        base: 1013.0,
        spread: 6.0,
    },
    ChannelSpec {
        history_key: "moistureHistory",
        metric: "8",
        sensor: 2,
        base: 32.0,
        spread: 3.0,
    },
    ChannelSpec {
        history_key: "soilECHistory",
        metric: "10",
        sensor: 2,
        base: 1.2,
        spread: 0.2,
    },
    ChannelSpec {
        history_key: "poreECHistory",
        metric: "11",
        sensor: 2,
        base: 0.9,
        spread: 0.2,
    },
];

fn jitter(spec: &ChannelSpec) -> f64 {
    spec.base + (fastrand::f64() - 0.5) * spec.spread
}

// ---------------------------------------------------------------------------
// Sim state
// ---------------------------------------------------------------------------

pub struct FarmSim {
    pub fan: bool,
    pub plant_light: bool,
    pub pump: bool,
    pub autobot: bool,

    pub temp_high: f64,
    pub temp_low: f64,
    pub humid_high: f64,
    pub humid_low: f64,
    pub co2_high: f64,
    pub co2_low: f64,
    pub moisture_high: f64,
    pub moisture_low: f64,

    pub light_start: (u8, u8),
    pub light_end: (u8, u8),

    pub first_irrigation: (u8, u8),
    pub second_irrigation: (u8, u8),
    pub pump_duration_secs: u32,

    /// Per channel (keyed by history name): `(unix seconds, value)`.
    histories: Vec<Vec<(i64, f64)>>,
}

impl FarmSim {
    pub fn new() -> Self {
        let now = Utc::now().timestamp();
        let histories = CHANNELS
            .iter()
            .map(|spec| {
                (0..HISTORY_LEN)
                    .map(|i| {
                        let ts = now - (HISTORY_LEN as i64 - 1 - i as i64) * HISTORY_STEP_SECS;
                        (ts, jitter(spec))
                    })
                    .collect()
            })
            .collect();

        Self {
            fan: false,
            plant_light: false,
            pump: false,
            autobot: false,
            temp_high: 23.0,
            temp_low: 20.0,
            humid_high: 75.0,
            humid_low: 62.0,
            co2_high: 620.0,
            co2_low: 580.0,
            moisture_high: 34.0,
            moisture_low: 30.0,
            light_start: (8, 10),
            light_end: (23, 50),
            first_irrigation: (9, 10),
            second_irrigation: (21, 10),
            pump_duration_secs: 60,
            histories,
        }
    }

    fn set_device(&mut self, device: &str, on: bool) -> bool {
        match device {
            "fan" => self.fan = on,
            "plantLight" => self.plant_light = on,
            "pump" => self.pump = on,
            "autobot" => self.autobot = on,
            _ => return false,
        }
        true
    }

    /// Append a fresh jittered reading to every channel and return the
    /// new latest values, in channel-table order.
    fn advance(&mut self, now: i64) -> Vec<f64> {
        CHANNELS
            .iter()
            .zip(&mut self.histories)
            .map(|(spec, history)| {
                let value = jitter(spec);
                if history.len() >= HISTORY_LEN {
                    history.remove(0);
                }
                history.push((now, value));
                value
            })
            .collect()
    }
}

impl Default for FarmSim {
    fn default() -> Self {
        Self::new()
    }
}

fn onoff(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}

// ---------------------------------------------------------------------------
// Request bodies (camelCase, like the real backend's POST endpoints)
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct DeviceUpdateBody {
    device: String,
    state: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LightBody {
    start_hour: u8,
    start_minute: u8,
    end_hour: u8,
    end_minute: u8,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThresholdsBody {
    temp_high: f64,
    temp_low: f64,
    humid_high: f64,
    humid_low: f64,
    co2_high: f64,
    co2_low: f64,
    moisture_high: f64,
    moisture_low: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsBody {
    light_schedule: LightBody,
    warning_thresholds: ThresholdsBody,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PumpBody {
    first_irrigation_hour: u8,
    first_irrigation_minute: u8,
    second_irrigation_hour: u8,
    second_irrigation_minute: u8,
    duration_seconds: u32,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(sim: SharedSim) -> Router {
    Router::new()
        .route("/api/data", get(api_data))
        .route("/api/device-states", get(api_device_states))
        .route("/api/warning-thresholds", get(api_thresholds))
        .route("/api/light-schedule", get(api_light_schedule))
        .route("/api/pump-schedule", get(api_pump_schedule).post(api_pump_schedule_post))
        .route("/api/settings", get(api_settings).post(api_settings_post))
        .route("/api/update-device-state", post(api_update_device))
        .route("/api/weather", get(api_weather))
        .with_state(sim)
}

async fn api_data(State(sim): State<SharedSim>) -> Json<Value> {
    let mut sim = sim.write().await;
    let now = Utc::now().timestamp();
    let latest = sim.advance(now);

    let mut body = json!({
        "sensor1": { "readings": [] },
        "sensor2": { "readings": [] },
        "sensor3": { "readings": [] },
    });

    for ((spec, history), value) in CHANNELS.iter().zip(&sim.histories).zip(latest) {
        let points: Vec<Value> = history
            .iter()
            .map(|(ts, v)| json!({ "time": ts, "value": v }))
            .collect();
        body[spec.history_key] = Value::Array(points);

        // Latest readings go out as strings, like the real sensors.
        let block = format!("sensor{}", spec.sensor);
        body[block]["readings"]
            .as_array_mut()
            .expect("readings array")
            .push(json!({ "metric": spec.metric, "value": format!("{value:.3}") }));
    }

    Json(body)
}

async fn api_device_states(State(sim): State<SharedSim>) -> Json<Value> {
    let sim = sim.read().await;
    Json(json!({
        "fan": onoff(sim.fan),
        "plantLight": onoff(sim.plant_light),
        "pump": onoff(sim.pump),
        "autobot": onoff(sim.autobot),
    }))
}

async fn api_thresholds(State(sim): State<SharedSim>) -> Json<Value> {
    let sim = sim.read().await;
    Json(json!({
        "temp_high": sim.temp_high,
        "temp_low": sim.temp_low,
        "humid_high": sim.humid_high,
        "humid_low": sim.humid_low,
        "co2_high": sim.co2_high,
        "co2_low": sim.co2_low,
        "moisture_high": sim.moisture_high,
        "moisture_low": sim.moisture_low,
    }))
}

async fn api_light_schedule(State(sim): State<SharedSim>) -> Json<Value> {
    let sim = sim.read().await;
    Json(json!({
        "start_hour": sim.light_start.0,
        "start_minute": sim.light_start.1,
        "end_hour": sim.light_end.0,
        "end_minute": sim.light_end.1,
    }))
}

async fn api_pump_schedule(State(sim): State<SharedSim>) -> Json<Value> {
    let sim = sim.read().await;
    Json(json!({
        "first_irrigation_hour": sim.first_irrigation.0,
        "first_irrigation_minute": sim.first_irrigation.1,
        "second_irrigation_hour": sim.second_irrigation.0,
        "second_irrigation_minute": sim.second_irrigation.1,
        "duration_seconds": sim.pump_duration_secs,
    }))
}

async fn api_settings(State(sim): State<SharedSim>) -> Json<Value> {
    let sim = sim.read().await;
    Json(json!({
        "lightSchedule": {
            "start_hour": sim.light_start.0,
            "start_minute": sim.light_start.1,
            "end_hour": sim.light_end.0,
            "end_minute": sim.light_end.1,
        },
        "warningThresholds": {
            "tempHigh": sim.temp_high,
            "tempLow": sim.temp_low,
            "humidHigh": sim.humid_high,
            "humidLow": sim.humid_low,
            "co2High": sim.co2_high,
            "co2Low": sim.co2_low,
            "moistureHigh": sim.moisture_high,
            "moistureLow": sim.moisture_low,
        },
    }))
}

async fn api_settings_post(
    State(sim): State<SharedSim>,
    Json(body): Json<SettingsBody>,
) -> Json<Value> {
    let mut sim = sim.write().await;
    sim.light_start = (body.light_schedule.start_hour, body.light_schedule.start_minute);
    sim.light_end = (body.light_schedule.end_hour, body.light_schedule.end_minute);
    let t = body.warning_thresholds;
    sim.temp_high = t.temp_high;
    sim.temp_low = t.temp_low;
    sim.humid_high = t.humid_high;
    sim.humid_low = t.humid_low;
    sim.co2_high = t.co2_high;
    sim.co2_low = t.co2_low;
    sim.moisture_high = t.moisture_high;
    sim.moisture_low = t.moisture_low;
    tracing::info!("settings updated");
    Json(json!({ "success": true }))
}

async fn api_pump_schedule_post(
    State(sim): State<SharedSim>,
    Json(body): Json<PumpBody>,
) -> Json<Value> {
    let mut sim = sim.write().await;
    sim.first_irrigation = (body.first_irrigation_hour, body.first_irrigation_minute);
    sim.second_irrigation = (body.second_irrigation_hour, body.second_irrigation_minute);
    sim.pump_duration_secs = body.duration_seconds;
    tracing::info!("pump schedule updated");
    Json(json!({ "success": true }))
}

async fn api_update_device(
    State(sim): State<SharedSim>,
    Json(body): Json<DeviceUpdateBody>,
) -> impl IntoResponse {
    let on = match body.state.as_str() {
        "ON" => true,
        "OFF" => false,
        other => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "success": false, "error": format!("unknown state '{other}'") })),
            );
        }
    };
    let mut sim = sim.write().await;
    if !sim.set_device(&body.device, on) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": format!("unknown device '{}'", body.device) })),
        );
    }
    tracing::info!(device = %body.device, state = %body.state, "device updated");
    (StatusCode::OK, Json(json!({ "success": true })))
}

async fn api_weather(State(_sim): State<SharedSim>) -> Json<Value> {
    let temp = 8.0 + (fastrand::f64() - 0.5) * 10.0;
    Json(json!({
        "current": {
            "condition": { "text": "Partly cloudy", "icon": "//cdn.weather.sim/day/116.png" },
            "temp_c": (temp * 10.0).round() / 10.0,
            "feelslike_c": ((temp - 2.0) * 10.0).round() / 10.0,
            "humidity": 71,
            "wind_kph": 14.0,
        }
    }))
}

// ===========================================================================
// Tests
// ===========================================================================
