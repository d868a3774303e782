//! Shared twin state: sensor history, thresholds, schedules, and device
//! states, owned by a single container with a narrow mutation API.
//!
//! Everything that used to be ambient mutable state in the kiosk lives
//! here behind one `RwLock`.  Components mutate through the `record_*`
//! methods and publish [`Signal`]s on the broadcast channel; the visual
//! binder (scene/UI layer) is a plain subscriber and never reaches back
//! into the core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// Maximum readings retained per sensor channel.
pub const HISTORY_CAP: usize = 120;

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type aliases
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<TwinState>>;
pub type SignalTx = broadcast::Sender<Signal>;

/// Build the shared state container and its signal channel.
pub fn new_shared() -> (SharedState, SignalTx) {
    let (tx, _) = broadcast::channel(64);
    (Arc::new(RwLock::new(TwinState::new())), tx)
}

// ---------------------------------------------------------------------------
// Sensor channels
// ---------------------------------------------------------------------------

/// A named sensor metric stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Temperature,
    Humidity,
    Moisture,
    SoilEc,
    Co2,
    AtmosphericPress,
    PoreEc,
}

impl Channel {
    pub const ALL: [Channel; 7] = [
        Channel::Temperature,
        Channel::Humidity,
        Channel::Moisture,
        Channel::SoilEc,
        Channel::Co2,
        Channel::AtmosphericPress,
        Channel::PoreEc,
    ];

    /// Server-side numeric code identifying which physical sensor a
    /// reading belongs to.
    pub fn metric_code(self) -> &'static str {
        match self {
            Channel::Temperature => "1",
            Channel::Humidity => "2",
            Channel::Co2 => "3",
            Channel::AtmosphericPress => "4",
            Channel::Moisture => "8",
            Channel::SoilEc => "10",
            Channel::PoreEc => "11",
        }
    }

    pub fn from_metric_code(code: &str) -> Option<Channel> {
        Channel::ALL.into_iter().find(|c| c.metric_code() == code)
    }

    /// Display precision, in decimal places, for the latest reading.
    pub fn decimals(self) -> u32 {
        match self {
            Channel::Temperature | Channel::Humidity | Channel::Moisture => 1,
            Channel::SoilEc | Channel::PoreEc => 3,
            Channel::Co2 | Channel::AtmosphericPress => 0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Channel::Temperature => "temperature",
            Channel::Humidity => "humidity",
            Channel::Moisture => "moisture",
            Channel::SoilEc => "soilEC",
            Channel::Co2 => "co2",
            Channel::AtmosphericPress => "atmosphericPress",
            Channel::PoreEc => "poreEC",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Channel::Temperature => "°C",
            Channel::Humidity | Channel::Moisture => "%",
            Channel::SoilEc | Channel::PoreEc => "mS/cm",
            Channel::Co2 => "ppm",
            Channel::AtmosphericPress => "hPa",
        }
    }
}

// ---------------------------------------------------------------------------
// Sensor history (bounded ring buffers)
// ---------------------------------------------------------------------------

/// One recorded sensor value.  Immutable once stored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReading {
    /// Unix seconds.
    pub ts: i64,
    pub value: f64,
}

/// Per-channel reading buffers, each bounded to the most recent
/// [`HISTORY_CAP`] entries (oldest evicted first).  Mutated exclusively
/// by the telemetry poller.
#[derive(Debug, Default)]
pub struct SensorHistory {
    channels: HashMap<Channel, VecDeque<SensorReading>>,
}

impl SensorHistory {
    pub fn push(&mut self, channel: Channel, reading: SensorReading) {
        let buf = self.channels.entry(channel).or_default();
        if buf.len() >= HISTORY_CAP {
            buf.pop_front();
        }
        buf.push_back(reading);
    }

    /// Replace a channel's buffer wholesale (last-write-wins, not merged),
    /// keeping only the most recent [`HISTORY_CAP`] entries.
    pub fn replace(&mut self, channel: Channel, mut readings: Vec<SensorReading>) {
        if readings.len() > HISTORY_CAP {
            readings.drain(..readings.len() - HISTORY_CAP);
        }
        self.channels.insert(channel, readings.into());
    }

    pub fn latest(&self, channel: Channel) -> Option<SensorReading> {
        self.channels.get(&channel).and_then(|b| b.back()).copied()
    }

    pub fn len(&self, channel: Channel) -> usize {
        self.channels.get(&channel).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self, channel: Channel) -> bool {
        self.len(channel) == 0
    }

    pub fn readings(&self, channel: Channel) -> impl Iterator<Item = &SensorReading> {
        self.channels.get(&channel).into_iter().flatten()
    }
}

// ---------------------------------------------------------------------------
// Warning thresholds
// ---------------------------------------------------------------------------

/// Warning bounds for the four monitored channels.  The server is the
/// source of truth; these defaults are the fallback and the value before
/// the first successful fetch.  `*_high >= *_low` is expected but never
/// validated — evaluation must tolerate inverted or non-finite bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarningThresholds {
    pub temp_high: f64,
    pub temp_low: f64,
    pub humid_high: f64,
    pub humid_low: f64,
    pub co2_high: f64,
    pub co2_low: f64,
    pub moisture_high: f64,
    pub moisture_low: f64,
}

impl Default for WarningThresholds {
    fn default() -> Self {
        Self {
            temp_high: 23.0,
            temp_low: 20.0,
            humid_high: 75.0,
            humid_low: 62.0,
            co2_high: 620.0,
            co2_low: 580.0,
            moisture_high: 34.0,
            moisture_low: 30.0,
        }
    }
}

impl WarningThresholds {
    /// `(low, high)` bounds for a channel, or `None` for channels without
    /// warning limits (pressure and the EC streams).
    pub fn bounds(&self, channel: Channel) -> Option<(f64, f64)> {
        match channel {
            Channel::Temperature => Some((self.temp_low, self.temp_high)),
            Channel::Humidity => Some((self.humid_low, self.humid_high)),
            Channel::Co2 => Some((self.co2_low, self.co2_high)),
            Channel::Moisture => Some((self.moisture_low, self.moisture_high)),
            Channel::SoilEc | Channel::AtmosphericPress | Channel::PoreEc => None,
        }
    }
}

/// Tri-state outcome of checking a reading against its bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeStatus {
    Low,
    Normal,
    High,
}

impl RangeStatus {
    /// Strictly-outside comparison: values equal to a bound are in range.
    /// Non-finite or inverted bounds simply never match, yielding Normal.
    pub fn evaluate(value: f64, low: f64, high: f64) -> RangeStatus {
        if value > high {
            RangeStatus::High
        } else if value < low {
            RangeStatus::Low
        } else {
            RangeStatus::Normal
        }
    }

    pub fn out_of_range(self) -> bool {
        self != RangeStatus::Normal
    }
}

// ---------------------------------------------------------------------------
// Schedules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeOfDay {
    pub hour: u8,
    pub minute: u8,
}

impl TimeOfDay {
    pub const fn new(hour: u8, minute: u8) -> Self {
        Self { hour, minute }
    }

    pub fn minutes(self) -> u16 {
        u16::from(self.hour) * 60 + u16::from(self.minute)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// Daily plant-light window, wall-clock time-of-day.  `end < start`
/// means the span wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightSchedule {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

impl LightSchedule {
    /// Factory default.  Doubles as the "never configured" marker that
    /// blocks autobot activation.
    pub const UNCONFIGURED: LightSchedule = LightSchedule {
        start: TimeOfDay::new(8, 10),
        end: TimeOfDay::new(23, 50),
    };

    pub fn is_unconfigured(&self) -> bool {
        *self == Self::UNCONFIGURED
    }

    /// Whether the light should be on at `now` minutes since midnight.
    /// Start is inclusive, end exclusive.
    pub fn should_be_on(&self, now: u16) -> bool {
        let start = self.start.minutes();
        let end = self.end.minutes();
        if end > start {
            now >= start && now < end
        } else {
            // Overnight span.
            now >= start || now < end
        }
    }
}

impl Default for LightSchedule {
    fn default() -> Self {
        Self::UNCONFIGURED
    }
}

/// Two daily irrigation trigger instants plus a pump-run duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrrigationSchedule {
    pub first: TimeOfDay,
    pub second: TimeOfDay,
    pub duration_secs: u32,
}

impl Default for IrrigationSchedule {
    fn default() -> Self {
        Self {
            first: TimeOfDay::new(9, 10),
            second: TimeOfDay::new(21, 10),
            duration_secs: 60,
        }
    }
}

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Toggle {
    #[serde(rename = "ON")]
    On,
    #[serde(rename = "OFF")]
    Off,
}

impl Toggle {
    pub fn is_on(self) -> bool {
        self == Toggle::On
    }

    pub fn flipped(self) -> Toggle {
        match self {
            Toggle::On => Toggle::Off,
            Toggle::Off => Toggle::On,
        }
    }

    pub fn from_on(on: bool) -> Toggle {
        if on {
            Toggle::On
        } else {
            Toggle::Off
        }
    }
}

impl fmt::Display for Toggle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Toggle::On => "ON",
            Toggle::Off => "OFF",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    Fan,
    PlantLight,
    Pump,
    Autobot,
}

impl Device {
    pub const ALL: [Device; 4] = [
        Device::Fan,
        Device::PlantLight,
        Device::Pump,
        Device::Autobot,
    ];

    /// Name used by the remote update endpoint.
    pub fn wire_name(self) -> &'static str {
        match self {
            Device::Fan => "fan",
            Device::PlantLight => "plantLight",
            Device::Pump => "pump",
            Device::Autobot => "autobot",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Device::Fan => 0,
            Device::PlantLight => 1,
            Device::Pump => 2,
            Device::Autobot => 3,
        }
    }
}

/// Cached mirror of the server's authoritative device record.  Also the
/// wire shape of `GET /api/device-states`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStates {
    pub fan: Toggle,
    pub plant_light: Toggle,
    pub pump: Toggle,
    pub autobot: Toggle,
}

impl Default for DeviceStates {
    fn default() -> Self {
        Self {
            fan: Toggle::Off,
            plant_light: Toggle::Off,
            pump: Toggle::Off,
            autobot: Toggle::Off,
        }
    }
}

impl DeviceStates {
    pub fn get(&self, device: Device) -> Toggle {
        match device {
            Device::Fan => self.fan,
            Device::PlantLight => self.plant_light,
            Device::Pump => self.pump,
            Device::Autobot => self.autobot,
        }
    }

    pub fn set(&mut self, device: Device, state: Toggle) {
        match device {
            Device::Fan => self.fan = state,
            Device::PlantLight => self.plant_light = state,
            Device::Pump => self.pump = state,
            Device::Autobot => self.autobot = state,
        }
    }
}

// ---------------------------------------------------------------------------
// Signals (the visual-binder subscription seam)
// ---------------------------------------------------------------------------

/// Observable outputs of the core.  The scene/UI layer subscribes and
/// maps these onto meshes, lights, and warning badges; the core never
/// knows what a subscriber does with them.
#[derive(Debug, Clone)]
pub enum Signal {
    DeviceChanged { device: Device, state: Toggle },
    WarningChanged { channel: Channel, status: RangeStatus },
    /// Automation took or released control of the room (manual controls
    /// hide while active).
    AutomationChanged { active: bool },
    /// Operator-facing warning (modal in the original UI).
    UserWarning { title: String, message: String },
}

// ---------------------------------------------------------------------------
// Event log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TwinEvent {
    pub ts: DateTime<Utc>,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Reading,
    Device,
    Scheduler,
    Warning,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// The state container
// ---------------------------------------------------------------------------

pub struct TwinState {
    pub history: SensorHistory,
    pub thresholds: WarningThresholds,
    pub light_schedule: LightSchedule,
    pub irrigation: IrrigationSchedule,
    pub devices: DeviceStates,
    /// Latest tri-state per monitored channel, absent until first
    /// post-warmup evaluation.
    pub warnings: HashMap<Channel, RangeStatus>,
    pub events: VecDeque<TwinEvent>,
}

impl TwinState {
    pub fn new() -> Self {
        Self {
            history: SensorHistory::default(),
            thresholds: WarningThresholds::default(),
            light_schedule: LightSchedule::default(),
            irrigation: IrrigationSchedule::default(),
            devices: DeviceStates::default(),
            warnings: HashMap::new(),
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    /// Record a device state change.
    pub fn record_device(&mut self, device: Device, state: Toggle) {
        self.devices.set(device, state);
        self.push_event(
            EventKind::Device,
            format!("{} set {state}", device.wire_name()),
        );
    }

    /// Record a threshold evaluation outcome.  Only transitions are
    /// logged; the current status is always updated.
    pub fn record_warning(&mut self, channel: Channel, status: RangeStatus) {
        let prev = self.warnings.insert(channel, status);
        if prev != Some(status) {
            self.push_event(
                EventKind::Warning,
                format!("{} {status:?}", channel.label()),
            );
        }
    }

    pub fn record_reading(&mut self, detail: String) {
        self.push_event(EventKind::Reading, detail);
    }

    pub fn record_scheduler(&mut self, detail: String) {
        self.push_event(EventKind::Scheduler, detail);
    }

    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Most recent events, newest first.
    pub fn recent_events(&self, n: usize) -> impl Iterator<Item = &TwinEvent> {
        self.events.iter().rev().take(n)
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(TwinEvent {
            ts: Utc::now(),
            kind,
            detail,
        });
    }
}

impl Default for TwinState {
    fn default() -> Self {
        Self::new()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(ts: i64, value: f64) -> SensorReading {
        SensorReading { ts, value }
    }

    // -- Ring buffer bound ------------------------------------------------

    #[test]
    fn history_keeps_last_120_pushes_in_order() {
        let mut h = SensorHistory::default();
        for i in 0..150 {
            h.push(Channel::Temperature, reading(i, i as f64));
        }
        assert_eq!(h.len(Channel::Temperature), HISTORY_CAP);
        let values: Vec<f64> = h.readings(Channel::Temperature).map(|r| r.value).collect();
        let expected: Vec<f64> = (30..150).map(|i| i as f64).collect();
        assert_eq!(values, expected);
    }

    #[test]
    fn history_under_cap_keeps_everything() {
        let mut h = SensorHistory::default();
        for i in 0..5 {
            h.push(Channel::Co2, reading(i, 600.0 + i as f64));
        }
        assert_eq!(h.len(Channel::Co2), 5);
        assert_eq!(h.latest(Channel::Co2), Some(reading(4, 604.0)));
    }

    #[test]
    fn history_replace_is_wholesale() {
        let mut h = SensorHistory::default();
        h.push(Channel::Humidity, reading(1, 50.0));
        h.replace(Channel::Humidity, vec![reading(10, 60.0), reading(11, 61.0)]);
        let values: Vec<f64> = h.readings(Channel::Humidity).map(|r| r.value).collect();
        assert_eq!(values, vec![60.0, 61.0]);
    }

    #[test]
    fn history_replace_truncates_to_most_recent_cap() {
        let mut h = SensorHistory::default();
        let big: Vec<SensorReading> = (0..200).map(|i| reading(i, i as f64)).collect();
        h.replace(Channel::Moisture, big);
        assert_eq!(h.len(Channel::Moisture), HISTORY_CAP);
        assert_eq!(h.latest(Channel::Moisture), Some(reading(199, 199.0)));
        assert_eq!(
            h.readings(Channel::Moisture).next().copied(),
            Some(reading(80, 80.0))
        );
    }

    #[test]
    fn history_channels_are_independent() {
        let mut h = SensorHistory::default();
        h.push(Channel::Temperature, reading(1, 21.0));
        assert!(h.is_empty(Channel::Humidity));
        assert_eq!(h.len(Channel::Temperature), 1);
    }

    // -- Threshold tri-state ----------------------------------------------

    #[test]
    fn evaluate_above_high_is_high() {
        assert_eq!(RangeStatus::evaluate(24.0, 20.0, 23.0), RangeStatus::High);
    }

    #[test]
    fn evaluate_below_low_is_low() {
        assert_eq!(RangeStatus::evaluate(19.0, 20.0, 23.0), RangeStatus::Low);
    }

    #[test]
    fn evaluate_inside_is_normal() {
        assert_eq!(RangeStatus::evaluate(21.5, 20.0, 23.0), RangeStatus::Normal);
    }

    #[test]
    fn evaluate_bounds_are_exclusive() {
        // Equality with either bound does not trigger a warning.
        assert_eq!(RangeStatus::evaluate(23.0, 20.0, 23.0), RangeStatus::Normal);
        assert_eq!(RangeStatus::evaluate(20.0, 20.0, 23.0), RangeStatus::Normal);
    }

    #[test]
    fn evaluate_inverted_bounds_does_not_panic() {
        // high < low is a possible input, not a crash.
        assert_eq!(RangeStatus::evaluate(25.0, 30.0, 20.0), RangeStatus::High);
        assert_eq!(RangeStatus::evaluate(10.0, 30.0, 20.0), RangeStatus::Low);
    }

    #[test]
    fn evaluate_nan_bounds_yield_normal() {
        assert_eq!(
            RangeStatus::evaluate(21.0, f64::NAN, f64::NAN),
            RangeStatus::Normal
        );
    }

    #[test]
    fn bounds_only_for_monitored_channels() {
        let t = WarningThresholds::default();
        assert_eq!(t.bounds(Channel::Temperature), Some((20.0, 23.0)));
        assert_eq!(t.bounds(Channel::Co2), Some((580.0, 620.0)));
        assert_eq!(t.bounds(Channel::SoilEc), None);
        assert_eq!(t.bounds(Channel::AtmosphericPress), None);
        assert_eq!(t.bounds(Channel::PoreEc), None);
    }

    // -- Light schedule ----------------------------------------------------

    fn schedule(sh: u8, sm: u8, eh: u8, em: u8) -> LightSchedule {
        LightSchedule {
            start: TimeOfDay::new(sh, sm),
            end: TimeOfDay::new(eh, em),
        }
    }

    fn minutes(h: u16, m: u16) -> u16 {
        h * 60 + m
    }

    #[test]
    fn same_day_span_start_inclusive_end_exclusive() {
        let s = schedule(8, 0, 20, 0);
        assert!(s.should_be_on(minutes(8, 0)));
        assert!(s.should_be_on(minutes(12, 0)));
        assert!(!s.should_be_on(minutes(20, 0)));
        assert!(!s.should_be_on(minutes(7, 59)));
    }

    #[test]
    fn overnight_span_wraps_past_midnight() {
        let s = schedule(23, 0, 6, 0);
        assert!(s.should_be_on(minutes(23, 30)));
        assert!(s.should_be_on(minutes(5, 0)));
        assert!(!s.should_be_on(minutes(12, 0)));
        assert!(!s.should_be_on(minutes(6, 0)));
    }

    #[test]
    fn unconfigured_sentinel_detection() {
        assert!(LightSchedule::default().is_unconfigured());
        assert!(schedule(8, 10, 23, 50).is_unconfigured());
        assert!(!schedule(8, 11, 23, 50).is_unconfigured());
    }

    // -- Devices ------------------------------------------------------------

    #[test]
    fn toggle_wire_form_round_trips() {
        assert_eq!(serde_json::to_string(&Toggle::On).unwrap(), "\"ON\"");
        let t: Toggle = serde_json::from_str("\"OFF\"").unwrap();
        assert_eq!(t, Toggle::Off);
    }

    #[test]
    fn device_states_wire_keys_are_camel_case() {
        let json = r#"{"fan":"ON","plantLight":"OFF","pump":"ON","autobot":"OFF"}"#;
        let d: DeviceStates = serde_json::from_str(json).unwrap();
        assert_eq!(d.fan, Toggle::On);
        assert_eq!(d.plant_light, Toggle::Off);
        assert_eq!(d.pump, Toggle::On);
        assert_eq!(d.autobot, Toggle::Off);
    }

    #[test]
    fn device_get_set_round_trip() {
        let mut d = DeviceStates::default();
        for dev in Device::ALL {
            d.set(dev, Toggle::On);
            assert_eq!(d.get(dev), Toggle::On);
        }
    }

    // -- Event ring ----------------------------------------------------------

    #[test]
    fn event_ring_is_bounded() {
        let mut st = TwinState::new();
        for i in 0..250 {
            st.record_system(format!("event {i}"));
        }
        assert_eq!(st.events.len(), 200);
        assert_eq!(st.events.back().unwrap().detail, "event 249");
        assert_eq!(st.events.front().unwrap().detail, "event 50");
    }

    #[test]
    fn warning_events_only_on_transition() {
        let mut st = TwinState::new();
        st.record_warning(Channel::Temperature, RangeStatus::High);
        st.record_warning(Channel::Temperature, RangeStatus::High);
        st.record_warning(Channel::Temperature, RangeStatus::Normal);
        let warning_events = st
            .events
            .iter()
            .filter(|e| e.kind == EventKind::Warning)
            .count();
        assert_eq!(warning_events, 2);
        assert_eq!(
            st.warnings.get(&Channel::Temperature),
            Some(&RangeStatus::Normal)
        );
    }

    #[test]
    fn metric_code_table_round_trips() {
        for ch in Channel::ALL {
            assert_eq!(Channel::from_metric_code(ch.metric_code()), Some(ch));
        }
        assert_eq!(Channel::from_metric_code("99"), None);
    }
}
