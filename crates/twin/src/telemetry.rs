//! Telemetry poller: fetches the combined sensor payload on a fixed
//! cadence, maintains the bounded history buffers, and drives threshold
//! evaluation.
//!
//! A failed poll is logged and skipped; no state is mutated and no retry
//! is scheduled outside the normal interval.  Threshold-driven side
//! effects (warning flags and signals — not the raw history recording)
//! are suppressed for a warm-up window after the first successful poll so
//! the scene does not flash transient warnings while it is still
//! initializing.

use chrono::Utc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::api::{DataPayload, FarmApi};
use crate::state::{
    Channel, RangeStatus, SensorReading, SharedState, Signal, SignalTx,
};

pub struct TelemetryPoller<A: FarmApi> {
    api: A,
    state: SharedState,
    signals: SignalTx,
    warmup: Duration,
    /// Set after the first successful poll; visuals go live once passed.
    visuals_live_at: Option<Instant>,
}

impl<A: FarmApi> TelemetryPoller<A> {
    pub fn new(api: A, state: SharedState, signals: SignalTx, warmup: Duration) -> Self {
        Self {
            api,
            state,
            signals,
            warmup,
            visuals_live_at: None,
        }
    }

    /// Poll loop.  Intended to be `tokio::spawn`-ed; first poll fires
    /// immediately.
    pub async fn run(mut self, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        info!(every_sec = every.as_secs(), "telemetry poller started");
        loop {
            ticker.tick().await;
            if let Err(e) = self.poll_once().await {
                error!("telemetry poll failed: {e:#}");
                let mut st = self.state.write().await;
                st.record_error(format!("telemetry poll failed: {e:#}"));
            }
        }
    }

    /// One fetch-and-apply cycle.
    pub async fn poll_once(&mut self) -> anyhow::Result<()> {
        let payload = self.api.fetch_data().await?;

        match &payload.last_camera_shot {
            Some(shot) => debug!(
                available = shot.image_url.is_some(),
                timestamp = shot.timestamp.as_deref().unwrap_or("-"),
                "camera shot in payload"
            ),
            None => debug!("no camera data in response"),
        }

        let visuals_live = match self.visuals_live_at {
            Some(at) => Instant::now() >= at,
            None => {
                self.visuals_live_at = Some(Instant::now() + self.warmup);
                false
            }
        };

        let now_ts = Utc::now().timestamp();
        let mut st = self.state.write().await;
        apply_payload(&mut st, &payload, now_ts, visuals_live, &self.signals);
        Ok(())
    }
}

/// Merge one telemetry payload into the twin state.
///
/// Server-supplied history arrays replace the channel buffer wholesale;
/// latest scalar readings are rounded to the channel's display precision,
/// pushed onto the ring buffer, and (once `visuals_live`) re-evaluated
/// against the warning bounds.
pub fn apply_payload(
    st: &mut crate::state::TwinState,
    payload: &DataPayload,
    now_ts: i64,
    visuals_live: bool,
    signals: &SignalTx,
) {
    for channel in Channel::ALL {
        if let Some(points) = payload.history_for(channel) {
            let readings: Vec<SensorReading> = points
                .iter()
                .filter_map(|p| {
                    Some(SensorReading {
                        ts: p.time.as_unix_seconds()?,
                        value: p.value.as_f64()?,
                    })
                })
                .collect();
            st.history.replace(channel, readings);
        }
    }

    let mut summary: Vec<String> = Vec::new();
    for channel in Channel::ALL {
        let Some(raw) = payload.latest_reading(channel) else {
            continue;
        };
        let value = round_to(raw, channel.decimals());
        st.history.push(channel, SensorReading { ts: now_ts, value });
        summary.push(format!("{}={value}{}", channel.label(), channel.unit()));

        if visuals_live {
            if let Some((low, high)) = st.thresholds.bounds(channel) {
                let status = RangeStatus::evaluate(value, low, high);
                st.record_warning(channel, status);
                let _ = signals.send(Signal::WarningChanged { channel, status });
            }
        }
    }

    if !summary.is_empty() {
        st.record_reading(summary.join(", "));
    }
}

/// Round to a fixed number of decimal places.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{new_shared, TwinState};
    use crate::testutil::MockApi;
    use serde_json::json;

    fn payload(v: serde_json::Value) -> DataPayload {
        serde_json::from_value(v).unwrap()
    }

    fn signals() -> (SignalTx, tokio::sync::broadcast::Receiver<Signal>) {
        let (tx, rx) = tokio::sync::broadcast::channel(64);
        (tx, rx)
    }

    // -- Rounding ----------------------------------------------------------

    #[test]
    fn rounding_matches_channel_precision() {
        assert_eq!(round_to(21.4567, Channel::Temperature.decimals()), 21.5);
        assert_eq!(round_to(64.04, Channel::Humidity.decimals()), 64.0);
        assert_eq!(round_to(1.23456, Channel::SoilEc.decimals()), 1.235);
        assert_eq!(round_to(612.7, Channel::Co2.decimals()), 613.0);
        assert_eq!(round_to(1013.4, Channel::AtmosphericPress.decimals()), 1013.0);
    }

    // -- Applying payloads ---------------------------------------------------

    #[test]
    fn latest_readings_are_rounded_and_pushed() {
        let mut st = TwinState::new();
        let (tx, _rx) = signals();
        let p = payload(json!({
            "sensor1": { "readings": [
                { "metric": "1", "value": "21.46" },
                { "metric": "2", "value": 64.04 }
            ] },
            "sensor2": { "readings": [ { "metric": "10", "value": "1.2344" } ] },
            "sensor3": { "readings": [ { "metric": "3", "value": 612.7 } ] }
        }));

        apply_payload(&mut st, &p, 1000, true, &tx);

        assert_eq!(st.history.latest(Channel::Temperature).unwrap().value, 21.5);
        assert_eq!(st.history.latest(Channel::Humidity).unwrap().value, 64.0);
        assert_eq!(st.history.latest(Channel::SoilEc).unwrap().value, 1.234);
        assert_eq!(st.history.latest(Channel::Co2).unwrap().value, 613.0);
        assert!(st.history.is_empty(Channel::Moisture));
    }

    #[test]
    fn history_arrays_replace_wholesale() {
        let mut st = TwinState::new();
        let (tx, _rx) = signals();
        st.history.push(
            Channel::Temperature,
            SensorReading { ts: 1, value: 99.0 },
        );

        let p = payload(json!({
            "tempHistory": [
                { "time": 100, "value": 20.5 },
                { "time": 130, "value": 20.7 }
            ]
        }));
        apply_payload(&mut st, &p, 1000, true, &tx);

        let values: Vec<f64> = st
            .history
            .readings(Channel::Temperature)
            .map(|r| r.value)
            .collect();
        assert_eq!(values, vec![20.5, 20.7]);
    }

    #[test]
    fn malformed_history_entries_are_dropped() {
        let mut st = TwinState::new();
        let (tx, _rx) = signals();
        let p = payload(json!({
            "co2History": [
                { "time": 100, "value": 600.0 },
                { "time": "not a time", "value": 610.0 },
                { "time": 160, "value": "garbage" }
            ]
        }));
        apply_payload(&mut st, &p, 1000, true, &tx);
        assert_eq!(st.history.len(Channel::Co2), 1);
    }

    #[test]
    fn unparseable_latest_reading_skips_the_channel() {
        let mut st = TwinState::new();
        let (tx, _rx) = signals();
        let p = payload(json!({
            "sensor1": { "readings": [ { "metric": "1", "value": "n/a" } ] }
        }));
        apply_payload(&mut st, &p, 1000, true, &tx);
        assert!(st.history.is_empty(Channel::Temperature));
        assert!(st.warnings.is_empty());
    }

    #[test]
    fn warnings_evaluated_when_visuals_live() {
        let mut st = TwinState::new();
        let (tx, mut rx) = signals();
        // Default bounds: temp 20..23.
        let p = payload(json!({
            "sensor1": { "readings": [ { "metric": "1", "value": 24.3 } ] }
        }));
        apply_payload(&mut st, &p, 1000, true, &tx);

        assert_eq!(
            st.warnings.get(&Channel::Temperature),
            Some(&RangeStatus::High)
        );
        match rx.try_recv().unwrap() {
            Signal::WarningChanged { channel, status } => {
                assert_eq!(channel, Channel::Temperature);
                assert_eq!(status, RangeStatus::High);
            }
            other => panic!("unexpected signal: {other:?}"),
        }
    }

    #[test]
    fn warmup_suppresses_warnings_but_not_history() {
        let mut st = TwinState::new();
        let (tx, mut rx) = signals();
        let p = payload(json!({
            "sensor1": { "readings": [ { "metric": "1", "value": 35.0 } ] }
        }));
        apply_payload(&mut st, &p, 1000, false, &tx);

        // History recorded, warning side effects suppressed.
        assert_eq!(st.history.len(Channel::Temperature), 1);
        assert!(st.warnings.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn channels_without_bounds_never_warn() {
        let mut st = TwinState::new();
        let (tx, mut rx) = signals();
        let p = payload(json!({
            "sensor2": { "readings": [ { "metric": "10", "value": 9.9 } ] },
            "sensor3": { "readings": [ { "metric": "4", "value": 1013 } ] }
        }));
        apply_payload(&mut st, &p, 1000, true, &tx);
        assert!(st.warnings.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn reading_event_recorded_once_per_poll() {
        let mut st = TwinState::new();
        let (tx, _rx) = signals();
        let p = payload(json!({
            "sensor1": { "readings": [
                { "metric": "1", "value": 21.0 },
                { "metric": "2", "value": 64.0 }
            ] }
        }));
        apply_payload(&mut st, &p, 1000, true, &tx);
        let reading_events = st
            .events
            .iter()
            .filter(|e| e.kind == crate::state::EventKind::Reading)
            .count();
        assert_eq!(reading_events, 1);
    }

    // -- Poller behaviour -----------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn first_poll_suppresses_then_window_elapses() {
        let api = MockApi::default();
        *api.inner.data.lock().unwrap() = payload(json!({
            "sensor1": { "readings": [ { "metric": "1", "value": 30.0 } ] }
        }));
        let (state, tx) = new_shared();
        let mut poller = TelemetryPoller::new(
            api,
            state.clone(),
            tx,
            Duration::from_secs(10),
        );

        poller.poll_once().await.unwrap();
        assert!(state.read().await.warnings.is_empty());

        // Still inside the warm-up window.
        tokio::time::advance(Duration::from_secs(5)).await;
        poller.poll_once().await.unwrap();
        assert!(state.read().await.warnings.is_empty());

        // Window elapsed: warnings go live.
        tokio::time::advance(Duration::from_secs(6)).await;
        poller.poll_once().await.unwrap();
        assert_eq!(
            state.read().await.warnings.get(&Channel::Temperature),
            Some(&RangeStatus::High)
        );
    }

    #[tokio::test]
    async fn failed_poll_mutates_nothing_but_the_event_log() {
        let api = MockApi::default();
        api.inner
            .fail_data
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let (state, tx) = new_shared();
        let mut poller =
            TelemetryPoller::new(api, state.clone(), tx, Duration::from_secs(10));

        assert!(poller.poll_once().await.is_err());
        let st = state.read().await;
        for ch in Channel::ALL {
            assert!(st.history.is_empty(ch));
        }
        assert!(st.warnings.is_empty());
    }
}
