//! Autobot automation: the light-schedule and irrigation-schedule timers
//! that drive the device state machine while autobot mode is on.
//!
//! Both timers are owned by [`Automation`], started and stopped
//! idempotently by the device reconciliation loop.  The irrigation check
//! fetches the pump schedule fresh from the server on every tick and
//! fires a pump run when the wall clock matches a trigger instant.  With
//! the default exact-instant matching, a 10-second-cadence check only
//! observes a trigger when a tick happens to land on second 0 of the
//! trigger minute — most scheduled firings are missed over a long run.
//! The historical behavior is kept as the default; a windowed
//! fire-once-per-day match is available via `pump.match_window_secs`.

use chrono::{Datelike, Local, Timelike};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::api::FarmApi;
use crate::devices::DeviceController;
use crate::state::{Device, SharedState, Signal, SignalTx, Toggle};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct AutomationConfig {
    pub light_check: Duration,
    pub irrigation_check: Duration,
    /// `0` = exact-instant trigger matching; `N` = fire within N seconds
    /// after the trigger, at most once per trigger per day.
    pub match_window_secs: u32,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            light_check: Duration::from_secs(30),
            irrigation_check: Duration::from_secs(10),
            match_window_secs: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Automation handle
// ---------------------------------------------------------------------------

struct AutomationTasks {
    light: JoinHandle<()>,
    irrigation: JoinHandle<()>,
}

#[derive(Clone)]
pub struct Automation<A: FarmApi> {
    ctrl: DeviceController<A>,
    state: SharedState,
    signals: SignalTx,
    cfg: AutomationConfig,
    tasks: Arc<Mutex<Option<AutomationTasks>>>,
    pump_running: Arc<AtomicBool>,
}

impl<A: FarmApi> Automation<A> {
    pub fn new(
        ctrl: DeviceController<A>,
        state: SharedState,
        signals: SignalTx,
        cfg: AutomationConfig,
    ) -> Self {
        Self {
            ctrl,
            state,
            signals,
            cfg,
            tasks: Arc::new(Mutex::new(None)),
            pump_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start both timers.  A no-op when already running.  Each check also
    /// fires immediately on activation.
    pub async fn start(&self) {
        let mut tasks = self.tasks.lock().await;
        if tasks.is_some() {
            return;
        }
        info!(
            light_sec = self.cfg.light_check.as_secs(),
            irrigation_sec = self.cfg.irrigation_check.as_secs(),
            match_window_secs = self.cfg.match_window_secs,
            "automation started"
        );
        {
            let mut st = self.state.write().await;
            st.record_scheduler("automation started".to_string());
        }
        let _ = self.signals.send(Signal::AutomationChanged { active: true });

        *tasks = Some(AutomationTasks {
            light: tokio::spawn(run_light_check(self.clone())),
            irrigation: tokio::spawn(run_irrigation_check(self.clone())),
        });
    }

    /// Cancel both timers.  A no-op when already stopped.  An in-flight
    /// pump run is detached and completes on its own.
    pub async fn stop(&self) {
        let mut tasks = self.tasks.lock().await;
        let Some(t) = tasks.take() else {
            return;
        };
        t.light.abort();
        t.irrigation.abort();
        info!("automation stopped");
        {
            let mut st = self.state.write().await;
            st.record_scheduler("automation stopped".to_string());
        }
        let _ = self.signals.send(Signal::AutomationChanged { active: false });
    }

    pub async fn is_active(&self) -> bool {
        self.tasks.lock().await.is_some()
    }

    fn spawn_pump_run(&self, duration_secs: u32) {
        tokio::spawn(pump_run(
            self.clone(),
            Duration::from_secs(u64::from(duration_secs)),
        ));
    }
}

// ---------------------------------------------------------------------------
// Light-schedule check
// ---------------------------------------------------------------------------

async fn run_light_check<A: FarmApi>(auto: Automation<A>) {
    let mut ticker = tokio::time::interval(auto.cfg.light_check);
    loop {
        ticker.tick().await;
        let now = Local::now();
        let now_min = (now.hour() * 60 + now.minute()) as u16;
        check_light_at(&auto, now_min).await;
    }
}

/// Compare the configured window against the wall clock and flip the
/// plant light when (and only when) a change is needed.
async fn check_light_at<A: FarmApi>(auto: &Automation<A>, now_min: u16) {
    let (autobot, schedule, current) = {
        let st = auto.state.read().await;
        (st.devices.autobot, st.light_schedule, st.devices.plant_light)
    };
    if !autobot.is_on() {
        return;
    }

    let desired = Toggle::from_on(schedule.should_be_on(now_min));
    if desired == current {
        return;
    }

    info!(desired = %desired, "plant light schedule change");
    {
        let mut st = auto.state.write().await;
        st.record_scheduler(format!("plant light -> {desired} (scheduled)"));
    }
    auto.ctrl.set_device(Device::PlantLight, desired).await;
}

// ---------------------------------------------------------------------------
// Irrigation-schedule check
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub(crate) struct Hms {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl Hms {
    fn seconds_of_day(self) -> u32 {
        u32::from(self.hour) * 3600 + u32::from(self.minute) * 60 + u32::from(self.second)
    }
}

/// Whether `now` matches a trigger instant.  With a zero window only the
/// exact first second of the trigger minute matches; otherwise any time
/// within `window_secs` after the trigger does.
pub(crate) fn trigger_matches(now: Hms, trigger: crate::state::TimeOfDay, window_secs: u32) -> bool {
    if window_secs == 0 {
        now.hour == trigger.hour && now.minute == trigger.minute && now.second == 0
    } else {
        let now_s = now.seconds_of_day();
        let trigger_s = u32::from(trigger.minutes()) * 60;
        now_s >= trigger_s && now_s - trigger_s <= window_secs
    }
}

async fn run_irrigation_check<A: FarmApi>(auto: Automation<A>) {
    let mut ticker = tokio::time::interval(auto.cfg.irrigation_check);
    let mut last_fired: [Option<i32>; 2] = [None, None];
    loop {
        ticker.tick().await;
        let now = Local::now();
        let hms = Hms {
            hour: now.hour() as u8,
            minute: now.minute() as u8,
            second: now.second() as u8,
        };
        check_irrigation(&auto, hms, now.num_days_from_ce(), &mut last_fired).await;
    }
}

/// One irrigation tick: fetch the schedule fresh, match both trigger
/// instants against the clock, and kick off a pump run on a hit.
async fn check_irrigation<A: FarmApi>(
    auto: &Automation<A>,
    now: Hms,
    today: i32,
    last_fired: &mut [Option<i32>; 2],
) {
    {
        let st = auto.state.read().await;
        if !st.devices.autobot.is_on() {
            return;
        }
    }
    if auto.pump_running.load(Ordering::SeqCst) {
        return;
    }

    // Not cached: the schedule may have been edited since the last tick.
    let schedule = match auto.ctrl.api().fetch_pump_schedule().await {
        Ok(s) => {
            let mut st = auto.state.write().await;
            st.irrigation = s;
            s
        }
        Err(e) => {
            warn!("pump schedule fetch failed: {e:#}");
            return;
        }
    };

    for (i, trigger) in [schedule.first, schedule.second].into_iter().enumerate() {
        if !trigger_matches(now, trigger, auto.cfg.match_window_secs) {
            continue;
        }
        if auto.cfg.match_window_secs > 0 && last_fired[i] == Some(today) {
            continue;
        }
        last_fired[i] = Some(today);
        info!(trigger = %trigger, secs = schedule.duration_secs, "irrigation trigger hit");
        {
            let mut st = auto.state.write().await;
            st.record_scheduler(format!(
                "irrigation trigger {trigger} hit, running pump {}s",
                schedule.duration_secs
            ));
        }
        auto.spawn_pump_run(schedule.duration_secs);
    }
}

// ---------------------------------------------------------------------------
// Pump runs
// ---------------------------------------------------------------------------

/// Run the pump for `duration`, guarded by the single in-flight flag.
///
/// ON write failure aborts without starting the timer; OFF write failure
/// is logged and the flag is still cleared — the device may be left ON
/// server-side until the next reconciliation poll resolves it.
async fn pump_run<A: FarmApi>(auto: Automation<A>, duration: Duration) {
    if auto
        .pump_running
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return; // a run is already in flight
    }

    info!(secs = duration.as_secs(), "pump run starting");

    if let Err(e) = auto.ctrl.set_device_checked(Device::Pump, Toggle::On).await {
        error!("pump ON write failed, aborting run: {e:#}");
        let mut st = auto.state.write().await;
        st.record_error("pump ON write failed, run aborted".to_string());
        drop(st);
        auto.pump_running.store(false, Ordering::SeqCst);
        return;
    }

    tokio::time::sleep(duration).await;

    match auto.ctrl.set_device_checked(Device::Pump, Toggle::Off).await {
        Ok(()) => {
            info!("pump run complete");
            let mut st = auto.state.write().await;
            st.record_scheduler("pump run complete".to_string());
        }
        Err(e) => {
            error!("pump OFF write failed: {e:#}");
            let mut st = auto.state.write().await;
            st.record_error("pump OFF write failed".to_string());
        }
    }
    auto.pump_running.store(false, Ordering::SeqCst);
}

// ===========================================================================
// Tests
// ===========================================================================
