//! TOML config file loading and validation for the kiosk.

use anyhow::{bail, Context, Result};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub poll: PollConfig,
    pub pump: PumpConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://valk-huone-1.onrender.com".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Authoritative device-state reconciliation cadence.
    pub device_state_secs: u64,
    /// Telemetry fetch cadence.
    pub telemetry_secs: u64,
    /// Light-schedule check cadence while autobot is on.
    pub light_check_secs: u64,
    /// Irrigation-schedule check cadence while autobot is on.
    pub irrigation_check_secs: u64,
    /// Warning/visual side effects are suppressed for this long after the
    /// first successful telemetry poll.
    pub warmup_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            device_state_secs: 5,
            telemetry_secs: 30,
            light_check_secs: 30,
            irrigation_check_secs: 10,
            warmup_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PumpConfig {
    /// Irrigation trigger matching window.  `0` keeps the historical
    /// exact-instant match (a check must land on second 0 of the trigger
    /// minute); `N > 0` fires within N seconds after the trigger, at most
    /// once per trigger per day.
    pub match_window_secs: u32,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            match_window_secs: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries.  Returns `Ok(())` or an error
    /// describing every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.api.base_url.trim().is_empty() {
            errors.push("api.base_url is empty".to_string());
        } else if !self.api.base_url.starts_with("http://")
            && !self.api.base_url.starts_with("https://")
        {
            errors.push(format!(
                "api.base_url '{}' must start with http:// or https://",
                self.api.base_url
            ));
        }
        if self.api.timeout_secs == 0 {
            errors.push("api.timeout_secs must be positive".to_string());
        }

        for (name, value) in [
            ("poll.device_state_secs", self.poll.device_state_secs),
            ("poll.telemetry_secs", self.poll.telemetry_secs),
            ("poll.light_check_secs", self.poll.light_check_secs),
            ("poll.irrigation_check_secs", self.poll.irrigation_check_secs),
        ] {
            if value == 0 {
                errors.push(format!("{name} must be positive"));
            }
        }

        if self.pump.match_window_secs > 3600 {
            errors.push(format!(
                "pump.match_window_secs {} exceeds one hour",
                self.pump.match_window_secs
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
