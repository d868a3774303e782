//! Headless state-reconciliation core for the FarmLab greenhouse digital
//! twin.
//!
//! The crate merges polled server state with optimistic local mutations,
//! drives scheduled automation (light window and irrigation pulses),
//! enforces warning thresholds, and publishes every observable decision
//! on a broadcast channel for the scene/UI layer to consume.  Rendering,
//! charting, audio, and the remote API itself are external collaborators.

pub mod api;
pub mod config;
pub mod devices;
pub mod login;
pub mod scheduler;
pub mod state;
pub mod stores;
pub mod telemetry;

#[cfg(test)]
mod testutil;
