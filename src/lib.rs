//! md612-ble: orientation-streaming BLE peripheral for nRF52832.
//!
//! The library holds every state machine and policy of the firmware
//! and talks to the outside world only through port traits
//! ([`ble::Radio`], [`security::PeerManager`], [`storage::Storage`],
//! [`ui::Board`], [`scheduler::Timers`], [`power::Power`],
//! [`sensor::MotionSensor`]). That keeps it testable on the host:
//!
//! Usage: `cargo test --lib` (unit) or `cargo test` (with scenarios)
//!
//! The embedded binary (`src/main.rs`, feature `embedded`) implements
//! the ports on the SoftDevice S132 and Embassy, in [`nrf`].

#![cfg_attr(not(test), no_std)]

// Must come first: the logging macros are used by every module below.
#[macro_use]
mod fmt;

// ═══════════════════════════════════════════════════════════════════════════
// Core
// ═══════════════════════════════════════════════════════════════════════════

pub mod config;
pub mod device;
pub mod error;
pub mod power;
pub mod scheduler;

// ═══════════════════════════════════════════════════════════════════════════
// Subsystems
// ═══════════════════════════════════════════════════════════════════════════

pub mod battery;
pub mod ble;
pub mod security;
pub mod sensor;
pub mod storage;
pub mod ui;

#[cfg(feature = "embedded")]
pub mod nrf;

#[cfg(test)]
mod testing;

pub use device::{Device, Platform};
pub use error::Fatal;
pub use scheduler::{Event, EventQueue, MainLoop};
