//! Application-wide constants and compile-time configuration.
//!
//! All timing parameters, capacities and protocol constants live here
//! so they can be tuned in one place.

use crate::sensor::NotifyGate;

// Identity

/// GAP device name, also published in the advertising packet.
pub const DEVICE_NAME: &str = "Nordic_MD612";

// Advertising

/// Fast advertising interval (in 0.625 ms units). 40 = 25 ms.
pub const ADV_FAST_INTERVAL: u16 = 0x0028;

/// Fast advertising duration (seconds).
pub const ADV_FAST_TIMEOUT_SECS: u16 = 30;

/// Slow advertising interval (in 0.625 ms units). 3200 = 2 s.
pub const ADV_SLOW_INTERVAL: u16 = 0x0C80;

/// Slow advertising duration (seconds).
pub const ADV_SLOW_TIMEOUT_SECS: u16 = 180;

/// High-duty directed advertising runs for a fixed 1.28 s in the
/// controller; the interval field is ignored for it.
pub const ADV_DIRECTED_TIMEOUT_MS: u16 = 1280;

/// Whether advertising may use the whitelist filter at all.
pub const ADV_WHITELIST_ENABLED: bool = true;

/// Whether a disconnect is followed by directed advertising to the
/// last bonded peer.
pub const ADV_DIRECTED_ENABLED: bool = true;

// Bonding

/// Radio whitelist capacity (BLE_GAP_WHITELIST_ADDR_MAX_COUNT).
pub const WHITELIST_CAPACITY: usize = 8;

/// Bonding records kept in flash. Matches the whitelist so every bond
/// can be filtered on.
pub const MAX_BONDS: usize = WHITELIST_CAPACITY;

/// Perform bonding (store keys).
pub const SEC_PARAM_BOND: bool = true;
/// Man-in-the-middle protection.
pub const SEC_PARAM_MITM: bool = false;
/// LE Secure Connections.
pub const SEC_PARAM_LESC: bool = false;
/// Keypress notifications.
pub const SEC_PARAM_KEYPRESS: bool = false;
/// Out-of-band data available.
pub const SEC_PARAM_OOB: bool = false;
/// Minimum encryption key size (octets).
pub const SEC_PARAM_MIN_KEY_SIZE: u8 = 7;
/// Maximum encryption key size (octets).
pub const SEC_PARAM_MAX_KEY_SIZE: u8 = 16;

// Connection parameters

/// Preferred minimum connection interval (in 1.25 ms units). 6 = 7.5 ms.
pub const MIN_CONN_INTERVAL: u16 = 6;

/// Preferred maximum connection interval (in 1.25 ms units). 12 = 15 ms.
pub const MAX_CONN_INTERVAL: u16 = 12;

/// Slave latency (connection events the peripheral may skip).
pub const SLAVE_LATENCY: u16 = 20;

/// Supervision timeout (in 10 ms units). 300 = 3 s.
pub const CONN_SUP_TIMEOUT: u16 = 300;

/// Delay from connect to the first parameter update request (ms).
pub const FIRST_CONN_PARAMS_UPDATE_DELAY_MS: u32 = 5_000;

/// Delay between subsequent parameter update requests (ms).
pub const NEXT_CONN_PARAMS_UPDATE_DELAY_MS: u32 = 30_000;

/// Update requests sent before giving up.
pub const MAX_CONN_PARAMS_UPDATE_COUNT: u8 = 3;

/// ATT MTU this server answers an exchange request with.
pub const ATT_MTU_DEFAULT: u16 = 23;

// GATT

/// Vendor-specific base UUID, little-endian; bytes 12..14 carry the
/// 16-bit alias.
pub const MD612_BASE_UUID: [u8; 16] = [
    0x23, 0xD1, 0x13, 0xEF, 0x5F, 0x78, 0x23, 0x15, 0xDE, 0xEF, 0x12, 0x12, 0x00, 0x00, 0x00, 0x00,
];

/// Orientation service alias.
pub const MD612_SERVICE_UUID: u16 = 0xF00D;
/// Per-axis characteristic aliases.
pub const MD612_X_UUID: u16 = 0xACCE;
pub const MD612_Y_UUID: u16 = 0xBEEF;
pub const MD612_Z_UUID: u16 = 0xCEEF;
/// Yaw-rate characteristic alias. Reserved in the schema, never notified.
pub const MD612_YAWR_UUID: u16 = 0xDEEF;

/// Which connection state lets orientation samples through.
pub const NOTIFY_GATE: NotifyGate = NotifyGate::Connected;

// Battery

/// Simulated battery level range (percent).
pub const BATTERY_LEVEL_MIN: u8 = 81;
pub const BATTERY_LEVEL_MAX: u8 = 100;

/// Simulated battery level step per measurement.
pub const BATTERY_LEVEL_INCREMENT: u8 = 1;

/// Battery measurement period (ms).
pub const BATTERY_LEVEL_MEAS_INTERVAL_MS: u32 = 2_000;

// Scheduler

/// Deferred-event queue depth.
pub const SCHED_QUEUE_SIZE: usize = 10;

/// Orientation samples buffered between the driver and the main loop.
pub const SAMPLE_QUEUE_SIZE: usize = 4;

// GPIO pin assignments (PCA10040 defaults)
//
//   Button 1 (sleep / disconnect)       → P0.13
//   Button 2 (whitelist off / erase)    → P0.14
//   LED 1 (advertising)                 → P0.17
//   LED 2 (connected)                   → P0.18
//
// Pins are taken by type in `main.rs`; adjust there for a custom PCB.

/// Button debounce time (ms).
pub const BUTTON_DEBOUNCE_MS: u64 = 50;

/// Hold time that turns a press into a long press (ms).
pub const BUTTON_LONG_PRESS_MS: u64 = 1_000;

// Storage

/// Flash page size on nRF52832 (bytes).
pub const FLASH_PAGE_SIZE: u32 = 4096;

/// Start of the bond store (two pages right below the bootloader area).
pub const BOND_STORE_START: u32 = 0x0007_A000;

/// End of the bond store (exclusive).
pub const BOND_STORE_END: u32 = BOND_STORE_START + 2 * FLASH_PAGE_SIZE;
