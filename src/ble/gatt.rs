//! Exposed GATT schema.
//!
//! One vendor service (alias 0xF00D on the MD612 base UUID) with
//! per-axis orientation characteristics, plus the standard Battery
//! Service. All values are open for read/write/notify.

use super::Attribute;
use crate::config::{
    MD612_BASE_UUID, MD612_SERVICE_UUID, MD612_X_UUID, MD612_Y_UUID, MD612_YAWR_UUID,
    MD612_Z_UUID,
};

/// ATT status: "application feature not supported"
/// (BLE_GATT_STATUS_ATTERR_APP_BEGIN + 2).
pub const GATT_STATUS_APP_FEATURE_NOT_SUPPORTED: u16 = 0x0182;

/// Battery Level characteristic (0x2A19).
pub const BATTERY_LEVEL_UUID: u16 = 0x2A19;

/// Size of one orientation characteristic value.
pub const ORIENTATION_VALUE_LEN: usize = 2;

/// Expand a 16-bit alias onto the vendor base UUID (little-endian).
pub const fn md612_uuid(alias: u16) -> [u8; 16] {
    let mut uuid = MD612_BASE_UUID;
    let le = alias.to_le_bytes();
    uuid[12] = le[0];
    uuid[13] = le[1];
    uuid
}

/// Vendor service UUID.
pub const SERVICE_UUID: [u8; 16] = md612_uuid(MD612_SERVICE_UUID);

impl Attribute {
    /// 16-bit alias of the characteristic.
    pub fn uuid(self) -> u16 {
        match self {
            Attribute::OrientationX => MD612_X_UUID,
            Attribute::OrientationY => MD612_Y_UUID,
            Attribute::OrientationZ => MD612_Z_UUID,
            Attribute::BatteryLevel => BATTERY_LEVEL_UUID,
        }
    }

    /// Reverse lookup of [`Attribute::uuid`].
    pub fn from_uuid(uuid: u16) -> Option<Self> {
        match uuid {
            MD612_X_UUID => Some(Attribute::OrientationX),
            MD612_Y_UUID => Some(Attribute::OrientationY),
            MD612_Z_UUID => Some(Attribute::OrientationZ),
            BATTERY_LEVEL_UUID => Some(Attribute::BatteryLevel),
            _ => None,
        }
    }
}

/// Whether a written UUID belongs to the orientation service.
pub fn is_orientation_uuid(uuid: u16) -> bool {
    matches!(
        uuid,
        MD612_X_UUID | MD612_Y_UUID | MD612_Z_UUID | MD612_YAWR_UUID
    )
}
