//! GATT schema on the SoftDevice.
//!
//! Orientation service (vendor base UUID, alias 0xF00D) with one
//! characteristic per quaternion axis plus the reserved yaw-rate slot,
//! and the Battery Service. Characteristic values are 2-byte Q2.14
//! little-endian ([`crate::sensor::to_wire`]).

use heapless::Vec;
use nrf_softdevice::ble::gatt_server::NotifyValueError;
use nrf_softdevice::ble::Connection;
use nrf_softdevice::{gatt_server, gatt_service, RawError};

use crate::ble::gatt::ORIENTATION_VALUE_LEN;
use crate::ble::{Attribute, BleEvent, ConnHandle};
use crate::config::{MD612_X_UUID, MD612_Y_UUID, MD612_Z_UUID};
use crate::error::{NotifyError, RadioError};

type AxisValue = [u8; ORIENTATION_VALUE_LEN];

#[gatt_service(uuid = "0000F00D-1212-EFDE-1523-785FEF13D123")]
pub struct OrientationService {
    #[characteristic(uuid = "0000ACCE-1212-EFDE-1523-785FEF13D123", read, write, notify)]
    x: AxisValue,

    #[characteristic(uuid = "0000BEEF-1212-EFDE-1523-785FEF13D123", read, write, notify)]
    y: AxisValue,

    #[characteristic(uuid = "0000CEEF-1212-EFDE-1523-785FEF13D123", read, write, notify)]
    z: AxisValue,

    #[characteristic(uuid = "0000DEEF-1212-EFDE-1523-785FEF13D123", read, notify)]
    yawr: AxisValue,
}

#[gatt_service(uuid = "180f")]
pub struct BatteryService {
    #[characteristic(uuid = "2a19", read, notify)]
    battery_level: u8,
}

#[gatt_server]
pub struct Server {
    orientation: OrientationService,
    bas: BatteryService,
}

impl Server {
    /// Notify `attribute` on `conn`.
    pub fn notify(
        &self,
        conn: &Connection,
        attribute: Attribute,
        value: &[u8],
    ) -> Result<(), NotifyError> {
        let sent = match attribute {
            Attribute::OrientationX => self.orientation.x_notify(conn, &axis(value)?),
            Attribute::OrientationY => self.orientation.y_notify(conn, &axis(value)?),
            Attribute::OrientationZ => self.orientation.z_notify(conn, &axis(value)?),
            Attribute::BatteryLevel => self.bas.battery_level_notify(conn, &level(value)?),
        };
        sent.map_err(notify_error)
    }

    /// Update the local value of `attribute`.
    pub fn set_value(&self, attribute: Attribute, value: &[u8]) -> Result<(), RadioError> {
        let set = match attribute {
            Attribute::OrientationX => self.orientation.x_set(&axis(value).map_err(invalid)?),
            Attribute::OrientationY => self.orientation.y_set(&axis(value).map_err(invalid)?),
            Attribute::OrientationZ => self.orientation.z_set(&axis(value).map_err(invalid)?),
            Attribute::BatteryLevel => self.bas.battery_level_set(&level(value).map_err(invalid)?),
        };
        set.map_err(|e| {
            warn!("gatt: set {} failed: {:?}", attribute, e);
            RadioError::InvalidState
        })
    }
}

/// Translate a server event into the radio vocabulary.
pub fn to_ble_event(handle: ConnHandle, event: ServerEvent) -> Option<BleEvent> {
    let cccd = |attribute, notifications| BleEvent::CccdWrite {
        handle,
        attribute,
        notifications,
    };
    let write = |uuid, value: AxisValue| BleEvent::Write {
        handle,
        uuid,
        value: Vec::from_slice(&value).unwrap_or_default(),
    };

    let event = match event {
        ServerEvent::Orientation(e) => match e {
            OrientationServiceEvent::XCccdWrite { notifications } => {
                cccd(Attribute::OrientationX, notifications)
            }
            OrientationServiceEvent::YCccdWrite { notifications } => {
                cccd(Attribute::OrientationY, notifications)
            }
            OrientationServiceEvent::ZCccdWrite { notifications } => {
                cccd(Attribute::OrientationZ, notifications)
            }
            OrientationServiceEvent::XWrite(v) => write(MD612_X_UUID, v),
            OrientationServiceEvent::YWrite(v) => write(MD612_Y_UUID, v),
            OrientationServiceEvent::ZWrite(v) => write(MD612_Z_UUID, v),
            OrientationServiceEvent::YawrCccdWrite { .. } => return None,
        },
        ServerEvent::Bas(BatteryServiceEvent::BatteryLevelCccdWrite { notifications }) => {
            cccd(Attribute::BatteryLevel, notifications)
        }
    };
    Some(event)
}

fn axis(value: &[u8]) -> Result<AxisValue, NotifyError> {
    value.try_into().map_err(|_| NotifyError::InvalidState)
}

fn level(value: &[u8]) -> Result<u8, NotifyError> {
    value.first().copied().ok_or(NotifyError::InvalidState)
}

fn invalid(_: NotifyError) -> RadioError {
    RadioError::InvalidState
}

/// Back-pressure from the SoftDevice keeps its own variants so the
/// pipeline can drop it silently.
pub fn notify_error(e: NotifyValueError) -> NotifyError {
    match e {
        NotifyValueError::Disconnected => NotifyError::InvalidState,
        NotifyValueError::Raw(RawError::Resources) => NotifyError::NoTxPackets,
        NotifyValueError::Raw(RawError::BleGattsSysAttrMissing) => NotifyError::SysAttrMissing,
        NotifyValueError::Raw(RawError::InvalidState) => NotifyError::InvalidState,
        NotifyValueError::Raw(raw) => NotifyError::Raw(raw as u32),
    }
}
