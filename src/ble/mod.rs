//! Bluetooth Low Energy subsystem.
//!
//! The device runs the SoftDevice in **Peripheral** role with a single
//! link. This module holds the radio-facing vocabulary:
//!
//! 1. **Events** ([`BleEvent`]) - what the radio stack reports, deferred
//!    through the scheduler queue.
//! 2. **Commands** ([`Radio`]) - what handlers may ask of the stack:
//!    advertise, disconnect, notify, reply to requests.
//! 3. **Handlers** - the advertising controller, the connection
//!    lifecycle dispatcher and the connection-parameter negotiator.

pub mod advertising;
pub mod conn_params;
pub mod connection;
pub mod gatt;

use heapless::Vec;

use crate::error::{NotifyError, RadioError};
use advertising::AdvParams;

/// HCI reason "remote user terminated connection".
pub const HCI_REMOTE_USER_TERMINATED_CONNECTION: u8 = 0x13;

/// Largest characteristic write we keep for logging (default MTU - 3).
pub const WRITE_VALUE_MAX: usize = 20;

/// SoftDevice connection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnHandle(pub u16);

impl ConnHandle {
    /// "No connection" sentinel (BLE_CONN_HANDLE_INVALID).
    pub const INVALID: ConnHandle = ConnHandle(0xFFFF);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

/// GAP connection parameters, in SoftDevice units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnParams {
    /// Minimum connection interval (1.25 ms units).
    pub min_interval: u16,
    /// Maximum connection interval (1.25 ms units).
    pub max_interval: u16,
    /// Slave latency (connection events).
    pub slave_latency: u16,
    /// Supervision timeout (10 ms units).
    pub supervision_timeout: u16,
}

/// Attributes of the exposed GATT schema that the device writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Attribute {
    OrientationX,
    OrientationY,
    OrientationZ,
    BatteryLevel,
}

/// Write operation carried by an authorization request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WriteOp {
    Invalid,
    Request,
    Command,
    SignedCommand,
    PrepareRequest,
    ExecuteCancel,
    ExecuteNow,
}

impl WriteOp {
    /// Queued ("long") write operations, which this server does not
    /// implement.
    pub fn is_queued(self) -> bool {
        matches!(
            self,
            WriteOp::PrepareRequest | WriteOp::ExecuteCancel | WriteOp::ExecuteNow
        )
    }
}

/// Read/write authorization request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AuthorizeRequest {
    Read,
    Write(WriteOp),
    Invalid,
}

/// Reply to an authorization request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AuthorizeReply {
    Read { status: u16 },
    Write { status: u16 },
}

/// Events reported by the radio stack.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BleEvent {
    /// A central connected; `params` are the ones it chose.
    Connected { handle: ConnHandle, params: ConnParams },
    /// The link went down.
    Disconnected { handle: ConnHandle, reason: u8 },
    /// A GATT client procedure timed out.
    GattClientTimeout { handle: ConnHandle },
    /// A GATT server procedure timed out.
    GattServerTimeout { handle: ConnHandle },
    /// The peer asked for a user memory block (queued writes).
    UserMemRequest { handle: ConnHandle },
    /// The peer requires authorization for a read or write.
    RwAuthorizeRequest { handle: ConnHandle, request: AuthorizeRequest },
    /// The peer started an ATT MTU exchange.
    ExchangeMtuRequest { handle: ConnHandle, client_mtu: u16 },
    /// The peer wrote a characteristic value.
    Write {
        handle: ConnHandle,
        uuid: u16,
        value: Vec<u8, WRITE_VALUE_MAX>,
    },
    /// The peer changed a notification subscription.
    CccdWrite {
        handle: ConnHandle,
        attribute: Attribute,
        notifications: bool,
    },
    /// Connection parameters changed.
    ConnParamUpdate { handle: ConnHandle, params: ConnParams },
    /// The current advertising phase ran out without a connection.
    AdvertisingTimeout,
}

impl BleEvent {
    /// Connection this event belongs to, if any.
    pub fn handle(&self) -> Option<ConnHandle> {
        match self {
            BleEvent::Connected { handle, .. }
            | BleEvent::Disconnected { handle, .. }
            | BleEvent::GattClientTimeout { handle }
            | BleEvent::GattServerTimeout { handle }
            | BleEvent::UserMemRequest { handle }
            | BleEvent::RwAuthorizeRequest { handle, .. }
            | BleEvent::ExchangeMtuRequest { handle, .. }
            | BleEvent::Write { handle, .. }
            | BleEvent::CccdWrite { handle, .. }
            | BleEvent::ConnParamUpdate { handle, .. } => Some(*handle),
            BleEvent::AdvertisingTimeout => None,
        }
    }
}

/// Command sink of the radio stack.
///
/// Every method is non-blocking: the target implementation either calls
/// straight into the SoftDevice or hands the request to the radio task.
pub trait Radio {
    /// Start (or restart) advertising with the given parameters.
    fn start_advertising(&mut self, params: &AdvParams) -> Result<(), RadioError>;

    /// Stop advertising.
    fn stop_advertising(&mut self) -> Result<(), RadioError>;

    /// Terminate a link.
    fn disconnect(&mut self, handle: ConnHandle, reason: u8) -> Result<(), RadioError>;

    /// Send a notification for `attribute`.
    fn notify(
        &mut self,
        handle: ConnHandle,
        attribute: Attribute,
        value: &[u8],
    ) -> Result<(), NotifyError>;

    /// Update the local value of `attribute` without notifying.
    fn set_value(&mut self, attribute: Attribute, value: &[u8]) -> Result<(), RadioError>;

    /// Answer a user memory request with "no memory block".
    fn reply_user_mem(&mut self, handle: ConnHandle) -> Result<(), RadioError>;

    /// Answer an ATT MTU exchange.
    fn reply_mtu(&mut self, handle: ConnHandle, server_mtu: u16) -> Result<(), RadioError>;

    /// Answer a read/write authorization request.
    fn reply_authorize(
        &mut self,
        handle: ConnHandle,
        reply: AuthorizeReply,
    ) -> Result<(), RadioError>;

    /// Ask the central for new connection parameters.
    fn update_conn_params(
        &mut self,
        handle: ConnHandle,
        params: &ConnParams,
    ) -> Result<(), RadioError>;
}
