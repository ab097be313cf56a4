//! Error vocabulary for md612-ble.
//!
//! Everything here is fixed-size and `Copy` - no `alloc`. The port
//! errors describe what a collaborator (radio, peer manager, flash,
//! timers) reported; [`Fatal`] is what the device resets with.

/// Cause of a controlled reset.
///
/// Handlers return `Result<(), Fatal>`; the dispatch boundary turns an
/// `Err` into exactly one `Board::reset` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Fatal {
    // Security
    /// The peer manager reported an error outside its documented set.
    Security(PeerManagerError),

    /// Updating a single peer's stored data failed.
    PeerDataUpdate(PeerManagerError),

    /// Deleting one peer failed.
    PeerDelete(PeerManagerError),

    /// Deleting all peers failed.
    PeersDelete(PeerManagerError),

    /// Loading the bonding record (peer address) failed.
    BondingRecord(PeerManagerError),

    // Storage
    /// Flash storage failed with something other than busy/queue-full.
    Storage(StorageError),

    // Radio
    /// A radio command was refused.
    Radio(RadioError),

    /// A notification failed for a reason other than back-pressure.
    Notify(NotifyError),

    // Scheduler
    /// Events were lost because the deferred-event queue was full.
    QueueOverflow {
        /// Number of events that could not be queued.
        dropped: u32,
    },

    /// An application timer could not be armed.
    Timer(TimerError),
}

/// Errors returned by the radio stack for control commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioError {
    /// The command is not valid in the current link/advertising state.
    InvalidState,
    /// The stack is busy with a previous request.
    Busy,
    /// Raw SoftDevice error code.
    Raw(u32),
}

/// Errors returned when sending a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NotifyError {
    /// No link, or notifications not possible right now.
    InvalidState,
    /// The transmit buffer is full.
    NoTxPackets,
    /// The central has not written its CCCDs yet.
    SysAttrMissing,
    /// Raw SoftDevice error code.
    Raw(u32),
}

impl NotifyError {
    /// Back-pressure conditions that are dropped silently; a fresher
    /// value follows shortly.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            NotifyError::InvalidState | NotifyError::NoTxPackets | NotifyError::SysAttrMissing
        )
    }
}

/// Errors returned by the peer manager (bonding subsystem).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PeerManagerError {
    /// An operation for this peer is already pending.
    Busy,
    /// The link is already negotiating, or the request does not apply.
    InvalidState,
    /// No record for the requested peer.
    NotFound,
    /// The radio does not support the request (e.g. identity lists).
    NotSupported,
    /// The bond store has no room for another record.
    NoMem,
    /// Anything else, with the underlying code.
    Internal(u32),
}

/// Errors returned by persistent storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StorageError {
    /// Flash is busy with another operation.
    Busy,
    /// The flash operation queue is full.
    NoSpaceInQueues,
    /// Read/write/erase failed.
    Flash,
    /// Stored data could not be decoded.
    Corrupted,
}

impl StorageError {
    /// Conditions that resolve on their own and are retried next time.
    pub fn is_transient(self) -> bool {
        matches!(self, StorageError::Busy | StorageError::NoSpaceInQueues)
    }
}

/// Errors returned when arming an application timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerError {
    /// The timer operation queue is full.
    QueueFull,
}

// Convenience conversions

impl From<RadioError> for Fatal {
    fn from(e: RadioError) -> Self {
        Fatal::Radio(e)
    }
}

impl From<NotifyError> for Fatal {
    fn from(e: NotifyError) -> Self {
        Fatal::Notify(e)
    }
}

impl From<StorageError> for Fatal {
    fn from(e: StorageError) -> Self {
        Fatal::Storage(e)
    }
}

impl From<TimerError> for Fatal {
    fn from(e: TimerError) -> Self {
        Fatal::Timer(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notify_back_pressure_is_transient() {
        assert!(NotifyError::NoTxPackets.is_transient());
        assert!(NotifyError::SysAttrMissing.is_transient());
        assert!(NotifyError::InvalidState.is_transient());
        assert!(!NotifyError::Raw(3).is_transient());
    }

    #[test]
    fn only_busy_and_queue_full_storage_errors_are_transient() {
        assert!(StorageError::Busy.is_transient());
        assert!(StorageError::NoSpaceInQueues.is_transient());
        assert!(!StorageError::Flash.is_transient());
        assert!(!StorageError::Corrupted.is_transient());
    }

    #[test]
    fn radio_error_converts_to_fatal() {
        let fatal: Fatal = RadioError::Raw(7).into();
        assert_eq!(fatal, Fatal::Radio(RadioError::Raw(7)));
    }
}
