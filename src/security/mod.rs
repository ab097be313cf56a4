//! Bonding and security.
//!
//! The peer manager (pairing, key storage, peer ranking) is an external
//! collaborator reached through the [`PeerManager`] port. Its events
//! arrive as [`SecurityEvent`]s through the scheduler queue and are
//! handled by [`handler::BondingHandler`]. The bonded peers eligible for
//! filtered advertising live in [`whitelist::Whitelist`].

pub mod handler;
pub mod whitelist;

use crate::ble::{BleEvent, ConnHandle};
use crate::config;
use crate::error::PeerManagerError;

/// Stable reference to a bonded peer (peer manager's peer id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerId(pub u16);

/// Bluetooth device address kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressKind {
    Public,
    RandomStatic,
    RandomPrivateResolvable,
    RandomPrivateNonResolvable,
    Anonymous,
}

impl AddressKind {
    pub fn to_u8(self) -> u8 {
        match self {
            AddressKind::Public => 0,
            AddressKind::RandomStatic => 1,
            AddressKind::RandomPrivateResolvable => 2,
            AddressKind::RandomPrivateNonResolvable => 3,
            AddressKind::Anonymous => 4,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(AddressKind::Public),
            1 => Some(AddressKind::RandomStatic),
            2 => Some(AddressKind::RandomPrivateResolvable),
            3 => Some(AddressKind::RandomPrivateNonResolvable),
            4 => Some(AddressKind::Anonymous),
            _ => None,
        }
    }
}

/// Identity address of a bonded peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerAddress {
    pub kind: AddressKind,
    /// Little-endian, as on air.
    pub bytes: [u8; 6],
}

/// Security status of the live link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SecurityStatus {
    Unencrypted,
    Encrypting,
    Secured,
}

/// How a link became (or tried to become) secure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SecProcedure {
    /// Re-encryption with keys from an existing bond.
    Encryption,
    /// Pairing followed by key storage (a new bond).
    Bonding,
    /// Pairing without storing keys.
    Pairing,
}

/// Why securing a link failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SecFailure {
    /// One side lost its keys (PIN or key missing).
    MissingKeys,
    /// The peer did not respond in time.
    Timeout,
    /// The peer rejected pairing.
    PairingNotSupported,
    /// Any other SMP/HCI status.
    Other(u16),
}

/// Events emitted by the peer manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SecurityEvent {
    /// A peer we hold a bond with connected.
    BondedPeerConnected { handle: ConnHandle, peer: PeerId },
    /// A security procedure started.
    ConnSecStart { handle: ConnHandle, procedure: SecProcedure },
    /// The link is secure.
    ConnSecSucceeded {
        handle: ConnHandle,
        peer: PeerId,
        procedure: SecProcedure,
    },
    /// A security procedure failed.
    ConnSecFailed {
        handle: ConnHandle,
        procedure: SecProcedure,
        error: SecFailure,
    },
    /// A bonded peer wants to pair again; a config reply is required.
    ConnSecConfigRequest { handle: ConnHandle, peer: PeerId },
    /// The bond store is out of room.
    StorageFull,
    /// The peer manager hit an error it could not handle.
    ErrorUnexpected { error: PeerManagerError },
    /// Stored data for a peer was updated.
    PeerDataUpdateSucceeded { peer: PeerId },
    /// Updating stored data for a peer failed.
    PeerDataUpdateFailed { peer: PeerId, error: PeerManagerError },
    /// A peer was deleted.
    PeerDeleteSucceeded { peer: PeerId },
    /// Deleting a peer failed.
    PeerDeleteFailed { peer: PeerId, error: PeerManagerError },
    /// All peers were deleted.
    PeersDeleteSucceeded,
    /// Deleting all peers failed.
    PeersDeleteFailed { error: PeerManagerError },
    /// The peer's GATT cache was restored.
    LocalDbCacheApplied { handle: ConnHandle },
    /// The peer's GATT cache no longer matches the local database.
    LocalDbCacheApplyFailed { handle: ConnHandle },
    /// The peer confirmed a service-changed indication.
    ServiceChangedIndConfirmed { handle: ConnHandle },
}

/// Pairing parameters handed to the peer manager at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SecurityParams {
    pub bond: bool,
    pub mitm: bool,
    pub lesc: bool,
    pub keypress: bool,
    pub oob: bool,
    pub min_key_size: u8,
    pub max_key_size: u8,
}

impl SecurityParams {
    /// Just Works bonding, no LESC.
    pub const fn default_bonding() -> Self {
        Self {
            bond: config::SEC_PARAM_BOND,
            mitm: config::SEC_PARAM_MITM,
            lesc: config::SEC_PARAM_LESC,
            keypress: config::SEC_PARAM_KEYPRESS,
            oob: config::SEC_PARAM_OOB,
            min_key_size: config::SEC_PARAM_MIN_KEY_SIZE,
            max_key_size: config::SEC_PARAM_MAX_KEY_SIZE,
        }
    }
}

/// Command sink of the peer manager.
pub trait PeerManager {
    /// Install pairing parameters.
    fn configure_security(&mut self, params: &SecurityParams) -> Result<(), PeerManagerError>;

    /// Bonded peer following `after` in enumeration order (`None` = first).
    fn next_peer(&self, after: Option<PeerId>) -> Option<PeerId>;

    /// Mark `peer` as the most recently used.
    fn promote_rank(&mut self, peer: PeerId) -> Result<(), PeerManagerError>;

    /// Load the radio's address whitelist.
    fn set_whitelist(&mut self, peers: &[PeerId]) -> Result<(), PeerManagerError>;

    /// Load the radio's identity list (IRKs for resolvable addresses).
    fn set_identity_list(&mut self, peers: &[PeerId]) -> Result<(), PeerManagerError>;

    /// Identity address from the peer's bonding record.
    fn peer_address(&self, peer: PeerId) -> Result<PeerAddress, PeerManagerError>;

    /// Delete every bond. Completion arrives as a [`SecurityEvent`].
    fn delete_all_peers(&mut self) -> Result<(), PeerManagerError>;

    /// Start securing the link.
    fn secure_link(&mut self, handle: ConnHandle, force_repairing: bool)
        -> Result<(), PeerManagerError>;

    /// Answer a [`SecurityEvent::ConnSecConfigRequest`].
    fn reply_security_config(
        &mut self,
        handle: ConnHandle,
        allow_repairing: bool,
    ) -> Result<(), PeerManagerError>;

    /// Tell the peer manager the local GATT database changed, so bonded
    /// peers get a service-changed indication.
    fn local_database_changed(&mut self);

    /// Radio events the peer manager tracks (first stage after the
    /// connection-state tracker).
    fn on_ble_event(&mut self, event: &BleEvent);
}

/// Iterate over all bonded peers in the peer manager's order.
pub fn bonded_peers<P: PeerManager + ?Sized>(pm: &P) -> impl Iterator<Item = PeerId> + '_ {
    core::iter::successors(pm.next_peer(None), move |&p| pm.next_peer(Some(p)))
}
