//! Bond keeping on top of the SoftDevice security callbacks.
//!
//! The SoftDevice runtime calls into [`Bonder`] from its event task;
//! every callback updates [`BONDS`] synchronously and reports what
//! happened to the main loop as a [`SecurityEvent`]. Flash writes are
//! deferred to [`super::flash`].

use core::cell::{Cell, RefCell};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::Vec;
use nrf_softdevice::ble::security::{IoCapabilities, SecurityHandler};
use nrf_softdevice::ble::{
    Address, AddressType, Connection, EncryptionInfo, IdentityKey, IdentityResolutionKey,
    MasterId, SecurityMode,
};
use nrf_softdevice::{raw, RawError};
use static_cell::StaticCell;

use super::flash::{self, FlashJob};
use super::post;
use crate::ble::ConnHandle;
use crate::config::WHITELIST_CAPACITY;
use crate::error::PeerManagerError;
use crate::scheduler::Event;
use crate::security::{
    AddressKind, PeerAddress, PeerId, SecFailure, SecProcedure, SecurityEvent,
};
use crate::storage::{BondKeys, BondStore};

/// Bonding records, shared by the security callbacks, the peer-manager
/// port and the flash task.
pub static BONDS: Mutex<CriticalSectionRawMutex, RefCell<BondStore>> =
    Mutex::new(RefCell::new(BondStore::new()));

pub struct Bonder {
    /// Peer whose keys were handed out to re-encrypt the live link.
    encrypting: Cell<Option<PeerId>>,
}

impl Bonder {
    const fn new() -> Self {
        Self {
            encrypting: Cell::new(None),
        }
    }
}

/// The handler passed to `advertise_pairable`. Call once.
pub fn bonder() -> &'static Bonder {
    static BONDER: StaticCell<Bonder> = StaticCell::new();
    BONDER.init(Bonder::new())
}

impl SecurityHandler for Bonder {
    fn io_capabilities(&self) -> IoCapabilities {
        IoCapabilities::None
    }

    fn can_bond(&self, conn: &Connection) -> bool {
        let handle = handle_of(conn);
        match bonded_peer(conn.peer_address()) {
            Some(peer) => {
                // A bonded central pairing again; refused, the main loop
                // only gets to log it.
                post(Event::Security(SecurityEvent::ConnSecConfigRequest { handle, peer }));
                false
            }
            None => {
                post(Event::Security(SecurityEvent::ConnSecStart {
                    handle,
                    procedure: SecProcedure::Bonding,
                }));
                true
            }
        }
    }

    fn on_bonded(
        &self,
        conn: &Connection,
        master_id: MasterId,
        key: EncryptionInfo,
        peer_id: IdentityKey,
    ) {
        let keys = BondKeys {
            address: peer_address(peer_id.addr),
            irk: peer_id.irk.as_raw().irk,
            ltk: key.ltk,
            ltk_flags: key.flags,
            ediv: master_id.ediv,
            rand: master_id.rand,
        };
        let stored = BONDS.lock(|b| b.borrow_mut().insert(keys));
        let event = match stored {
            Ok(peer) => {
                flash::request(FlashJob::Save);
                SecurityEvent::ConnSecSucceeded {
                    handle: handle_of(conn),
                    peer,
                    procedure: SecProcedure::Bonding,
                }
            }
            Err(PeerManagerError::NoMem) => SecurityEvent::StorageFull,
            Err(error) => SecurityEvent::ErrorUnexpected { error },
        };
        post(Event::Security(event));
    }

    fn get_key(&self, conn: &Connection, master_id: MasterId) -> Option<EncryptionInfo> {
        let handle = handle_of(conn);
        let found = BONDS.lock(|b| {
            b.borrow()
                .find_by_master_id(master_id.ediv, &master_id.rand)
                .map(|r| (r.peer, r.keys))
        });
        match found {
            Some((peer, keys)) => {
                self.encrypting.set(Some(peer));
                post(Event::Security(SecurityEvent::ConnSecStart {
                    handle,
                    procedure: SecProcedure::Encryption,
                }));
                Some(EncryptionInfo {
                    ltk: keys.ltk,
                    flags: keys.ltk_flags,
                })
            }
            None => {
                post(Event::Security(SecurityEvent::ConnSecFailed {
                    handle,
                    procedure: SecProcedure::Encryption,
                    error: SecFailure::MissingKeys,
                }));
                None
            }
        }
    }

    fn on_security_update(&self, conn: &Connection, mode: SecurityMode) {
        debug!("bonder: security mode {}", mode);
        if matches!(mode, SecurityMode::Open | SecurityMode::NoAccess) {
            return;
        }
        if let Some(peer) = self.encrypting.take() {
            post(Event::Security(SecurityEvent::ConnSecSucceeded {
                handle: handle_of(conn),
                peer,
                procedure: SecProcedure::Encryption,
            }));
        }
    }
}

pub(crate) fn handle_of(conn: &Connection) -> ConnHandle {
    conn.handle().map(ConnHandle).unwrap_or(ConnHandle::INVALID)
}

/// Bonded peer behind `address`, resolving private addresses with the
/// stored IRKs.
pub(crate) fn bonded_peer(address: Address) -> Option<PeerId> {
    BONDS.lock(|b| {
        b.borrow()
            .iter()
            .find(|r| identity_key(&r.keys).is_match(address))
            .map(|r| r.peer)
    })
}

fn identity_key(keys: &BondKeys) -> IdentityKey {
    IdentityKey {
        irk: IdentityResolutionKey::from_raw(raw::ble_gap_irk_t { irk: keys.irk }),
        addr: address(&keys.address),
    }
}

fn address_type(kind: AddressKind) -> AddressType {
    match kind {
        AddressKind::Public => AddressType::Public,
        AddressKind::RandomStatic => AddressType::RandomStatic,
        AddressKind::RandomPrivateResolvable => AddressType::RandomPrivateResolvable,
        AddressKind::RandomPrivateNonResolvable => AddressType::RandomPrivateNonResolvable,
        AddressKind::Anonymous => AddressType::Anonymous,
    }
}

pub(crate) fn address(peer: &PeerAddress) -> Address {
    Address::new(address_type(peer.kind), peer.bytes)
}

fn peer_address(address: Address) -> PeerAddress {
    let kind = match address.address_type() {
        AddressType::Public => AddressKind::Public,
        AddressType::RandomStatic => AddressKind::RandomStatic,
        AddressType::RandomPrivateResolvable => AddressKind::RandomPrivateResolvable,
        AddressType::RandomPrivateNonResolvable => AddressKind::RandomPrivateNonResolvable,
        AddressType::Anonymous => AddressKind::Anonymous,
    };
    PeerAddress {
        kind,
        bytes: address.bytes(),
    }
}

fn raw_address(peer: &PeerAddress) -> raw::ble_gap_addr_t {
    raw::ble_gap_addr_t {
        _bitfield_1: raw::ble_gap_addr_t::new_bitfield_1(0, peer.kind.to_u8()),
        addr: peer.bytes,
    }
}

fn pm_error(ret: u32) -> Result<(), PeerManagerError> {
    RawError::convert(ret).map_err(|e| match e {
        RawError::NotSupported => PeerManagerError::NotSupported,
        RawError::InvalidState => PeerManagerError::InvalidState,
        RawError::BleGapWhitelistInUse | RawError::BleGapDeviceIdentitiesInUse => {
            PeerManagerError::Busy
        }
        other => PeerManagerError::Internal(other as u32),
    })
}

/// Load the radio whitelist with the identity addresses of `peers`.
pub fn set_whitelist(peers: &[PeerId]) -> Result<(), PeerManagerError> {
    let addrs: Vec<raw::ble_gap_addr_t, WHITELIST_CAPACITY> = BONDS.lock(|b| {
        let store = b.borrow();
        peers
            .iter()
            .filter_map(|p| store.get(*p))
            .map(|r| raw_address(&r.keys.address))
            .collect()
    });
    let ptrs: Vec<*const raw::ble_gap_addr_t, WHITELIST_CAPACITY> =
        addrs.iter().map(|a| a as *const _).collect();

    let ret = if ptrs.is_empty() {
        unsafe { raw::sd_ble_gap_whitelist_set(core::ptr::null(), 0) }
    } else {
        unsafe { raw::sd_ble_gap_whitelist_set(ptrs.as_ptr(), ptrs.len() as u8) }
    };
    pm_error(ret)
}

/// Load the radio identity list (IRKs) of `peers`.
pub fn set_identity_list(peers: &[PeerId]) -> Result<(), PeerManagerError> {
    let keys: Vec<raw::ble_gap_id_key_t, WHITELIST_CAPACITY> = BONDS.lock(|b| {
        let store = b.borrow();
        peers
            .iter()
            .filter_map(|p| store.get(*p))
            .map(|r| raw::ble_gap_id_key_t {
                id_info: raw::ble_gap_irk_t { irk: r.keys.irk },
                id_addr_info: raw_address(&r.keys.address),
            })
            .collect()
    });
    let ptrs: Vec<*const raw::ble_gap_id_key_t, WHITELIST_CAPACITY> =
        keys.iter().map(|k| k as *const _).collect();

    let ret = if ptrs.is_empty() {
        unsafe { raw::sd_ble_gap_device_identities_set(core::ptr::null(), core::ptr::null(), 0) }
    } else {
        unsafe {
            raw::sd_ble_gap_device_identities_set(
                ptrs.as_ptr(),
                core::ptr::null(),
                ptrs.len() as u8,
            )
        }
    };
    pm_error(ret)
}
