//! Peer-manager event handling.
//!
//! Each [`SecurityEvent`] is handled on its own:
//!
//! - bonded peer reconnects and successful security promote the peer's
//!   rank; a new bond is also appended to the whitelist,
//! - "missing keys" failures force re-pairing once per link,
//! - re-pairing requests from bonded peers are always rejected,
//! - a full bond store triggers garbage collection,
//! - erasing all peers restarts advertising from scratch,
//! - anything unexpected resets the device.

use super::whitelist::{Append, Whitelist};
use super::{PeerId, PeerManager, SecFailure, SecProcedure, SecurityEvent, SecurityStatus};
use crate::ble::connection::Connection;
use crate::error::{Fatal, PeerManagerError};
use crate::storage::Storage;

/// What the device has to do after an event was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FollowUp {
    None,
    /// Start a fresh advertising session (bonds were erased).
    RestartAdvertising,
}

pub struct BondingHandler {
    last_peer: Option<PeerId>,
    rekey_attempted: bool,
}

impl BondingHandler {
    pub const fn new() -> Self {
        Self {
            last_peer: None,
            rekey_attempted: false,
        }
    }

    /// Most recently connected bonded peer, target of directed
    /// advertising.
    pub fn last_peer(&self) -> Option<PeerId> {
        self.last_peer
    }

    /// A new link starts; the missing-keys retry is available again.
    pub fn on_connected(&mut self) {
        self.rekey_attempted = false;
    }

    pub fn handle<P>(
        &mut self,
        event: SecurityEvent,
        conn: &mut Connection,
        whitelist: &mut Whitelist,
        p: &mut P,
    ) -> Result<FollowUp, Fatal>
    where
        P: PeerManager + Storage,
    {
        match event {
            SecurityEvent::BondedPeerConnected { peer, .. } => {
                info!("sec: bonded peer {} connected", peer);
                self.last_peer = Some(peer);
                conn.set_peer(peer);
                promote(peer, p)?;
            }
            SecurityEvent::ConnSecStart { handle, procedure } => {
                debug!("sec: {} started on {}", procedure, handle.0);
                conn.set_security(SecurityStatus::Encrypting);
            }
            SecurityEvent::ConnSecSucceeded {
                handle,
                peer,
                procedure,
            } => {
                info!("sec: link {} secured by {} (peer {})", handle.0, procedure, peer);
                conn.set_security(SecurityStatus::Secured);
                conn.set_peer(peer);
                self.last_peer = Some(peer);
                promote(peer, p)?;
                if procedure == SecProcedure::Bonding {
                    match whitelist.append(peer) {
                        Append::Added => info!("sec: new bond {} added to whitelist", peer),
                        Append::AlreadyPresent => debug!("sec: {} already whitelisted", peer),
                        Append::Full => warn!("sec: whitelist full, {} not added", peer),
                    }
                }
            }
            SecurityEvent::ConnSecFailed {
                handle,
                procedure,
                error,
            } => {
                warn!("sec: {} failed on {}: {}", procedure, handle.0, error);
                conn.set_security(SecurityStatus::Unencrypted);
                if error == SecFailure::MissingKeys && !self.rekey_attempted {
                    self.rekey_attempted = true;
                    // One side lost its keys: bond again from scratch.
                    match p.secure_link(handle, true) {
                        Ok(()) => info!("sec: re-pairing on {}", handle.0),
                        // Already negotiating; the retry is moot.
                        Err(PeerManagerError::InvalidState) => {}
                        Err(e) => return Err(Fatal::Security(e)),
                    }
                }
            }
            SecurityEvent::ConnSecConfigRequest { handle, peer } => {
                warn!("sec: peer {} asked to re-pair, rejecting", peer);
                p.reply_security_config(handle, false)
                    .map_err(Fatal::Security)?;
            }
            SecurityEvent::StorageFull => {
                info!("sec: bond storage full, collecting garbage");
                match p.garbage_collect() {
                    Ok(()) => {}
                    Err(e) if e.is_transient() => debug!("sec: gc deferred: {}", e),
                    Err(e) => return Err(Fatal::Storage(e)),
                }
            }
            SecurityEvent::PeersDeleteSucceeded => {
                info!("sec: all bonds erased");
                self.last_peer = None;
                whitelist.clear();
                // A live link restarts advertising when it drops.
                if !conn.is_connected() {
                    return Ok(FollowUp::RestartAdvertising);
                }
            }
            SecurityEvent::LocalDbCacheApplyFailed { handle } => {
                info!("sec: peer cache stale on {}, flagging service change", handle.0);
                p.local_database_changed();
            }
            SecurityEvent::ErrorUnexpected { error } => {
                error!("sec: unexpected peer manager error {}", error);
                return Err(Fatal::Security(error));
            }
            SecurityEvent::PeerDataUpdateFailed { peer, error } => {
                error!("sec: updating data of {} failed: {}", peer, error);
                return Err(Fatal::PeerDataUpdate(error));
            }
            SecurityEvent::PeerDeleteFailed { peer, error } => {
                error!("sec: deleting {} failed: {}", peer, error);
                return Err(Fatal::PeerDelete(error));
            }
            SecurityEvent::PeersDeleteFailed { error } => {
                error!("sec: erasing bonds failed: {}", error);
                return Err(Fatal::PeersDelete(error));
            }
            SecurityEvent::PeerDataUpdateSucceeded { peer } => {
                trace!("sec: data of {} updated", peer);
            }
            SecurityEvent::PeerDeleteSucceeded { peer } => {
                debug!("sec: {} deleted", peer);
                if self.last_peer == Some(peer) {
                    self.last_peer = None;
                }
            }
            SecurityEvent::LocalDbCacheApplied { handle } => {
                trace!("sec: peer cache applied on {}", handle.0);
            }
            SecurityEvent::ServiceChangedIndConfirmed { handle } => {
                debug!("sec: service change confirmed on {}", handle.0);
            }
        }
        Ok(FollowUp::None)
    }
}

impl Default for BondingHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Most-recently-used ranking; "busy" means a rank update is already
/// pending for this peer.
fn promote<P: PeerManager + ?Sized>(peer: PeerId, pm: &mut P) -> Result<(), Fatal> {
    match pm.promote_rank(peer) {
        Ok(()) | Err(PeerManagerError::Busy) => Ok(()),
        Err(e) => Err(Fatal::Security(e)),
    }
}
