//! Bonded peers eligible for filtered advertising.
//!
//! The list is rebuilt from the peer manager at the start of every
//! advertising session and grows by one entry per new bond during a
//! connection. New bonds beyond capacity are not added; nothing is ever
//! evicted. The dirty flag records that the radio and the peer manager
//! have not seen the latest contents yet.

use heapless::Vec;

use super::{bonded_peers, PeerId, PeerManager};
use crate::config::WHITELIST_CAPACITY;
use crate::error::{Fatal, PeerManagerError};

/// Result of [`Whitelist::append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Append {
    Added,
    AlreadyPresent,
    Full,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Whitelist {
    peers: Vec<PeerId, WHITELIST_CAPACITY>,
    dirty: bool,
}

impl Whitelist {
    pub const fn new() -> Self {
        Self {
            peers: Vec::new(),
            dirty: false,
        }
    }

    /// Current contents in append order, at most `capacity` entries.
    pub fn get(&self, capacity: usize) -> &[PeerId] {
        let n = capacity.min(self.peers.len());
        &self.peers[..n]
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn contains(&self, peer: PeerId) -> bool {
        self.peers.contains(&peer)
    }

    /// Replace the contents with the first bonded peers the peer manager
    /// enumerates. Peers past capacity are left out.
    pub fn rebuild<P: PeerManager + ?Sized>(&mut self, pm: &P) {
        self.peers.clear();
        for peer in bonded_peers(pm) {
            if self.peers.is_full() {
                debug!("whitelist: capacity reached, {} left out", peer);
                break;
            }
            if !self.peers.contains(&peer) {
                // Capacity was checked above.
                let _ = self.peers.push(peer);
            }
        }
        debug!("whitelist: rebuilt with {} peers", self.peers.len());
    }

    /// Add a newly bonded peer.
    pub fn append(&mut self, peer: PeerId) -> Append {
        if self.peers.contains(&peer) {
            return Append::AlreadyPresent;
        }
        match self.peers.push(peer) {
            Ok(()) => {
                self.dirty = true;
                Append::Added
            }
            Err(_) => Append::Full,
        }
    }

    /// Drop every entry (bonds erased).
    pub fn clear(&mut self) {
        if !self.peers.is_empty() {
            self.peers.clear();
            self.dirty = true;
        }
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Load the contents into the radio's whitelist and identity list
    /// and clear the dirty flag. Identity lists are optional in some
    /// SoftDevices, so "not supported" is accepted there.
    pub fn publish<P: PeerManager + ?Sized>(&mut self, pm: &mut P) -> Result<(), Fatal> {
        pm.set_whitelist(&self.peers).map_err(Fatal::Security)?;
        match pm.set_identity_list(&self.peers) {
            Ok(()) | Err(PeerManagerError::NotSupported) => {}
            Err(e) => return Err(Fatal::Security(e)),
        }
        self.dirty = false;
        info!("whitelist: published {} peers", self.peers.len());
        Ok(())
    }
}

impl Default for Whitelist {
    fn default() -> Self {
        Self::new()
    }
}
