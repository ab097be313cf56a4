//! Persistent storage for bonding records.
//!
//! On target the records live in the nRF52832's internal flash via the
//! `sequential-storage` crate, so bonded centrals can reconnect (and be
//! whitelisted) after a power cycle. The record set itself is plain
//! data and host-testable.
//!
//! Storage layout:
//!   - One map item (`KEY_BONDS`) holding `[count][record]*`.
//!   - Each record is a fixed `RECORD_SIZE` bytes (see
//!     [`BondRecord::serialize`]).
//!   - Flash pages are managed by `sequential-storage`, which erases and
//!     compacts as items are rewritten.

use heapless::Vec;

use crate::config::MAX_BONDS;
use crate::error::{PeerManagerError, StorageError};
use crate::security::{AddressKind, PeerAddress, PeerId};

/// Command sink of persistent storage.
pub trait Storage {
    /// Reclaim space held by stale records.
    fn garbage_collect(&mut self) -> Result<(), StorageError>;
}

/// Key for the bond list in the map storage.
pub const KEY_BONDS: u8 = 0x01;

/// Serialized size of one record.
pub const RECORD_SIZE: usize = 2 + 1 + 6 + 16 + 16 + 1 + 2 + 8 + 4;

/// Buffer size for the whole serialized store.
/// 8 bonds × 56 bytes + 1 count byte = 449 bytes max.
pub const MAX_STORE_SIZE: usize = 512;

/// Keys exchanged when a central bonds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BondKeys {
    /// Identity address of the central.
    pub address: PeerAddress,
    /// Identity resolving key.
    pub irk: [u8; 16],
    /// Long-term key.
    pub ltk: [u8; 16],
    /// LTK flags (authenticated, LESC).
    pub ltk_flags: u8,
    /// Encrypted diversifier.
    pub ediv: u16,
    /// Random number paired with `ediv`.
    pub rand: [u8; 8],
}

/// A bonded peer stored in flash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BondRecord {
    pub peer: PeerId,
    pub keys: BondKeys,
    /// Higher = used more recently.
    pub rank: u32,
}

impl BondRecord {
    /// Serialize to bytes for flash storage.
    ///
    /// Format: `[2 peer][1 type][6 addr][16 irk][16 ltk][1 flags][2 ediv][8 rand][4 rank]`
    pub fn serialize(&self, buf: &mut [u8]) -> usize {
        if buf.len() < RECORD_SIZE {
            return 0;
        }
        let k = &self.keys;
        buf[0..2].copy_from_slice(&self.peer.0.to_le_bytes());
        buf[2] = k.address.kind.to_u8();
        buf[3..9].copy_from_slice(&k.address.bytes);
        buf[9..25].copy_from_slice(&k.irk);
        buf[25..41].copy_from_slice(&k.ltk);
        buf[41] = k.ltk_flags;
        buf[42..44].copy_from_slice(&k.ediv.to_le_bytes());
        buf[44..52].copy_from_slice(&k.rand);
        buf[52..56].copy_from_slice(&self.rank.to_le_bytes());
        RECORD_SIZE
    }

    /// Deserialize from bytes.
    pub fn deserialize(data: &[u8]) -> Option<Self> {
        if data.len() < RECORD_SIZE {
            return None;
        }
        let kind = AddressKind::from_u8(data[2])?;
        let mut bytes = [0u8; 6];
        bytes.copy_from_slice(&data[3..9]);
        let mut irk = [0u8; 16];
        irk.copy_from_slice(&data[9..25]);
        let mut ltk = [0u8; 16];
        ltk.copy_from_slice(&data[25..41]);
        let mut rand = [0u8; 8];
        rand.copy_from_slice(&data[44..52]);

        Some(Self {
            peer: PeerId(u16::from_le_bytes([data[0], data[1]])),
            keys: BondKeys {
                address: PeerAddress { kind, bytes },
                irk,
                ltk,
                ltk_flags: data[41],
                ediv: u16::from_le_bytes([data[42], data[43]]),
                rand,
            },
            rank: u32::from_le_bytes([data[52], data[53], data[54], data[55]]),
        })
    }
}

/// In-memory cache of bonding records, synced with flash.
#[derive(Debug, Clone)]
pub struct BondStore {
    /// Records in registration order.
    records: Vec<BondRecord, MAX_BONDS>,
    /// Rank handed to the next promoted peer.
    next_rank: u32,
    /// Dirty flag - true if cache differs from flash.
    dirty: bool,
}

impl BondStore {
    /// Create an empty store.
    pub const fn new() -> Self {
        Self {
            records: Vec::new(),
            next_rank: 1,
            dirty: false,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.records.is_full()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// The current contents are on their way to flash.
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub fn get(&self, peer: PeerId) -> Option<&BondRecord> {
        self.records.iter().find(|r| r.peer == peer)
    }

    /// Peer registered after `after` (`None` = first).
    pub fn next_peer(&self, after: Option<PeerId>) -> Option<PeerId> {
        let start = match after {
            None => 0,
            Some(peer) => self.records.iter().position(|r| r.peer == peer)? + 1,
        };
        self.records.get(start).map(|r| r.peer)
    }

    /// Record matching the EDIV/RAND a central presents when it
    /// re-encrypts.
    pub fn find_by_master_id(&self, ediv: u16, rand: &[u8; 8]) -> Option<&BondRecord> {
        self.records
            .iter()
            .find(|r| r.keys.ediv == ediv && &r.keys.rand == rand)
    }

    /// Record with the given identity address.
    pub fn find_by_address(&self, address: &PeerAddress) -> Option<&BondRecord> {
        self.records.iter().find(|r| &r.keys.address == address)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BondRecord> {
        self.records.iter()
    }

    /// Store keys from a completed bonding. A central that bonds again
    /// keeps its peer id; a new central gets the lowest free one.
    pub fn insert(&mut self, keys: BondKeys) -> Result<PeerId, PeerManagerError> {
        let rank = self.take_rank();
        if let Some(existing) = self
            .records
            .iter_mut()
            .find(|r| r.keys.address == keys.address)
        {
            existing.keys = keys;
            existing.rank = rank;
            self.dirty = true;
            info!("bonds: updated keys of {}", existing.peer);
            return Ok(existing.peer);
        }

        let peer = self.free_peer_id();
        self.records
            .push(BondRecord { peer, keys, rank })
            .map_err(|_| PeerManagerError::NoMem)?;
        self.dirty = true;
        info!("bonds: stored {} - now holding {}", peer, self.records.len());
        Ok(peer)
    }

    /// Make `peer` the most recently used.
    pub fn promote(&mut self, peer: PeerId) -> Result<(), PeerManagerError> {
        let rank = self.next_rank;
        let record = self
            .records
            .iter_mut()
            .find(|r| r.peer == peer)
            .ok_or(PeerManagerError::NotFound)?;
        record.rank = rank;
        self.next_rank = rank.wrapping_add(1);
        self.dirty = true;
        Ok(())
    }

    /// Least recently used peer.
    pub fn lowest_ranked(&self) -> Option<PeerId> {
        self.records.iter().min_by_key(|r| r.rank).map(|r| r.peer)
    }

    /// Delete the record of `peer`.
    pub fn remove(&mut self, peer: PeerId) -> Result<(), PeerManagerError> {
        let index = self
            .records
            .iter()
            .position(|r| r.peer == peer)
            .ok_or(PeerManagerError::NotFound)?;
        self.records.remove(index);
        self.dirty = true;
        info!("bonds: removed {}", peer);
        Ok(())
    }

    /// Delete every record.
    pub fn remove_all(&mut self) {
        self.records.clear();
        self.next_rank = 1;
        self.dirty = true;
    }

    fn take_rank(&mut self) -> u32 {
        let rank = self.next_rank;
        self.next_rank = rank.wrapping_add(1);
        rank
    }

    fn free_peer_id(&self) -> PeerId {
        let mut id = 0u16;
        while self.records.iter().any(|r| r.peer.0 == id) {
            id += 1;
        }
        PeerId(id)
    }

    /// Serialize all records to a byte buffer.
    pub fn serialize_all(&self, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }

        // First byte: record count.
        buf[0] = self.records.len() as u8;
        let mut offset = 1;

        for record in &self.records {
            let written = record.serialize(&mut buf[offset..]);
            if written == 0 {
                break;
            }
            offset += written;
        }

        offset
    }

    /// Replace the cache with records decoded from `data`. Truncated or
    /// malformed tails are dropped.
    pub fn deserialize_all(&mut self, data: &[u8]) -> Result<(), StorageError> {
        self.records.clear();
        self.next_rank = 1;
        self.dirty = false;

        let Some((&count, mut rest)) = data.split_first() else {
            return Ok(());
        };

        for _ in 0..count {
            if rest.len() < RECORD_SIZE {
                return Err(StorageError::Corrupted);
            }
            let record = BondRecord::deserialize(&rest[..RECORD_SIZE]).ok_or(StorageError::Corrupted)?;
            rest = &rest[RECORD_SIZE..];
            if self.records.push(record).is_err() {
                break;
            }
            self.next_rank = self.next_rank.max(record.rank.wrapping_add(1));
        }
        Ok(())
    }
}

impl Default for BondStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "embedded")]
mod flash {
    use super::{BondStore, KEY_BONDS, MAX_STORE_SIZE};
    use crate::config::{BOND_STORE_END, BOND_STORE_START};
    use crate::error::StorageError;
    use embedded_storage_async::nor_flash::NorFlash;

    /// Item plus key and sequential-storage framing.
    const FLASH_BUF_SIZE: usize = MAX_STORE_SIZE + 32;

    impl BondStore {
        /// Replace the records with what flash holds. Nothing stored
        /// yields an empty store.
        pub async fn load_from_flash(&mut self, flash: &mut impl NorFlash) -> Result<(), StorageError> {
            let mut buf = [0u8; FLASH_BUF_SIZE];

            let fetched = sequential_storage::map::fetch_item::<u8, &[u8], _>(
                flash,
                BOND_STORE_START..BOND_STORE_END,
                &mut sequential_storage::cache::NoCache::new(),
                &mut buf,
                &KEY_BONDS,
            )
            .await;

            match fetched {
                Ok(Some(data)) => {
                    self.deserialize_all(data)?;
                    debug!("storage: {} records read", self.len());
                    Ok(())
                }
                Ok(None) => {
                    debug!("storage: no records in flash");
                    self.deserialize_all(&[])
                }
                Err(e) => {
                    error!("storage: read failed: {}", defmt::Debug2Format(&e));
                    Err(StorageError::Flash)
                }
            }
        }

        /// Persist all records to flash.
        pub async fn save_to_flash(&mut self, flash: &mut impl NorFlash) -> Result<(), StorageError> {
            if !self.dirty {
                trace!("storage: nothing to write");
                return Ok(());
            }

            let mut buf = [0u8; FLASH_BUF_SIZE];
            let mut data_buf = [0u8; MAX_STORE_SIZE];

            let len = self.serialize_all(&mut data_buf);
            let item = &data_buf[..len];

            match sequential_storage::map::store_item::<u8, &[u8], _>(
                flash,
                BOND_STORE_START..BOND_STORE_END,
                &mut sequential_storage::cache::NoCache::new(),
                &mut buf,
                &KEY_BONDS,
                &item,
            )
            .await
            {
                Ok(()) => {
                    info!("storage: {} records written", self.len());
                    self.dirty = false;
                    Ok(())
                }
                Err(e) => {
                    error!("storage: write failed: {}", defmt::Debug2Format(&e));
                    Err(StorageError::Flash)
                }
            }
        }

        /// Flag the store for rewrite; `sequential-storage` reclaims the
        /// stale pages while storing.
        pub fn request_compaction(&mut self) {
            self.dirty = true;
        }
    }
}
