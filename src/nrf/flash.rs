//! Bond store persistence.
//!
//! Jobs are queued from the security callbacks and the peer-manager
//! port; the task writes the whole store through `sequential-storage`
//! on the SoftDevice flash API, which serializes with radio activity.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use nrf_softdevice::Flash;

use super::bonder::BONDS;
use super::post;
use crate::error::{PeerManagerError, StorageError};
use crate::scheduler::Event;
use crate::security::SecurityEvent;
use crate::storage::BondStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashJob {
    /// Write the store if it changed.
    Save,
    /// The store was cleared; write it and report completion.
    EraseAll,
}

static JOBS: Channel<CriticalSectionRawMutex, FlashJob, 4> = Channel::new();

/// Queue a flash job. `Save` jobs coalesce, so a full queue only
/// matters for `EraseAll`.
pub fn request(job: FlashJob) -> bool {
    match JOBS.try_send(job) {
        Ok(()) => true,
        Err(_) => {
            warn!("flash: job queue full, {} dropped", job);
            false
        }
    }
}

/// Read the stored bonds into [`BONDS`]. Corrupted data leaves the store
/// empty.
pub async fn load(flash: &mut Flash) {
    let mut store = BondStore::new();
    if let Err(e) = store.load_from_flash(flash).await {
        error!("flash: loading bonds failed: {}", e);
        store = BondStore::new();
    }
    info!("flash: {} bonds loaded", store.len());
    BONDS.lock(|b| b.replace(store));
}

/// Write a snapshot of [`BONDS`]. The snapshot is taken under the lock
/// and written outside it.
async fn save(flash: &mut Flash) -> Result<(), StorageError> {
    let mut snapshot = BONDS.lock(|b| {
        let mut store = b.borrow_mut();
        let copy = store.clone();
        store.mark_clean();
        copy
    });
    let saved = snapshot.save_to_flash(flash).await;
    if saved.is_err() {
        BONDS.lock(|b| b.borrow_mut().request_compaction());
    }
    saved
}

/// Runs the deferred writes. Takes over `flash` after [`load`].
#[embassy_executor::task]
pub async fn flash_task(mut flash: Flash) -> ! {
    loop {
        let job = JOBS.receive().await;
        let result = save(&mut flash).await;
        match (job, result) {
            (FlashJob::Save, Ok(())) => {}
            (FlashJob::Save, Err(e)) => {
                error!("flash: saving bonds failed: {}", e);
                post(Event::Storage(e));
            }
            (FlashJob::EraseAll, Ok(())) => {
                post(Event::Security(SecurityEvent::PeersDeleteSucceeded));
            }
            (FlashJob::EraseAll, Err(e)) => {
                error!("flash: erasing bonds failed: {}", e);
                post(Event::Security(SecurityEvent::PeersDeleteFailed {
                    error: PeerManagerError::Internal(e as u32),
                }));
            }
        }
    }
}
