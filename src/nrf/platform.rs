//! The device ports on nRF52832 hardware.

use embassy_futures::select::select;
use nrf_softdevice::raw;

use super::bonder::{self, BONDS};
use super::flash::{self, FlashJob};
use super::radio::{self, RadioRequest};
use super::sensor::SAMPLE_READY;
use super::server::Server;
use super::timers::{self, TimerCommand};
use super::{post, EVENTS};
use crate::ble::advertising::{AdvMode, AdvParams};
use crate::ble::{Attribute, AuthorizeReply, BleEvent, ConnHandle, ConnParams, Radio};
use crate::error::{Fatal, NotifyError, PeerManagerError, RadioError, StorageError, TimerError};
use crate::power::Power;
use crate::scheduler::{Event, TimerId, Timers};
use crate::security::{PeerAddress, PeerId, PeerManager, SecurityEvent, SecurityParams};
use crate::storage::Storage;
use crate::ui::leds;
use crate::ui::{Board, Indication};

/// GPIO pins that wake the chip from System OFF.
pub const WAKEUP_PINS: [usize; 2] = [13, 14];

pub struct Nrf52 {
    server: &'static Server,
    security: SecurityParams,
}

impl Nrf52 {
    pub fn new(server: &'static Server) -> Self {
        Self {
            server,
            security: SecurityParams::default_bonding(),
        }
    }
}

impl Radio for Nrf52 {
    fn start_advertising(&mut self, params: &AdvParams) -> Result<(), RadioError> {
        match params.mode {
            AdvMode::Idle => return Err(RadioError::InvalidState),
            AdvMode::Directed if params.peer.is_none() => return Err(RadioError::InvalidState),
            _ => {}
        }
        radio::request(RadioRequest::Advertise(params.clone()));
        Ok(())
    }

    fn stop_advertising(&mut self) -> Result<(), RadioError> {
        radio::request(RadioRequest::Stop);
        Ok(())
    }

    fn disconnect(&mut self, handle: ConnHandle, reason: u8) -> Result<(), RadioError> {
        debug!("platform: disconnect {} ({=u8:#x})", handle.0, reason);
        match radio::with_link(handle, |c| c.disconnect()) {
            Some(Ok(())) => Ok(()),
            // Already going down, or not the live link.
            Some(Err(_)) | None => Err(RadioError::InvalidState),
        }
    }

    fn notify(
        &mut self,
        handle: ConnHandle,
        attribute: Attribute,
        value: &[u8],
    ) -> Result<(), NotifyError> {
        let server = self.server;
        radio::with_link(handle, |c| server.notify(c, attribute, value))
            .unwrap_or(Err(NotifyError::InvalidState))
    }

    fn set_value(&mut self, attribute: Attribute, value: &[u8]) -> Result<(), RadioError> {
        self.server.set_value(attribute, value)
    }

    // The SoftDevice runtime answers user-memory, MTU and authorization
    // requests itself; these never reach the main loop on this target.

    fn reply_user_mem(&mut self, handle: ConnHandle) -> Result<(), RadioError> {
        trace!("platform: runtime answered user mem request on {}", handle.0);
        Ok(())
    }

    fn reply_mtu(&mut self, handle: ConnHandle, server_mtu: u16) -> Result<(), RadioError> {
        trace!("platform: runtime answered MTU exchange on {} (ours {})", handle.0, server_mtu);
        Ok(())
    }

    fn reply_authorize(
        &mut self,
        handle: ConnHandle,
        reply: AuthorizeReply,
    ) -> Result<(), RadioError> {
        trace!("platform: runtime answered authorization on {} ({} not sent)", handle.0, reply);
        Ok(())
    }

    fn update_conn_params(
        &mut self,
        handle: ConnHandle,
        params: &ConnParams,
    ) -> Result<(), RadioError> {
        let raw_params = raw::ble_gap_conn_params_t {
            min_conn_interval: params.min_interval,
            max_conn_interval: params.max_interval,
            slave_latency: params.slave_latency,
            conn_sup_timeout: params.supervision_timeout,
        };
        match radio::with_link(handle, |c| c.set_conn_params(raw_params)) {
            Some(Ok(())) => Ok(()),
            Some(Err(e)) => {
                warn!("platform: conn params update refused: {}", e);
                Err(RadioError::Busy)
            }
            None => Err(RadioError::InvalidState),
        }
    }
}

impl PeerManager for Nrf52 {
    fn configure_security(&mut self, params: &SecurityParams) -> Result<(), PeerManagerError> {
        // No display and no keyboard: Just Works only.
        if params.mitm || params.oob || params.keypress {
            return Err(PeerManagerError::NotSupported);
        }
        self.security = *params;
        Ok(())
    }

    fn next_peer(&self, after: Option<PeerId>) -> Option<PeerId> {
        BONDS.lock(|b| b.borrow().next_peer(after))
    }

    fn promote_rank(&mut self, peer: PeerId) -> Result<(), PeerManagerError> {
        BONDS.lock(|b| b.borrow_mut().promote(peer))?;
        flash::request(FlashJob::Save);
        Ok(())
    }

    fn set_whitelist(&mut self, peers: &[PeerId]) -> Result<(), PeerManagerError> {
        bonder::set_whitelist(peers)
    }

    fn set_identity_list(&mut self, peers: &[PeerId]) -> Result<(), PeerManagerError> {
        bonder::set_identity_list(peers)
    }

    fn peer_address(&self, peer: PeerId) -> Result<PeerAddress, PeerManagerError> {
        BONDS.lock(|b| {
            b.borrow()
                .get(peer)
                .map(|r| r.keys.address)
                .ok_or(PeerManagerError::NotFound)
        })
    }

    fn delete_all_peers(&mut self) -> Result<(), PeerManagerError> {
        BONDS.lock(|b| b.borrow_mut().remove_all());
        if flash::request(FlashJob::EraseAll) {
            Ok(())
        } else {
            Err(PeerManagerError::Busy)
        }
    }

    fn secure_link(
        &mut self,
        handle: ConnHandle,
        force_repairing: bool,
    ) -> Result<(), PeerManagerError> {
        if force_repairing {
            forget_link_peer(handle)?;
        }
        let s = &self.security;
        let mut params: raw::ble_gap_sec_params_t = unsafe { core::mem::zeroed() };
        params.min_key_size = s.min_key_size;
        params.max_key_size = s.max_key_size;
        params._bitfield_1 = raw::ble_gap_sec_params_t::new_bitfield_1(
            s.bond as u8,
            s.mitm as u8,
            s.lesc as u8,
            s.keypress as u8,
            raw::BLE_GAP_IO_CAPS_NONE as u8,
            s.oob as u8,
        );
        // As peripheral this sends a Security Request.
        let ret = unsafe { raw::sd_ble_gap_authenticate(handle.0, &params) };
        match ret {
            raw::NRF_SUCCESS => Ok(()),
            raw::NRF_ERROR_INVALID_STATE => Err(PeerManagerError::InvalidState),
            raw::NRF_ERROR_BUSY => Err(PeerManagerError::Busy),
            other => Err(PeerManagerError::Internal(other)),
        }
    }

    fn reply_security_config(
        &mut self,
        handle: ConnHandle,
        allow_repairing: bool,
    ) -> Result<(), PeerManagerError> {
        // The bonder already answered synchronously in `can_bond`.
        trace!(
            "platform: bonder answered re-pairing on {} (allow {} not sent)",
            handle.0,
            allow_repairing
        );
        Ok(())
    }

    fn local_database_changed(&mut self) {
        debug!("platform: local database changed");
    }

    fn on_ble_event(&mut self, event: &BleEvent) {
        if let BleEvent::Connected { handle, .. } = event {
            let peer = radio::with_link(*handle, |c| bonder::bonded_peer(c.peer_address())).flatten();
            if let Some(peer) = peer {
                post(Event::Security(SecurityEvent::BondedPeerConnected {
                    handle: *handle,
                    peer,
                }));
            }
        }
    }
}

impl Storage for Nrf52 {
    fn garbage_collect(&mut self) -> Result<(), StorageError> {
        BONDS.lock(|b| b.borrow_mut().request_compaction());
        if flash::request(FlashJob::Save) {
            Ok(())
        } else {
            Err(StorageError::NoSpaceInQueues)
        }
    }
}

impl Board for Nrf52 {
    fn indicate(&mut self, indication: Indication) {
        leds::show(indication);
    }

    fn enter_sleep(&mut self) {
        info!("platform: entering System OFF");
        for pin in WAKEUP_PINS {
            arm_wakeup(pin);
        }
        let ret = unsafe { raw::sd_power_system_off() };
        // Only returns on error; in a debug session System OFF is emulated.
        error!("platform: System OFF failed: {=u32}", ret);
        loop {
            cortex_m::asm::wfe();
        }
    }

    fn reset(&mut self, cause: Fatal) {
        error!("platform: resetting after {}", cause);
        cortex_m::peripheral::SCB::sys_reset();
    }
}

/// Drop the stored keys of the peer on `handle`, so the bonder lets
/// it pair again instead of refusing it as already bonded.
fn forget_link_peer(handle: ConnHandle) -> Result<(), PeerManagerError> {
    let peer = radio::with_link(handle, |c| bonder::bonded_peer(c.peer_address()))
        .ok_or(PeerManagerError::InvalidState)?;
    if let Some(peer) = peer {
        BONDS.lock(|b| b.borrow_mut().remove(peer))?;
        flash::request(FlashJob::Save);
        info!("platform: keys of {} dropped for re-pairing", peer);
    }
    Ok(())
}

/// Sense a low level on `pin` (button to ground, internal pull-up).
fn arm_wakeup(pin: usize) {
    use embassy_nrf::pac::gpio::vals;

    embassy_nrf::pac::P0.pin_cnf(pin).write(|w| {
        w.set_dir(vals::Dir::INPUT);
        w.set_input(vals::Input::CONNECT);
        w.set_pull(vals::Pull::PULLUP);
        w.set_sense(vals::Sense::LOW);
    });
}

impl Timers for Nrf52 {
    fn start(&mut self, id: TimerId, delay_ms: u32) -> Result<(), TimerError> {
        timers::command(id, TimerCommand::Start { delay_ms });
        Ok(())
    }

    fn stop(&mut self, id: TimerId) {
        timers::command(id, TimerCommand::Stop);
    }
}

impl Power for Nrf52 {
    fn log_pending(&self) -> bool {
        // defmt-rtt writes synchronously.
        false
    }

    async fn wait_for_event(&mut self) {
        // The executor sleeps in WFE, which the SoftDevice allows in
        // place of sd_app_evt_wait.
        let _ = select(EVENTS.wait(), SAMPLE_READY.wait()).await;
    }
}
