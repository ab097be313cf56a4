//! Advertising mode controller.
//!
//! Walks the advertising ladder
//!
//! ```text
//! Directed → FastFiltered → FastOpen → SlowFiltered → SlowOpen → Idle (sleep)
//! ```
//!
//! one rung per timeout. Filtered rungs are skipped while the whitelist
//! is empty (or the filter was switched off for this session); the
//! directed rung is skipped when no bonded peer address is available.
//! Each rung that is actually entered costs exactly one radio command
//! and one indication; `Idle` issues no radio command and puts the
//! device to sleep.

use heapless::Vec;

use super::{BleEvent, Radio};
use crate::config::{
    ADV_DIRECTED_ENABLED, ADV_DIRECTED_TIMEOUT_MS, ADV_FAST_INTERVAL, ADV_FAST_TIMEOUT_SECS,
    ADV_SLOW_INTERVAL, ADV_SLOW_TIMEOUT_SECS, ADV_WHITELIST_ENABLED, WHITELIST_CAPACITY,
};
use crate::error::{Fatal, PeerManagerError, RadioError};
use crate::security::whitelist::Whitelist;
use crate::security::{PeerAddress, PeerId, PeerManager};
use crate::ui::{Board, Indication};

/// Advertising modes, in ladder order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdvMode {
    /// Not advertising.
    Idle,
    /// High-duty directed advertising to the last bonded peer.
    Directed,
    /// Fast advertising, whitelist filter on.
    FastFiltered,
    /// Fast advertising, anyone may connect.
    FastOpen,
    /// Slow advertising, whitelist filter on.
    SlowFiltered,
    /// Slow advertising, anyone may connect.
    SlowOpen,
}

impl AdvMode {
    /// Rung entered when this one times out.
    pub fn next(self) -> AdvMode {
        match self {
            AdvMode::Directed => AdvMode::FastFiltered,
            AdvMode::FastFiltered => AdvMode::FastOpen,
            AdvMode::FastOpen => AdvMode::SlowFiltered,
            AdvMode::SlowFiltered => AdvMode::SlowOpen,
            AdvMode::SlowOpen | AdvMode::Idle => AdvMode::Idle,
        }
    }

    pub fn is_filtered(self) -> bool {
        matches!(self, AdvMode::FastFiltered | AdvMode::SlowFiltered)
    }

    /// What the LEDs show while in this mode.
    pub fn indication(self) -> Indication {
        match self {
            AdvMode::Idle => Indication::Idle,
            AdvMode::Directed => Indication::AdvertisingDirected,
            AdvMode::FastFiltered | AdvMode::SlowFiltered => Indication::AdvertisingWhitelist,
            AdvMode::FastOpen => Indication::Advertising,
            AdvMode::SlowOpen => Indication::AdvertisingSlow,
        }
    }

    /// Radio interval (0.625 ms units) and phase length (ms).
    fn timing(self) -> (u16, u32) {
        match self {
            AdvMode::Directed => (0, ADV_DIRECTED_TIMEOUT_MS as u32),
            AdvMode::FastFiltered | AdvMode::FastOpen => {
                (ADV_FAST_INTERVAL, ADV_FAST_TIMEOUT_SECS as u32 * 1000)
            }
            AdvMode::SlowFiltered | AdvMode::SlowOpen => {
                (ADV_SLOW_INTERVAL, ADV_SLOW_TIMEOUT_SECS as u32 * 1000)
            }
            AdvMode::Idle => (0, 0),
        }
    }
}

/// One "start advertising" radio command.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdvParams {
    pub mode: AdvMode,
    /// Advertising interval (0.625 ms units); unused for directed.
    pub interval: u16,
    /// Phase length; the radio reports a timeout when it runs out.
    pub timeout_ms: u32,
    /// Target of directed advertising.
    pub peer: Option<PeerAddress>,
    /// Accept-list for filtered modes; empty otherwise.
    pub whitelist: Vec<PeerId, WHITELIST_CAPACITY>,
}

/// Where a new advertising session begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionStart {
    /// Power-up or bond erase: start at fast advertising.
    Boot,
    /// After a disconnect: try directed advertising first.
    Reconnect,
}

pub struct AdvertisingController {
    mode: AdvMode,
    whitelist_allowed: bool,
}

impl AdvertisingController {
    pub const fn new() -> Self {
        Self {
            mode: AdvMode::Idle,
            whitelist_allowed: ADV_WHITELIST_ENABLED,
        }
    }

    pub fn mode(&self) -> AdvMode {
        self.mode
    }

    pub fn is_advertising(&self) -> bool {
        self.mode != AdvMode::Idle
    }

    /// Whether filtered rungs may still be used in this session.
    pub fn whitelist_allowed(&self) -> bool {
        self.whitelist_allowed
    }

    /// Begin a new session.
    pub fn start<P>(
        &mut self,
        from: SessionStart,
        whitelist: &Whitelist,
        last_peer: Option<PeerId>,
        p: &mut P,
    ) -> Result<(), Fatal>
    where
        P: Radio + PeerManager + Board,
    {
        self.whitelist_allowed = ADV_WHITELIST_ENABLED;
        let first = match from {
            SessionStart::Reconnect if ADV_DIRECTED_ENABLED => AdvMode::Directed,
            _ => AdvMode::FastFiltered,
        };
        info!("adv: session start ({})", from);
        self.enter(first, whitelist, last_peer, p)
    }

    /// Advertising-stage handler for radio events.
    pub fn on_ble_event<P>(
        &mut self,
        event: &BleEvent,
        whitelist: &Whitelist,
        last_peer: Option<PeerId>,
        p: &mut P,
    ) -> Result<(), Fatal>
    where
        P: Radio + PeerManager + Board,
    {
        match event {
            BleEvent::Connected { .. } => {
                if self.mode != AdvMode::Idle {
                    debug!("adv: {} ended by connection", self.mode);
                }
                self.mode = AdvMode::Idle;
                Ok(())
            }
            BleEvent::Disconnected { .. } => {
                // Reuses the whitelist the connection stage just published.
                self.start(SessionStart::Reconnect, whitelist, last_peer, p)
            }
            BleEvent::AdvertisingTimeout => {
                if self.mode == AdvMode::Idle {
                    warn!("adv: timeout while not advertising");
                    return Ok(());
                }
                let next = self.mode.next();
                debug!("adv: {} timed out", self.mode);
                self.enter(next, whitelist, last_peer, p)
            }
            _ => Ok(()),
        }
    }

    /// Switch the filter off for the rest of the session and restart
    /// the current phase unfiltered.
    pub fn restart_without_whitelist<P>(
        &mut self,
        whitelist: &Whitelist,
        p: &mut P,
    ) -> Result<(), Fatal>
    where
        P: Radio + PeerManager + Board,
    {
        self.whitelist_allowed = false;
        match self.mode {
            AdvMode::FastFiltered => self.enter(AdvMode::FastOpen, whitelist, None, p),
            AdvMode::SlowFiltered => self.enter(AdvMode::SlowOpen, whitelist, None, p),
            _ => Ok(()),
        }
    }

    /// Stop advertising without going through the ladder.
    pub fn stop<R: Radio>(&mut self, radio: &mut R) -> Result<(), Fatal> {
        if self.mode == AdvMode::Idle {
            return Ok(());
        }
        self.mode = AdvMode::Idle;
        match radio.stop_advertising() {
            Ok(()) | Err(RadioError::InvalidState) => Ok(()),
            Err(e) => Err(Fatal::Radio(e)),
        }
    }

    /// Enter `mode`, falling through rungs that cannot run right now.
    fn enter<P>(
        &mut self,
        mut mode: AdvMode,
        whitelist: &Whitelist,
        last_peer: Option<PeerId>,
        p: &mut P,
    ) -> Result<(), Fatal>
    where
        P: Radio + PeerManager + Board,
    {
        loop {
            let (interval, timeout_ms) = mode.timing();
            let mut params = AdvParams {
                mode,
                interval,
                timeout_ms,
                peer: None,
                whitelist: Vec::new(),
            };

            match mode {
                AdvMode::Idle => {
                    self.mode = AdvMode::Idle;
                    info!("adv: idle, entering sleep");
                    p.indicate(Indication::Idle);
                    p.enter_sleep();
                    return Ok(());
                }
                AdvMode::Directed => match peer_address_reply(last_peer, p)? {
                    Some(addr) => params.peer = Some(addr),
                    None => {
                        debug!("adv: no bonded peer address, skipping directed");
                        mode = mode.next();
                        continue;
                    }
                },
                AdvMode::FastFiltered | AdvMode::SlowFiltered => {
                    // Whitelist request: contents as of now.
                    let peers = whitelist.get(WHITELIST_CAPACITY);
                    if !self.whitelist_allowed || peers.is_empty() {
                        mode = mode.next();
                        continue;
                    }
                    // `peers` is bounded by the same capacity.
                    let _ = params.whitelist.extend_from_slice(peers);
                }
                AdvMode::FastOpen | AdvMode::SlowOpen => {}
            }

            p.start_advertising(&params)?;
            self.mode = mode;
            p.indicate(mode.indication());
            info!("adv: {}", mode);
            return Ok(());
        }
    }
}

impl Default for AdvertisingController {
    fn default() -> Self {
        Self::new()
    }
}

/// Peer-address request: the last bonded peer's identity address, or
/// `None` to decline so the ladder falls through to undirected modes.
fn peer_address_reply<P: PeerManager + ?Sized>(
    last_peer: Option<PeerId>,
    pm: &P,
) -> Result<Option<PeerAddress>, Fatal> {
    let Some(peer) = last_peer else {
        return Ok(None);
    };
    match pm.peer_address(peer) {
        Ok(addr) => Ok(Some(addr)),
        Err(PeerManagerError::NotFound) => Ok(None),
        Err(e) => Err(Fatal::BondingRecord(e)),
    }
}
