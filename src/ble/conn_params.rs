//! Connection-parameter negotiation.
//!
//! The central picks the initial parameters. If its interval is outside
//! the preferred window, the device asks for the preferred set after
//! `FIRST_CONN_PARAMS_UPDATE_DELAY_MS`, then every
//! `NEXT_CONN_PARAMS_UPDATE_DELAY_MS` while the central keeps answering
//! with something unacceptable, at most `MAX_CONN_PARAMS_UPDATE_COUNT`
//! times. Giving up leaves the link as it is.

use super::{BleEvent, ConnHandle, ConnParams, Radio};
use crate::config::{
    CONN_SUP_TIMEOUT, FIRST_CONN_PARAMS_UPDATE_DELAY_MS, MAX_CONN_INTERVAL,
    MAX_CONN_PARAMS_UPDATE_COUNT, MIN_CONN_INTERVAL, NEXT_CONN_PARAMS_UPDATE_DELAY_MS,
    SLAVE_LATENCY,
};
use crate::error::{Fatal, RadioError};
use crate::scheduler::{TimerId, Timers};

/// Parameters this peripheral asks for (also the GAP PPCP value).
pub const PREFERRED_CONN_PARAMS: ConnParams = ConnParams {
    min_interval: MIN_CONN_INTERVAL,
    max_interval: MAX_CONN_INTERVAL,
    slave_latency: SLAVE_LATENCY,
    supervision_timeout: CONN_SUP_TIMEOUT,
};

/// Whether the central's choice is good enough. Only the interval is
/// checked; latency and timeout are left to the central.
pub fn is_acceptable(params: &ConnParams) -> bool {
    (MIN_CONN_INTERVAL..=MAX_CONN_INTERVAL).contains(&params.max_interval)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum State {
    Idle,
    /// Waiting for the update timer.
    Pending,
    /// Request sent, waiting for the central.
    Requested,
    Done,
}

pub struct ConnParamsNegotiator {
    handle: ConnHandle,
    attempts: u8,
    state: State,
}

impl ConnParamsNegotiator {
    pub const fn new() -> Self {
        Self {
            handle: ConnHandle::INVALID,
            attempts: 0,
            state: State::Idle,
        }
    }

    pub fn attempts(&self) -> u8 {
        self.attempts
    }

    /// True once the central settled on acceptable parameters or the
    /// negotiator gave up.
    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    pub fn on_ble_event<T: Timers>(&mut self, event: &BleEvent, timers: &mut T) -> Result<(), Fatal> {
        match event {
            BleEvent::Connected { handle, params } => {
                self.handle = *handle;
                self.attempts = 0;
                if is_acceptable(params) {
                    self.state = State::Done;
                } else {
                    self.arm(FIRST_CONN_PARAMS_UPDATE_DELAY_MS, timers)?;
                }
            }
            BleEvent::ConnParamUpdate { params, .. } => {
                if self.state == State::Idle {
                    return Ok(());
                }
                if is_acceptable(params) {
                    debug!("conn params: accepted interval {}", params.max_interval);
                    timers.stop(TimerId::ConnParams);
                    self.state = State::Done;
                } else if self.attempts < MAX_CONN_PARAMS_UPDATE_COUNT {
                    self.arm(NEXT_CONN_PARAMS_UPDATE_DELAY_MS, timers)?;
                } else {
                    warn!("conn params: central refused {} requests, keeping its set", self.attempts);
                    timers.stop(TimerId::ConnParams);
                    self.state = State::Done;
                }
            }
            BleEvent::Disconnected { .. } => {
                timers.stop(TimerId::ConnParams);
                *self = Self::new();
            }
            _ => {}
        }
        Ok(())
    }

    /// Update timer expired.
    pub fn on_timer<R: Radio>(&mut self, radio: &mut R) -> Result<(), Fatal> {
        if self.state != State::Pending || !self.handle.is_valid() {
            return Ok(());
        }
        self.attempts += 1;
        self.state = State::Requested;
        info!("conn params: request {} of {}", self.attempts, MAX_CONN_PARAMS_UPDATE_COUNT);
        match radio.update_conn_params(self.handle, &PREFERRED_CONN_PARAMS) {
            Ok(()) | Err(RadioError::InvalidState) | Err(RadioError::Busy) => Ok(()),
            Err(e) => Err(Fatal::Radio(e)),
        }
    }

    fn arm<T: Timers>(&mut self, delay_ms: u32, timers: &mut T) -> Result<(), Fatal> {
        timers.start(TimerId::ConnParams, delay_ms)?;
        self.state = State::Pending;
        Ok(())
    }
}

impl Default for ConnParamsNegotiator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{central_params, Command, MockPlatform};

    const H: ConnHandle = ConnHandle(0);

    fn connected(params: ConnParams) -> BleEvent {
        BleEvent::Connected { handle: H, params }
    }

    fn update(params: ConnParams) -> BleEvent {
        BleEvent::ConnParamUpdate { handle: H, params }
    }

    #[test]
    fn preferred_params_are_acceptable() {
        assert!(is_acceptable(&PREFERRED_CONN_PARAMS));
        assert!(!is_acceptable(&central_params()));
    }

    #[test]
    fn acceptable_central_choice_needs_no_update() {
        let mut p = MockPlatform::new();
        let mut neg = ConnParamsNegotiator::new();
        neg.on_ble_event(&connected(PREFERRED_CONN_PARAMS), &mut p).unwrap();
        assert!(neg.is_done());
        assert!(p.commands.is_empty());
    }

    #[test]
    fn first_request_after_first_delay() {
        let mut p = MockPlatform::new();
        let mut neg = ConnParamsNegotiator::new();
        neg.on_ble_event(&connected(central_params()), &mut p).unwrap();
        assert_eq!(
            p.commands,
            std::vec![Command::StartTimer(TimerId::ConnParams, FIRST_CONN_PARAMS_UPDATE_DELAY_MS)]
        );
        p.commands.clear();
        neg.on_timer(&mut p).unwrap();
        assert_eq!(
            p.commands,
            std::vec![Command::UpdateConnParams(H, PREFERRED_CONN_PARAMS)]
        );
        assert_eq!(neg.attempts(), 1);
    }

    #[test]
    fn gives_up_after_max_attempts_without_disconnecting() {
        let mut p = MockPlatform::new();
        let mut neg = ConnParamsNegotiator::new();
        neg.on_ble_event(&connected(central_params()), &mut p).unwrap();
        for _ in 0..MAX_CONN_PARAMS_UPDATE_COUNT {
            neg.on_timer(&mut p).unwrap();
            neg.on_ble_event(&update(central_params()), &mut p).unwrap();
        }
        assert!(neg.is_done());
        assert_eq!(neg.attempts(), MAX_CONN_PARAMS_UPDATE_COUNT);
        // A stray expiry after giving up sends nothing.
        neg.on_timer(&mut p).unwrap();
        let requests = p
            .commands
            .iter()
            .filter(|c| matches!(c, Command::UpdateConnParams(..)))
            .count();
        assert_eq!(requests, MAX_CONN_PARAMS_UPDATE_COUNT as usize);
        assert!(!p.commands.iter().any(|c| matches!(c, Command::Disconnect(..))));
        let retries = p
            .commands
            .iter()
            .filter(|c| **c == Command::StartTimer(TimerId::ConnParams, NEXT_CONN_PARAMS_UPDATE_DELAY_MS))
            .count();
        assert_eq!(retries, MAX_CONN_PARAMS_UPDATE_COUNT as usize - 1);
    }

    #[test]
    fn accepted_update_stops_negotiation() {
        let mut p = MockPlatform::new();
        let mut neg = ConnParamsNegotiator::new();
        neg.on_ble_event(&connected(central_params()), &mut p).unwrap();
        neg.on_timer(&mut p).unwrap();
        neg.on_ble_event(&update(PREFERRED_CONN_PARAMS), &mut p).unwrap();
        assert!(neg.is_done());
        assert_eq!(p.commands.last(), Some(&Command::StopTimer(TimerId::ConnParams)));
    }

    #[test]
    fn disconnect_resets_and_stops_timer() {
        let mut p = MockPlatform::new();
        let mut neg = ConnParamsNegotiator::new();
        neg.on_ble_event(&connected(central_params()), &mut p).unwrap();
        neg.on_ble_event(
            &BleEvent::Disconnected {
                handle: H,
                reason: 0x08,
            },
            &mut p,
        )
        .unwrap();
        assert_eq!(p.commands.last(), Some(&Command::StopTimer(TimerId::ConnParams)));
        p.commands.clear();
        neg.on_timer(&mut p).unwrap();
        assert!(p.commands.is_empty());
    }
}
