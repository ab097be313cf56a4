//! Button meaning by connection state.
//!
//! While advertising, a short press of button 1 puts the device to
//! sleep and a long press of button 2 switches the whitelist filter off.
//! While connected, a long press of button 1 drops the link. Every other
//! combination is ignored.

use super::{BoardEvent, Button, ButtonPress};
use crate::ble::BleEvent;

/// Board-input stage of the BLE dispatch chain.
#[derive(Debug, Default)]
pub struct BoardInput {
    connected: bool,
}

impl BoardInput {
    pub const fn new() -> Self {
        Self { connected: false }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn on_ble_event(&mut self, event: &BleEvent) {
        match event {
            BleEvent::Connected { .. } => self.connected = true,
            BleEvent::Disconnected { .. } => self.connected = false,
            _ => {}
        }
    }

    /// Map a press to a board request, if it means anything right now.
    pub fn translate(&self, press: ButtonPress) -> Option<BoardEvent> {
        match (press.button, press.long, self.connected) {
            (Button::Primary, false, false) => Some(BoardEvent::Sleep),
            (Button::Primary, true, true) => Some(BoardEvent::Disconnect),
            (Button::Secondary, true, false) => Some(BoardEvent::WhitelistOff),
            _ => None,
        }
    }
}
