//! User interface subsystem - LEDs + physical buttons.
//!
//! The board shows one [`Indication`] at a time and reports button
//! presses. What a press means depends on whether a central is
//! connected; [`input_logic::BoardInput`] tracks that as a stage of the
//! BLE dispatch chain.
//!
//! ## Components
//!
//! - **LEDs**: advertising / connected status (PCA10040 LED 1 and 2)
//! - **Buttons**: 2 tactile switches with debouncing and long-press
//!   detection

#[cfg(feature = "embedded")]
pub mod buttons;
pub mod input_logic;
#[cfg(feature = "embedded")]
pub mod leds;

use crate::config::BUTTON_LONG_PRESS_MS;
use crate::error::Fatal;

/// Status shown on the board LEDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Indication {
    /// Nothing going on (about to sleep, or link just dropped).
    Idle,
    /// Directed advertising to a bonded peer.
    AdvertisingDirected,
    /// Fast undirected advertising.
    Advertising,
    /// Advertising with the whitelist filter.
    AdvertisingWhitelist,
    /// Slow undirected advertising.
    AdvertisingSlow,
    /// A central is connected.
    Connected,
}

/// What LED 1 (advertising) and LED 2 (connected) do for an
/// indication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LedPattern {
    Off,
    /// LED 1 blinks with the given on/off times (ms).
    Blink { on_ms: u32, off_ms: u32 },
    /// LED 2 steady on.
    Solid,
}

impl Indication {
    pub fn pattern(self) -> LedPattern {
        match self {
            Indication::Idle => LedPattern::Off,
            Indication::AdvertisingDirected => LedPattern::Blink { on_ms: 50, off_ms: 50 },
            Indication::Advertising => LedPattern::Blink { on_ms: 200, off_ms: 200 },
            Indication::AdvertisingWhitelist => LedPattern::Blink { on_ms: 100, off_ms: 900 },
            Indication::AdvertisingSlow => LedPattern::Blink { on_ms: 200, off_ms: 1800 },
            Indication::Connected => LedPattern::Solid,
        }
    }
}

/// Physical buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Button {
    /// Button 1: sleep while advertising, disconnect (long) while connected.
    Primary,
    /// Button 2: whitelist off (long) while advertising; held at reset it
    /// erases all bonds.
    Secondary,
}

/// A debounced button press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ButtonPress {
    pub button: Button,
    /// Held for at least `BUTTON_LONG_PRESS_MS`.
    pub long: bool,
}

impl ButtonPress {
    /// Classify a press by how long the button was held.
    pub fn from_hold(button: Button, held_ms: u64) -> Self {
        Self {
            button,
            long: held_ms >= BUTTON_LONG_PRESS_MS,
        }
    }
}

/// Board requests, after mapping presses by connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BoardEvent {
    /// Stop advertising and enter system-off.
    Sleep,
    /// Drop the current link.
    Disconnect,
    /// Advertise without the whitelist for the rest of this session.
    WhitelistOff,
    /// Delete every bond (boot-time request).
    EraseBonds,
}

/// Board outputs.
pub trait Board {
    /// Show `indication` on the LEDs.
    fn indicate(&mut self, indication: Indication);

    /// Enter the lowest-power sleep state. Waking up (button) restarts
    /// the firmware.
    fn enter_sleep(&mut self);

    /// Controlled reset after a fatal error.
    fn reset(&mut self, cause: Fatal);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_advertising_indication_blinks_led1() {
        for i in [
            Indication::AdvertisingDirected,
            Indication::Advertising,
            Indication::AdvertisingWhitelist,
            Indication::AdvertisingSlow,
        ] {
            assert!(matches!(i.pattern(), LedPattern::Blink { .. }), "{:?}", i);
        }
        assert_eq!(Indication::Connected.pattern(), LedPattern::Solid);
        assert_eq!(Indication::Idle.pattern(), LedPattern::Off);
    }

    #[test]
    fn hold_time_decides_long_press() {
        assert!(!ButtonPress::from_hold(Button::Primary, BUTTON_LONG_PRESS_MS - 1).long);
        assert!(ButtonPress::from_hold(Button::Primary, BUTTON_LONG_PRESS_MS).long);
    }
}
