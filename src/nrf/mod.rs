//! nRF52832 + SoftDevice S132 implementation of the device ports.
//!
//! Interrupt-side producers (SoftDevice runtime, GPIOTE, timers) only
//! ever post into [`EVENTS`]; the main loop in `main.rs` is the single
//! consumer. Everything the library asks of the hardware goes through
//! [`platform::Nrf52`].
//!
//! Tasks spawned by `main.rs`:
//!   - `softdevice::softdevice_task` - SoftDevice event pump
//!   - `radio::radio_task`           - advertising and the live link
//!   - `flash::flash_task`           - bond store persistence
//!   - `timers::timer_task` (×2)     - connection-parameter and battery timers
//!   - `ui::buttons::button_task` (×2), `ui::leds::led_task`

pub mod bonder;
pub mod flash;
pub mod platform;
pub mod radio;
pub mod sensor;
pub mod server;
pub mod softdevice;
pub mod timers;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

use crate::config::SCHED_QUEUE_SIZE;
use crate::scheduler::{Event, EventQueue};

/// Deferred-event queue between interrupt-side producers and the main
/// loop.
pub static EVENTS: EventQueue<CriticalSectionRawMutex, SCHED_QUEUE_SIZE> = EventQueue::new();

/// Queue an event for the main loop. A full queue is counted by
/// [`EVENTS`] and turned into a reset at the next drain.
pub(crate) fn post(event: Event) {
    if EVENTS.post(event).is_err() {
        warn!("events: queue full, dropped {}", EVENTS.dropped());
    }
}
