//! Idle management.
//!
//! The nRF52832 has two sleep levels the firmware uses:
//! - System ON idle: the CPU waits for an event between main-loop
//!   iterations (`sd_app_evt_wait` under the SoftDevice),
//! - System OFF: entered through [`crate::ui::Board::enter_sleep`] when
//!   advertising runs out or the user asks for it; a button press wakes
//!   the chip through reset.
//!
//! This module owns the first one.

/// Platform side of the idle wait.
#[allow(async_fn_in_trait)]
pub trait Power {
    /// Deferred log output is still waiting to be flushed.
    fn log_pending(&self) -> bool;

    /// Sleep until the next event (queue post, sensor interrupt, radio
    /// activity).
    async fn wait_for_event(&mut self);
}

/// Whether the main loop may idle: only with no log output pending and
/// no sensor data left to process.
pub fn may_idle(log_pending: bool, sensor_has_data: bool) -> bool {
    !log_pending && !sensor_has_data
}
