//! GPIO button input with async debouncing.
//!
//! Two physical buttons (active-low with internal pull-up). Each is
//! handled by its own task that waits for a press, debounces it, times
//! the hold and posts an [`Event::Button`] to the main loop. Mapping a
//! press to an action happens there, since it depends on link state.

use embassy_nrf::gpio::{AnyPin, Input, Pin, Pull};
use embassy_nrf::Peripheral;
use embassy_time::{Duration, Instant, Timer};

use crate::config::BUTTON_DEBOUNCE_MS;
use crate::nrf::post;
use crate::scheduler::Event;
use crate::ui::{Button, ButtonPress};

#[embassy_executor::task(pool_size = 2)]
pub async fn button_task(pin: AnyPin, button: Button) -> ! {
    let mut btn = Input::new(pin, Pull::Up);

    loop {
        btn.wait_for_falling_edge().await;
        Timer::after(Duration::from_millis(BUTTON_DEBOUNCE_MS)).await;
        if btn.is_high() {
            continue;
        }
        let pressed_at = Instant::now();

        btn.wait_for_rising_edge().await;
        let held_ms = pressed_at.elapsed().as_millis() + BUTTON_DEBOUNCE_MS;
        let press = ButtonPress::from_hold(button, held_ms);
        debug!("buttons: {}", press);
        post(Event::Button(press));

        // Release bounce.
        Timer::after(Duration::from_millis(BUTTON_DEBOUNCE_MS)).await;
    }
}

/// True when `pin` reads pressed right now. Used once at boot.
pub fn is_held(pin: impl Peripheral<P = impl Pin>) -> bool {
    let btn = Input::new(pin, Pull::Up);
    btn.is_low()
}
