//! Status LEDs (active-low).
//!
//! LED 1 blinks while advertising, at a rate that tells the mode apart.
//! LED 2 is on while connected.

use embassy_futures::select::{select, Either};
use embassy_nrf::gpio::Output;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Timer};

use crate::ui::{Indication, LedPattern};

static INDICATION: Signal<CriticalSectionRawMutex, Indication> = Signal::new();

pub fn show(indication: Indication) {
    INDICATION.signal(indication);
}

#[embassy_executor::task]
pub async fn led_task(mut led1: Output<'static>, mut led2: Output<'static>) -> ! {
    let mut current = Indication::Idle;
    loop {
        led1.set_high();
        led2.set_high();
        match current.pattern() {
            LedPattern::Off => current = INDICATION.wait().await,
            LedPattern::Solid => {
                led2.set_low();
                current = INDICATION.wait().await;
            }
            LedPattern::Blink { on_ms, off_ms } => {
                current = loop {
                    led1.set_low();
                    if let Some(next) = hold(on_ms).await {
                        break next;
                    }
                    led1.set_high();
                    if let Some(next) = hold(off_ms).await {
                        break next;
                    }
                };
            }
        }
        trace!("leds: {}", current);
    }
}

/// Wait `ms`, or return early with a new indication.
async fn hold(ms: u32) -> Option<Indication> {
    match select(
        Timer::after(Duration::from_millis(u64::from(ms))),
        INDICATION.wait(),
    )
    .await
    {
        Either::First(()) => None,
        Either::Second(next) => Some(next),
    }
}
