//! Application timers on `embassy-time`.
//!
//! One task per [`TimerId`]. Arming replaces any pending expiry; expiry
//! is posted as [`Event::Timer`].

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Timer};

use super::post;
use crate::scheduler::{Event, TimerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerCommand {
    Start { delay_ms: u32 },
    Stop,
}

static CONN_PARAMS: Signal<CriticalSectionRawMutex, TimerCommand> = Signal::new();
static BATTERY: Signal<CriticalSectionRawMutex, TimerCommand> = Signal::new();

fn signal(id: TimerId) -> &'static Signal<CriticalSectionRawMutex, TimerCommand> {
    match id {
        TimerId::ConnParams => &CONN_PARAMS,
        TimerId::BatteryMeasurement => &BATTERY,
    }
}

pub fn command(id: TimerId, cmd: TimerCommand) {
    signal(id).signal(cmd);
}

#[embassy_executor::task(pool_size = 2)]
pub async fn timer_task(id: TimerId) -> ! {
    let commands = signal(id);
    let mut next = commands.wait().await;
    loop {
        next = match next {
            TimerCommand::Stop => commands.wait().await,
            TimerCommand::Start { delay_ms } => {
                let expiry = Timer::after(Duration::from_millis(u64::from(delay_ms)));
                match select(expiry, commands.wait()).await {
                    Either::First(()) => {
                        trace!("timers: {} expired", id);
                        post(Event::Timer(id));
                        commands.wait().await
                    }
                    Either::Second(cmd) => cmd,
                }
            }
        };
    }
}
