//! Deferred-event scheduler.
//!
//! Radio, peer-manager, timer and button callbacks run in interrupt or
//! task context. They never touch device state directly: each one posts
//! an [`Event`] into the [`EventQueue`] and the main loop drains it in
//! FIFO order. A full queue is not recoverable - the lost event may have
//! been a disconnect - so the next drain resets the device.

use core::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use embassy_sync::signal::Signal;

use crate::ble::BleEvent;
use crate::device::{Device, Platform};
use crate::error::{Fatal, StorageError, TimerError};
use crate::power::{may_idle, Power};
use crate::security::SecurityEvent;
use crate::sensor::MotionSensor;
use crate::ui::{BoardEvent, ButtonPress};

/// Application timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerId {
    /// Next connection-parameter update request.
    ConnParams,
    /// Next simulated battery measurement.
    BatteryMeasurement,
}

/// Single-shot application timers. Expiry is posted as
/// [`Event::Timer`].
pub trait Timers {
    /// Arm (or re-arm) `id` to fire once after `delay_ms`.
    fn start(&mut self, id: TimerId, delay_ms: u32) -> Result<(), TimerError>;

    /// Disarm `id`; a timer that is not running is fine.
    fn stop(&mut self, id: TimerId);
}

/// Everything the main loop reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    Ble(BleEvent),
    Security(SecurityEvent),
    Timer(TimerId),
    /// Raw press, mapped by connection state at dispatch time.
    Button(ButtonPress),
    /// Board request that needs no mapping (boot-time bond erase).
    Board(BoardEvent),
    /// A deferred flash write failed.
    Storage(StorageError),
}

/// The queue had no room; the event was dropped and counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct QueueFull;

/// Bounded multi-producer queue drained by the main loop.
pub struct EventQueue<M: RawMutex, const N: usize> {
    channel: Channel<M, Event, N>,
    wake: Signal<M, ()>,
    dropped: AtomicU32,
}

impl<M: RawMutex, const N: usize> EventQueue<M, N> {
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
            wake: Signal::new(),
            dropped: AtomicU32::new(0),
        }
    }

    /// Enqueue from any context. Never blocks.
    pub fn post(&self, event: Event) -> Result<(), QueueFull> {
        match self.channel.try_send(event) {
            Ok(()) => {
                self.wake.signal(());
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                // Wake the loop so it notices the overflow.
                self.wake.signal(());
                Err(QueueFull)
            }
        }
    }

    /// Oldest queued event.
    pub fn take(&self) -> Option<Event> {
        self.channel.try_receive().ok()
    }

    /// Events lost to overflow since boot.
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }

    pub fn len(&self) -> usize {
        self.channel.len()
    }

    /// Resolve once something was posted since the last wait.
    pub async fn wait(&self) {
        if !self.channel.is_empty() {
            self.wake.reset();
            return;
        }
        self.wake.wait().await;
    }
}

impl<M: RawMutex, const N: usize> Default for EventQueue<M, N> {
    fn default() -> Self {
        Self::new()
    }
}

/// The cooperative main loop: drain, then idle or poll the sensor.
pub struct MainLoop<'q, M: RawMutex, const N: usize> {
    queue: &'q EventQueue<M, N>,
}

impl<'q, M: RawMutex, const N: usize> MainLoop<'q, M, N> {
    pub fn new(queue: &'q EventQueue<M, N>) -> Self {
        Self { queue }
    }

    /// Dispatch every queued event in order. Returns how many ran.
    ///
    /// An overflow resets the device before anything else is handled.
    pub fn drain<P: Platform>(&mut self, device: &mut Device, p: &mut P) -> usize {
        let mut handled = 0;
        loop {
            let dropped = self.queue.dropped();
            if dropped > 0 {
                error!("sched: {} events lost to queue overflow", dropped);
                p.reset(Fatal::QueueOverflow { dropped });
                return handled;
            }
            let Some(event) = self.queue.take() else {
                return handled;
            };
            device.dispatch(event, p);
            handled += 1;
        }
    }

    /// One main-loop iteration.
    ///
    /// The sensor is given its pre-sleep hook after the drain. The loop
    /// only idles when no deferred log output is pending and the sensor
    /// has nothing buffered; otherwise it stays awake and forwards
    /// whatever samples the driver produces.
    pub async fn step<P, S>(&mut self, device: &mut Device, p: &mut P, sensor: &mut S)
    where
        P: Platform + Power,
        S: MotionSensor,
    {
        self.drain(device, p);

        sensor.before_sleep();
        if may_idle(p.log_pending(), sensor.has_new_data()) {
            p.wait_for_event().await;
            return;
        }

        sensor.after_sleep();
        while let Some(sample) = sensor.poll() {
            device.on_sample(&sample, p);
        }
    }

    pub async fn run<P, S>(&mut self, device: &mut Device, p: &mut P, sensor: &mut S) -> !
    where
        P: Platform + Power,
        S: MotionSensor,
    {
        loop {
            self.step(device, p, sensor).await;
        }
    }
}
