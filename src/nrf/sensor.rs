//! Hand-off from the motion driver to the main loop.
//!
//! The driver (outside this crate) calls [`on_sensor_data`] from its
//! interrupt/FIFO context; the main loop reads through [`SampleFeed`].

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;

use crate::config::SAMPLE_QUEUE_SIZE;
use crate::sensor::{MotionSensor, Sample, SampleKind};

static SAMPLES: Channel<CriticalSectionRawMutex, Sample, SAMPLE_QUEUE_SIZE> = Channel::new();

/// Raised with every new sample so the idle wait returns.
pub(crate) static SAMPLE_READY: Signal<CriticalSectionRawMutex, ()> = Signal::new();

/// Driver callback: packet type, Q16.16 vector, accuracy, timestamp.
/// When the main loop falls behind the newest sample is dropped.
pub fn on_sensor_data(packet_type: u8, data: [i32; 4], accuracy: i8, timestamp: u32) {
    let Some(kind) = SampleKind::from_packet_type(packet_type) else {
        debug!("sensor: unknown packet type {}", packet_type);
        return;
    };
    let sample = Sample {
        kind,
        data,
        accuracy,
        timestamp,
    };
    if SAMPLES.try_send(sample).is_err() {
        trace!("sensor: feed full, dropping {}", kind);
    }
    SAMPLE_READY.signal(());
}

/// Main-loop side of the sample channel.
pub struct SampleFeed;

impl MotionSensor for SampleFeed {
    fn has_new_data(&self) -> bool {
        !SAMPLES.is_empty()
    }

    fn poll(&mut self) -> Option<Sample> {
        SAMPLES.try_receive().ok()
    }

    fn before_sleep(&mut self) {
        SAMPLE_READY.reset();
    }
}
