//! Orientation samples and the notification pipeline.
//!
//! The motion driver delivers fused samples as Q16.16 fixed-point
//! vectors. Only quaternions are forwarded: the x, y and z components
//! each go out as their own 2-byte Q2.14 characteristic notification.
//! Samples of other kinds are accepted and dropped.

use fixed::types::{I16F16, I2F14};

use crate::ble::connection::Connection;
use crate::ble::{Attribute, Radio};
use crate::error::NotifyError;
use crate::security::SecurityStatus;

/// Packet kinds produced by the motion driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SampleKind {
    Accel,
    Gyro,
    Compass,
    Quaternion,
    Euler,
    RotationMatrix,
    Heading,
    LinearAccel,
}

impl SampleKind {
    /// Decode the driver's packet type byte.
    pub fn from_packet_type(t: u8) -> Option<Self> {
        match t {
            0 => Some(SampleKind::Accel),
            1 => Some(SampleKind::Gyro),
            2 => Some(SampleKind::Compass),
            3 => Some(SampleKind::Quaternion),
            4 => Some(SampleKind::Euler),
            5 => Some(SampleKind::RotationMatrix),
            6 => Some(SampleKind::Heading),
            7 => Some(SampleKind::LinearAccel),
            _ => None,
        }
    }
}

/// One fused sample. Quaternions are `[w, x, y, z]`; 3-axis kinds use
/// the first three components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Sample {
    pub kind: SampleKind,
    /// Q16.16 fixed-point components.
    pub data: [i32; 4],
    pub accuracy: i8,
    pub timestamp: u32,
}

/// Link state that lets samples through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NotifyGate {
    /// Any live link, before or after encryption.
    Connected,
    /// Only encrypted links.
    Secured,
}

impl NotifyGate {
    pub fn admits(self, conn: &Connection) -> bool {
        match self {
            NotifyGate::Connected => conn.is_connected(),
            NotifyGate::Secured => {
                conn.is_connected() && conn.security() == SecurityStatus::Secured
            }
        }
    }
}

/// Driver side of the sensor: polled by the main loop around its idle
/// point.
pub trait MotionSensor {
    /// Whether the driver has unprocessed data (FIFO not drained).
    fn has_new_data(&self) -> bool;

    /// Next fused sample, if one is ready.
    fn poll(&mut self) -> Option<Sample>;

    /// Called before the idle decision.
    fn before_sleep(&mut self) {}

    /// Called when the main loop did not idle.
    fn after_sleep(&mut self) {}
}

/// Convert one Q16.16 component to the Q2.14 wire value (little-endian).
/// Values outside [-2, 2) saturate.
pub fn to_wire(component: i32) -> [u8; 2] {
    let q16 = I16F16::from_bits(component);
    I2F14::saturating_from_num(q16).to_bits().to_le_bytes()
}

const AXES: [Attribute; 3] = [
    Attribute::OrientationX,
    Attribute::OrientationY,
    Attribute::OrientationZ,
];

pub struct NotificationPipeline {
    gate: NotifyGate,
    sent: u32,
    dropped: u32,
}

impl NotificationPipeline {
    pub const fn new(gate: NotifyGate) -> Self {
        Self {
            gate,
            sent: 0,
            dropped: 0,
        }
    }

    pub fn gate(&self) -> NotifyGate {
        self.gate
    }

    /// Notifications accepted by the radio so far.
    pub fn sent(&self) -> u32 {
        self.sent
    }

    /// Notifications the radio refused so far.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    /// Forward `sample`; returns how many notifications were issued.
    ///
    /// Radio refusals never escalate: a fresher sample follows shortly.
    pub fn on_sample<R: Radio>(&mut self, sample: &Sample, conn: &Connection, radio: &mut R) -> usize {
        if sample.kind != SampleKind::Quaternion {
            trace!("sensor: dropping {}", sample.kind);
            return 0;
        }
        if !self.gate.admits(conn) {
            return 0;
        }

        trace!(
            "sensor: quat acc {} [{} {} {} {}]",
            sample.accuracy,
            sample.data[0],
            sample.data[1],
            sample.data[2],
            sample.data[3]
        );

        let handle = conn.handle();
        for (attribute, component) in AXES.iter().zip(&sample.data[1..]) {
            match radio.notify(handle, *attribute, &to_wire(*component)) {
                Ok(()) => self.sent = self.sent.wrapping_add(1),
                Err(e) => {
                    self.dropped = self.dropped.wrapping_add(1);
                    log_refusal(e);
                }
            }
        }
        AXES.len()
    }
}

fn log_refusal(e: NotifyError) {
    if e.is_transient() {
        trace!("sensor: notify skipped: {}", e);
    } else {
        warn!("sensor: notify failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::{BleEvent, ConnHandle};
    use crate::testing::{central_params, Command, MockPlatform};

    const ONE: i32 = 1 << 16;

    fn quat(w: i32, x: i32, y: i32, z: i32) -> Sample {
        Sample {
            kind: SampleKind::Quaternion,
            data: [w, x, y, z],
            accuracy: 3,
            timestamp: 1000,
        }
    }

    fn connected() -> Connection {
        let mut conn = Connection::new();
        conn.on_ble_event(&BleEvent::Connected {
            handle: ConnHandle(1),
            params: central_params(),
        });
        conn
    }

    #[test]
    fn wire_format_is_q2_14_little_endian() {
        assert_eq!(to_wire(ONE), [0x00, 0x40]);
        assert_eq!(to_wire(-ONE), [0x00, 0xC0]);
        assert_eq!(to_wire(ONE / 2), [0x00, 0x20]);
        assert_eq!(to_wire(0), [0x00, 0x00]);
    }

    #[test]
    fn wire_format_saturates() {
        assert_eq!(to_wire(3 * ONE), i16::MAX.to_le_bytes());
        assert_eq!(to_wire(-3 * ONE), i16::MIN.to_le_bytes());
    }

    #[test]
    fn quaternion_while_connected_sends_three_notifications() {
        let mut p = MockPlatform::new();
        let conn = connected();
        let mut pipe = NotificationPipeline::new(NotifyGate::Connected);
        let n = pipe.on_sample(&quat(ONE, ONE / 2, 0, -ONE), &conn, &mut p);
        assert_eq!(n, 3);
        assert_eq!(
            p.commands,
            std::vec![
                Command::Notify(ConnHandle(1), Attribute::OrientationX, std::vec![0x00, 0x20]),
                Command::Notify(ConnHandle(1), Attribute::OrientationY, std::vec![0x00, 0x00]),
                Command::Notify(ConnHandle(1), Attribute::OrientationZ, std::vec![0x00, 0xC0]),
            ]
        );
        assert_eq!(pipe.sent(), 3);
    }

    #[test]
    fn nothing_is_sent_while_disconnected() {
        let mut p = MockPlatform::new();
        let mut pipe = NotificationPipeline::new(NotifyGate::Connected);
        assert_eq!(pipe.on_sample(&quat(ONE, 0, 0, 0), &Connection::new(), &mut p), 0);
        assert!(p.commands.is_empty());
    }

    #[test]
    fn other_kinds_are_dropped() {
        let mut p = MockPlatform::new();
        let conn = connected();
        let mut pipe = NotificationPipeline::new(NotifyGate::Connected);
        for kind in [SampleKind::Accel, SampleKind::Euler, SampleKind::LinearAccel] {
            let sample = Sample { kind, ..quat(0, 1, 2, 3) };
            assert_eq!(pipe.on_sample(&sample, &conn, &mut p), 0);
        }
        assert!(p.commands.is_empty());
    }

    #[test]
    fn full_tx_buffer_is_swallowed() {
        let mut p = MockPlatform::new();
        p.notify_results.push_back(Err(NotifyError::NoTxPackets));
        p.notify_results.push_back(Err(NotifyError::Raw(0x3001)));
        let conn = connected();
        let mut pipe = NotificationPipeline::new(NotifyGate::Connected);
        assert_eq!(pipe.on_sample(&quat(ONE, 0, 0, 0), &conn, &mut p), 3);
        assert_eq!(pipe.dropped(), 2);
        assert_eq!(pipe.sent(), 1);
    }

    #[test]
    fn secured_gate_waits_for_encryption() {
        let mut p = MockPlatform::new();
        let mut conn = connected();
        let mut pipe = NotificationPipeline::new(NotifyGate::Secured);
        assert_eq!(pipe.on_sample(&quat(ONE, 0, 0, 0), &conn, &mut p), 0);
        conn.set_security(SecurityStatus::Secured);
        assert_eq!(pipe.on_sample(&quat(ONE, 0, 0, 0), &conn, &mut p), 3);
    }

    #[test]
    fn packet_type_decoding() {
        assert_eq!(SampleKind::from_packet_type(3), Some(SampleKind::Quaternion));
        assert_eq!(SampleKind::from_packet_type(0), Some(SampleKind::Accel));
        assert_eq!(SampleKind::from_packet_type(8), None);
    }
}
