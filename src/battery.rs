//! Battery Service with a simulated level.
//!
//! The board has no fuel gauge; the level is a triangle wave between
//! `BATTERY_LEVEL_MIN` and `BATTERY_LEVEL_MAX`, stepped once per
//! measurement period. Changes are written to the Battery Level
//! characteristic and notified when the central subscribed.

use crate::ble::{Attribute, BleEvent, ConnHandle, Radio};
use crate::config::{
    BATTERY_LEVEL_INCREMENT, BATTERY_LEVEL_MAX, BATTERY_LEVEL_MEAS_INTERVAL_MS, BATTERY_LEVEL_MIN,
};
use crate::error::Fatal;
use crate::scheduler::{TimerId, Timers};

/// Triangle-wave level generator. Starts at the maximum and walks down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatterySimulator {
    min: u8,
    max: u8,
    step: u8,
    level: u8,
    rising: bool,
}

impl BatterySimulator {
    pub const fn new(min: u8, max: u8, step: u8) -> Self {
        Self {
            min,
            max,
            step,
            level: max,
            rising: false,
        }
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    /// Step once and return the new level.
    pub fn measure(&mut self) -> u8 {
        if self.rising {
            let next = self.level.saturating_add(self.step);
            if next >= self.max {
                self.level = self.max;
                self.rising = false;
            } else {
                self.level = next;
            }
        } else {
            let next = self.level.saturating_sub(self.step);
            if next <= self.min {
                self.level = self.min;
                self.rising = true;
            } else {
                self.level = next;
            }
        }
        self.level
    }
}

pub struct BatteryService {
    sim: BatterySimulator,
    reported: Option<u8>,
    handle: ConnHandle,
    notifications: bool,
}

impl BatteryService {
    pub const fn new() -> Self {
        Self {
            sim: BatterySimulator::new(BATTERY_LEVEL_MIN, BATTERY_LEVEL_MAX, BATTERY_LEVEL_INCREMENT),
            reported: None,
            handle: ConnHandle::INVALID,
            notifications: false,
        }
    }

    /// Last level written to the characteristic.
    pub fn level(&self) -> Option<u8> {
        self.reported
    }

    /// Arm the periodic measurement.
    pub fn start<T: Timers>(&mut self, timers: &mut T) -> Result<(), Fatal> {
        timers.start(TimerId::BatteryMeasurement, BATTERY_LEVEL_MEAS_INTERVAL_MS)?;
        Ok(())
    }

    /// Battery stage of the BLE dispatch chain.
    pub fn on_ble_event(&mut self, event: &BleEvent) {
        match event {
            BleEvent::Connected { handle, .. } => {
                self.handle = *handle;
            }
            BleEvent::Disconnected { .. } => {
                self.handle = ConnHandle::INVALID;
                self.notifications = false;
            }
            BleEvent::CccdWrite {
                attribute: Attribute::BatteryLevel,
                notifications,
                ..
            } => {
                debug!("battery: notifications {}", notifications);
                self.notifications = *notifications;
            }
            _ => {}
        }
    }

    /// Measurement timer expired: take a reading and re-arm.
    pub fn on_timer<P: Radio + Timers>(&mut self, p: &mut P) -> Result<(), Fatal> {
        let level = self.sim.measure();
        self.update(level, p)?;
        self.start(p)
    }

    fn update<R: Radio>(&mut self, level: u8, radio: &mut R) -> Result<(), Fatal> {
        if self.reported == Some(level) {
            return Ok(());
        }
        self.reported = Some(level);
        radio.set_value(Attribute::BatteryLevel, &[level])?;

        if !self.handle.is_valid() || !self.notifications {
            return Ok(());
        }
        match radio.notify(self.handle, Attribute::BatteryLevel, &[level]) {
            Ok(()) => {
                trace!("battery: {}%", level);
                Ok(())
            }
            Err(e) if e.is_transient() => Ok(()),
            Err(e) => Err(Fatal::Notify(e)),
        }
    }
}

impl Default for BatteryService {
    fn default() -> Self {
        Self::new()
    }
}
