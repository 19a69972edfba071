// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-cooler-shaker project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Shaker motor collaborator
//!
//! The bridge does not generate step pulses itself. It tells a [`MotorControl`]
//! implementation when the shaker should start or stop and with which motion
//! profile: sweep `rotation_deg` clockwise at `speed_deg_per_s`, dwell, sweep
//! back, dwell, repeat.

use log::info;
use serde::{Deserialize, Serialize};

use crate::state::{ProcessValues, ProcessVariable};

/// Microsteps per revolution of the shaker stepper (200 full steps, 1/16 microstepping)
pub const STEPS_PER_REVOLUTION: u32 = 200 * 16;

/// Motion profile of the shaker
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotorProfile {
    /// Sweep speed in degrees per second
    pub speed_deg_per_s: f32,
    /// Sweep amplitude in degrees
    pub rotation_deg: f32,
    /// Pause at each end of a sweep, in seconds
    pub dwell_s: f32,
}

impl Default for MotorProfile {
    fn default() -> Self {
        Self {
            speed_deg_per_s: 90.0,
            rotation_deg: 360.0,
            dwell_s: 0.5,
        }
    }
}

impl MotorProfile {
    /// Profile held by the motor process variables
    pub fn from_values(values: &ProcessValues) -> Self {
        Self {
            speed_deg_per_s: values.get(ProcessVariable::MotorSpeed),
            rotation_deg: values.get(ProcessVariable::MotorRotationDegrees),
            dwell_s: values.get(ProcessVariable::MotorDwellSeconds),
        }
    }

    /// Steps in one sweep, rounded to the nearest step
    pub fn steps_per_sweep(&self) -> u32 {
        (f64::from(self.rotation_deg.abs()) / 360.0 * f64::from(STEPS_PER_REVOLUTION)).round()
            as u32
    }
}

/// Something able to start and stop the shaker
pub trait MotorControl: Send + Sync {
    fn set_running(&self, running: bool, profile: &MotorProfile);
}

/// Motor collaborator used when no driver is attached: logs each command
#[derive(Debug, Default)]
pub struct LoggingMotor;

impl MotorControl for LoggingMotor {
    fn set_running(&self, running: bool, profile: &MotorProfile) {
        if running {
            info!(
                "Motor start: {}° sweeps at {}°/s ({} steps), {} s dwell",
                profile.rotation_deg,
                profile.speed_deg_per_s,
                profile.steps_per_sweep(),
                profile.dwell_s
            );
        } else {
            info!("Motor stop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_profile_steps() {
        let profile = MotorProfile::default();
        assert_eq!(profile.steps_per_sweep(), 3200);
    }

    #[test]
    fn test_profile_from_values() {
        let mut values = ProcessValues::default();
        values.set(ProcessVariable::MotorSpeed, 45.0);
        values.set(ProcessVariable::MotorRotationDegrees, 90.0);
        values.set(ProcessVariable::MotorDwellSeconds, 1.0);
        let profile = MotorProfile::from_values(&values);
        assert_eq!(profile.steps_per_sweep(), 800);
        assert_eq!(profile.dwell_s, 1.0);
    }
}
