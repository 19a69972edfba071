// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-cooler-shaker project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Alarm status bitmask decoding
//!
//! The controller answers the alarm status command with a small integer whose
//! bits flag the alarm conditions:
//!
//! | Bit | Condition |
//! |-----|-----------|
//! | 0 | High temperature alarm |
//! | 1 | Low temperature alarm |
//! | 2 | Computer controlled alarm |
//! | 3 | Over current detected |
//! | 4 | Open input 1 (thermistor) |
//! | 5 | Open input 2 |
//! | 6 | Driver low input voltage |
//!
//! Rendered as binary digits left-padded to 7, the most significant known
//! alarm (driver low voltage) comes first.

use std::fmt;

use log::debug;
use serde::Serialize;

use crate::error::{BridgeError, BridgeResult};

/// Number of alarm bits reported by the controller
pub const ALARM_BITS: usize = 7;

/// Named alarm conditions, valued by their bit position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AlarmCondition {
    HighTemperature = 0,
    LowTemperature = 1,
    ComputerControlled = 2,
    OverCurrent = 3,
    OpenInput1 = 4,
    OpenInput2 = 5,
    DriverLowVoltage = 6,
}

impl AlarmCondition {
    /// Every condition, most significant bit first
    pub const ALL: [AlarmCondition; ALARM_BITS] = [
        AlarmCondition::DriverLowVoltage,
        AlarmCondition::OpenInput2,
        AlarmCondition::OpenInput1,
        AlarmCondition::OverCurrent,
        AlarmCondition::ComputerControlled,
        AlarmCondition::LowTemperature,
        AlarmCondition::HighTemperature,
    ];

    pub fn bit(self) -> usize {
        self as usize
    }

    pub fn description(self) -> &'static str {
        match self {
            AlarmCondition::HighTemperature => "high temperature alarm",
            AlarmCondition::LowTemperature => "low temperature alarm",
            AlarmCondition::ComputerControlled => "computer controlled alarm",
            AlarmCondition::OverCurrent => "over current detected",
            AlarmCondition::OpenInput1 => "open input 1",
            AlarmCondition::OpenInput2 => "open input 2",
            AlarmCondition::DriverLowVoltage => "driver low input voltage",
        }
    }
}

impl fmt::Display for AlarmCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Fixed-width alarm vector decoded from one controller read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AlarmVector {
    bits: u8,
}

impl AlarmVector {
    /// Decode the alarm status payload
    ///
    /// Bits above the 7 known alarms are dropped.
    pub fn decode(raw: i32) -> BridgeResult<Self> {
        if raw < 0 {
            return Err(BridgeError::frame(format!(
                "alarm status {} is negative",
                raw
            )));
        }
        let unknown = raw >> ALARM_BITS;
        if unknown != 0 {
            debug!("Ignoring unknown alarm bits {:#x}", unknown << ALARM_BITS);
        }
        Ok(Self::from_bits((raw & 0x7F) as u8))
    }

    pub fn from_bits(bits: u8) -> Self {
        Self { bits: bits & 0x7F }
    }

    pub fn bits(&self) -> u8 {
        self.bits
    }

    /// Value of the vector at `index`, index 0 being the least significant bit
    pub fn bit(&self, index: usize) -> bool {
        index < ALARM_BITS && self.bits & (1 << index) != 0
    }

    pub fn is_active(&self, condition: AlarmCondition) -> bool {
        self.bit(condition.bit())
    }

    /// At least one alarm bit set
    pub fn any_active(&self) -> bool {
        self.bits != 0
    }

    /// Active conditions, most significant first
    pub fn active(&self) -> Vec<AlarmCondition> {
        AlarmCondition::ALL
            .into_iter()
            .filter(|c| self.is_active(*c))
            .collect()
    }

    /// Binary digits, most significant first, left-padded to 7
    pub fn digits(&self) -> String {
        format!("{:07b}", self.bits)
    }
}

impl fmt::Display for AlarmVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.any_active() {
            return write!(f, "{} (no alarm)", self.digits());
        }
        let names: Vec<&str> = self.active().into_iter().map(|c| c.description()).collect();
        write!(f, "{} ({})", self.digits(), names.join(", "))
    }
}
