// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-cooler-shaker project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Register image backing the Modbus server
//!
//! Zero-based address map:
//!
//! | Class | Address | Content | Encoding |
//! |-------|---------|---------|----------|
//! | Coil | 0 | Motor enabled | bool |
//! | Discrete input | 0 | Driver low input voltage | bool |
//! | Discrete input | 1 | Thermistor error (open input 1) | bool |
//! | Discrete input | 2 | Over current | bool |
//! | Discrete input | 3 | Low temperature alarm | bool |
//! | Discrete input | 4 | High temperature alarm | bool |
//! | Holding register | 0-1 | Set temperature (°C) | float, high word first |
//! | Holding register | 2-3 | Motor speed (°/s) | float |
//! | Holding register | 4-5 | Motor rotation (°) | float |
//! | Holding register | 6-7 | Motor dwell (s) | float |
//! | Input register | 0-1 | Current temperature (°C) | float |
//!
//! A supervisor may write a float with two single-register requests. The image
//! remembers a holding pair that has only one of its words written since it was
//! last stored whole, so the reconciliation loop can wait for the second word.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_modbus::ExceptionCode;

use crate::device::alarm::{AlarmCondition, AlarmVector};
use crate::error::BridgeResult;
use crate::modbus::float_codec;
use crate::state::ProcessVariable;

pub const COIL_COUNT: usize = 1;
pub const DISCRETE_INPUT_COUNT: usize = 5;
pub const HOLDING_REGISTER_COUNT: usize = 8;
pub const INPUT_REGISTER_COUNT: usize = 2;

/// Coil carrying the motor run command
pub const MOTOR_ENABLED_COIL: u16 = 0;

/// Alarm conditions published on discrete inputs, in address order
pub const DISCRETE_INPUT_ALARMS: [AlarmCondition; DISCRETE_INPUT_COUNT] = [
    AlarmCondition::DriverLowVoltage,
    AlarmCondition::OpenInput1,
    AlarmCondition::OverCurrent,
    AlarmCondition::LowTemperature,
    AlarmCondition::HighTemperature,
];

/// Modbus addressable storage classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterClass {
    Coil,
    DiscreteInput,
    HoldingRegister,
    InputRegister,
}

/// Location of a float process variable: first of two consecutive words
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloatSlot {
    pub class: RegisterClass,
    pub address: u16,
}

impl ProcessVariable {
    /// Register pair holding this variable
    pub fn slot(self) -> FloatSlot {
        let (class, address) = match self {
            ProcessVariable::SetTemperature => (RegisterClass::HoldingRegister, 0),
            ProcessVariable::MotorSpeed => (RegisterClass::HoldingRegister, 2),
            ProcessVariable::MotorRotationDegrees => (RegisterClass::HoldingRegister, 4),
            ProcessVariable::MotorDwellSeconds => (RegisterClass::HoldingRegister, 6),
            ProcessVariable::CurrentTemperature => (RegisterClass::InputRegister, 0),
        };
        FloatSlot { class, address }
    }
}

/// Current contents of every register class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterImage {
    coils: Vec<bool>,
    discrete_inputs: Vec<bool>,
    holding_registers: Vec<u16>,
    input_registers: Vec<u16>,
    /// Per holding pair, the offset (0 or 1) of the only word written so far
    half_written: Vec<Option<usize>>,
}

/// Register image shared by the Modbus server and the reconciliation loop
pub type SharedRegisterImage = Arc<Mutex<RegisterImage>>;

impl Default for RegisterImage {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterImage {
    /// All coils and inputs cleared, all words zero (every float reads 0.0)
    pub fn new() -> Self {
        Self {
            coils: vec![false; COIL_COUNT],
            discrete_inputs: vec![false; DISCRETE_INPUT_COUNT],
            holding_registers: vec![0; HOLDING_REGISTER_COUNT],
            input_registers: vec![0; INPUT_REGISTER_COUNT],
            half_written: vec![None; HOLDING_REGISTER_COUNT / 2],
        }
    }

    pub fn shared(self) -> SharedRegisterImage {
        Arc::new(Mutex::new(self))
    }

    /// Read `count` bits starting at `address`
    pub fn read_bits(
        &self,
        class: RegisterClass,
        address: u16,
        count: u16,
    ) -> Result<Vec<bool>, ExceptionCode> {
        let bits = match class {
            RegisterClass::Coil => &self.coils,
            RegisterClass::DiscreteInput => &self.discrete_inputs,
            _ => return Err(ExceptionCode::IllegalFunction),
        };
        let range = checked_range(bits.len(), address, count)?;
        Ok(bits[range].to_vec())
    }

    /// Read `count` words starting at `address`
    pub fn read_words(
        &self,
        class: RegisterClass,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ExceptionCode> {
        let words = match class {
            RegisterClass::HoldingRegister => &self.holding_registers,
            RegisterClass::InputRegister => &self.input_registers,
            _ => return Err(ExceptionCode::IllegalFunction),
        };
        let range = checked_range(words.len(), address, count)?;
        Ok(words[range].to_vec())
    }

    /// Write coils; the only bit class writable from the network
    pub fn write_coils(&mut self, address: u16, values: &[bool]) -> Result<(), ExceptionCode> {
        let range = checked_range(self.coils.len(), address, values.len() as u16)?;
        self.coils[range].copy_from_slice(values);
        Ok(())
    }

    /// Write holding registers; the only word class writable from the network
    pub fn write_holding_registers(
        &mut self,
        address: u16,
        values: &[u16],
    ) -> Result<(), ExceptionCode> {
        let range = checked_range(self.holding_registers.len(), address, values.len() as u16)?;
        self.holding_registers[range.clone()].copy_from_slice(values);

        for pair in range.start / 2..=(range.end - 1) / 2 {
            let first = pair * 2;
            let covers_first = range.contains(&first);
            let covers_second = range.contains(&(first + 1));
            let offset = usize::from(covers_second);
            self.half_written[pair] = match self.half_written[pair] {
                _ if covers_first && covers_second => None,
                Some(previous) if previous != offset => None,
                _ => Some(offset),
            };
        }
        Ok(())
    }

    /// Whether only one word of the variable's holding pair was written
    pub fn is_half_written(&self, variable: ProcessVariable) -> bool {
        let slot = variable.slot();
        slot.class == RegisterClass::HoldingRegister
            && self.half_written[usize::from(slot.address) / 2].is_some()
    }

    /// Raw `(high, low)` words currently stored for a variable
    pub fn float_words(&self, variable: ProcessVariable) -> (u16, u16) {
        let slot = variable.slot();
        let words = self.words(slot.class);
        let index = slot.address as usize;
        (words[index], words[index + 1])
    }

    /// Decoded value currently stored for a variable
    pub fn read_float(&self, variable: ProcessVariable) -> f32 {
        let (high, low) = self.float_words(variable);
        float_codec::decode(high, low)
    }

    /// Encode and store a value for a variable
    pub fn write_float(&mut self, variable: ProcessVariable, value: f32) -> BridgeResult<()> {
        let words = float_codec::encode(value)?;
        self.store_float_words(variable, words);
        Ok(())
    }

    /// Store raw words for a variable, used to restore a known-good encoding
    pub fn store_float_words(&mut self, variable: ProcessVariable, (high, low): (u16, u16)) {
        let slot = variable.slot();
        let index = slot.address as usize;
        let words = match slot.class {
            RegisterClass::InputRegister => &mut self.input_registers,
            _ => {
                self.half_written[index / 2] = None;
                &mut self.holding_registers
            }
        };
        words[index] = high;
        words[index + 1] = low;
    }

    pub fn motor_enabled(&self) -> bool {
        self.coils[MOTOR_ENABLED_COIL as usize]
    }

    pub fn set_motor_enabled(&mut self, enabled: bool) {
        self.coils[MOTOR_ENABLED_COIL as usize] = enabled;
    }

    /// Publish an alarm vector on the discrete inputs
    pub fn apply_alarms(&mut self, alarms: &AlarmVector) {
        for (input, condition) in self.discrete_inputs.iter_mut().zip(DISCRETE_INPUT_ALARMS) {
            *input = alarms.is_active(condition);
        }
    }

    fn words(&self, class: RegisterClass) -> &[u16] {
        match class {
            RegisterClass::InputRegister => &self.input_registers,
            _ => &self.holding_registers,
        }
    }
}

/// Lock a shared image, recovering the data if a holder panicked
///
/// Every mutation above leaves the image consistent, so a poisoned lock
/// still guards valid data.
pub fn lock_image(image: &SharedRegisterImage) -> MutexGuard<'_, RegisterImage> {
    image.lock().unwrap_or_else(PoisonError::into_inner)
}

fn checked_range(
    len: usize,
    address: u16,
    count: u16,
) -> Result<std::ops::Range<usize>, ExceptionCode> {
    let start = address as usize;
    let end = start + count as usize;
    if count == 0 || end > len {
        return Err(ExceptionCode::IllegalDataAddress);
    }
    Ok(start..end)
}
