// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-cooler-shaker project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Three-way reconciliation between operator, network and device
//!
//! Every cycle of the [`ReconciliationLoop`]:
//!
//! 1. waits briefly so pending operator edits land in the shared state;
//! 2. under the state lock and then the register lock, compares operator values
//!    with the last reconciled values. Operator changes are encoded into the
//!    holding registers and win over any network write to the same variable.
//!    Without operator changes, holding registers differing from the reconciled
//!    encoding are decoded and adopted as network changes;
//! 3. writes a changed set temperature to the controller (retried next cycle on
//!    failure);
//! 4. reads the current temperature and publishes it on input registers 0-1;
//! 5. reads the alarm bitmask and publishes it on the discrete inputs;
//! 6. settles the motor enabled coil against the operator's motor state.
//!
//! Device failures never abort a cycle: the previous values are kept and the
//! next cycle tries again.

mod reconciliation_loop;

pub use reconciliation_loop::ReconciliationLoop;

use crate::error::BridgeError;
use crate::state::{ProcessVariable, SourceTag};

/// Which side changed the writable process variables during a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChangeOrigin {
    #[default]
    Unchanged,
    Operator,
    Network,
}

/// What one reconciliation cycle did
#[derive(Debug, Default)]
pub struct CycleReport {
    pub origin: ChangeOrigin,
    /// Writable variables propagated this cycle
    pub changed: Vec<ProcessVariable>,
    /// Variables written by both operator and network; the operator value won
    pub conflicts: Vec<ProcessVariable>,
    /// Variables whose new value could not be accepted and was reverted
    pub rejected: Vec<ProcessVariable>,
    /// Set temperature written to the controller
    pub setpoint_written: Option<f32>,
    /// New current temperature, when it changed
    pub temperature: Option<f32>,
    /// New "any alarm active" state, when it flipped
    pub alarm_transition: Option<bool>,
    /// Run command sent to the motor and its origin
    pub motor_command: Option<(bool, SourceTag)>,
    /// Device exchanges that failed this cycle
    pub device_errors: Vec<BridgeError>,
}

impl CycleReport {
    pub fn is_quiet(&self) -> bool {
        self.origin == ChangeOrigin::Unchanged
            && self.rejected.is_empty()
            && self.setpoint_written.is_none()
            && self.temperature.is_none()
            && self.alarm_transition.is_none()
            && self.motor_command.is_none()
            && self.device_errors.is_empty()
    }
}
