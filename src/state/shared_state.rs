// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-cooler-shaker project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Shared process state
//!
//! This module provides the single owned copy of the process variables shared by
//! the presentation layer, the reconciliation loop and (indirectly, through the
//! register image) the Modbus server.
//!
//! The state keeps two sets of values:
//! - the *current* values, which the operator edits and the loop updates when
//!   the network or the device changes something;
//! - the *reconciled* values, which are the values last propagated everywhere.
//!
//! A current value differing from its reconciled value is a pending operator edit.
//!
//! Change notifications are broadcast as typed [`BridgeEvent`]s.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use log::debug;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::device::alarm::AlarmVector;
use crate::device::protocol;
use crate::error::{BridgeError, BridgeResult};
use crate::modbus::float_codec;

/// Capacity of the event channel; slow subscribers lose the oldest events
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Named process variables, all 32-bit floats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ProcessVariable {
    SetTemperature,
    CurrentTemperature,
    MotorSpeed,
    MotorRotationDegrees,
    MotorDwellSeconds,
}

impl ProcessVariable {
    pub const ALL: [ProcessVariable; 5] = [
        ProcessVariable::SetTemperature,
        ProcessVariable::CurrentTemperature,
        ProcessVariable::MotorSpeed,
        ProcessVariable::MotorRotationDegrees,
        ProcessVariable::MotorDwellSeconds,
    ];

    /// Variables the operator and the network may write
    pub const WRITABLE: [ProcessVariable; 4] = [
        ProcessVariable::SetTemperature,
        ProcessVariable::MotorSpeed,
        ProcessVariable::MotorRotationDegrees,
        ProcessVariable::MotorDwellSeconds,
    ];

    /// Only the measured temperature is device-origin
    pub fn is_writable(self) -> bool {
        self != ProcessVariable::CurrentTemperature
    }

    pub fn name(self) -> &'static str {
        match self {
            ProcessVariable::SetTemperature => "set temperature",
            ProcessVariable::CurrentTemperature => "current temperature",
            ProcessVariable::MotorSpeed => "motor speed",
            ProcessVariable::MotorRotationDegrees => "motor rotation",
            ProcessVariable::MotorDwellSeconds => "motor dwell",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ProcessVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Who last wrote a process variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SourceTag {
    #[default]
    Unset,
    Operator,
    Network,
    Device,
}

/// One value per process variable
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ProcessValues {
    values: [f32; 5],
}

impl ProcessValues {
    pub fn get(&self, variable: ProcessVariable) -> f32 {
        self.values[variable.index()]
    }

    pub fn set(&mut self, variable: ProcessVariable, value: f32) {
        self.values[variable.index()] = value;
    }

    /// Writable variables whose value differs from `other`
    pub fn changed_from(&self, other: &ProcessValues) -> Vec<ProcessVariable> {
        ProcessVariable::WRITABLE
            .into_iter()
            .filter(|v| self.get(*v) != other.get(*v))
            .collect()
    }
}

/// Motor run state as seen by the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MotorState {
    /// Whether the motor should run
    pub running: bool,
    /// Run state last sent to the motor collaborator
    pub commanded: bool,
    /// `running` was changed by the operator since the last cycle
    pub local_action: bool,
}

/// Change notifications for the presentation layer and other observers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum BridgeEvent {
    /// A process variable took a new value from the network or the device
    VariableChanged {
        variable: ProcessVariable,
        value: f32,
        source: SourceTag,
        at: DateTime<Utc>,
    },
    /// The "any alarm active" flag flipped
    AlarmStateChanged {
        active: bool,
        alarms: AlarmVector,
        at: DateTime<Utc>,
    },
    /// The motor collaborator was told to start or stop
    MotorCommand {
        running: bool,
        source: SourceTag,
        at: DateTime<Utc>,
    },
}

/// Point-in-time copy of the whole process state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessSnapshot {
    pub values: ProcessValues,
    pub sources: [SourceTag; 5],
    pub motor: MotorState,
    pub alarms: AlarmVector,
    pub taken_at: DateTime<Utc>,
}

impl ProcessSnapshot {
    pub fn get(&self, variable: ProcessVariable) -> f32 {
        self.values.get(variable)
    }

    pub fn source(&self, variable: ProcessVariable) -> SourceTag {
        self.sources[variable.index()]
    }
}

/// State guarded by the shared lock
#[derive(Debug, Clone, Default)]
pub struct ProcessState {
    pub(crate) current: ProcessValues,
    pub(crate) reconciled: ProcessValues,
    pub(crate) sources: [SourceTag; 5],
    pub(crate) motor: MotorState,
    pub(crate) alarms: AlarmVector,
}

impl ProcessState {
    pub fn current(&self) -> &ProcessValues {
        &self.current
    }

    pub fn reconciled(&self) -> &ProcessValues {
        &self.reconciled
    }

    pub fn source(&self, variable: ProcessVariable) -> SourceTag {
        self.sources[variable.index()]
    }

    /// Store a value coming from `source` as both current and reconciled
    pub(crate) fn settle(&mut self, variable: ProcessVariable, value: f32, source: SourceTag) {
        self.current.set(variable, value);
        self.reconciled.set(variable, value);
        self.sources[variable.index()] = source;
    }

    /// Accept the operator's current value as reconciled
    pub(crate) fn accept_current(&mut self, variable: ProcessVariable) {
        let value = self.current.get(variable);
        self.reconciled.set(variable, value);
    }
}

/// Cloneable handle on the shared process state
#[derive(Clone)]
pub struct SharedProcessState {
    inner: Arc<Mutex<ProcessState>>,
    events: broadcast::Sender<BridgeEvent>,
}

impl Default for SharedProcessState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedProcessState {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(ProcessState::default())),
            events,
        }
    }

    /// Current value of a variable
    pub fn get(&self, variable: ProcessVariable) -> f32 {
        self.lock().current.get(variable)
    }

    /// Who last wrote a variable
    pub fn source(&self, variable: ProcessVariable) -> SourceTag {
        self.lock().source(variable)
    }

    /// Last temperature read from the device, if any read succeeded yet
    pub fn current_temperature(&self) -> Option<f32> {
        let state = self.lock();
        match state.source(ProcessVariable::CurrentTemperature) {
            SourceTag::Unset => None,
            _ => Some(state.current.get(ProcessVariable::CurrentTemperature)),
        }
    }

    pub fn motor(&self) -> MotorState {
        self.lock().motor
    }

    pub fn alarms(&self) -> AlarmVector {
        self.lock().alarms
    }

    pub fn snapshot(&self) -> ProcessSnapshot {
        let state = self.lock();
        ProcessSnapshot {
            values: state.current,
            sources: state.sources,
            motor: state.motor,
            alarms: state.alarms,
            taken_at: Utc::now(),
        }
    }

    /// Operator edit of a writable variable
    ///
    /// The value is propagated to the registers (and the device for the set
    /// temperature) on the next reconciliation cycle.
    pub fn set_operator(&self, variable: ProcessVariable, value: f32) -> BridgeResult<()> {
        if !variable.is_writable() {
            return Err(BridgeError::ReadOnlyVariable { variable });
        }
        float_codec::encode(value)?;
        if variable == ProcessVariable::SetTemperature {
            protocol::setpoint_payload(value)?;
        }

        let mut state = self.lock();
        state.current.set(variable, value);
        state.sources[variable.index()] = SourceTag::Operator;
        debug!("Operator set {} to {}", variable, value);
        Ok(())
    }

    /// Operator "motor should run" input
    pub fn set_motor_running(&self, running: bool) {
        let mut state = self.lock();
        if state.motor.running != running {
            state.motor.running = running;
            state.motor.local_action = true;
            debug!("Operator set motor running to {}", running);
        }
    }

    /// Receive every event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    /// Publish an event; dropped when nobody listens
    pub fn notify(&self, event: BridgeEvent) {
        let _ = self.events.send(event);
    }

    /// Exclusive access to the whole state
    ///
    /// A poisoned lock is recovered since every critical section leaves the
    /// state consistent.
    pub fn lock(&self) -> MutexGuard<'_, ProcessState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_temperature_is_read_only() {
        let state = SharedProcessState::new();
        assert!(matches!(
            state.set_operator(ProcessVariable::CurrentTemperature, 20.0),
            Err(BridgeError::ReadOnlyVariable {
                variable: ProcessVariable::CurrentTemperature
            })
        ));
        assert_eq!(state.current_temperature(), None);
    }

    #[test]
    fn test_unencodable_operator_value_rejected() {
        let state = SharedProcessState::new();
        assert!(matches!(
            state.set_operator(ProcessVariable::MotorSpeed, f32::INFINITY),
            Err(BridgeError::Encoding { .. })
        ));
        assert_eq!(state.source(ProcessVariable::MotorSpeed), SourceTag::Unset);

        // Encodable as a float, too large for the controller payload
        assert!(matches!(
            state.set_operator(ProcessVariable::SetTemperature, -4.0e7),
            Err(BridgeError::Encoding { .. })
        ));
        assert_eq!(state.get(ProcessVariable::SetTemperature), 0.0);
        assert_eq!(
            state.source(ProcessVariable::SetTemperature),
            SourceTag::Unset
        );
    }

    #[test]
    fn test_operator_edit_is_pending_until_accepted() {
        let state = SharedProcessState::new();
        state
            .set_operator(ProcessVariable::SetTemperature, 12.5)
            .unwrap();
        assert_eq!(state.get(ProcessVariable::SetTemperature), 12.5);
        assert_eq!(
            state.source(ProcessVariable::SetTemperature),
            SourceTag::Operator
        );

        let mut guard = state.lock();
        assert_eq!(
            guard.current().changed_from(guard.reconciled()),
            vec![ProcessVariable::SetTemperature]
        );
        guard.accept_current(ProcessVariable::SetTemperature);
        assert!(guard.current().changed_from(guard.reconciled()).is_empty());
    }

    #[test]
    fn test_motor_local_action() {
        let state = SharedProcessState::new();
        state.set_motor_running(false);
        assert!(!state.motor().local_action);
        state.set_motor_running(true);
        let motor = state.motor();
        assert!(motor.running && motor.local_action && !motor.commanded);
    }

    #[tokio::test]
    async fn test_events_reach_subscribers() {
        let state = SharedProcessState::new();
        let mut events = state.subscribe();
        let event = BridgeEvent::MotorCommand {
            running: true,
            source: SourceTag::Network,
            at: Utc::now(),
        };
        state.notify(event.clone());
        assert_eq!(events.recv().await.unwrap(), event);
    }
}
