// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-cooler-shaker project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};

use super::{ChangeOrigin, CycleReport};
use crate::config::ReconciliationConfig;
use crate::daemon::wait_for_shutdown;
use crate::device::link::DeviceLink;
use crate::device::protocol;
use crate::error::BridgeResult;
use crate::modbus::float_codec;
use crate::modbus::register_map::{lock_image, RegisterImage, SharedRegisterImage};
use crate::motor::{MotorControl, MotorProfile};
use crate::state::{BridgeEvent, ProcessState, ProcessVariable, SharedProcessState, SourceTag};

/// Periodic bridge between the shared state, the register image and the controller
pub struct ReconciliationLoop {
    state: SharedProcessState,
    registers: SharedRegisterImage,
    device: Arc<DeviceLink>,
    motor: Arc<dyn MotorControl>,
    config: ReconciliationConfig,
    /// Set temperature still to be written to the controller
    pending_setpoint: Option<f32>,
    cycles: u64,
    last_report: Option<CycleReport>,
    /// Half-written pairs already given one cycle for their second word
    waiting_pairs: Vec<ProcessVariable>,
}

impl ReconciliationLoop {
    pub fn new(
        state: SharedProcessState,
        registers: SharedRegisterImage,
        device: Arc<DeviceLink>,
        motor: Arc<dyn MotorControl>,
        config: ReconciliationConfig,
    ) -> Self {
        Self {
            state,
            registers,
            device,
            motor,
            config,
            pending_setpoint: None,
            cycles: 0,
            last_report: None,
            waiting_pairs: Vec::new(),
        }
    }

    /// Set temperature waiting for a successful controller write
    pub fn pending_setpoint(&self) -> Option<f32> {
        self.pending_setpoint
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Report of the last cycle run by [`ReconciliationLoop::run`]
    pub fn last_report(&self) -> Option<&CycleReport> {
        self.last_report.as_ref()
    }

    /// Seed the shared state and the registers before the first cycle
    ///
    /// The set temperature comes from the value saved in the controller, the
    /// motor variables from `profile`. When the controller cannot be read the
    /// set temperature stays at its current value.
    pub async fn initialize(&mut self, profile: &MotorProfile) {
        let saved = self.device.read_saved_setpoint().await;

        let mut guard = self.state.lock();
        let state = &mut *guard;
        match saved {
            Ok(setpoint) => {
                info!("Controller set temperature is {} °C", setpoint);
                state.settle(ProcessVariable::SetTemperature, setpoint, SourceTag::Device);
            }
            Err(e) => warn!("Cannot read the controller set temperature: {}", e),
        }
        state.settle(
            ProcessVariable::MotorSpeed,
            profile.speed_deg_per_s,
            SourceTag::Unset,
        );
        state.settle(
            ProcessVariable::MotorRotationDegrees,
            profile.rotation_deg,
            SourceTag::Unset,
        );
        state.settle(
            ProcessVariable::MotorDwellSeconds,
            profile.dwell_s,
            SourceTag::Unset,
        );

        let mut registers = lock_image(&self.registers);
        for variable in ProcessVariable::WRITABLE {
            let value = state.reconciled().get(variable);
            if let Err(e) = registers.write_float(variable, value) {
                warn!("Cannot publish initial {}: {}", variable, e);
            }
        }
        registers.set_motor_enabled(state.motor.running);
    }

    /// Run one reconciliation cycle
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.cycles += 1;
        let mut report = CycleReport::default();

        let settle = self.config.settle();
        if settle.is_zero() {
            tokio::task::yield_now().await;
        } else {
            time::sleep(settle).await;
        }

        {
            let shared = self.state.clone();
            let image = self.registers.clone();
            let mut state = shared.lock();
            let mut registers = lock_image(&image);
            self.reconcile_variables(&mut state, &mut registers, &mut report);
        }

        self.write_pending_setpoint(&mut report).await;
        self.refresh_temperature(&mut report).await;
        self.refresh_alarms(&mut report).await;
        self.settle_motor(&mut report);

        if report.is_quiet() {
            debug!("Reconciliation cycle {}: nothing to do", self.cycles);
        } else {
            debug!("Reconciliation cycle {}: {:?}", self.cycles, report);
        }
        report
    }

    /// Run cycles on the configured period until `shutdown` is set
    ///
    /// Shutdown is only observed between cycles, so an exchange in flight with the
    /// controller always completes or times out first. Returns the stopped loop.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Self {
        let mut interval = time::interval(self.config.period());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "Reconciliation loop started with a {:?} period",
            self.config.period()
        );

        loop {
            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => break,
                _ = interval.tick() => {
                    let report = self.run_cycle().await;
                    self.last_report = Some(report);
                }
            }
        }
        info!("Reconciliation loop stopped after {} cycles", self.cycles);
        self
    }

    /// Operator and network side of a cycle, run under both locks
    fn reconcile_variables(
        &mut self,
        state: &mut ProcessState,
        registers: &mut RegisterImage,
        report: &mut CycleReport,
    ) {
        let operator_changes = state.current().changed_from(state.reconciled());
        if !operator_changes.is_empty() {
            report.origin = ChangeOrigin::Operator;
            for variable in operator_changes {
                self.propagate_operator_change(state, registers, variable, report);
            }
            return;
        }

        for variable in ProcessVariable::WRITABLE {
            self.adopt_network_change(state, registers, variable, report);
        }
    }

    fn propagate_operator_change(
        &mut self,
        state: &mut ProcessState,
        registers: &mut RegisterImage,
        variable: ProcessVariable,
        report: &mut CycleReport,
    ) {
        let value = state.current().get(variable);
        let published = float_codec::encode(state.reconciled().get(variable)).ok();
        if published != Some(registers.float_words(variable)) {
            warn!(
                "Conflicting writes to {}: operator value {} overrides network value {}",
                variable,
                value,
                registers.read_float(variable)
            );
            report.conflicts.push(variable);
        }

        match sendable(variable, value).and_then(|_| registers.write_float(variable, value)) {
            Ok(()) => {
                state.accept_current(variable);
                info!("Operator changed {} to {}", variable, value);
                report.changed.push(variable);
                if variable == ProcessVariable::SetTemperature {
                    self.pending_setpoint = Some(value);
                }
            }
            Err(e) => {
                // Values are checked on entry; anything else is reverted
                warn!("Discarding operator value for {}: {}", variable, e);
                let reconciled = state.reconciled().get(variable);
                state.current.set(variable, reconciled);
                report.rejected.push(variable);
            }
        }
    }

    fn adopt_network_change(
        &mut self,
        state: &mut ProcessState,
        registers: &mut RegisterImage,
        variable: ProcessVariable,
        report: &mut CycleReport,
    ) {
        let words = registers.float_words(variable);
        let published = float_codec::encode(state.reconciled().get(variable)).ok();
        let waited = self.waiting_pairs.contains(&variable);
        self.waiting_pairs.retain(|v| *v != variable);
        if published == Some(words) {
            return;
        }
        if registers.is_half_written(variable) && !waited {
            debug!("Waiting one cycle for the second word of {}", variable);
            self.waiting_pairs.push(variable);
            return;
        }

        let value = float_codec::decode(words.0, words.1);
        let canonical = match float_codec::encode(value) {
            Ok(canonical) if value.is_finite() => canonical,
            _ => {
                warn!(
                    "Rejecting network value {:#06x} {:#06x} for {}: not a finite normal float",
                    words.0, words.1, variable
                );
                if let Some(published) = published {
                    registers.store_float_words(variable, published);
                }
                report.rejected.push(variable);
                return;
            }
        };
        registers.store_float_words(variable, canonical);
        if published == Some(canonical) {
            // Another encoding of the reconciled value, e.g. -0.0 for 0.0
            return;
        }
        if let Err(e) = sendable(variable, value) {
            warn!("Rejecting network value {} for {}: {}", value, variable, e);
            if let Some(published) = published {
                registers.store_float_words(variable, published);
            }
            report.rejected.push(variable);
            return;
        }

        state.settle(variable, value, SourceTag::Network);
        info!("Network changed {} to {}", variable, value);
        report.origin = ChangeOrigin::Network;
        report.changed.push(variable);
        if variable == ProcessVariable::SetTemperature {
            self.pending_setpoint = Some(value);
        }
        self.state.notify(BridgeEvent::VariableChanged {
            variable,
            value,
            source: SourceTag::Network,
            at: Utc::now(),
        });
    }

    async fn write_pending_setpoint(&mut self, report: &mut CycleReport) {
        let Some(setpoint) = self.pending_setpoint else {
            return;
        };
        match self.device.write_setpoint(setpoint).await {
            Ok(payload) => {
                info!(
                    "Controller set temperature written: {} °C (payload {})",
                    setpoint, payload
                );
                self.pending_setpoint = None;
                report.setpoint_written = Some(setpoint);
            }
            Err(e) => {
                if e.is_recoverable() {
                    warn!("Set temperature write failed, retrying next cycle: {}", e);
                } else {
                    warn!("Set temperature {} cannot be sent: {}", setpoint, e);
                    self.pending_setpoint = None;
                }
                report.device_errors.push(e);
            }
        }
    }

    async fn refresh_temperature(&mut self, report: &mut CycleReport) {
        let temperature = match self.device.read_temperature().await {
            Ok(temperature) => temperature,
            Err(e) => {
                warn!("Temperature read failed, keeping previous value: {}", e);
                report.device_errors.push(e);
                return;
            }
        };

        {
            let mut state = self.state.lock();
            let variable = ProcessVariable::CurrentTemperature;
            let known = state.source(variable) != SourceTag::Unset;
            if known && state.current().get(variable) == temperature {
                return;
            }
            let mut registers = lock_image(&self.registers);
            if let Err(e) = registers.write_float(variable, temperature) {
                warn!("Cannot publish temperature {}: {}", temperature, e);
            }
            state.settle(variable, temperature, SourceTag::Device);
        }

        debug!("Current temperature: {} °C", temperature);
        report.temperature = Some(temperature);
        self.state.notify(BridgeEvent::VariableChanged {
            variable: ProcessVariable::CurrentTemperature,
            value: temperature,
            source: SourceTag::Device,
            at: Utc::now(),
        });
    }

    async fn refresh_alarms(&mut self, report: &mut CycleReport) {
        let alarms = match self.device.read_alarms().await {
            Ok(alarms) => alarms,
            Err(e) => {
                warn!("Alarm read failed, keeping previous alarms: {}", e);
                report.device_errors.push(e);
                return;
            }
        };

        let was_active = {
            let mut state = self.state.lock();
            let previous = state.alarms;
            state.alarms = alarms;
            lock_image(&self.registers).apply_alarms(&alarms);
            if previous != alarms {
                debug!("Alarm status: {}", alarms);
            }
            previous.any_active()
        };

        let active = alarms.any_active();
        if active != was_active {
            if active {
                warn!("Controller alarm raised: {}", alarms);
            } else {
                info!("Controller alarms cleared");
            }
            report.alarm_transition = Some(active);
            self.state.notify(BridgeEvent::AlarmStateChanged {
                active,
                alarms,
                at: Utc::now(),
            });
        }
    }

    fn settle_motor(&mut self, report: &mut CycleReport) {
        let profile_changed = report.changed.iter().any(|v| {
            matches!(
                v,
                ProcessVariable::MotorSpeed
                    | ProcessVariable::MotorRotationDegrees
                    | ProcessVariable::MotorDwellSeconds
            )
        });

        let command = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let mut registers = lock_image(&self.registers);

            let coil = registers.motor_enabled();
            let mut source = match report.origin {
                ChangeOrigin::Network if profile_changed => SourceTag::Network,
                _ => SourceTag::Operator,
            };
            if coil != state.motor.running && !state.motor.local_action {
                info!("Network set motor enabled to {}", coil);
                state.motor.running = coil;
                source = SourceTag::Network;
            }
            registers.set_motor_enabled(state.motor.running);

            let restart = state.motor.running && state.motor.commanded && profile_changed;
            let command = if state.motor.running != state.motor.commanded || restart {
                state.motor.commanded = state.motor.running;
                Some((
                    state.motor.running,
                    source,
                    MotorProfile::from_values(state.reconciled()),
                ))
            } else {
                None
            };
            state.motor.local_action = false;
            command
        };

        if let Some((running, source, profile)) = command {
            self.motor.set_running(running, &profile);
            report.motor_command = Some((running, source));
            self.state.notify(BridgeEvent::MotorCommand {
                running,
                source,
                at: Utc::now(),
            });
        }
    }
}

/// Check that the controller can receive `value` when it is the set temperature
fn sendable(variable: ProcessVariable, value: f32) -> BridgeResult<()> {
    if variable == ProcessVariable::SetTemperature {
        protocol::setpoint_payload(value)?;
    }
    Ok(())
}
