// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-cooler-shaker project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Simulated temperature controller
//!
//! Serves the controller dialect over any async byte stream so the bridge can run
//! without hardware. The simulated plate temperature moves toward the set value by
//! a fixed step at every temperature read.
//!
//! A [`SimulatorHandle`] lets callers change the model while it runs: raise alarms,
//! force a temperature, or make the next replies short or missing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::io::{duplex, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;

use crate::config::DeviceConfig;
use crate::device::link::DeviceLink;
use crate::device::protocol::{self, CommandCode, CommandFrame, COMMAND_FRAME_LEN};

/// Ambient temperature of the simulated secondary sensor, hundredths of °C
const AMBIENT_HUNDREDTHS: i32 = 2500;

/// Default move of the plate temperature per read, hundredths of °C
const DEFAULT_APPROACH_STEP: i32 = 50;

/// Buffer size of the in-memory stream between link and simulator
const STREAM_BUFFER: usize = 256;

/// Number of set value writes the model remembers
pub const SETPOINT_HISTORY_LEN: usize = 32;

/// Misbehaviour applied to the next reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Send only the first `n` bytes of the reply
    ShortReply(usize),
    /// Send nothing
    NoReply,
    /// Send the reply with a wrong checksum
    BadChecksum,
}

/// State of the simulated controller
#[derive(Debug, Clone)]
pub struct ControllerModel {
    pub address: [u8; 2],
    /// Fixed set value, hundredths of °C
    pub setpoint: i32,
    /// Plate temperature, hundredths of °C
    pub temperature: i32,
    /// Temperature change per read toward the set value; 0 freezes it
    pub approach_step: i32,
    pub alarm_bits: i32,
    pub alarm_type: i32,
    pub set_type_define: i32,
    pub sensor_type: i32,
    pub control_type: i32,
    /// Last set values received through command 1c, oldest first
    pub written_setpoints: VecDeque<i32>,
    faults: VecDeque<Fault>,
}

impl ControllerModel {
    pub fn new(address: [u8; 2]) -> Self {
        Self {
            address,
            setpoint: 2000,
            temperature: AMBIENT_HUNDREDTHS,
            approach_step: DEFAULT_APPROACH_STEP,
            alarm_bits: 0,
            alarm_type: 0,
            set_type_define: 0,
            sensor_type: 0,
            control_type: 0,
            written_setpoints: VecDeque::with_capacity(SETPOINT_HISTORY_LEN),
            faults: VecDeque::new(),
        }
    }

    /// Payload answering `command`, `None` for a command the controller rejects
    pub fn respond(&mut self, command: &CommandFrame) -> Option<i32> {
        let code = CommandCode::from_code(command.code)?;
        let value = match code {
            CommandCode::ReadInput1 => {
                self.approach_setpoint();
                self.temperature
            }
            CommandCode::ReadPowerOutput => self.power_output(),
            CommandCode::ReadDesiredControlValue | CommandCode::ReadFixedSetValue => {
                self.setpoint
            }
            CommandCode::ReadAlarmStatus => self.alarm_bits,
            CommandCode::ReadInput2 => AMBIENT_HUNDREDTHS,
            CommandCode::ReadOutputCurrentCounts => self.power_output().abs() * 2,
            CommandCode::WriteFixedSetValue => {
                self.setpoint = command.payload;
                if self.written_setpoints.len() == SETPOINT_HISTORY_LEN {
                    self.written_setpoints.pop_front();
                }
                self.written_setpoints.push_back(command.payload);
                command.payload
            }
            CommandCode::WriteAlarmType => {
                self.alarm_type = command.payload;
                command.payload
            }
            CommandCode::WriteSetTypeDefine => {
                self.set_type_define = command.payload;
                command.payload
            }
            CommandCode::WriteSensorType => {
                self.sensor_type = command.payload;
                command.payload
            }
            CommandCode::WriteControlType => {
                self.control_type = command.payload;
                command.payload
            }
            CommandCode::ReadAlarmType => self.alarm_type,
            CommandCode::ReadSetTypeDefine => self.set_type_define,
            CommandCode::ReadSensorType => self.sensor_type,
            CommandCode::ReadControlType => self.control_type,
        };
        Some(value)
    }

    fn approach_setpoint(&mut self) {
        let gap = self.setpoint - self.temperature;
        let step = self.approach_step.max(0);
        self.temperature += gap.clamp(-step, step);
    }

    /// Proportional drive, saturated at the ±511 full scale
    fn power_output(&self) -> i32 {
        ((self.setpoint - self.temperature) / 2).clamp(-511, 511)
    }
}

/// Shared access to a running simulator
#[derive(Clone)]
pub struct SimulatorHandle {
    model: Arc<Mutex<ControllerModel>>,
}

impl SimulatorHandle {
    /// Inspect or modify the model
    pub fn with_model<R>(&self, f: impl FnOnce(&mut ControllerModel) -> R) -> R {
        f(&mut lock_model(&self.model))
    }

    pub fn set_temperature(&self, celsius: f32) {
        self.with_model(|m| m.temperature = (f64::from(celsius) * 100.0).round() as i32);
    }

    pub fn set_alarm_bits(&self, bits: i32) {
        self.with_model(|m| m.alarm_bits = bits);
    }

    /// Stop or resume the temperature drift
    pub fn set_approach_step(&self, hundredths: i32) {
        self.with_model(|m| m.approach_step = hundredths);
    }

    /// Apply `fault` to the next reply
    pub fn inject_fault(&self, fault: Fault) {
        self.with_model(|m| m.faults.push_back(fault));
    }

    pub fn setpoint(&self) -> i32 {
        self.with_model(|m| m.setpoint)
    }

    pub fn written_setpoints(&self) -> Vec<i32> {
        self.with_model(|m| m.written_setpoints.iter().copied().collect())
    }
}

/// A simulated controller ready to serve one byte stream
pub struct SimulatedController {
    model: Arc<Mutex<ControllerModel>>,
}

impl SimulatedController {
    pub fn new(model: ControllerModel) -> Self {
        Self {
            model: Arc::new(Mutex::new(model)),
        }
    }

    pub fn handle(&self) -> SimulatorHandle {
        SimulatorHandle {
            model: self.model.clone(),
        }
    }

    /// Answer command frames until the stream closes
    pub async fn serve<S>(self, mut stream: S) -> std::io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut frame = [0u8; COMMAND_FRAME_LEN];
        loop {
            if let Err(e) = stream.read_exact(&mut frame).await {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    debug!("Simulated controller: link closed");
                    return Ok(());
                }
                return Err(e);
            }

            let command = match protocol::parse_command(&frame) {
                Ok(command) => command,
                Err(e) => {
                    warn!("Simulated controller ignoring frame: {}", e);
                    continue;
                }
            };
            let (reply, fault) = {
                let mut model = lock_model(&self.model);
                if command.address != model.address {
                    debug!("Simulated controller: frame for another address");
                    continue;
                }
                let reply = match model.respond(&command) {
                    Some(payload) => protocol::build_reply(payload),
                    None => protocol::build_rejection(),
                };
                (reply, model.faults.pop_front())
            };

            match fault {
                None => stream.write_all(&reply).await?,
                Some(Fault::ShortReply(n)) => stream.write_all(&reply[..n.min(reply.len())]).await?,
                Some(Fault::NoReply) => {}
                Some(Fault::BadChecksum) => {
                    let mut corrupted = reply;
                    corrupted[10] = if corrupted[10] == b'0' { b'1' } else { b'0' };
                    stream.write_all(&corrupted).await?
                }
            }
            stream.flush().await?;
        }
    }
}

/// Start a simulated controller for `config` and a link talking to it
pub fn spawn_simulated_link(
    config: &DeviceConfig,
) -> (DeviceLink, SimulatorHandle, JoinHandle<std::io::Result<()>>) {
    let mut address = [b'0', b'2'];
    if let [a, b] = config.address.as_bytes() {
        address = [*a, *b];
    }
    let simulator = SimulatedController::new(ControllerModel::new(address));
    let handle = simulator.handle();
    let (link_side, device_side) = duplex(STREAM_BUFFER);
    let task = tokio::spawn(simulator.serve(device_side));
    info!(
        "Simulated temperature controller at address {}",
        config.address
    );
    let link = DeviceLink::new(
        link_side,
        config.address.clone(),
        Duration::from_millis(config.read_timeout_ms),
        config.verify_reply_checksum,
    );
    (link, handle, task)
}

fn lock_model(model: &Arc<Mutex<ControllerModel>>) -> MutexGuard<'_, ControllerModel> {
    model.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;

    fn test_config() -> DeviceConfig {
        DeviceConfig {
            read_timeout_ms: 100,
            ..DeviceConfig::default()
        }
    }

    #[tokio::test]
    async fn test_setpoint_write_and_readback() {
        let (link, handle, _task) = spawn_simulated_link(&test_config());
        assert_eq!(link.write_setpoint(-5.25).await.unwrap(), -525);
        assert_eq!(link.read_saved_setpoint().await.unwrap(), -5.25);
        assert_eq!(handle.written_setpoints(), vec![-525]);
    }

    #[tokio::test]
    async fn test_temperature_approaches_setpoint() {
        let (link, handle, _task) = spawn_simulated_link(&test_config());
        handle.with_model(|m| {
            m.temperature = 2000;
            m.setpoint = 2120;
        });
        assert_eq!(link.read_temperature().await.unwrap(), 20.5);
        assert_eq!(link.read_temperature().await.unwrap(), 21.0);
        assert_eq!(link.read_temperature().await.unwrap(), 21.2);
        assert_eq!(link.read_temperature().await.unwrap(), 21.2);
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let (link, handle, _task) = spawn_simulated_link(&test_config());
        handle.set_alarm_bits(9);

        handle.inject_fault(Fault::ShortReply(5));
        assert!(matches!(
            link.read_alarms().await,
            Err(BridgeError::DeviceCommunication { .. })
        ));
        handle.inject_fault(Fault::BadChecksum);
        assert!(matches!(
            link.read_alarms().await,
            Err(BridgeError::ProtocolFrame { .. })
        ));
        handle.inject_fault(Fault::NoReply);
        assert!(link.read_alarms().await.is_err());

        assert_eq!(link.read_alarms().await.unwrap().digits(), "0001001");
    }

    #[tokio::test]
    async fn test_secondary_sensor_and_control_value() {
        let (link, handle, _task) = spawn_simulated_link(&test_config());
        assert_eq!(link.read_secondary_temperature().await.unwrap(), 25.0);

        handle.with_model(|m| m.setpoint = -1050);
        assert_eq!(link.read_desired_control_value().await.unwrap(), -10.5);
        // The ambient sensor does not follow the set value
        assert_eq!(link.read_secondary_temperature().await.unwrap(), 25.0);
    }

    #[test]
    fn test_setpoint_history_is_bounded() {
        let mut model = ControllerModel::new(*b"02");
        for payload in 0..100 {
            let frame = CommandFrame {
                address: *b"02",
                code: 0x1c,
                payload,
            };
            assert_eq!(model.respond(&frame), Some(payload));
        }
        assert_eq!(model.written_setpoints.len(), SETPOINT_HISTORY_LEN);
        assert_eq!(model.written_setpoints.front(), Some(&68));
        assert_eq!(model.written_setpoints.back(), Some(&99));
        assert_eq!(model.setpoint, 99);
    }

    #[test]
    fn test_unknown_command_rejected() {
        let mut model = ControllerModel::new(*b"02");
        let frame = CommandFrame {
            address: *b"02",
            code: 0x99,
            payload: 0,
        };
        assert_eq!(model.respond(&frame), None);
    }
}
