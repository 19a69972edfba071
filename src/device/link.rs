// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-cooler-shaker project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Exclusive request/response link to the temperature controller
//!
//! The controller answers one command at a time. [`DeviceLink`] owns the byte
//! stream behind an async mutex and holds it for the whole write, flush and
//! timed read of an exchange, so commands are never pipelined.

use std::time::Duration;

use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::config::DeviceConfig;
use crate::device::alarm::AlarmVector;
use crate::device::protocol::{self, CommandCode, REPLY_FRAME_LEN};
use crate::error::{BridgeError, BridgeResult};

/// Full-scale value of the power output reading
const POWER_OUTPUT_FULL_SCALE: f32 = 511.0;

/// Window used to discard stray bytes after a failed exchange
const DRAIN_WINDOW: Duration = Duration::from_millis(20);

/// Byte stream the controller is reached through
pub trait DeviceIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> DeviceIo for T {}

pub struct DeviceLink {
    io: Mutex<Box<dyn DeviceIo>>,
    address: String,
    read_timeout: Duration,
    verify_checksum: bool,
}

impl DeviceLink {
    pub fn new<T: DeviceIo + 'static>(
        io: T,
        address: impl Into<String>,
        read_timeout: Duration,
        verify_checksum: bool,
    ) -> Self {
        Self {
            io: Mutex::new(Box::new(io)),
            address: address.into(),
            read_timeout,
            verify_checksum,
        }
    }

    /// Link using the address, timeout and checksum policy of `config`
    pub fn with_config<T: DeviceIo + 'static>(io: T, config: &DeviceConfig) -> Self {
        Self::new(
            io,
            config.address.clone(),
            Duration::from_millis(config.read_timeout_ms),
            config.verify_reply_checksum,
        )
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Send one command and return the decoded reply payload
    ///
    /// A reply that is incomplete when the read timeout expires is a
    /// [`BridgeError::DeviceCommunication`]; a complete but invalid one is a
    /// [`BridgeError::ProtocolFrame`].
    pub async fn exchange(&self, code: CommandCode, payload: i32) -> BridgeResult<i32> {
        let frame = protocol::build_command(&self.address, code, payload)?;
        let mut io = self.io.lock().await;

        debug!("Device send: {:?}", String::from_utf8_lossy(&frame));
        let mut reply = [0u8; REPLY_FRAME_LEN];
        let result = async {
            io.write_all(&frame)
                .await
                .map_err(|e| BridgeError::device(format!("write of command {} failed: {}", code, e)))?;
            io.flush()
                .await
                .map_err(|e| BridgeError::device(format!("flush of command {} failed: {}", code, e)))?;
            match timeout(self.read_timeout, io.read_exact(&mut reply)).await {
                Ok(Ok(_)) => Ok(()),
                Ok(Err(e)) => Err(BridgeError::device(format!(
                    "short reply to command {}: {}",
                    code, e
                ))),
                Err(_) => Err(BridgeError::device(format!(
                    "no complete reply to command {} within {:?}",
                    code, self.read_timeout
                ))),
            }
        }
        .await;

        if let Err(e) = result {
            drain_input(&mut **io).await;
            return Err(e);
        }
        debug!("Device reply: {:?}", String::from_utf8_lossy(&reply));
        protocol::parse_reply(&reply, self.verify_checksum)
    }

    /// Control sensor temperature in °C
    pub async fn read_temperature(&self) -> BridgeResult<f32> {
        let raw = self.exchange(CommandCode::ReadInput1, 0).await?;
        Ok(protocol::hundredths_to_celsius(raw))
    }

    /// Fixed set value saved in the controller, in °C
    pub async fn read_saved_setpoint(&self) -> BridgeResult<f32> {
        let raw = self.exchange(CommandCode::ReadFixedSetValue, 0).await?;
        Ok(protocol::hundredths_to_celsius(raw))
    }

    /// Set value the control loop currently uses, in °C
    pub async fn read_desired_control_value(&self) -> BridgeResult<f32> {
        let raw = self.exchange(CommandCode::ReadDesiredControlValue, 0).await?;
        Ok(protocol::hundredths_to_celsius(raw))
    }

    /// Secondary sensor temperature in °C
    pub async fn read_secondary_temperature(&self) -> BridgeResult<f32> {
        let raw = self.exchange(CommandCode::ReadInput2, 0).await?;
        Ok(protocol::hundredths_to_celsius(raw))
    }

    /// Power output in percent, negative when cooling
    pub async fn read_power_output_percent(&self) -> BridgeResult<f32> {
        let raw = self.exchange(CommandCode::ReadPowerOutput, 0).await?;
        Ok(raw as f32 * 100.0 / POWER_OUTPUT_FULL_SCALE)
    }

    pub async fn read_alarms(&self) -> BridgeResult<AlarmVector> {
        let raw = self.exchange(CommandCode::ReadAlarmStatus, 0).await?;
        AlarmVector::decode(raw)
    }

    /// Write the fixed set value; returns the payload sent
    pub async fn write_setpoint(&self, temperature: f32) -> BridgeResult<i32> {
        let payload = protocol::setpoint_payload(temperature)?;
        let echoed = self
            .exchange(CommandCode::WriteFixedSetValue, payload)
            .await?;
        if echoed != payload {
            warn!(
                "Controller echoed set value {} after writing {}",
                echoed, payload
            );
        }
        Ok(payload)
    }
}

/// Discard whatever the controller still sends so the next exchange starts aligned
async fn drain_input(io: &mut dyn DeviceIo) {
    let mut scratch = [0u8; 64];
    loop {
        match timeout(DRAIN_WINDOW, io.read(&mut scratch)).await {
            Ok(Ok(n)) if n > 0 => debug!("Discarded {} stray bytes from device", n),
            _ => break,
        }
    }
}
