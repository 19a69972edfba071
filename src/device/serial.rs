// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-cooler-shaker project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Serial port of the temperature controller (8 data bits, no parity, 1 stop bit)

use std::time::Duration;

use anyhow::{Context, Result};
use log::info;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::config::DeviceConfig;

/// Open the configured serial port for async use
pub fn open_serial(config: &DeviceConfig) -> Result<SerialStream> {
    let stream = tokio_serial::new(&config.port, config.baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .timeout(Duration::from_millis(config.read_timeout_ms))
        .open_native_async()
        .with_context(|| format!("Failed to open serial port {}", config.port))?;
    info!(
        "Serial port {} opened at {} baud",
        config.port, config.baud_rate
    );
    Ok(stream)
}
