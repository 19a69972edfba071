// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-cooler-shaker project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Temperature controller link configuration

use serde::{Deserialize, Serialize};

/// Serial link to the temperature controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Serial device path, e.g. `/dev/ttyUSB0`
    pub port: String,

    /// Serial speed in baud
    pub baud_rate: u32,

    /// Two-character address of the controller on the bus
    pub address: String,

    /// Maximum wait for a complete 12-byte reply, in milliseconds
    pub read_timeout_ms: u64,

    /// Reject replies whose checksum does not match their payload
    pub verify_reply_checksum: bool,

    /// Use the in-process simulated controller instead of the serial port
    pub simulated: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            address: "02".to_string(),
            read_timeout_ms: 1000,
            verify_reply_checksum: true,
            simulated: false,
        }
    }
}
