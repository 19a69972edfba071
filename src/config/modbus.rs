// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-cooler-shaker project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus TCP server configuration

use serde::{Deserialize, Serialize};

/// Configuration for the Modbus TCP server component.
///
/// # Example
///
/// ```
/// use rust_cooler_shaker::config::ModbusConfig;
///
/// let modbus_config = ModbusConfig {
///     enabled: true,
///     port: 502,
///     address: "0.0.0.0".to_string(),
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModbusConfig {
    /// Flag to enable or disable the Modbus server.
    ///
    /// With the server disabled the reconciliation loop still runs against the
    /// register image, which then only changes from the operator side.
    pub enabled: bool,

    /// The TCP port the Modbus server will listen on.
    ///
    /// Default is 5020, which does not need elevated privileges; supervisory
    /// systems expecting the standard port use 502.
    pub port: u16,

    /// The network address the Modbus server will bind to.
    ///
    /// Use "0.0.0.0" to bind to all IPv4 interfaces.
    pub address: String,
}

impl Default for ModbusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 5020,
            address: "127.0.0.1".to_string(),
        }
    }
}
