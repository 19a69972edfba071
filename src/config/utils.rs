// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-cooler-shaker project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration utilities
//!
//! This module provides utility functions for working with configuration
//! settings, including validation and schema management.

use anyhow::{Context, Result};
use log::{debug, warn};

use super::Config;

/// JSON schema every configuration file is validated against
pub const CONFIG_SCHEMA: &str = include_str!("../../resources/config.schema.json");

/// Output the embedded JSON schema to the console.
///
/// This function is called when the `--show-config-schema` flag is provided
/// on the command line.
///
/// # Example
///
/// ```bash
/// ./rust_cooler_shaker --show-config-schema > config_schema.json
/// ```
pub fn output_config_schema() -> Result<()> {
    let schema: serde_json::Value =
        serde_json::from_str(CONFIG_SCHEMA).context("Failed to parse JSON schema")?;
    let formatted_schema =
        serde_json::to_string_pretty(&schema).context("Failed to format JSON schema")?;
    println!("{}", formatted_schema);
    Ok(())
}

/// Check if a string is a valid IP address
///
/// Validates that a string represents a valid IPv4 or IPv6 address,
/// or is one of the special values like "localhost" or "0.0.0.0".
pub fn is_valid_ip_address(addr: &str) -> bool {
    if addr.parse::<std::net::IpAddr>().is_ok() {
        return true;
    }

    // Special cases
    matches!(addr, "localhost" | "::" | "::0" | "0.0.0.0")
}

/// Validate a configuration document against the embedded JSON schema
pub fn validate_against_schema(document: &serde_json::Value) -> Result<()> {
    let schema: serde_json::Value = serde_json::from_str(CONFIG_SCHEMA).with_context(|| {
        debug!("JSON schema string: {}", CONFIG_SCHEMA);
        "Failed to parse JSON schema"
    })?;

    let validator = jsonschema::draft202012::options()
        .should_validate_formats(true)
        .build(&schema)?;

    debug!("Validating configuration against schema");
    if let Err(error) = validator.validate(document) {
        anyhow::bail!("Configuration validation failed: {}", error);
    }
    Ok(())
}

/// Validates the configuration against additional rules that aren't covered by the JSON schema.
///
/// # Validation Rules
///
/// - **Modbus address**: must be an IP address or `localhost`
/// - **Device address**: exactly 2 ASCII alphanumeric characters
/// - **Timing**: non-zero cycle period and read timeout; the read timeout must leave room
///   for the four exchanges of a cycle within one period (warning only)
/// - **Motor profile**: finite values
pub fn validate_specific_rules(config: &Config) -> Result<()> {
    debug!("Performing additional validation checks");

    if !is_valid_ip_address(&config.modbus.address) {
        anyhow::bail!("Invalid Modbus address: {}", config.modbus.address);
    }
    if config.modbus.port == 0 {
        anyhow::bail!("Invalid Modbus port number: 0");
    }

    let address = config.device.address.as_bytes();
    if address.len() != 2 || !address.iter().all(u8::is_ascii_alphanumeric) {
        anyhow::bail!(
            "Device address must be 2 alphanumeric characters, got {:?}",
            config.device.address
        );
    }
    if config.device.read_timeout_ms == 0 {
        anyhow::bail!("Device read timeout must be positive");
    }
    if config.reconciliation.period_ms == 0 {
        anyhow::bail!("Reconciliation period must be positive");
    }
    if config.device.read_timeout_ms * 4 > config.reconciliation.period_ms {
        warn!(
            "Device read timeout of {} ms may make cycles overrun the {} ms period",
            config.device.read_timeout_ms, config.reconciliation.period_ms
        );
    }

    let motor = &config.motor;
    if ![motor.speed_deg_per_s, motor.rotation_deg, motor.dwell_s]
        .iter()
        .all(|v| v.is_finite())
    {
        anyhow::bail!("Motor profile values must be finite");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_ip_addresses() {
        assert!(is_valid_ip_address("127.0.0.1"));
        assert!(is_valid_ip_address("::1"));
        assert!(is_valid_ip_address("localhost"));
        assert!(!is_valid_ip_address("controller.local"));
    }

    #[test]
    fn test_specific_rules() {
        let mut config = Config::default();
        assert!(validate_specific_rules(&config).is_ok());

        config.device.address = "0é".to_string();
        assert!(validate_specific_rules(&config).is_err());

        config.device.address = "02".to_string();
        config.motor.rotation_deg = f32::NAN;
        assert!(validate_specific_rules(&config).is_err());
    }
}
