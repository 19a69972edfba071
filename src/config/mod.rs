// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-cooler-shaker project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration management for the cooler-shaker bridge
//!
//! This module provides functionality for loading, validating, and applying
//! configuration settings. The configuration is backed by a YAML file and
//! validated against a JSON schema for robustness.
//!
//! ## Configuration Structure
//!
//! - `modbus`: Modbus TCP server binding
//! - `device`: serial link to the temperature controller
//! - `reconciliation`: cycle timing of the reconciliation loop
//! - `motor`: initial shaker motion profile
//!
//! ## Usage
//!
//! ```no_run
//! use rust_cooler_shaker::config::Config;
//! use std::path::Path;
//!
//! // Load config from file, creates a default if not found
//! let mut config = Config::from_file(Path::new("config.yaml")).unwrap();
//!
//! // Apply command line overrides if needed
//! config.apply_args(
//!     Some("0.0.0.0".to_string()),        // Modbus address
//!     Some(502),                          // Modbus port
//!     Some("/dev/ttyUSB1".to_string()),   // Serial port
//!     false,                              // Simulated controller
//!     Some(1000),                         // Cycle period (ms)
//! );
//!
//! println!("Modbus port: {}", config.modbus.port);
//! ```

pub mod device;
pub mod modbus;
pub mod reconciliation;
pub mod utils;

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, error};
use serde::{Deserialize, Serialize};

pub use crate::motor::MotorProfile;
pub use device::DeviceConfig;
pub use modbus::ModbusConfig;
pub use reconciliation::ReconciliationConfig;
pub use utils::{is_valid_ip_address, output_config_schema, CONFIG_SCHEMA};

/// Root configuration structure of the bridge.
///
/// Every section falls back to its defaults when missing from the file, so an
/// empty YAML document is a valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Modbus TCP server settings.
    #[serde(default)]
    pub modbus: ModbusConfig,

    /// Temperature controller link settings.
    #[serde(default)]
    pub device: DeviceConfig,

    /// Reconciliation loop timing.
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,

    /// Motion profile loaded into the motor holding registers at startup.
    #[serde(default)]
    pub motor: MotorProfile,
}

impl Config {
    /// Helper method to create a sample config file when validation fails
    fn create_sample_config<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        let sample_path = path.with_extension("sample.yaml");
        debug!("Original path: {:?}, Sample path: {:?}", path, sample_path);

        if let Some(parent) = sample_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                debug!("Creating parent directory: {:?}", parent);
                fs::create_dir_all(parent).with_context(|| {
                    format!(
                        "Failed to create parent directory for sample config at {:?}",
                        parent
                    )
                })?;
            }
        }

        Self::default()
            .save_to_file(&sample_path)
            .with_context(|| format!("Failed to save sample config to {:?}", sample_path))?;

        error!(
            "Sample configuration file created at {:?}\nPlease edit and rename it",
            sample_path
        );
        Ok(())
    }

    /// Load configuration from a file
    ///
    /// A missing file is created with the default configuration. A file failing
    /// validation leaves a `.sample.yaml` file with the defaults next to it and
    /// returns the validation error.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(
                "Configuration file not found at {:?}, creating default",
                path
            );
            let default_config = Self::default();
            default_config.save_to_file(path)?;
            return Ok(default_config);
        }

        debug!("Loading configuration from {:?}", path);
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file at {:?}", path))?;

        Self::from_yaml_str(&contents).or_else(|err| {
            if let Err(e) = Self::create_sample_config(path) {
                error!("Failed to create sample config: {}", e);
            }
            Err(err.context(format!("Invalid configuration in {}", path.display())))
        })
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        // First step: convert YAML to a generic Value
        let yaml_value: serde_yml::Value =
            serde_yml::from_str(contents).context("Failed to parse YAML configuration")?;

        // An empty document is an empty mapping
        let json_value = match yaml_value {
            serde_yml::Value::Null => serde_json::Value::Object(Default::default()),
            other => serde_json::to_value(&other)
                .context("Failed to convert YAML to JSON for validation")?,
        };

        utils::validate_against_schema(&json_value)?;

        debug!("Schema validation passed, deserializing into Config structure");
        let config: Config = serde_json::from_value(json_value)
            .context("Failed to deserialize configuration")?;

        utils::validate_specific_rules(&config)?;
        Ok(config)
    }

    /// Save the configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml =
            serde_yml::to_string(self).context("Failed to serialize configuration to YAML")?;

        let mut file = File::create(path.as_ref())
            .with_context(|| format!("Failed to create config file at {:?}", path.as_ref()))?;

        file.write_all(yaml.as_bytes())
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Apply command line arguments to override configuration values.
    ///
    /// Only arguments that were given override the loaded configuration;
    /// `simulate` can only switch the simulated controller on.
    ///
    /// # Parameters
    ///
    /// * `modbus_address` - Network address for the Modbus server
    /// * `modbus_port` - TCP port for the Modbus server
    /// * `serial_port` - Serial device of the temperature controller
    /// * `simulate` - Use the simulated temperature controller
    /// * `period_ms` - Reconciliation cycle period in milliseconds
    pub fn apply_args(
        &mut self,
        modbus_address: Option<String>,
        modbus_port: Option<u16>,
        serial_port: Option<String>,
        simulate: bool,
        period_ms: Option<u64>,
    ) {
        if let Some(address) = modbus_address {
            debug!("Overriding Modbus address from command line: {}", address);
            self.modbus.address = address;
        }
        if let Some(port) = modbus_port {
            debug!("Overriding Modbus port from command line: {}", port);
            self.modbus.port = port;
        }
        if let Some(port) = serial_port {
            debug!("Overriding serial port from command line: {}", port);
            self.device.port = port;
        }
        if simulate {
            debug!("Using the simulated temperature controller");
            self.device.simulated = true;
        }
        if let Some(period) = period_ms {
            debug!("Overriding reconciliation period from command line: {} ms", period);
            self.reconciliation.period_ms = period;
        }
    }
}
