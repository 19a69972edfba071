// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-cooler-shaker project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus communication module
//!
//! This module provides the Modbus TCP server of the cooler-shaker bridge, allowing
//! supervisory systems to read the process variables and alarms and to write the
//! set temperature, the motor profile and the motor enabled coil.
//!
//! ## Key Components
//!
//! - [`float_codec`]: split of 32-bit floats into two 16-bit registers
//! - [`register_map`]: the register image and its address map
//! - [`CoolerShakerModbusServer`]: the tokio-modbus service answering requests
//!
//! ## Usage
//!
//! ```no_run
//! use rust_cooler_shaker::modbus::{modbus_server, register_map::RegisterImage};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let registers = RegisterImage::new().shared();
//! let (_stop, shutdown) = tokio::sync::watch::channel(false);
//! modbus_server::bind_and_serve("127.0.0.1:5020".parse()?, registers, shutdown).await?;
//! # Ok(())
//! # }
//! ```

pub mod float_codec;
pub mod modbus_server;
pub mod register_map;

pub use modbus_server::CoolerShakerModbusServer;
pub use register_map::{RegisterClass, RegisterImage, SharedRegisterImage};
