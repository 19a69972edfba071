// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-cooler-shaker project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Rust cooler-shaker bridge library
//!
//! This library bridges a laboratory cooler-shaker to Modbus TCP: it keeps the
//! set temperature, the measured temperature, the motor profile and the alarm
//! status of a serial temperature controller consistent between a local
//! operator, remote Modbus clients and the device itself.
//!
//! The main pieces are:
//!
//! - [`modbus`]: the float register codec, the register image and the Modbus TCP server
//! - [`device`]: the controller frame dialect, the alarm decoder and the serial link
//! - [`state`]: the process state shared with the presentation layer
//! - [`reconciliation`]: the periodic loop keeping all three sides consistent
//! - [`daemon`]: task management of the running bridge

pub mod config;
pub mod daemon;
pub mod device;
pub mod error;
pub mod modbus;
pub mod motor;
pub mod reconciliation;
pub mod state;

pub use error::{BridgeError, BridgeResult};
