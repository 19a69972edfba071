// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-cooler-shaker project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Temperature controller access
//!
//! The cooler plate is driven by a TE Technology style controller on an RS-485
//! serial line. This module provides:
//!
//! - [`protocol`]: command and reply frames, checksums and payload encoding
//! - [`alarm`]: decoding of the alarm status bitmask
//! - [`link`]: the exclusive request/response link used by the bridge
//! - [`serial`]: opening the hardware serial port
//! - [`simulator`]: an in-process controller for running without hardware

pub mod alarm;
pub mod link;
pub mod protocol;
pub mod serial;
pub mod simulator;

pub use alarm::{AlarmCondition, AlarmVector};
pub use link::{DeviceIo, DeviceLink};
pub use protocol::CommandCode;
