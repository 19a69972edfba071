// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-cooler-shaker project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Process variables shared between the operator, the network and the device

pub mod shared_state;

pub use shared_state::{
    BridgeEvent, MotorState, ProcessSnapshot, ProcessState, ProcessValues, ProcessVariable,
    SharedProcessState, SourceTag,
};
