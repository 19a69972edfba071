// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-cooler-shaker project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Error taxonomy of the bridge
//!
//! None of these errors is fatal to the process. Device and frame errors are
//! recovered by the reconciliation loop (previous value kept, retried on the
//! next tick), encoding errors are surfaced to whoever attempted the write.

use thiserror::Error;

use crate::state::ProcessVariable;

/// Errors raised by the codec, the device dialect and the shared state
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Serial reply missing, short or timed out
    #[error("Device communication failed: {reason}")]
    DeviceCommunication { reason: String },

    /// Value cannot be represented by the register or payload encoding
    #[error("Cannot encode {value}: {reason}")]
    Encoding { value: f64, reason: String },

    /// Frame received but not acceptable (checksum, length, markers, hex digits)
    #[error("Malformed device frame: {reason}")]
    ProtocolFrame { reason: String },

    /// Attempt to set a device-origin variable from the operator side
    #[error("{variable} is read-only")]
    ReadOnlyVariable { variable: ProcessVariable },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    pub(crate) fn device(reason: impl Into<String>) -> Self {
        BridgeError::DeviceCommunication {
            reason: reason.into(),
        }
    }

    pub(crate) fn frame(reason: impl Into<String>) -> Self {
        BridgeError::ProtocolFrame {
            reason: reason.into(),
        }
    }

    pub(crate) fn encoding(value: f64, reason: impl Into<String>) -> Self {
        BridgeError::Encoding {
            value,
            reason: reason.into(),
        }
    }

    /// Whether the reconciliation loop may recover from this error by keeping
    /// the previous value and trying again on the next cycle
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BridgeError::DeviceCommunication { .. }
                | BridgeError::ProtocolFrame { .. }
                | BridgeError::Io(_)
        )
    }
}

pub type BridgeResult<T> = std::result::Result<T, BridgeError>;
