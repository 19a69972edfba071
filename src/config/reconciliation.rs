// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-cooler-shaker project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Reconciliation loop timing

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconciliationConfig {
    /// Fixed cycle period in milliseconds
    pub period_ms: u64,

    /// Pause at the start of each cycle letting pending operator edits land,
    /// in milliseconds
    pub settle_ms: u64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            period_ms: 5000,
            settle_ms: 100,
        }
    }
}

impl ReconciliationConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}
