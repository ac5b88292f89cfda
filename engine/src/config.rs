// SPDX-License-Identifier: Apache-2.0
//! Protocol upgrade schedule.
//!
//! Some operators and behaviors only switch on past a given main chain
//! index. The heights are consensus history, so they live in configuration
//! rather than in code paths.

use serde::{Deserialize, Serialize};

/// Activation heights (main chain indexes) of behavior-changing upgrades.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpgradeSchedule {
    /// `formula` becomes legal; fractional data-feed values are accepted.
    pub formula_mci: u64,
    /// Nested addresses with no authentifier under their path are assumed
    /// satisfied instead of being evaluated.
    pub skip_unused_nested_address_mci: u64,
    /// `timestamp` becomes legal.
    pub timestamp_mci: u64,
}

impl UpgradeSchedule {
    /// Every upgrade active from genesis, as on fresh test networks.
    pub fn all_active() -> Self {
        Self {
            formula_mci: 0,
            skip_unused_nested_address_mci: 0,
            timestamp_mci: 0,
        }
    }

    pub fn formula_active(&self, mci: u64) -> bool {
        mci >= self.formula_mci
    }

    pub fn skips_unused_nested_addresses(&self, mci: u64) -> bool {
        mci >= self.skip_unused_nested_address_mci
    }

    pub fn timestamp_active(&self, mci: u64) -> bool {
        mci >= self.timestamp_mci
    }
}

impl Default for UpgradeSchedule {
    fn default() -> Self {
        Self {
            formula_mci: 5_210_000,
            skip_unused_nested_address_mci: 1_400_000,
            timestamp_mci: 5_210_000,
        }
    }
}
