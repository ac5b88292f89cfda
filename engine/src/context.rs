// SPDX-License-Identifier: Apache-2.0
use serde_json::Value;

use crate::config::UpgradeSchedule;

/// Per-call facts a definition is judged against. Never mutated during a
/// call; nested address and template evaluations see the same values.
#[derive(Clone, Debug)]
pub struct ValidationContext {
    /// Highest main chain index whose state is final for this call.
    pub last_ball_mci: u64,
    /// Timestamp of the last ball, compared by `timestamp`.
    pub last_ball_timestamp: u64,
    /// Forbid every operator that reads chain state (new, unanchored
    /// definitions).
    pub no_references: bool,
    /// The definition being checked belongs to a private asset.
    pub defining_private_asset: bool,
    /// The unit is being composed and carries placeholder signatures.
    pub unsigned: bool,
    /// Hash every `sig` is checked against.
    pub unit_hash_to_sign: [u8; 32],
    /// Trigger handed to the formula evaluator, if any.
    pub trigger: Option<Value>,
    pub upgrades: UpgradeSchedule,
}

impl ValidationContext {
    pub fn new(last_ball_mci: u64, unit_hash_to_sign: [u8; 32]) -> Self {
        Self {
            last_ball_mci,
            last_ball_timestamp: 0,
            no_references: false,
            defining_private_asset: false,
            unsigned: false,
            unit_hash_to_sign,
            trigger: None,
            upgrades: UpgradeSchedule::default(),
        }
    }

    #[must_use]
    pub fn with_upgrades(mut self, upgrades: UpgradeSchedule) -> Self {
        self.upgrades = upgrades;
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.last_ball_timestamp = timestamp;
        self
    }

    #[must_use]
    pub fn without_references(mut self) -> Self {
        self.no_references = true;
        self
    }

    #[must_use]
    pub fn unsigned(mut self) -> Self {
        self.unsigned = true;
        self
    }

    #[must_use]
    pub fn defining_private_asset(mut self) -> Self {
        self.defining_private_asset = true;
        self
    }
}
