//! Task ledger: points and streak effects of resolving a task
//!
//! Penalty outweighs reward on purpose. Points have no floor and may go negative.

use serde::{Deserialize, Serialize};

use crate::domain::{Outcome, User};

/// Points awarded for a completed task
pub const COMPLETION_REWARD: i64 = 100;

/// Points deducted for a failed task
pub const FAILURE_PENALTY: i64 = 110;

/// What a resolution does to the owner's streak
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreakEffect {
    Increment,
    Reset,
}

/// Point delta and streak effect for one resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEffect {
    pub point_delta: i64,
    pub streak: StreakEffect,
}

impl LedgerEffect {
    /// Apply the effect to a user's points and streak
    pub fn apply(&self, user: &mut User) {
        user.total_points = user.total_points.saturating_add(self.point_delta);
        user.current_streak = match self.streak {
            StreakEffect::Increment => user.current_streak.saturating_add(1),
            StreakEffect::Reset => 0,
        };
    }
}

/// Ledger entry for an outcome
pub fn effect_of(outcome: Outcome) -> LedgerEffect {
    match outcome {
        Outcome::Completed => LedgerEffect {
            point_delta: COMPLETION_REWARD,
            streak: StreakEffect::Increment,
        },
        Outcome::Failed => LedgerEffect {
            point_delta: -FAILURE_PENALTY,
            streak: StreakEffect::Reset,
        },
    }
}
