//! Trial records and their labels.
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::numbers::round_to;
use crate::reels::Reels;

/// Which physical task a session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialMode {
    /// Timing task: stop a moving bar inside a target zone.
    Bar,
    /// Chance task: three slot reels.
    Reel,
}

impl TrialMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bar => "bar",
            Self::Reel => "reel",
        }
    }
}

/// Effective outcome category of a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Hit,
    NearMiss,
    Loss,
}

impl Outcome {
    pub const ALL: [Self; 3] = [Self::Hit, Self::NearMiss, Self::Loss];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::NearMiss => "near_miss",
            Self::Loss => "loss",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which rule of the labeling policy produced the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelReason {
    /// The geometry was a hit.
    Hit,
    /// Miss on the session's final trial, always labeled a near miss.
    FinalTrial,
    /// Miss too far from the target to read as close.
    FarMiss,
    /// Miss labeled according to the session's loss frame.
    LossFrame,
    /// Reel label reported as dealt by the session template, or read off the
    /// shown reels when nothing was dealt.
    Dealt,
}

/// Raw trial data as reported by the client, after coercion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "game_mode", rename_all = "snake_case")]
pub enum TrialData {
    Bar {
        bar_position: f64,
        target_zone_start: f64,
        target_zone_end: f64,
    },
    Reel {
        reels: Reels,
    },
}

/// Immutable, labeled trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    /// 1-based position in the session.
    pub trial_number: u32,
    #[serde(flatten)]
    pub data: TrialData,
    pub outcome: Outcome,
    pub label_reason: LabelReason,
    pub distance_from_center: f64,
    /// Geometric near miss, independent of condition.
    pub near_miss_raw: bool,
    pub is_hit: bool,
    pub is_near_miss: bool,
}

impl Trial {
    #[must_use]
    pub const fn mode(&self) -> TrialMode {
        match self.data {
            TrialData::Bar { .. } => TrialMode::Bar,
            TrialData::Reel { .. } => TrialMode::Reel,
        }
    }

    /// Both booleans agree with `outcome`.
    #[must_use]
    pub fn flags_consistent(&self) -> bool {
        self.is_hit == (self.outcome == Outcome::Hit)
            && self.is_near_miss == (self.outcome == Outcome::NearMiss)
            && !(self.is_hit && self.is_near_miss)
    }

    /// Copy with positions and distance rounded to two decimals for storage.
    #[must_use]
    pub fn rounded(&self) -> Self {
        let data = match self.data {
            TrialData::Bar {
                bar_position,
                target_zone_start,
                target_zone_end,
            } => TrialData::Bar {
                bar_position: round_to(bar_position, 2),
                target_zone_start: round_to(target_zone_start, 2),
                target_zone_end: round_to(target_zone_end, 2),
            },
            TrialData::Reel { reels } => TrialData::Reel { reels },
        };
        Self {
            data,
            distance_from_center: round_to(self.distance_from_center, 2),
            ..self.clone()
        }
    }
}
