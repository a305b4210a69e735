//! The 2×2 design space: frame type × loss frame.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Whether the game is presented as skill-based or luck-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    Skill,
    Luck,
}

impl FrameType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Skill => "skill",
            Self::Luck => "luck",
        }
    }
}

impl FromStr for FrameType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skill" => Ok(Self::Skill),
            "luck" => Ok(Self::Luck),
            _ => Err(()),
        }
    }
}

/// Whether a non-hit is eligible to be labeled a near miss for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossFrame {
    NearMiss,
    ClearLoss,
}

impl LossFrame {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NearMiss => "near_miss",
            Self::ClearLoss => "clear_loss",
        }
    }
}

impl FromStr for LossFrame {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "near_miss" | "near-miss" | "nearmiss" => Ok(Self::NearMiss),
            "clear_loss" | "clear-loss" | "clearloss" => Ok(Self::ClearLoss),
            _ => Err(()),
        }
    }
}

/// One cell of the experimental design. Immutable once assigned to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Condition {
    pub frame_type: FrameType,
    pub loss_frame: LossFrame,
}

impl Condition {
    /// Every cell of the design, in canonical order.
    pub const ALL: [Self; 4] = [
        Self::new(FrameType::Skill, LossFrame::NearMiss),
        Self::new(FrameType::Skill, LossFrame::ClearLoss),
        Self::new(FrameType::Luck, LossFrame::NearMiss),
        Self::new(FrameType::Luck, LossFrame::ClearLoss),
    ];

    #[must_use]
    pub const fn new(frame_type: FrameType, loss_frame: LossFrame) -> Self {
        Self {
            frame_type,
            loss_frame,
        }
    }

    /// Deterministic join of both fields, e.g. `skill_near_miss`.
    #[must_use]
    pub fn condition_id(self) -> String {
        format!("{}_{}", self.frame_type.as_str(), self.loss_frame.as_str())
    }

    /// Parse a `(frame_type, loss_frame)` pair as supplied by a client.
    #[must_use]
    pub fn from_pair(frame_type: &str, loss_frame: &str) -> Option<Self> {
        let frame_type = frame_type.parse().ok()?;
        let loss_frame = loss_frame.parse().ok()?;
        Some(Self::new(frame_type, loss_frame))
    }

    /// Parse a `condition_id` produced by [`Condition::condition_id`].
    #[must_use]
    pub fn from_condition_id(id: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|cell| cell.condition_id() == id.trim())
    }

    #[must_use]
    pub const fn allows_near_miss_label(self) -> bool {
        matches!(self.loss_frame, LossFrame::NearMiss)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.frame_type.as_str(), self.loss_frame.as_str())
    }
}
