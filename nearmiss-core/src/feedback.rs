//! Participant-facing text: per-trial feedback and frame introductions.
use serde::{Deserialize, Serialize};

use crate::condition::FrameType;
use crate::trial::{Outcome, Trial, TrialData};

/// Introduction shown before the first trial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameDescription {
    pub title: String,
    pub description: String,
    pub icon: String,
}

#[must_use]
pub fn frame_description(frame_type: FrameType) -> FrameDescription {
    let (title, description, icon) = match frame_type {
        FrameType::Skill => (
            "Skill-Based Game",
            "This is a game of skill and control. Your success depends on your timing \
             ability and hand-eye coordination. With practice, you can improve your performance.",
            "\u{1F3AF}",
        ),
        FrameType::Luck => (
            "Luck-Based Game",
            "This is a game of pure chance. You will play a slot machine where the outcome \
             is completely random. Just press Spin and see what happens. There is nothing you \
             can do to influence the result.",
            "\u{1F3B0}",
        ),
    };
    FrameDescription {
        title: title.to_string(),
        description: description.to_string(),
        icon: icon.to_string(),
    }
}

/// Message for a labeled trial. Driven by `outcome`, never by the raw geometry.
#[must_use]
pub fn trial_feedback(trial: &Trial) -> String {
    match &trial.data {
        TrialData::Bar { .. } => match trial.outcome {
            Outcome::Hit => "\u{2713} Hit! Great timing!".to_string(),
            Outcome::NearMiss => format!(
                "Close! Just {:.1}% away from the zone.",
                trial.distance_from_center
            ),
            Outcome::Loss => format!("Missed by {:.1}%.", trial.distance_from_center),
        },
        TrialData::Reel { reels } => match trial.outcome {
            Outcome::Hit => format!("Jackpot! Three matching symbols! {reels}"),
            Outcome::NearMiss => format!("So close! Two out of three matched! {reels}"),
            Outcome::Loss => format!("No match this time. {reels}"),
        },
    }
}
