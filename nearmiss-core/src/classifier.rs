//! Outcome classification shared by both task modes.
//!
//! Raw trial input is first reduced to a condition-free [`Geometry`]. Bar
//! trials are then labeled by the session's condition; reel trials report the
//! label their session dealt and use the geometry only for distance. In both
//! modes a miss on the final trial is always a near miss, even when it would
//! otherwise be too far away to read as one.
use serde::{Deserialize, Serialize};

use crate::condition::Condition;
use crate::config::BarConfig;
use crate::constants::{REEL_DISTANCE_PER_STEP, REEL_NO_MATCH_DISTANCE};
use crate::numbers::usize_to_f64;
use crate::reels::{ReelMatch, Reels, cyclic_distance};
use crate::trial::{LabelReason, Outcome, Trial, TrialData};

/// Raw result of a trial after input coercion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrialKind {
    Bar {
        position: f64,
        zone_start: f64,
        zone_width: f64,
    },
    Reel {
        reels: Reels,
        /// Label dealt for this trial; `None` reads it off the reels.
        planned: Option<Outcome>,
    },
}

/// Condition-free reading of a trial result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub is_hit: bool,
    pub near_miss_raw: bool,
    /// Too far from the target to ever be labeled close on a normal trial.
    pub beyond_far: bool,
    pub distance_from_center: f64,
}

#[must_use]
pub fn bar_geometry(position: f64, zone_start: f64, zone_width: f64, cfg: &BarConfig) -> Geometry {
    let zone_end = zone_start + zone_width;
    let center = zone_start + zone_width / 2.0;
    let is_hit = zone_start <= position && position <= zone_end;
    let edge_distance = if position < zone_start {
        zone_start - position
    } else if position > zone_end {
        position - zone_end
    } else {
        0.0
    };
    Geometry {
        is_hit,
        near_miss_raw: !is_hit && edge_distance <= cfg.near_miss_band,
        beyond_far: !is_hit && edge_distance > cfg.far_threshold,
        distance_from_center: (position - center).abs(),
    }
}

#[must_use]
pub fn reel_geometry(reels: &Reels) -> Geometry {
    match reels.classify() {
        ReelMatch::Triple(_) => Geometry {
            is_hit: true,
            near_miss_raw: false,
            beyond_far: false,
            distance_from_center: 0.0,
        },
        ReelMatch::Pair { matched, odd } => {
            let steps = cyclic_distance(matched, odd);
            let near = steps == 1;
            Geometry {
                is_hit: false,
                near_miss_raw: near,
                beyond_far: !near,
                distance_from_center: usize_to_f64(steps) * REEL_DISTANCE_PER_STEP,
            }
        }
        ReelMatch::Distinct => Geometry {
            is_hit: false,
            near_miss_raw: false,
            beyond_far: true,
            distance_from_center: REEL_NO_MATCH_DISTANCE,
        },
    }
}

/// Condition-dependent labeling policy for bar trials.
///
/// `is_final` is true only for the last counted trial of a session.
#[must_use]
pub const fn label(geometry: &Geometry, condition: Condition, is_final: bool) -> (Outcome, LabelReason) {
    if geometry.is_hit {
        (Outcome::Hit, LabelReason::Hit)
    } else if is_final {
        (Outcome::NearMiss, LabelReason::FinalTrial)
    } else if geometry.beyond_far {
        (Outcome::Loss, LabelReason::FarMiss)
    } else if condition.allows_near_miss_label() {
        (Outcome::NearMiss, LabelReason::LossFrame)
    } else {
        (Outcome::Loss, LabelReason::LossFrame)
    }
}

/// Labeling policy for reel trials: the dealt label stands, except that a
/// non-hit on the final trial becomes a near miss.
#[must_use]
pub const fn reel_label(planned: Outcome, is_final: bool) -> (Outcome, LabelReason) {
    match planned {
        Outcome::Hit => (Outcome::Hit, LabelReason::Hit),
        _ if is_final => (Outcome::NearMiss, LabelReason::FinalTrial),
        other => (other, LabelReason::Dealt),
    }
}

/// Label shown by a set of reels when no label was dealt.
const fn shown_outcome(geometry: &Geometry) -> Outcome {
    if geometry.is_hit {
        Outcome::Hit
    } else if geometry.near_miss_raw {
        Outcome::NearMiss
    } else {
        Outcome::Loss
    }
}

/// Classify one trial. Trial number zero is a practice trial and never final.
#[must_use]
pub fn classify(
    input: TrialKind,
    condition: Condition,
    trial_number: u32,
    max_trials: u32,
    cfg: &BarConfig,
) -> Trial {
    let is_final = trial_number > 0 && trial_number == max_trials;
    let (geometry, data, (outcome, label_reason)) = match input {
        TrialKind::Bar {
            position,
            zone_start,
            zone_width,
        } => {
            let geometry = bar_geometry(position, zone_start, zone_width, cfg);
            let data = TrialData::Bar {
                bar_position: position,
                target_zone_start: zone_start,
                target_zone_end: zone_start + zone_width,
            };
            (geometry, data, label(&geometry, condition, is_final))
        }
        TrialKind::Reel { reels, planned } => {
            let geometry = reel_geometry(&reels);
            let planned = planned.unwrap_or(shown_outcome(&geometry));
            (
                geometry,
                TrialData::Reel { reels },
                reel_label(planned, is_final),
            )
        }
    };
    log::debug!(
        "trial {trial_number} [{condition}]: {outcome} via {label_reason:?} (d={:.2})",
        geometry.distance_from_center
    );
    Trial {
        trial_number,
        data,
        outcome,
        label_reason,
        distance_from_center: geometry.distance_from_center,
        near_miss_raw: geometry.near_miss_raw,
        is_hit: outcome == Outcome::Hit,
        is_near_miss: outcome == Outcome::NearMiss,
    }
}
