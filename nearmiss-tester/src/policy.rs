use std::fmt;

use clap::ValueEnum;
use nearmiss_core::{BarTrialParams, ReelTrialParams, Summary, Trial};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde_json::{Value, json};

/// How simulated participants play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum ParticipantPolicy {
    /// Stop near the zone center and answer surveys consistently.
    Accurate,
    /// Stop anywhere and occasionally send malformed input.
    Erratic,
    /// Alternate accurate and erratic participants.
    Mixed,
}

impl ParticipantPolicy {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Accurate => "Accurate",
            Self::Erratic => "Erratic",
            Self::Mixed => "Mixed",
        }
    }

    /// Concrete behaviour for the participant at `index` in a run.
    #[must_use]
    pub const fn for_participant(self, index: usize) -> Behaviour {
        match self {
            Self::Accurate => Behaviour::Accurate,
            Self::Erratic => Behaviour::Erratic,
            Self::Mixed => {
                if index % 2 == 0 {
                    Behaviour::Accurate
                } else {
                    Behaviour::Erratic
                }
            }
        }
    }
}

impl fmt::Display for ParticipantPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    Accurate,
    Erratic,
}

/// One simulated participant with its own reproducible RNG.
#[derive(Debug, Clone)]
pub struct SimulatedParticipant {
    behaviour: Behaviour,
    rng: ChaCha20Rng,
}

impl SimulatedParticipant {
    #[must_use]
    pub fn new(behaviour: Behaviour, seed: u64) -> Self {
        Self {
            behaviour,
            rng: ChaCha20Rng::seed_from_u64(seed),
        }
    }

    #[must_use]
    pub const fn behaviour(&self) -> Behaviour {
        self.behaviour
    }

    /// Raw result payload for a bar trial.
    pub fn bar_result(&mut self, params: &BarTrialParams) -> Value {
        let position = match self.behaviour {
            Behaviour::Accurate => params.optimal_stop + self.rng.gen_range(-18.0..=18.0),
            Behaviour::Erratic => self.rng.gen_range(0.0..=100.0),
        };
        if self.behaviour == Behaviour::Erratic && self.rng.gen_bool(0.1) {
            // Stringly-typed or missing fields exercise input coercion.
            return json!({
                "trial_number": params.trial_number,
                "bar_position": format!("{position:.3}"),
            });
        }
        json!({
            "trial_number": params.trial_number,
            "bar_position": position,
            "target_zone_start": params.target_zone_start,
            "target_zone_width": params.target_zone_width,
        })
    }

    /// Raw result payload for a reel trial; reels are echoed back as dealt.
    pub fn reel_result(&mut self, params: &ReelTrialParams) -> Value {
        if self.behaviour == Behaviour::Erratic && self.rng.gen_bool(0.1) {
            return json!({ "trial_number": params.trial_number, "reels": ["cherry"] });
        }
        let names: Vec<&str> = params.reels.symbols().iter().map(|s| s.as_str()).collect();
        json!({ "trial_number": params.trial_number, "reels": names })
    }

    /// Ratings given at a self-report prompt, loosely tracking recent outcomes.
    pub fn self_report(&mut self, recent: &[Trial]) -> Value {
        let close = recent.iter().filter(|t| t.is_near_miss || t.is_hit).count();
        let closeness = i64::try_from(close.min(6)).unwrap_or(6) + 1;
        json!({
            "closeness": closeness,
            "control": self.rng.gen_range(1..=7),
            "urge": self.rng.gen_range(1..=7),
        })
    }

    /// Post-survey answers. Erratic participants sometimes submit an
    /// out-of-range rating first.
    pub fn survey_attempts(&mut self, summary: &Summary) -> Vec<Value> {
        let rounds = if summary.win_rate >= 50.0 { 5 } else { 3 };
        let valid = json!({
            "desired_rounds_next_time": rounds,
            "confidence_impact": self.rng.gen_range(1..=7),
            "self_rated_accuracy": self.rng.gen_range(1..=7),
        });
        let mut attempts = Vec::with_capacity(2);
        if self.behaviour == Behaviour::Erratic && self.rng.gen_bool(0.3) {
            attempts.push(json!({
                "desired_rounds_next_time": rounds,
                "confidence_impact": 8,
                "self_rated_accuracy": 4,
            }));
        }
        attempts.push(valid);
        attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_policy_alternates() {
        assert_eq!(
            ParticipantPolicy::Mixed.for_participant(0),
            Behaviour::Accurate
        );
        assert_eq!(
            ParticipantPolicy::Mixed.for_participant(1),
            Behaviour::Erratic
        );
        assert_eq!(
            ParticipantPolicy::Erratic.for_participant(0),
            Behaviour::Erratic
        );
    }

    #[test]
    fn accurate_participants_stay_near_center() {
        let params = BarTrialParams {
            trial_number: 1,
            speed: 0.5,
            duration: 2000,
            target_zone_start: 40.0,
            target_zone_width: 15.0,
            optimal_stop: 47.5,
        };
        let mut participant = SimulatedParticipant::new(Behaviour::Accurate, 3);
        for _ in 0..100 {
            let raw = participant.bar_result(&params);
            let position = raw["bar_position"].as_f64().unwrap();
            assert!((29.5..=65.5).contains(&position));
        }
    }

    #[test]
    fn last_survey_attempt_is_valid() {
        let summary_json = json!({
            "participant_id": "P1", "condition_id": "skill_near_miss", "frame_type": "skill",
            "loss_frame": "near_miss", "mode": "bar", "is_test": false, "total_trials": 15,
            "hits": 9, "near_misses": 3, "losses": 3, "near_miss_raw_count": 4,
            "win_rate": 60.0, "mean_distance": 9.1, "completed": true, "self_reports": 3
        });
        let summary: Summary = serde_json::from_value(summary_json).unwrap();
        let mut participant = SimulatedParticipant::new(Behaviour::Erratic, 5);
        for _ in 0..20 {
            let attempts = participant.survey_attempts(&summary);
            let last = attempts.last().unwrap();
            assert_eq!(last["desired_rounds_next_time"], 5);
            assert!((1..=7).contains(&last["confidence_impact"].as_i64().unwrap()));
        }
    }
}
