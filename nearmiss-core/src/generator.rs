//! Trial parameter generation for both task modes.
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::{BarConfig, ExperimentConfig};
use crate::reels::{OutcomeTemplate, Reels, generate_reels};
use crate::trial::{Outcome, TrialMode};

/// Parameters of one bar timing trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarTrialParams {
    pub trial_number: u32,
    /// Sweep speed as a fraction of the track per second.
    pub speed: f64,
    pub duration: u32,
    pub target_zone_start: f64,
    pub target_zone_width: f64,
    /// Center of the target zone.
    pub optimal_stop: f64,
}

impl BarTrialParams {
    #[must_use]
    pub fn target_zone_end(&self) -> f64 {
        self.target_zone_start + self.target_zone_width
    }
}

/// Parameters of one slot reel trial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReelTrialParams {
    pub trial_number: u32,
    pub reels: Reels,
    pub reel_emojis: [String; 3],
    pub spin_durations: [u32; 3],
}

/// Parameters handed to the client before it performs a trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "game_mode", rename_all = "snake_case")]
pub enum TrialParams {
    Bar(BarTrialParams),
    Reel(ReelTrialParams),
}

impl TrialParams {
    #[must_use]
    pub const fn trial_number(&self) -> u32 {
        match self {
            Self::Bar(params) => params.trial_number,
            Self::Reel(params) => params.trial_number,
        }
    }

    #[must_use]
    pub const fn mode(&self) -> TrialMode {
        match self {
            Self::Bar(_) => TrialMode::Bar,
            Self::Reel(_) => TrialMode::Reel,
        }
    }
}

/// Draw bar parameters. Condition-free.
pub fn generate_bar_trial<R: Rng + ?Sized>(
    trial_number: u32,
    cfg: &BarConfig,
    rng: &mut R,
) -> BarTrialParams {
    let speed = uniform(rng, cfg.min_speed, cfg.max_speed);
    let target_zone_start = uniform(rng, cfg.zone_start_min, cfg.zone_start_max);
    BarTrialParams {
        trial_number,
        speed,
        duration: cfg.duration_ms,
        target_zone_start,
        target_zone_width: cfg.zone_width,
        optimal_stop: target_zone_start + cfg.zone_width / 2.0,
    }
}

/// Draw reel parameters for trial `n`, honouring the session template.
///
/// Returns the parameters together with the label they were dealt for; the
/// label stays with the session and is never sent to the client.
/// `label_rng` draws the fallback label past the template and `reel_rng`
/// draws the symbols, so both streams stay independent.
pub fn generate_reel_trial<R1, R2>(
    trial_number: u32,
    template: &OutcomeTemplate,
    cfg: &ExperimentConfig,
    label_rng: &mut R1,
    reel_rng: &mut R2,
) -> (ReelTrialParams, Outcome)
where
    R1: Rng + ?Sized,
    R2: Rng + ?Sized,
{
    let outcome = template.label_for(trial_number, label_rng);
    let reels = generate_reels(outcome, cfg.slot.last_reel_miss_chance, reel_rng);
    log::debug!("reel trial {trial_number}: planned {outcome}, dealt {reels}");
    let params = ReelTrialParams {
        trial_number,
        reels,
        reel_emojis: reels.emojis().map(str::to_string),
        spin_durations: cfg.slot.spin_durations_ms,
    };
    (params, outcome)
}

fn uniform<R: Rng + ?Sized>(rng: &mut R, low: f64, high: f64) -> f64 {
    if high > low {
        rng.gen_range(low..=high)
    } else {
        low
    }
}
