//! Experiment configuration surface.
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::condition::FrameType;
use crate::constants;
use crate::numbers::i64_to_f64;
use crate::trial::{Outcome, TrialMode};

/// Errors raised when configuration invariants are violated.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be at least {min} (got {value})")]
    MinViolation {
        field: &'static str,
        min: f64,
        value: f64,
    },
    #[error("{field} minimum {min} exceeds maximum {max}")]
    RangeInverted {
        field: &'static str,
        min: f64,
        max: f64,
    },
    #[error("{field} must be a finite number")]
    NotFinite { field: &'static str },
    #[error("{field} must be between {min} and {max} (got {value})")]
    RangeViolation {
        field: &'static str,
        min: f64,
        max: f64,
        value: f64,
    },
    #[error("far threshold {far} must not be inside the near-miss band {band}")]
    FarInsideBand { far: f64, band: f64 },
    #[error("slot template holds {total} outcomes but sessions run {max_trials} trials")]
    TemplateSize { total: u32, max_trials: u32 },
    #[error("test participant prefix must not be empty")]
    EmptyTestPrefix,
}

/// How a session's trial mode is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModePolicy {
    /// Skill sessions play the bar task, luck sessions play the reels.
    #[default]
    ByFrame,
    Bar,
    Reel,
}

impl ModePolicy {
    #[must_use]
    pub const fn resolve(self, frame_type: FrameType) -> TrialMode {
        match self {
            Self::ByFrame => match frame_type {
                FrameType::Skill => TrialMode::Bar,
                FrameType::Luck => TrialMode::Reel,
            },
            Self::Bar => TrialMode::Bar,
            Self::Reel => TrialMode::Reel,
        }
    }
}

/// Bar task tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarConfig {
    #[serde(default = "BarConfig::default_duration_ms")]
    pub duration_ms: u32,
    #[serde(default = "BarConfig::default_min_speed")]
    pub min_speed: f64,
    #[serde(default = "BarConfig::default_max_speed")]
    pub max_speed: f64,
    #[serde(default = "BarConfig::default_zone_start_min")]
    pub zone_start_min: f64,
    #[serde(default = "BarConfig::default_zone_start_max")]
    pub zone_start_max: f64,
    #[serde(default = "BarConfig::default_zone_width")]
    pub zone_width: f64,
    /// Units outside either zone edge that still count as a raw near miss.
    #[serde(default = "BarConfig::default_near_miss_band")]
    pub near_miss_band: f64,
    /// Units outside the zone edge beyond which a miss is always a loss.
    #[serde(default = "BarConfig::default_far_threshold")]
    pub far_threshold: f64,
}

impl BarConfig {
    const fn default_duration_ms() -> u32 {
        constants::BAR_DURATION_MS
    }

    const fn default_min_speed() -> f64 {
        constants::BAR_MIN_SPEED
    }

    const fn default_max_speed() -> f64 {
        constants::BAR_MAX_SPEED
    }

    const fn default_zone_start_min() -> f64 {
        constants::BAR_ZONE_START_MIN
    }

    const fn default_zone_start_max() -> f64 {
        constants::BAR_ZONE_START_MAX
    }

    const fn default_zone_width() -> f64 {
        constants::BAR_ZONE_WIDTH
    }

    const fn default_near_miss_band() -> f64 {
        constants::NEAR_MISS_BAND
    }

    const fn default_far_threshold() -> f64 {
        constants::FAR_MISS_THRESHOLD
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("bar.min_speed", self.min_speed),
            ("bar.max_speed", self.max_speed),
            ("bar.zone_start_min", self.zone_start_min),
            ("bar.zone_start_max", self.zone_start_max),
            ("bar.zone_width", self.zone_width),
            ("bar.near_miss_band", self.near_miss_band),
            ("bar.far_threshold", self.far_threshold),
        ];
        for (field, value) in fields {
            if !value.is_finite() {
                return Err(ConfigError::NotFinite { field });
            }
        }
        if self.min_speed <= 0.0 {
            return Err(ConfigError::MinViolation {
                field: "bar.min_speed",
                min: f64::EPSILON,
                value: self.min_speed,
            });
        }
        if self.min_speed > self.max_speed {
            return Err(ConfigError::RangeInverted {
                field: "bar.speed",
                min: self.min_speed,
                max: self.max_speed,
            });
        }
        if self.zone_start_min > self.zone_start_max {
            return Err(ConfigError::RangeInverted {
                field: "bar.zone_start",
                min: self.zone_start_min,
                max: self.zone_start_max,
            });
        }
        if self.zone_width <= 0.0 {
            return Err(ConfigError::MinViolation {
                field: "bar.zone_width",
                min: f64::EPSILON,
                value: self.zone_width,
            });
        }
        if self.near_miss_band < 0.0 {
            return Err(ConfigError::MinViolation {
                field: "bar.near_miss_band",
                min: 0.0,
                value: self.near_miss_band,
            });
        }
        if self.far_threshold < self.near_miss_band {
            return Err(ConfigError::FarInsideBand {
                far: self.far_threshold,
                band: self.near_miss_band,
            });
        }
        Ok(())
    }
}

impl Default for BarConfig {
    fn default() -> Self {
        Self {
            duration_ms: Self::default_duration_ms(),
            min_speed: Self::default_min_speed(),
            max_speed: Self::default_max_speed(),
            zone_start_min: Self::default_zone_start_min(),
            zone_start_max: Self::default_zone_start_max(),
            zone_width: Self::default_zone_width(),
            near_miss_band: Self::default_near_miss_band(),
            far_threshold: Self::default_far_threshold(),
        }
    }
}

/// Multiset of outcome labels dealt to a reel session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub hit: u32,
    pub near_miss: u32,
    pub loss: u32,
}

impl OutcomeCounts {
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.hit + self.near_miss + self.loss
    }

    #[must_use]
    pub const fn count(&self, outcome: Outcome) -> u32 {
        match outcome {
            Outcome::Hit => self.hit,
            Outcome::NearMiss => self.near_miss,
            Outcome::Loss => self.loss,
        }
    }
}

impl Default for OutcomeCounts {
    fn default() -> Self {
        Self {
            hit: constants::SLOT_TEMPLATE_HITS,
            near_miss: constants::SLOT_TEMPLATE_NEAR_MISSES,
            loss: constants::SLOT_TEMPLATE_LOSSES,
        }
    }
}

/// Slot reel tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotConfig {
    #[serde(default)]
    pub template: OutcomeCounts,
    /// Probability that a near miss shows its odd symbol on the last reel.
    #[serde(default = "SlotConfig::default_last_reel_miss_chance")]
    pub last_reel_miss_chance: f64,
    #[serde(default = "SlotConfig::default_spin_durations_ms")]
    pub spin_durations_ms: [u32; 3],
}

impl SlotConfig {
    const fn default_last_reel_miss_chance() -> f64 {
        constants::SLOT_LAST_REEL_MISS_CHANCE
    }

    const fn default_spin_durations_ms() -> [u32; 3] {
        constants::SLOT_SPIN_DURATIONS_MS
    }

    fn validate(&self, max_trials: u32) -> Result<(), ConfigError> {
        if !self.last_reel_miss_chance.is_finite() {
            return Err(ConfigError::NotFinite {
                field: "slot.last_reel_miss_chance",
            });
        }
        if !(0.0..=1.0).contains(&self.last_reel_miss_chance) {
            return Err(ConfigError::RangeViolation {
                field: "slot.last_reel_miss_chance",
                min: 0.0,
                max: 1.0,
                value: self.last_reel_miss_chance,
            });
        }
        let total = self.template.total();
        if total != max_trials {
            return Err(ConfigError::TemplateSize { total, max_trials });
        }
        Ok(())
    }
}

impl Default for SlotConfig {
    fn default() -> Self {
        Self {
            template: OutcomeCounts::default(),
            last_reel_miss_chance: Self::default_last_reel_miss_chance(),
            spin_durations_ms: Self::default_spin_durations_ms(),
        }
    }
}

/// Inclusive bounds of one survey scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleBounds {
    pub min: i64,
    pub max: i64,
}

impl ScaleBounds {
    #[must_use]
    pub const fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    #[must_use]
    pub const fn likert() -> Self {
        Self::new(constants::LIKERT_MIN, constants::LIKERT_MAX)
    }

    #[must_use]
    pub const fn contains(self, value: i64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Documented ranges for every survey field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurveyBounds {
    #[serde(default = "SurveyBounds::default_rounds")]
    pub desired_rounds_next_time: ScaleBounds,
    #[serde(default = "ScaleBounds::likert")]
    pub confidence_impact: ScaleBounds,
    #[serde(default = "ScaleBounds::likert")]
    pub self_rated_accuracy: ScaleBounds,
    /// Shared by the closeness, control and urge self-report items.
    #[serde(default = "ScaleBounds::likert")]
    pub self_report: ScaleBounds,
}

impl SurveyBounds {
    const fn default_rounds() -> ScaleBounds {
        ScaleBounds::new(constants::ROUNDS_MIN, constants::ROUNDS_MAX)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let scales = [
            ("survey.desired_rounds_next_time", self.desired_rounds_next_time),
            ("survey.confidence_impact", self.confidence_impact),
            ("survey.self_rated_accuracy", self.self_rated_accuracy),
            ("survey.self_report", self.self_report),
        ];
        for (field, scale) in scales {
            if scale.min > scale.max {
                return Err(ConfigError::RangeInverted {
                    field,
                    min: i64_to_f64(scale.min),
                    max: i64_to_f64(scale.max),
                });
            }
        }
        Ok(())
    }
}

impl Default for SurveyBounds {
    fn default() -> Self {
        Self {
            desired_rounds_next_time: Self::default_rounds(),
            confidence_impact: ScaleBounds::likert(),
            self_rated_accuracy: ScaleBounds::likert(),
            self_report: ScaleBounds::likert(),
        }
    }
}

/// Complete experiment configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    #[serde(default = "ExperimentConfig::default_max_trials")]
    pub max_trials: u32,
    #[serde(default)]
    pub mode_policy: ModePolicy,
    #[serde(default)]
    pub bar: BarConfig,
    #[serde(default)]
    pub slot: SlotConfig,
    #[serde(default)]
    pub survey: SurveyBounds,
    /// Trials between self-report prompts; zero disables them.
    #[serde(default = "ExperimentConfig::default_self_report_interval")]
    pub self_report_interval: u32,
    /// Reserved participant-id prefix marking developer/test traffic.
    #[serde(default = "ExperimentConfig::default_test_prefix")]
    pub test_prefix: String,
}

impl ExperimentConfig {
    const fn default_max_trials() -> u32 {
        constants::MAX_TRIALS
    }

    const fn default_self_report_interval() -> u32 {
        constants::SELF_REPORT_INTERVAL
    }

    fn default_test_prefix() -> String {
        constants::TEST_PARTICIPANT_PREFIX.to_string()
    }

    /// Parse a configuration from JSON; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON cannot be parsed into a configuration.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Check every cross-field invariant.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_trials == 0 {
            return Err(ConfigError::MinViolation {
                field: "max_trials",
                min: 1.0,
                value: 0.0,
            });
        }
        if self.test_prefix.trim().is_empty() {
            return Err(ConfigError::EmptyTestPrefix);
        }
        self.bar.validate()?;
        self.slot.validate(self.max_trials)?;
        self.survey.validate()?;
        Ok(())
    }

    /// Whether a self-report is due after the given trial.
    #[must_use]
    pub const fn self_report_due(&self, trial_number: u32) -> bool {
        self.self_report_interval > 0
            && trial_number > 0
            && trial_number % self.self_report_interval == 0
    }
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            max_trials: Self::default_max_trials(),
            mode_policy: ModePolicy::default(),
            bar: BarConfig::default(),
            slot: SlotConfig::default(),
            survey: SurveyBounds::default(),
            self_report_interval: Self::default_self_report_interval(),
            test_prefix: Self::default_test_prefix(),
        }
    }
}
