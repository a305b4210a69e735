//! Per-participant session state.
//!
//! A session is an owned value: the outer layer keeps it under its
//! [`SessionKey`] and passes `&mut Session` into the engine. Every mutating
//! step is split into a pure `prepare_*` check and a `commit_*` so the engine
//! can persist a record before touching state.
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::classifier::{TrialKind, classify};
use crate::condition::{Condition, FrameType, LossFrame};
use crate::config::ExperimentConfig;
use crate::constants::{PARTICIPANT_ID_MAX, PARTICIPANT_ID_MIN};
use crate::generator::{TrialParams, generate_bar_trial, generate_reel_trial};
use crate::numbers::{percent, round_to, usize_to_f64};
use crate::reels::{OutcomeTemplate, Reels};
use crate::rng::SessionRng;
use crate::survey::{PostSurvey, SelfReport, SurveyError};
use crate::trial::{Outcome, Trial, TrialMode};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("expected trial {expected}, got {got}")]
    OutOfOrder { expected: u32, got: u32 },
    #[error("session already completed all {max_trials} trials")]
    Complete { max_trials: u32 },
    #[error("practice trials are only available before trial 1")]
    PracticeClosed,
    #[error("post-survey already submitted")]
    SurveyAlreadySubmitted,
    #[error("no self-report is due after trial {trial_count}")]
    SelfReportNotDue { trial_count: u32 },
    #[error(transparent)]
    Survey(#[from] SurveyError),
}

/// Opaque handle the outer layer uses to address a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    fn new(participant_id: &str, seed: u64) -> Self {
        Self(format!("{participant_id}-{seed:016x}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque demographic answers carried through to the summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Demographics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<Value>,
}

/// Client request to begin a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartRequest {
    #[serde(default)]
    pub participant_id: Option<String>,
    /// Forced frame type; honoured only together with a valid `loss_frame`.
    #[serde(default)]
    pub frame_type: Option<String>,
    #[serde(default)]
    pub loss_frame: Option<String>,
    #[serde(flatten)]
    pub demographics: Demographics,
    /// Session seed; drawn from the caller's RNG when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl StartRequest {
    /// Parse a raw JSON start request.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON does not describe a start request.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Valid forced condition, if the request carries one.
    #[must_use]
    pub fn forced_condition(&self) -> Option<Condition> {
        let frame = self.frame_type.as_deref()?;
        let loss = self.loss_frame.as_deref()?;
        Condition::from_pair(frame, loss)
    }

    /// Whether the request attempted to force a condition at all.
    #[must_use]
    pub const fn attempts_force(&self) -> bool {
        self.frame_type.is_some() || self.loss_frame.is_some()
    }
}

/// Draw a `P#####` participant id.
pub fn generate_participant_id<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!(
        "P{}",
        rng.gen_range(PARTICIPANT_ID_MIN..=PARTICIPANT_ID_MAX)
    )
}

/// Terminal snapshot of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub participant_id: String,
    pub condition_id: String,
    pub frame_type: FrameType,
    pub loss_frame: LossFrame,
    pub mode: TrialMode,
    pub is_test: bool,
    pub total_trials: u32,
    pub hits: u32,
    pub near_misses: u32,
    pub losses: u32,
    pub near_miss_raw_count: u32,
    /// Percentage of hits, one decimal.
    pub win_rate: f64,
    pub mean_distance: f64,
    pub completed: bool,
    pub self_reports: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_rounds_next_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_impact: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_rated_accuracy: Option<i64>,
    #[serde(flatten)]
    pub demographics: Demographics,
}

/// Mutable per-participant record.
#[derive(Debug, Clone)]
pub struct Session {
    key: SessionKey,
    participant_id: String,
    condition: Condition,
    mode: TrialMode,
    is_test: bool,
    demographics: Demographics,
    max_trials: u32,
    trials: Vec<Trial>,
    survey: Option<PostSurvey>,
    self_reports: Vec<SelfReport>,
    trial_count: u32,
    template: Option<OutcomeTemplate>,
    pending: Option<TrialParams>,
    /// Label the pending reel trial was dealt for.
    pending_label: Option<Outcome>,
    summary_persisted: bool,
    rng: SessionRng,
}

impl Session {
    /// Create a session with its trial mode and, for reel sessions, its
    /// shuffled outcome template.
    #[must_use]
    pub fn new(
        participant_id: impl Into<String>,
        condition: Condition,
        is_test: bool,
        demographics: Demographics,
        cfg: &ExperimentConfig,
        seed: u64,
    ) -> Self {
        let participant_id = participant_id.into();
        let mode = cfg.mode_policy.resolve(condition.frame_type);
        let mut rng = SessionRng::from_session_seed(seed);
        let template = match mode {
            TrialMode::Reel => Some(OutcomeTemplate::shuffled(
                &cfg.slot.template,
                rng.template(),
            )),
            TrialMode::Bar => None,
        };
        Self {
            key: SessionKey::new(&participant_id, seed),
            participant_id,
            condition,
            mode,
            is_test,
            demographics,
            max_trials: cfg.max_trials,
            trials: Vec::new(),
            survey: None,
            self_reports: Vec::new(),
            trial_count: 0,
            template,
            pending: None,
            pending_label: None,
            summary_persisted: false,
            rng,
        }
    }

    #[must_use]
    pub const fn key(&self) -> &SessionKey {
        &self.key
    }

    #[must_use]
    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    #[must_use]
    pub const fn condition(&self) -> Condition {
        self.condition
    }

    #[must_use]
    pub const fn mode(&self) -> TrialMode {
        self.mode
    }

    #[must_use]
    pub const fn is_test(&self) -> bool {
        self.is_test
    }

    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.rng.seed()
    }

    /// Random draws made by this session so far.
    #[must_use]
    pub const fn rng_draws(&self) -> u64 {
        self.rng.draws()
    }

    #[must_use]
    pub const fn trial_count(&self) -> u32 {
        self.trial_count
    }

    #[must_use]
    pub const fn max_trials(&self) -> u32 {
        self.max_trials
    }

    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.trial_count >= self.max_trials
    }

    #[must_use]
    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    #[must_use]
    pub const fn survey(&self) -> Option<&PostSurvey> {
        self.survey.as_ref()
    }

    #[must_use]
    pub fn self_reports(&self) -> &[SelfReport] {
        &self.self_reports
    }

    #[must_use]
    pub const fn template(&self) -> Option<&OutcomeTemplate> {
        self.template.as_ref()
    }

    #[must_use]
    pub const fn pending(&self) -> Option<&TrialParams> {
        self.pending.as_ref()
    }

    #[must_use]
    pub const fn summary_persisted(&self) -> bool {
        self.summary_persisted
    }

    pub(crate) const fn mark_summary_persisted(&mut self) {
        self.summary_persisted = true;
    }

    /// Trial number `n` may be generated or recorded next.
    fn check_trial_number(&self, trial_number: u32) -> Result<(), SessionError> {
        if trial_number == 0 {
            return if self.trial_count == 0 {
                Ok(())
            } else {
                Err(SessionError::PracticeClosed)
            };
        }
        if self.is_complete() {
            return Err(SessionError::Complete {
                max_trials: self.max_trials,
            });
        }
        let expected = self.trial_count + 1;
        if trial_number == expected {
            Ok(())
        } else {
            Err(SessionError::OutOfOrder {
                expected,
                got: trial_number,
            })
        }
    }

    /// Produce parameters for trial `n` and remember them as pending.
    ///
    /// # Errors
    ///
    /// Returns an error if `n` is not the next trial (or practice trial 0).
    pub fn generate_trial(
        &mut self,
        trial_number: u32,
        cfg: &ExperimentConfig,
    ) -> Result<TrialParams, SessionError> {
        self.check_trial_number(trial_number)?;
        let (params, label) = match (self.mode, self.template.as_ref()) {
            (TrialMode::Reel, Some(template)) => {
                // Practice spins are dealt from a uniform label, never from the template.
                let (label_rng, reel_rng) = self.rng.trials_and_reels();
                let (params, label) =
                    generate_reel_trial(trial_number, template, cfg, label_rng, reel_rng);
                (TrialParams::Reel(params), Some(label))
            }
            _ => (
                TrialParams::Bar(generate_bar_trial(trial_number, &cfg.bar, self.rng.trials())),
                None,
            ),
        };
        self.pending = Some(params.clone());
        self.pending_label = label;
        Ok(params)
    }

    /// Coerce and classify a raw result for trial `n` without changing state.
    ///
    /// # Errors
    ///
    /// Returns an error if `n` is not the next trial (or practice trial 0).
    pub fn prepare_trial(
        &self,
        trial_number: u32,
        raw: &Value,
        cfg: &ExperimentConfig,
    ) -> Result<Trial, SessionError> {
        self.check_trial_number(trial_number)?;
        let kind = self.coerce(trial_number, raw, cfg);
        Ok(classify(
            kind,
            self.condition,
            trial_number,
            self.max_trials,
            &cfg.bar,
        ))
    }

    /// Append a trial produced by [`Session::prepare_trial`]. Practice trials
    /// only clear the pending parameters.
    pub fn commit_trial(&mut self, trial: Trial) {
        self.pending = None;
        self.pending_label = None;
        if trial.trial_number == 0 {
            return;
        }
        self.trial_count += 1;
        self.trials.push(trial);
    }

    /// Classify and store a trial in one step.
    ///
    /// # Errors
    ///
    /// Returns an error if `n` is not the next trial (or practice trial 0).
    pub fn record_trial(
        &mut self,
        trial_number: u32,
        raw: &Value,
        cfg: &ExperimentConfig,
    ) -> Result<Trial, SessionError> {
        let trial = self.prepare_trial(trial_number, raw, cfg)?;
        self.commit_trial(trial.clone());
        Ok(trial)
    }

    /// # Errors
    ///
    /// Returns an error if a survey was already stored or a field is invalid.
    pub fn prepare_survey(
        &self,
        fields: &Value,
        cfg: &ExperimentConfig,
    ) -> Result<PostSurvey, SessionError> {
        if self.survey.is_some() {
            return Err(SessionError::SurveyAlreadySubmitted);
        }
        Ok(PostSurvey::from_fields(fields, &cfg.survey)?)
    }

    pub fn commit_survey(&mut self, survey: PostSurvey) {
        self.survey = Some(survey);
    }

    /// # Errors
    ///
    /// Returns an error if a survey was already stored or a field is invalid.
    pub fn record_survey(
        &mut self,
        fields: &Value,
        cfg: &ExperimentConfig,
    ) -> Result<PostSurvey, SessionError> {
        let survey = self.prepare_survey(fields, cfg)?;
        self.commit_survey(survey);
        Ok(survey)
    }

    /// Whether a self-report is due now and not yet given.
    #[must_use]
    pub fn self_report_due(&self, cfg: &ExperimentConfig) -> bool {
        cfg.self_report_due(self.trial_count)
            && self
                .self_reports
                .last()
                .is_none_or(|report| report.after_trial != self.trial_count)
    }

    /// # Errors
    ///
    /// Returns an error if no report is due or a rating is invalid.
    pub fn prepare_self_report(
        &self,
        fields: &Value,
        cfg: &ExperimentConfig,
    ) -> Result<SelfReport, SessionError> {
        if !self.self_report_due(cfg) {
            return Err(SessionError::SelfReportNotDue {
                trial_count: self.trial_count,
            });
        }
        Ok(SelfReport::from_fields(
            fields,
            self.trial_count,
            cfg.survey.self_report,
        )?)
    }

    pub fn commit_self_report(&mut self, report: SelfReport) {
        self.self_reports.push(report);
    }

    /// # Errors
    ///
    /// Returns an error if no report is due or a rating is invalid.
    pub fn record_self_report(
        &mut self,
        fields: &Value,
        cfg: &ExperimentConfig,
    ) -> Result<SelfReport, SessionError> {
        let report = self.prepare_self_report(fields, cfg)?;
        self.commit_self_report(report);
        Ok(report)
    }

    /// Recompute the summary from the trial log.
    #[must_use]
    pub fn summarize(&self) -> Summary {
        let mut hits = 0;
        let mut near_misses = 0;
        let mut losses = 0;
        let mut near_miss_raw_count = 0;
        let mut distance_sum = 0.0;
        for trial in &self.trials {
            match trial.outcome {
                Outcome::Hit => hits += 1,
                Outcome::NearMiss => near_misses += 1,
                Outcome::Loss => losses += 1,
            }
            if trial.near_miss_raw {
                near_miss_raw_count += 1;
            }
            distance_sum += trial.distance_from_center;
        }
        let total = self.trials.len();
        let mean_distance = if total == 0 {
            0.0
        } else {
            round_to(distance_sum / usize_to_f64(total), 2)
        };
        Summary {
            participant_id: self.participant_id.clone(),
            condition_id: self.condition.condition_id(),
            frame_type: self.condition.frame_type,
            loss_frame: self.condition.loss_frame,
            mode: self.mode,
            is_test: self.is_test,
            total_trials: u32::try_from(total).unwrap_or(u32::MAX),
            hits,
            near_misses,
            losses,
            near_miss_raw_count,
            win_rate: percent(usize::try_from(hits).unwrap_or(0), total),
            mean_distance,
            completed: self.is_complete(),
            self_reports: u32::try_from(self.self_reports.len()).unwrap_or(u32::MAX),
            desired_rounds_next_time: self.survey.map(|s| s.desired_rounds_next_time),
            confidence_impact: self.survey.map(|s| s.confidence_impact),
            self_rated_accuracy: self.survey.map(|s| s.self_rated_accuracy),
            demographics: self.demographics.clone(),
        }
    }

    fn pending_for(&self, trial_number: u32) -> Option<&TrialParams> {
        self.pending
            .as_ref()
            .filter(|params| params.trial_number() == trial_number)
    }

    fn coerce(&self, trial_number: u32, raw: &Value, cfg: &ExperimentConfig) -> TrialKind {
        let pending = self.pending_for(trial_number);
        match self.mode {
            TrialMode::Bar => {
                let pending_bar = match pending {
                    Some(TrialParams::Bar(params)) => Some(params),
                    _ => None,
                };
                let zone_start_fallback = pending_bar.map_or(0.0, |p| p.target_zone_start);
                let zone_width_fallback =
                    pending_bar.map_or(cfg.bar.zone_width, |p| p.target_zone_width);
                TrialKind::Bar {
                    position: self.number_or(raw, "bar_position", 0.0),
                    zone_start: self.number_or(raw, "target_zone_start", zone_start_fallback),
                    zone_width: self.number_or(raw, "target_zone_width", zone_width_fallback),
                }
            }
            TrialMode::Reel => {
                let parsed = raw
                    .get("reels")
                    .and_then(Value::as_array)
                    .and_then(|items| {
                        items
                            .iter()
                            .map(Value::as_str)
                            .collect::<Option<Vec<&str>>>()
                    })
                    .and_then(Reels::from_names);
                // The dealt label is reported as is; without a pending deal the
                // template slot still decides.
                let planned = match pending {
                    Some(TrialParams::Reel(_)) => self.pending_label,
                    _ => self.template.as_ref().and_then(|t| t.get(trial_number)),
                };
                let reels = parsed.unwrap_or_else(|| {
                    let fallback = match pending {
                        Some(TrialParams::Reel(params)) => params.reels,
                        _ => Reels::FALLBACK_LOSS,
                    };
                    log::warn!(
                        "{}: trial {trial_number} reported unreadable reels; using {fallback}",
                        self.participant_id
                    );
                    fallback
                });
                TrialKind::Reel { reels, planned }
            }
        }
    }

    fn number_or(&self, raw: &Value, field: &str, fallback: f64) -> f64 {
        let parsed = match raw.get(field) {
            Some(Value::Number(number)) => number.as_f64(),
            Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
            _ => None,
        }
        .filter(|value| value.is_finite());
        parsed.unwrap_or_else(|| {
            log::warn!(
                "{}: field `{field}` missing or unreadable; using {fallback}",
                self.participant_id
            );
            fallback
        })
    }
}
