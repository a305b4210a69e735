//! Near-miss framing experiment engine
//!
//! Condition assignment and trial-outcome classification for a 2×2 framing
//! experiment (skill vs. luck × near-miss vs. clear-loss). This crate holds
//! all experiment logic without any HTTP or page-rendering concerns; callers
//! own sessions and supply a [`RecordSink`] for persistence.

pub mod balancer;
pub mod classifier;
pub mod condition;
pub mod config;
mod constants;
pub mod feedback;
pub mod generator;
pub mod numbers;
pub mod reels;
pub mod rng;
pub mod session;
pub mod sink;
pub mod survey;
pub mod trial;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// Re-export commonly used types
pub use balancer::{AggregateCounts, ConditionBalancer};
pub use classifier::{
    Geometry, TrialKind, bar_geometry, classify, label, reel_geometry, reel_label,
};
pub use condition::{Condition, FrameType, LossFrame};
pub use config::{
    BarConfig, ConfigError, ExperimentConfig, ModePolicy, OutcomeCounts, ScaleBounds, SlotConfig,
    SurveyBounds,
};
pub use feedback::{FrameDescription, trial_feedback};
pub use generator::{
    BarTrialParams, ReelTrialParams, TrialParams, generate_bar_trial, generate_reel_trial,
};
pub use reels::{OutcomeTemplate, ReelMatch, Reels, Symbol, cyclic_distance, generate_reels};
pub use rng::{CountingRng, SessionRng, derive_stream_seed};
pub use session::{
    Demographics, Session, SessionError, SessionKey, StartRequest, Summary,
    generate_participant_id,
};
pub use sink::{JsonlSink, JsonlSinkError, MemorySink, Record, RecordSink, RecordType};
pub use survey::{PostSurvey, SelfReport, SurveyError};
pub use trial::{LabelReason, Outcome, Trial, TrialData, TrialMode};

/// Failure of an engine operation, generic over the sink's error type.
#[derive(Debug, Error)]
pub enum EngineError<E: std::error::Error + 'static> {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("record sink failed: {0}")]
    Sink(#[source] E),
    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

impl<E: std::error::Error + 'static> EngineError<E> {
    /// Survey validation failure, if that is what this error is.
    #[must_use]
    pub const fn survey(&self) -> Option<&SurveyError> {
        match self {
            Self::Session(SessionError::Survey(err)) => Some(err),
            _ => None,
        }
    }
}

/// Result of evaluating one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialEvaluation {
    pub trial: Trial,
    pub feedback: String,
    /// The session has now completed every counted trial.
    pub done: bool,
    /// Trial zero: classified for feedback only, never stored.
    pub practice: bool,
    pub self_report_due: bool,
}

/// Client-facing surface binding configuration, balancing and persistence.
pub struct ExperimentEngine<S: RecordSink> {
    config: ExperimentConfig,
    balancer: ConditionBalancer,
    sink: S,
}

impl<S: RecordSink> ExperimentEngine<S> {
    /// Create an engine over a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration violates an invariant.
    pub fn new(config: ExperimentConfig, sink: S) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            balancer: ConditionBalancer::new(config.test_prefix.clone()),
            config,
            sink,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    #[must_use]
    pub const fn sink(&self) -> &S {
        &self.sink
    }

    /// Begin a session, balancing its condition unless a valid one is forced.
    ///
    /// Forced sessions are test traffic: the participant id gains the test
    /// prefix and every record is flagged so balancing ignores it.
    ///
    /// # Errors
    ///
    /// Returns an error if the sink cannot be scanned for balancing.
    pub fn start_session<R: Rng + ?Sized>(
        &self,
        request: StartRequest,
        rng: &mut R,
    ) -> Result<Session, EngineError<S::Error>> {
        let prefix = self.config.test_prefix.as_str();
        let mut participant_id = request
            .participant_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map_or_else(|| generate_participant_id(rng), str::to_string);

        let forced = request.forced_condition();
        if forced.is_none() && request.attempts_force() {
            log::warn!(
                "ignoring invalid forced condition ({:?}, {:?}) for {participant_id}",
                request.frame_type,
                request.loss_frame
            );
        }
        let condition = match forced {
            Some(condition) => {
                if !participant_id.starts_with(prefix) {
                    participant_id = format!("{prefix}{participant_id}");
                }
                condition
            }
            None => self
                .balancer
                .assign(&self.sink, rng)
                .map_err(EngineError::Sink)?,
        };
        let is_test = forced.is_some() || participant_id.starts_with(prefix);
        let seed = request.seed.unwrap_or_else(|| rng.next_u64());
        let session = Session::new(
            participant_id,
            condition,
            is_test,
            request.demographics,
            &self.config,
            seed,
        );
        log::info!(
            "session {} started: {} as {} ({} mode{})",
            session.key(),
            session.participant_id(),
            condition,
            session.mode().as_str(),
            if is_test { ", test" } else { "" }
        );
        Ok(session)
    }

    /// # Errors
    ///
    /// Returns an error if `trial_number` is not the next trial.
    pub fn generate_trial(
        &self,
        session: &mut Session,
        trial_number: u32,
    ) -> Result<TrialParams, EngineError<S::Error>> {
        Ok(session.generate_trial(trial_number, &self.config)?)
    }

    /// Classify a raw trial result, persist it, then append it to the session.
    ///
    /// # Errors
    ///
    /// Returns an error if the trial is out of order or the sink fails; the
    /// session is unchanged in both cases.
    pub fn evaluate_trial(
        &self,
        session: &mut Session,
        trial_number: u32,
        raw: &Value,
    ) -> Result<TrialEvaluation, EngineError<S::Error>> {
        let trial = session.prepare_trial(trial_number, raw, &self.config)?;
        let feedback = trial_feedback(&trial);
        let practice = trial_number == 0;
        if !practice {
            self.persist(session, RecordType::Trial, &trial.rounded())?;
        }
        session.commit_trial(trial.clone());
        Ok(TrialEvaluation {
            trial,
            feedback,
            done: session.is_complete(),
            practice,
            self_report_due: !practice && session.self_report_due(&self.config),
        })
    }

    /// Store the post-survey. On a completed session this also stores the
    /// summary, so results fetched before the survey still end up in a
    /// summary record carrying the answers.
    ///
    /// # Errors
    ///
    /// Returns an error if the survey is invalid or already submitted, or the
    /// sink fails. An invalid survey stores nothing; if only the summary
    /// fails to persist, the survey stays stored and [`Self::get_summary`]
    /// retries the summary.
    pub fn submit_survey(
        &self,
        session: &mut Session,
        fields: &Value,
    ) -> Result<PostSurvey, EngineError<S::Error>> {
        let survey = session.prepare_survey(fields, &self.config)?;
        self.persist(session, RecordType::PostSurvey, &survey)?;
        session.commit_survey(survey);
        self.persist_final_summary(session)?;
        Ok(survey)
    }

    /// # Errors
    ///
    /// Returns an error if no report is due, a rating is invalid, or the sink fails.
    pub fn submit_self_report(
        &self,
        session: &mut Session,
        fields: &Value,
    ) -> Result<SelfReport, EngineError<S::Error>> {
        let report = session.prepare_self_report(fields, &self.config)?;
        self.persist(session, RecordType::SelfReport, &report)?;
        session.commit_self_report(report);
        Ok(report)
    }

    /// Current summary. The summary is persisted exactly once, as soon as
    /// the session has completed every trial and stored its post-survey;
    /// other calls only recompute.
    ///
    /// # Errors
    ///
    /// Returns an error if the summary cannot be persisted.
    pub fn get_summary(&self, session: &mut Session) -> Result<Summary, EngineError<S::Error>> {
        self.persist_final_summary(session)?;
        Ok(session.summarize())
    }

    /// Completed non-test sessions per condition.
    ///
    /// # Errors
    ///
    /// Returns the sink's error if the store cannot be scanned.
    pub fn aggregate_counts(&self) -> Result<AggregateCounts, S::Error> {
        self.balancer.aggregate_counts(&self.sink)
    }

    /// Every stored record, for export.
    ///
    /// # Errors
    ///
    /// Returns the sink's error if the store cannot be scanned.
    pub fn export_records(&self) -> Result<Vec<Value>, S::Error> {
        self.sink.scan()
    }

    #[must_use]
    pub fn frame_description(&self, frame_type: FrameType) -> FrameDescription {
        feedback::frame_description(frame_type)
    }

    fn persist_final_summary(&self, session: &mut Session) -> Result<(), EngineError<S::Error>> {
        if !session.is_complete() || session.survey().is_none() || session.summary_persisted() {
            return Ok(());
        }
        let summary = session.summarize();
        self.persist(session, RecordType::Summary, &summary)?;
        session.mark_summary_persisted();
        log::info!(
            "session {} finished: {} hits, {} near misses, {} random draws",
            session.key(),
            summary.hits,
            summary.near_misses,
            session.rng_draws()
        );
        Ok(())
    }

    fn persist<B: Serialize + ?Sized>(
        &self,
        session: &Session,
        record_type: RecordType,
        body: &B,
    ) -> Result<(), EngineError<S::Error>> {
        let record = Record::new(
            session.participant_id(),
            session.condition(),
            session.is_test(),
            record_type,
            body,
        )?;
        self.sink.append(&record).map_err(EngineError::Sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;
    use serde_json::json;
    use std::cell::Cell;

    #[derive(Debug, Error)]
    #[error("disk full")]
    struct DiskFull;

    /// Fails every append while `broken` is set.
    #[derive(Default)]
    struct FlakySink {
        inner: MemorySink,
        broken: Cell<bool>,
    }

    impl RecordSink for FlakySink {
        type Error = DiskFull;

        fn append(&self, record: &Record) -> Result<(), Self::Error> {
            if self.broken.get() {
                return Err(DiskFull);
            }
            let Ok(()) = self.inner.append(record);
            Ok(())
        }

        fn scan(&self) -> Result<Vec<Value>, Self::Error> {
            let Ok(records) = self.inner.scan();
            Ok(records)
        }
    }

    fn forced(frame: &str, loss: &str) -> StartRequest {
        StartRequest {
            participant_id: Some("P20000".into()),
            frame_type: Some(frame.into()),
            loss_frame: Some(loss.into()),
            seed: Some(99),
            ..StartRequest::default()
        }
    }

    #[test]
    fn forced_sessions_are_test_traffic() {
        let sink = MemorySink::new();
        let engine = ExperimentEngine::new(ExperimentConfig::default(), &sink).unwrap();
        let mut rng = SmallRng::seed_from_u64(1);
        let session = engine
            .start_session(forced("luck", "clear_loss"), &mut rng)
            .unwrap();
        assert_eq!(session.participant_id(), "TEST_P20000");
        assert!(session.is_test());
        assert_eq!(session.mode(), TrialMode::Reel);
        assert_eq!(
            session.condition(),
            Condition::new(FrameType::Luck, LossFrame::ClearLoss)
        );
    }

    #[test]
    fn invalid_force_falls_back_to_balancing() {
        let sink = MemorySink::new();
        let engine = ExperimentEngine::new(ExperimentConfig::default(), &sink).unwrap();
        let mut rng = SmallRng::seed_from_u64(1);
        let session = engine
            .start_session(forced("chess", "clear_loss"), &mut rng)
            .unwrap();
        assert_eq!(session.participant_id(), "P20000");
        assert!(!session.is_test());
    }

    #[test]
    fn generated_ids_use_participant_format() {
        let engine = ExperimentEngine::new(ExperimentConfig::default(), MemorySink::new()).unwrap();
        let mut rng = SmallRng::seed_from_u64(3);
        let session = engine
            .start_session(StartRequest::default(), &mut rng)
            .unwrap();
        let id = session.participant_id();
        assert_eq!(id.len(), 6);
        assert!(id.starts_with('P'));
        assert!(id[1..].parse::<u32>().is_ok_and(|n| (10_000..=99_999).contains(&n)));
    }

    #[test]
    fn sink_failure_leaves_session_unchanged() {
        let engine = ExperimentEngine::new(ExperimentConfig::default(), FlakySink::default()).unwrap();
        let mut rng = SmallRng::seed_from_u64(4);
        let mut session = engine
            .start_session(forced("skill", "near_miss"), &mut rng)
            .unwrap();
        engine.sink().broken.set(true);
        let raw = json!({"bar_position": 45.0, "target_zone_start": 40.0});
        let err = engine.evaluate_trial(&mut session, 1, &raw).unwrap_err();
        assert!(matches!(err, EngineError::Sink(DiskFull)));
        assert_eq!(session.trial_count(), 0);

        engine.sink().broken.set(false);
        let eval = engine.evaluate_trial(&mut session, 1, &raw).unwrap();
        assert_eq!(eval.trial.outcome, Outcome::Hit);
        assert_eq!(session.trial_count(), 1);
    }

    #[test]
    fn practice_trial_is_not_persisted() {
        let sink = MemorySink::new();
        let engine = ExperimentEngine::new(ExperimentConfig::default(), &sink).unwrap();
        let mut rng = SmallRng::seed_from_u64(5);
        let mut session = engine
            .start_session(forced("skill", "near_miss"), &mut rng)
            .unwrap();
        engine.generate_trial(&mut session, 0).unwrap();
        let eval = engine
            .evaluate_trial(&mut session, 0, &json!({"bar_position": 1.0}))
            .unwrap();
        assert!(eval.practice && !eval.done);
        assert!(sink.is_empty());
        assert_eq!(session.trial_count(), 0);
    }

    #[test]
    fn summary_is_persisted_once_after_completion() {
        let sink = MemorySink::new();
        let engine = ExperimentEngine::new(ExperimentConfig::default(), &sink).unwrap();
        let mut rng = SmallRng::seed_from_u64(6);
        let mut session = engine
            .start_session(forced("skill", "clear_loss"), &mut rng)
            .unwrap();
        let raw = json!({"bar_position": 45.0, "target_zone_start": 40.0});

        engine.evaluate_trial(&mut session, 1, &raw).unwrap();
        assert!(!engine.get_summary(&mut session).unwrap().completed);
        assert!(sink.scan_by_type(RecordType::Summary).unwrap().is_empty());

        for n in 2..=15 {
            engine.evaluate_trial(&mut session, n, &raw).unwrap();
        }
        // Results are fetched before the survey; nothing terminal is stored yet.
        let summary = engine.get_summary(&mut session).unwrap();
        assert!(summary.completed);
        assert_eq!(summary.hits, 15);
        assert!(sink.scan_by_type(RecordType::Summary).unwrap().is_empty());

        engine
            .submit_survey(
                &mut session,
                &json!({"desired_rounds_next_time": 2, "confidence_impact": 6, "self_rated_accuracy": 5}),
            )
            .unwrap();
        engine.get_summary(&mut session).unwrap();
        let stored = sink.scan_by_type(RecordType::Summary).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0]["participant_id"], "TEST_P20000");
        assert_eq!(stored[0]["is_test"], true);
        assert_eq!(stored[0]["win_rate"], 100.0);
        assert_eq!(stored[0]["confidence_impact"], 6);
        assert_eq!(stored[0]["desired_rounds_next_time"], 2);
    }

    #[test]
    fn survey_before_completion_defers_the_summary() {
        let sink = MemorySink::new();
        let engine = ExperimentEngine::new(ExperimentConfig::default(), &sink).unwrap();
        let mut rng = SmallRng::seed_from_u64(8);
        let mut session = engine
            .start_session(forced("luck", "near_miss"), &mut rng)
            .unwrap();
        engine
            .submit_survey(
                &mut session,
                &json!({"desired_rounds_next_time": 1, "confidence_impact": 1, "self_rated_accuracy": 1}),
            )
            .unwrap();
        assert!(sink.scan_by_type(RecordType::Summary).unwrap().is_empty());

        for n in 1..=15 {
            engine.generate_trial(&mut session, n).unwrap();
            engine.evaluate_trial(&mut session, n, &json!({})).unwrap();
        }
        let summary = engine.get_summary(&mut session).unwrap();
        assert!(summary.completed && session.summary_persisted());
        assert!(session.rng_draws() > 0);
        let stored = sink.scan_by_type(RecordType::Summary).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0]["self_rated_accuracy"], 1);
    }

    #[test]
    fn survey_errors_are_reachable_through_engine_error() {
        let engine = ExperimentEngine::new(ExperimentConfig::default(), MemorySink::new()).unwrap();
        let mut rng = SmallRng::seed_from_u64(7);
        let mut session = engine
            .start_session(StartRequest::default(), &mut rng)
            .unwrap();
        let err = engine
            .submit_survey(&mut session, &json!({"confidence_impact": 3}))
            .unwrap_err();
        assert!(matches!(err.survey(), Some(SurveyError::Missing { .. })));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let cfg = ExperimentConfig {
            max_trials: 0,
            ..ExperimentConfig::default()
        };
        assert!(ExperimentEngine::new(cfg, MemorySink::new()).is_err());
    }
}
