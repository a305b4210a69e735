use anyhow::{Context, Result};
use nearmiss_core::{
    AggregateCounts, Condition, ExperimentEngine, MemorySink, Outcome, RecordSink, Session,
    StartRequest, Summary, Trial, TrialMode, TrialParams,
};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use twox_hash::XxHash64;

use crate::policy::{ParticipantPolicy, SimulatedParticipant};

/// Options shared by every simulated run.
#[derive(Debug, Clone, Copy)]
pub struct SimulationOptions {
    pub participants: usize,
    pub policy: ParticipantPolicy,
    pub forced: Option<Condition>,
}

/// Everything observed while driving one participant through the engine.
#[derive(Debug, Clone)]
pub struct ParticipantRun {
    pub participant_id: String,
    pub condition: Condition,
    pub mode: TrialMode,
    pub is_test: bool,
    pub session_seed: u64,
    pub participant_seed: u64,
    pub dealt: Vec<TrialParams>,
    pub trials: Vec<Trial>,
    pub template: Option<Vec<Outcome>>,
    pub summary: Summary,
    pub rejected_surveys: usize,
    pub self_reports: usize,
}

impl ParticipantRun {
    /// Hash of the dealt parameters and labeled trials; identity fields excluded.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        let payload = serde_json::to_vec(&(&self.dealt, &self.trials)).unwrap_or_default();
        XxHash64::oneshot(0, &payload)
    }
}

/// Outcome of all participants for one seed.
#[derive(Debug, Clone)]
pub struct SeedRun {
    pub seed: u64,
    pub participants: Vec<ParticipantRun>,
    pub counts: AggregateCounts,
}

/// Drive `options.participants` participants sequentially through `engine`.
pub fn run_seed<S: RecordSink>(
    engine: &ExperimentEngine<S>,
    seed: u64,
    options: &SimulationOptions,
) -> Result<SeedRun> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut participants = Vec::with_capacity(options.participants);
    for index in 0..options.participants {
        let participant_seed = rng.next_u64();
        let mut request = StartRequest::default();
        if let Some(condition) = options.forced {
            request.frame_type = Some(condition.frame_type.as_str().to_string());
            request.loss_frame = Some(condition.loss_frame.as_str().to_string());
        }
        let participant =
            SimulatedParticipant::new(options.policy.for_participant(index), participant_seed);
        let run = run_participant(engine, request, participant, participant_seed, &mut rng)
            .with_context(|| format!("seed {seed}, participant {index}"))?;
        log::debug!(
            "seed {seed}: {} in {} finished with {}/{}/{} hit/near/loss",
            run.participant_id,
            run.condition,
            run.summary.hits,
            run.summary.near_misses,
            run.summary.losses
        );
        participants.push(run);
    }
    let counts = engine
        .aggregate_counts()
        .context("counting completed sessions")?;
    Ok(SeedRun {
        seed,
        participants,
        counts,
    })
}

/// Full participant flow: start, practice, trials, self-reports, survey, summary.
pub fn run_participant<S: RecordSink, R: RngCore>(
    engine: &ExperimentEngine<S>,
    request: StartRequest,
    mut participant: SimulatedParticipant,
    participant_seed: u64,
    rng: &mut R,
) -> Result<ParticipantRun> {
    let mut session = engine
        .start_session(request, rng)
        .context("starting session")?;

    let practice = engine.generate_trial(&mut session, 0)?;
    let raw = respond(&mut participant, &practice);
    engine.evaluate_trial(&mut session, 0, &raw)?;

    let mut dealt = Vec::with_capacity(engine.config().max_trials as usize);
    let mut rejected_surveys = 0;
    for n in 1..=engine.config().max_trials {
        let params = engine.generate_trial(&mut session, n)?;
        let raw = respond(&mut participant, &params);
        let evaluation = engine.evaluate_trial(&mut session, n, &raw)?;
        dealt.push(params);
        if evaluation.self_report_due {
            let window = engine.config().self_report_interval as usize;
            let trials = session.trials();
            let recent = &trials[trials.len().saturating_sub(window)..];
            let ratings = participant.self_report(recent);
            engine.submit_self_report(&mut session, &ratings)?;
        }
    }

    let interim = session.summarize();
    for answers in participant.survey_attempts(&interim) {
        match engine.submit_survey(&mut session, &answers) {
            Ok(_) => break,
            Err(err) if err.survey().is_some() => {
                log::debug!("{}: survey rejected: {err}", session.participant_id());
                rejected_surveys += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }
    let summary = engine.get_summary(&mut session)?;
    Ok(snapshot(&session, dealt, summary, participant_seed, rejected_surveys))
}

fn respond(participant: &mut SimulatedParticipant, params: &TrialParams) -> serde_json::Value {
    match params {
        TrialParams::Bar(bar) => participant.bar_result(bar),
        TrialParams::Reel(reel) => participant.reel_result(reel),
    }
}

fn snapshot(
    session: &Session,
    dealt: Vec<TrialParams>,
    summary: Summary,
    participant_seed: u64,
    rejected_surveys: usize,
) -> ParticipantRun {
    ParticipantRun {
        participant_id: session.participant_id().to_string(),
        condition: session.condition(),
        mode: session.mode(),
        is_test: session.is_test(),
        session_seed: session.seed(),
        participant_seed,
        dealt,
        trials: session.trials().to_vec(),
        template: session.template().map(|t| t.as_slice().to_vec()),
        summary,
        rejected_surveys,
        self_reports: session.self_reports().len(),
    }
}

/// Replay a participant on a fresh in-memory engine and return its fingerprint.
pub fn replay_fingerprint(
    config: &nearmiss_core::ExperimentConfig,
    run: &ParticipantRun,
    options: &SimulationOptions,
    index: usize,
) -> Result<u64> {
    let engine = ExperimentEngine::new(config.clone(), MemorySink::new())
        .context("building replay engine")?;
    let request = StartRequest {
        participant_id: Some(run.participant_id.clone()),
        frame_type: Some(run.condition.frame_type.as_str().to_string()),
        loss_frame: Some(run.condition.loss_frame.as_str().to_string()),
        seed: Some(run.session_seed),
        ..StartRequest::default()
    };
    let participant =
        SimulatedParticipant::new(options.policy.for_participant(index), run.participant_seed);
    let mut rng = ChaCha8Rng::seed_from_u64(run.session_seed);
    let replay = run_participant(&engine, request, participant, run.participant_seed, &mut rng)?;
    Ok(replay.fingerprint())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nearmiss_core::ExperimentConfig;

    fn options(participants: usize, policy: ParticipantPolicy) -> SimulationOptions {
        SimulationOptions {
            participants,
            policy,
            forced: None,
        }
    }

    #[test]
    fn sequential_runs_stay_balanced() {
        let engine = ExperimentEngine::new(ExperimentConfig::default(), MemorySink::new()).unwrap();
        let run = run_seed(&engine, 42, &options(10, ParticipantPolicy::Mixed)).unwrap();
        assert_eq!(run.participants.len(), 10);
        assert_eq!(run.counts.total(), 10);
        assert!(run.counts.spread() <= 1);
        for participant in &run.participants {
            assert_eq!(participant.trials.len(), 15);
            assert!(participant.summary.completed);
            assert_eq!(participant.self_reports, 3);
            assert!(participant.summary.confidence_impact.is_some());
        }
    }

    #[test]
    fn replay_reproduces_fingerprint() {
        let config = ExperimentConfig::default();
        let engine = ExperimentEngine::new(config.clone(), MemorySink::new()).unwrap();
        let opts = options(2, ParticipantPolicy::Erratic);
        let run = run_seed(&engine, 7, &opts).unwrap();
        for (index, participant) in run.participants.iter().enumerate() {
            let replayed = replay_fingerprint(&config, participant, &opts, index).unwrap();
            assert_eq!(replayed, participant.fingerprint());
        }
    }

    #[test]
    fn forced_runs_are_all_test_traffic() {
        let engine = ExperimentEngine::new(ExperimentConfig::default(), MemorySink::new()).unwrap();
        let mut opts = options(3, ParticipantPolicy::Accurate);
        opts.forced = Some(Condition::ALL[3]);
        let run = run_seed(&engine, 1, &opts).unwrap();
        assert!(run.participants.iter().all(|p| p.is_test));
        assert_eq!(run.counts.total(), 0);
    }
}
