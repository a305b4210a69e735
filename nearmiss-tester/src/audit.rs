//! Invariant checks applied to every simulated participant and seed.
use nearmiss_core::{
    ExperimentConfig, LabelReason, LossFrame, Outcome, ReelMatch, TrialData, TrialParams,
    bar_geometry,
};

use crate::simulation::{ParticipantRun, SeedRun};

/// Check one participant; returns human-readable failures.
#[must_use]
pub fn audit_participant(run: &ParticipantRun, config: &ExperimentConfig) -> Vec<String> {
    let mut failures = Vec::new();
    let id = &run.participant_id;
    let max_trials = config.max_trials;

    if run.trials.len() != max_trials as usize {
        failures.push(format!(
            "{id}: recorded {} trials, expected {max_trials}",
            run.trials.len()
        ));
    }

    for (expected, trial) in (1..).zip(&run.trials) {
        let n = trial.trial_number;
        if n != expected {
            failures.push(format!("{id}: trial {n} recorded at position {expected}"));
        }
        if !trial.flags_consistent() {
            failures.push(format!("{id}: trial {n} flags disagree with {}", trial.outcome));
        }
        if trial.is_near_miss
            && trial.label_reason == LabelReason::LossFrame
            && run.condition.loss_frame != LossFrame::NearMiss
        {
            failures.push(format!("{id}: trial {n} near miss under clear-loss framing"));
        }
        if n == max_trials && !trial.is_hit && trial.outcome != Outcome::NearMiss {
            failures.push(format!("{id}: final miss labeled {}", trial.outcome));
        }
        if let TrialData::Bar {
            bar_position,
            target_zone_start,
            target_zone_end,
        } = trial.data
        {
            let geometry = bar_geometry(
                bar_position,
                target_zone_start,
                target_zone_end - target_zone_start,
                &config.bar,
            );
            if geometry.beyond_far && n < max_trials && trial.outcome != Outcome::Loss {
                failures.push(format!(
                    "{id}: trial {n} far miss at {bar_position:.2} labeled {}",
                    trial.outcome
                ));
            }
        }
    }

    if let Some(template) = &run.template {
        failures.extend(audit_template(id, template, run, config));
    }

    let summary = &run.summary;
    let hits = run.trials.iter().filter(|t| t.is_hit).count();
    let near = run.trials.iter().filter(|t| t.is_near_miss).count();
    if summary.hits as usize != hits || summary.near_misses as usize != near {
        failures.push(format!(
            "{id}: summary counts {}/{} disagree with trial log {hits}/{near}",
            summary.hits, summary.near_misses
        ));
    }
    if !summary.completed {
        failures.push(format!("{id}: summary not marked completed"));
    }
    failures
}

fn audit_template(
    id: &str,
    template: &[Outcome],
    run: &ParticipantRun,
    config: &ExperimentConfig,
) -> Vec<String> {
    let mut failures = Vec::new();
    for outcome in Outcome::ALL {
        let have = template.iter().filter(|o| **o == outcome).count();
        let want = config.slot.template.count(outcome) as usize;
        if have != want {
            failures.push(format!("{id}: template holds {have} {outcome}, expected {want}"));
        }
    }
    for (planned, params) in template.iter().zip(&run.dealt) {
        let TrialParams::Reel(reel) = params else {
            failures.push(format!("{id}: bar parameters dealt to a reel session"));
            continue;
        };
        let shape = reel.reels.classify();
        let matches = match planned {
            Outcome::Hit => matches!(shape, ReelMatch::Triple(_)),
            Outcome::NearMiss => matches!(
                shape,
                ReelMatch::Pair { matched, odd } if nearmiss_core::cyclic_distance(matched, odd) == 1
            ),
            Outcome::Loss => shape == ReelMatch::Distinct,
        };
        if !matches {
            failures.push(format!(
                "{id}: trial {} planned {planned} but dealt {}",
                reel.trial_number, reel.reels
            ));
        }
    }
    let max_trials = config.max_trials;
    for (planned, trial) in template.iter().zip(&run.trials) {
        let expected = match planned {
            Outcome::Hit => Outcome::Hit,
            _ if trial.trial_number == max_trials => Outcome::NearMiss,
            other => *other,
        };
        if trial.outcome != expected {
            failures.push(format!(
                "{id}: trial {} planned {planned} but labeled {}",
                trial.trial_number, trial.outcome
            ));
        }
    }
    failures
}

/// Seed-level checks: every participant plus the balance spread.
#[must_use]
pub fn audit_seed(run: &SeedRun, config: &ExperimentConfig, forced: bool) -> Vec<String> {
    let mut failures: Vec<String> = run
        .participants
        .iter()
        .flat_map(|participant| audit_participant(participant, config))
        .collect();
    if !forced && run.counts.spread() > 1 {
        failures.push(format!(
            "seed {}: condition spread {} exceeds 1 ({:?})",
            run.seed,
            run.counts.spread(),
            run.counts.iter().collect::<Vec<_>>()
        ));
    }
    if forced && run.counts.total() != 0 {
        failures.push(format!(
            "seed {}: forced sessions were counted for balancing",
            run.seed
        ));
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ParticipantPolicy;
    use crate::simulation::{SimulationOptions, run_seed};
    use nearmiss_core::{ExperimentEngine, MemorySink};

    fn seed_run(policy: ParticipantPolicy) -> (SeedRun, ExperimentConfig) {
        let config = ExperimentConfig::default();
        let engine = ExperimentEngine::new(config.clone(), MemorySink::new()).unwrap();
        let options = SimulationOptions {
            participants: 8,
            policy,
            forced: None,
        };
        (run_seed(&engine, 2024, &options).unwrap(), config)
    }

    #[test]
    fn clean_runs_have_no_failures() {
        let (run, config) = seed_run(ParticipantPolicy::Mixed);
        assert_eq!(audit_seed(&run, &config, false), Vec::<String>::new());
    }

    #[test]
    fn tampered_labels_are_reported() {
        let (mut run, config) = seed_run(ParticipantPolicy::Accurate);
        let participant = &mut run.participants[0];
        let last = participant.trials.last_mut().unwrap();
        last.is_hit = !last.is_hit;
        participant.summary.completed = false;
        let failures = audit_participant(participant, &config);
        assert!(failures.iter().any(|f| f.contains("flags disagree")));
        assert!(failures.iter().any(|f| f.contains("not marked completed")));
    }

    #[test]
    fn relabeled_reel_trials_are_reported() {
        let config = ExperimentConfig::default();
        let engine = ExperimentEngine::new(config.clone(), MemorySink::new()).unwrap();
        let options = SimulationOptions {
            participants: 2,
            policy: ParticipantPolicy::Accurate,
            forced: Some(nearmiss_core::Condition::new(
                nearmiss_core::FrameType::Luck,
                LossFrame::ClearLoss,
            )),
        };
        let mut run = run_seed(&engine, 5, &options).unwrap();
        assert_eq!(audit_seed(&run, &config, true), Vec::<String>::new());

        let participant = &mut run.participants[0];
        let template = participant.template.clone().unwrap();
        let index = template
            .iter()
            .position(|o| *o == Outcome::NearMiss)
            .unwrap();
        let trial = &mut participant.trials[index];
        trial.outcome = Outcome::Loss;
        trial.is_near_miss = false;
        let failures = audit_participant(participant, &config);
        assert!(failures.iter().any(|f| f.contains("but labeled loss")));
    }
}
