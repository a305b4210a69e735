use anyhow::Result;
use chrono::{DateTime, Utc};
use colored::Colorize;
use nearmiss_core::{Outcome, TrialMode};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::time::Duration;

use crate::simulation::SeedRun;

/// Serializable result of one seed.
#[derive(Debug, Clone, Serialize)]
pub struct SeedReport {
    pub seed: u64,
    pub participants: usize,
    pub bar_sessions: usize,
    pub reel_sessions: usize,
    pub condition_counts: BTreeMap<String, u64>,
    pub outcomes: BTreeMap<String, usize>,
    pub near_miss_raw: usize,
    pub rejected_surveys: usize,
    pub fingerprint: String,
    pub replay_matched: bool,
    pub failures: Vec<String>,
    pub passed: bool,
}

impl SeedReport {
    #[must_use]
    pub fn from_run(run: &SeedRun, fingerprint: u64, replay_matched: bool, failures: Vec<String>) -> Self {
        let mut outcomes: BTreeMap<String, usize> = Outcome::ALL
            .iter()
            .map(|o| (o.as_str().to_string(), 0))
            .collect();
        let mut near_miss_raw = 0;
        for trial in run.participants.iter().flat_map(|p| &p.trials) {
            *outcomes.entry(trial.outcome.as_str().to_string()).or_insert(0) += 1;
            if trial.near_miss_raw {
                near_miss_raw += 1;
            }
        }
        let bar_sessions = run
            .participants
            .iter()
            .filter(|p| p.mode == TrialMode::Bar)
            .count();
        let passed = failures.is_empty() && replay_matched;
        Self {
            seed: run.seed,
            participants: run.participants.len(),
            bar_sessions,
            reel_sessions: run.participants.len() - bar_sessions,
            condition_counts: run
                .counts
                .iter()
                .map(|(id, count)| (id.to_string(), count))
                .collect(),
            outcomes,
            near_miss_raw,
            rejected_surveys: run.participants.iter().map(|p| p.rejected_surveys).sum(),
            fingerprint: format!("{fingerprint:016x}"),
            replay_matched,
            failures,
            passed,
        }
    }
}

#[derive(Debug, Serialize)]
struct JsonReport<'a> {
    generated_at: DateTime<Utc>,
    policy: &'a str,
    passed: bool,
    seeds: &'a [SeedReport],
}

pub fn generate_json_report(out: &mut dyn Write, policy: &str, reports: &[SeedReport]) -> Result<()> {
    let report = JsonReport {
        generated_at: Utc::now(),
        policy,
        passed: reports.iter().all(|r| r.passed),
        seeds: reports,
    };
    writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
    Ok(())
}

pub fn generate_markdown_report(out: &mut dyn Write, policy: &str, reports: &[SeedReport]) -> Result<()> {
    writeln!(out, "# Near-Miss Experiment Simulation\n")?;
    let passed = reports.iter().filter(|r| r.passed).count();
    writeln!(out, "## Summary\n")?;
    writeln!(out, "- **Policy**: {policy}")?;
    writeln!(out, "- **Seeds**: {}", reports.len())?;
    writeln!(out, "- **Passed**: {passed}")?;
    writeln!(out, "- **Failed**: {}\n", reports.len() - passed)?;

    writeln!(out, "## Seeds\n")?;
    writeln!(
        out,
        "| Seed | Participants | Hits | Near misses | Losses | Spread | Replay |"
    )?;
    writeln!(out, "|---|---|---|---|---|---|---|")?;
    for report in reports {
        let spread = spread(&report.condition_counts);
        writeln!(
            out,
            "| {} | {} | {} | {} | {} | {spread} | {} |",
            report.seed,
            report.participants,
            report.outcomes.get("hit").copied().unwrap_or(0),
            report.outcomes.get("near_miss").copied().unwrap_or(0),
            report.outcomes.get("loss").copied().unwrap_or(0),
            if report.replay_matched { "✅" } else { "❌" }
        )?;
    }
    for report in reports.iter().filter(|r| !r.failures.is_empty()) {
        writeln!(out, "\n### ❌ Seed {}\n", report.seed)?;
        for failure in &report.failures {
            writeln!(out, "- {failure}")?;
        }
    }
    Ok(())
}

pub fn generate_console_report(
    out: &mut dyn Write,
    reports: &[SeedReport],
    total_duration: Duration,
) -> Result<()> {
    writeln!(out)?;
    writeln!(out, "{}", "📊 Simulation Results".bright_cyan().bold())?;
    writeln!(out, "{}", "=====================".cyan())?;
    let passed = reports.iter().filter(|r| r.passed).count();
    writeln!(out, "Seeds: {}", reports.len())?;
    writeln!(out, "Passed: {}", passed.to_string().green())?;
    writeln!(out, "Failed: {}", (reports.len() - passed).to_string().red())?;
    writeln!(out, "Total time: {total_duration:?}")?;
    writeln!(out)?;

    for report in reports {
        let status = if report.passed {
            "✅ PASS".green()
        } else {
            "❌ FAIL".red()
        };
        writeln!(out, "{status} seed {}", report.seed.to_string().bold())?;
        writeln!(
            out,
            "   Participants: {} ({} bar, {} reel)",
            report.participants, report.bar_sessions, report.reel_sessions
        )?;
        let cells: Vec<String> = report
            .condition_counts
            .iter()
            .map(|(id, count)| format!("{id}={count}"))
            .collect();
        writeln!(out, "   Conditions: {}", cells.join(", "))?;
        let outcomes: Vec<String> = report
            .outcomes
            .iter()
            .map(|(label, count)| format!("{label}={count}"))
            .collect();
        writeln!(
            out,
            "   Outcomes: {} (raw near misses: {})",
            outcomes.join(", "),
            report.near_miss_raw
        )?;
        writeln!(out, "   Fingerprint: {}", report.fingerprint)?;
        if !report.failures.is_empty() {
            writeln!(out, "   Failures:")?;
            for failure in &report.failures {
                writeln!(out, "     • {}", failure.red())?;
            }
        }
        writeln!(out)?;
    }
    Ok(())
}

fn spread(counts: &BTreeMap<String, u64>) -> u64 {
    let max = counts.values().max().copied().unwrap_or(0);
    let min = counts.values().min().copied().unwrap_or(0);
    max - min
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_report(passed: bool) -> SeedReport {
        SeedReport {
            seed: 1337,
            participants: 4,
            bar_sessions: 2,
            reel_sessions: 2,
            condition_counts: [
                ("luck_clear_loss", 1),
                ("luck_near_miss", 1),
                ("skill_clear_loss", 1),
                ("skill_near_miss", 1),
            ]
            .into_iter()
            .map(|(id, n)| (id.to_string(), n))
            .collect(),
            outcomes: [("hit", 20), ("near_miss", 25), ("loss", 15)]
                .into_iter()
                .map(|(id, n)| (id.to_string(), n))
                .collect(),
            near_miss_raw: 18,
            rejected_surveys: 0,
            fingerprint: "00000000deadbeef".into(),
            replay_matched: true,
            failures: if passed {
                Vec::new()
            } else {
                vec!["P1: final miss labeled loss".into()]
            },
            passed,
        }
    }

    #[test]
    fn json_report_flags_overall_status() {
        let mut buf = Vec::new();
        generate_json_report(&mut buf, "Mixed", &[sample_report(true), sample_report(false)]).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(value["passed"], false);
        assert_eq!(value["seeds"][0]["seed"], 1337);
    }

    #[test]
    fn markdown_lists_failures() {
        let mut buf = Vec::new();
        generate_markdown_report(&mut buf, "Mixed", &[sample_report(false)]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("| 1337 | 4 | 20 | 25 | 15 | 0 | ✅ |"));
        assert!(text.contains("final miss labeled loss"));
    }

    #[test]
    fn console_report_mentions_fingerprint() {
        let mut buf = Vec::new();
        generate_console_report(&mut buf, &[sample_report(true)], Duration::from_millis(5)).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("00000000deadbeef"));
    }
}
