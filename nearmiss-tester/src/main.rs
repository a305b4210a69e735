mod audit;
mod policy;
mod reports;
mod simulation;
mod util;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use nearmiss_core::{Condition, ExperimentConfig, ExperimentEngine, JsonlSink, MemorySink, RecordSink};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use policy::ParticipantPolicy;
use reports::SeedReport;
use simulation::{SimulationOptions, replay_fingerprint, run_seed};
use util::{OutputTarget, parse_forced_condition, parse_seeds, split_csv};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    Console,
    Json,
    Markdown,
}

#[derive(Debug, Parser)]
#[command(name = "nearmiss-tester", version = "0.1.0")]
#[command(
    about = "Drive simulated participants through the near-miss experiment engine and audit every invariant"
)]
struct Args {
    /// Participants per seed
    #[arg(long, default_value_t = 20)]
    participants: usize,

    /// Seeds to run (comma-separated)
    #[arg(long, default_value = "1337")]
    seeds: String,

    /// How simulated participants play
    #[arg(long, value_enum, default_value_t = ParticipantPolicy::Mixed)]
    policy: ParticipantPolicy,

    /// Force every session into one condition, as `frame:loss` (e.g. `skill:near_miss`)
    #[arg(long)]
    force_condition: Option<String>,

    /// Experiment configuration JSON; defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Persist records as JSON lines under this directory instead of in memory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Output report format
    #[arg(long, value_enum, default_value_t = ReportFormat::Console)]
    report: ReportFormat,

    /// Optional path to write the report output instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);
    announce_banner();

    let start_time = Instant::now();
    let config = load_config(args.config.as_deref())?;
    let seeds = parse_seeds(&split_csv(&args.seeds))?;
    let forced = args
        .force_condition
        .as_deref()
        .map(parse_forced_condition)
        .transpose()?;
    let options = SimulationOptions {
        participants: args.participants,
        policy: args.policy,
        forced,
    };

    let mut reports = Vec::with_capacity(seeds.len());
    for seed in seeds {
        let report = match &args.data_dir {
            Some(dir) => {
                let sink = JsonlSink::open(dir.join(format!("seed-{seed}")))
                    .with_context(|| format!("opening data dir {}", dir.display()))?;
                run_and_audit(&config, sink, seed, &options)?
            }
            None => run_and_audit(&config, MemorySink::new(), seed, &options)?,
        };
        if args.verbose {
            print_seed_line(&report, forced);
        }
        reports.push(report);
    }

    write_reports(&args, &reports, start_time)?;

    if reports.iter().any(|r| !r.passed) {
        std::process::exit(1);
    }
    Ok(())
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
}

fn announce_banner() {
    println!("{}", "🎯 Near-Miss Experiment Tester".bright_cyan().bold());
    println!("{}", "==============================".cyan());
}

fn load_config(path: Option<&Path>) -> Result<ExperimentConfig> {
    let Some(path) = path else {
        return Ok(ExperimentConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config = ExperimentConfig::from_json(&text)
        .with_context(|| format!("parsing config {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("validating config {}", path.display()))?;
    Ok(config)
}

fn run_and_audit<S: RecordSink>(
    config: &ExperimentConfig,
    sink: S,
    seed: u64,
    options: &SimulationOptions,
) -> Result<SeedReport> {
    let engine = ExperimentEngine::new(config.clone(), sink).context("building engine")?;
    let run = run_seed(&engine, seed, options)?;
    let failures = audit::audit_seed(&run, config, options.forced.is_some());

    let (fingerprint, replay_matched) = match run.participants.first() {
        Some(first) => {
            let replayed = replay_fingerprint(config, first, options, 0)?;
            (first.fingerprint(), replayed == first.fingerprint())
        }
        None => (0, true),
    };
    if !replay_matched {
        log::error!("seed {seed}: replay of the first participant diverged");
    }
    Ok(SeedReport::from_run(&run, fingerprint, replay_matched, failures))
}

fn print_seed_line(report: &SeedReport, forced: Option<Condition>) {
    let status = if report.passed {
        "✓".green()
    } else {
        "✗".red()
    };
    let mode = forced.map_or_else(|| "balanced".to_string(), |c| format!("forced {c}"));
    println!(
        "{status} seed {} ({mode}): {} participants, {} failures",
        report.seed,
        report.participants,
        report.failures.len()
    );
}

fn write_reports(args: &Args, reports: &[SeedReport], start_time: Instant) -> Result<()> {
    let mut output_target = OutputTarget::new(args.output.clone())?;
    match args.report {
        ReportFormat::Json => {
            reports::generate_json_report(&mut output_target, args.policy.label(), reports)?;
        }
        ReportFormat::Markdown => {
            reports::generate_markdown_report(&mut output_target, args.policy.label(), reports)?;
        }
        ReportFormat::Console => {
            reports::generate_console_report(&mut output_target, reports, start_time.elapsed())?;
            writeln!(&mut output_target, "🏁 Total time: {:?}", start_time.elapsed())?;
        }
    }
    output_target.flush_inner()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Args {
        Args {
            participants: 4,
            seeds: "1".into(),
            policy: ParticipantPolicy::Accurate,
            force_condition: None,
            config: None,
            data_dir: None,
            report: ReportFormat::Json,
            output: None,
            verbose: false,
        }
    }

    #[test]
    fn missing_config_path_uses_defaults() {
        assert_eq!(load_config(None).unwrap(), ExperimentConfig::default());
    }

    #[test]
    fn run_and_audit_passes_for_memory_sink() {
        let options = SimulationOptions {
            participants: 4,
            policy: ParticipantPolicy::Mixed,
            forced: None,
        };
        let report =
            run_and_audit(&ExperimentConfig::default(), MemorySink::new(), 9, &options).unwrap();
        assert!(report.passed, "{:?}", report.failures);
        assert!(report.replay_matched);
        assert_eq!(report.participants, 4);
    }

    #[test]
    fn write_reports_emits_json_output() {
        let path = std::env::temp_dir().join("nearmiss-tester-unit-report.json");
        let mut args = base_args();
        args.output = Some(path.clone());
        let options = SimulationOptions {
            participants: 2,
            policy: ParticipantPolicy::Accurate,
            forced: None,
        };
        let report =
            run_and_audit(&ExperimentConfig::default(), MemorySink::new(), 3, &options).unwrap();
        write_reports(&args, &[report], Instant::now()).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"passed\": true"));
        let _ = std::fs::remove_file(path);
    }
}
