//! Pulse CLI - Command-line interface for the Pulse risk engine
//!
//! Commands:
//! - score: Ingest observation fixtures and compute assessments (batch mode)
//! - baseline: Inspect a person's baseline statistics after ingestion
//! - registry: Print the configured signal registry

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;

use pulse_risk::{
    EngineConfig, RiskEngine, SignalObservation, UpdateOutcome, PRODUCER_NAME, PULSE_VERSION,
};

/// Pulse - personalized behavioral risk-scoring engine
#[derive(Parser)]
#[command(name = "pulse")]
#[command(author = "Pulse Labs")]
#[command(version = PULSE_VERSION)]
#[command(about = "Score behavioral signals against personal baselines", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest observation fixtures and compute assessments (batch mode)
    Score {
        /// Input file of SignalObservation JSON (array or NDJSON; - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Engine configuration file (JSON); defaults apply when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output format
        #[arg(long, default_value = "json")]
        format: OutputFormat,

        /// Only assess this person instead of everyone in the input
        #[arg(long)]
        person: Option<String>,
    },

    /// Inspect one person's baseline for a signal after ingesting fixtures
    Baseline {
        /// Input file of SignalObservation JSON (array or NDJSON; - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Engine configuration file (JSON); defaults apply when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(long)]
        person: String,

        #[arg(long)]
        signal: String,
    },

    /// Print the configured signal registry
    Registry {
        /// Engine configuration file (JSON); defaults apply when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Pretty-printed assessment records
    Json,
    /// One-line human summary per person
    Summary,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("{}: failed to start runtime: {}", PRODUCER_NAME, error);
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Commands::Score {
            input,
            config,
            format,
            person,
        } => runtime.block_on(run_score(&input, config.as_deref(), format, person)),
        Commands::Baseline {
            input,
            config,
            person,
            signal,
        } => run_baseline(&input, config.as_deref(), &person, &signal),
        Commands::Registry { config } => run_registry(config.as_deref()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("{}: {}", PRODUCER_NAME, error);
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<EngineConfig, String> {
    match path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .map_err(|e| format!("cannot read config {}: {}", path.display(), e))?;
            serde_json::from_str(&text).map_err(|e| format!("invalid config: {}", e))
        }
        None => Ok(EngineConfig::default()),
    }
}

fn read_input(path: &std::path::Path) -> Result<String, String> {
    if path.as_os_str() == "-" {
        let mut text = String::new();
        io::stdin()
            .read_to_string(&mut text)
            .map_err(|e| format!("cannot read stdin: {}", e))?;
        Ok(text)
    } else {
        fs::read_to_string(path).map_err(|e| format!("cannot read {}: {}", path.display(), e))
    }
}

/// Parse a JSON array of observations, or NDJSON with one observation per line
fn parse_observations(text: &str) -> Result<Vec<SignalObservation>, String> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).map_err(|e| format!("invalid observations: {}", e));
    }
    trimmed
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(|e| format!("invalid observation: {}", e)))
        .collect()
}

/// Ingest every fixture, reporting rejects on stderr without aborting the batch
fn ingest_all(engine: &RiskEngine, observations: &[SignalObservation]) -> Vec<String> {
    let mut people = Vec::new();
    for obs in observations {
        match engine.ingest_signal(obs) {
            Ok(UpdateOutcome::Duplicate) => {}
            Ok(_) => {
                if !people.contains(&obs.person_id) {
                    people.push(obs.person_id.clone());
                }
            }
            Err(error) => eprintln!("{}: skipping observation: {}", PRODUCER_NAME, error),
        }
    }
    people
}

async fn run_score(
    input: &std::path::Path,
    config: Option<&std::path::Path>,
    format: OutputFormat,
    person: Option<String>,
) -> Result<(), String> {
    let config = load_config(config)?;
    let engine = RiskEngine::new(config).map_err(|e| e.to_string())?;

    let observations = parse_observations(&read_input(input)?)?;
    let mut people = ingest_all(&engine, &observations);
    if let Some(person) = person {
        people.retain(|p| *p == person);
        if people.is_empty() {
            people.push(person);
        }
    }

    for person_id in &people {
        let assessment = engine.compute_assessment(person_id).await;
        match format {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(&assessment)
                    .map_err(|e| format!("cannot encode assessment: {}", e))?;
                println!("{}", json);
            }
            OutputFormat::Summary => {
                println!(
                    "{}: score {:.1} ({}), maturity {:.0}%{}",
                    assessment.person_id,
                    assessment.final_score,
                    assessment.level.as_str(),
                    assessment.maturity_fraction * 100.0,
                    if assessment.degraded { ", degraded" } else { "" }
                );
                for line in &assessment.explanation {
                    println!("  - {}", line);
                }
            }
        }
    }

    Ok(())
}

fn run_baseline(
    input: &std::path::Path,
    config: Option<&std::path::Path>,
    person: &str,
    signal: &str,
) -> Result<(), String> {
    let config = load_config(config)?;
    let engine = RiskEngine::new(config).map_err(|e| e.to_string())?;

    let observations = parse_observations(&read_input(input)?)?;
    ingest_all(&engine, &observations);

    match engine.baseline(person, signal) {
        Some(snapshot) => {
            let json = serde_json::to_string_pretty(&snapshot)
                .map_err(|e| format!("cannot encode snapshot: {}", e))?;
            println!("{}", json);
            Ok(())
        }
        None => Err(format!("no baseline for {} / {}", person, signal)),
    }
}

fn run_registry(config: Option<&std::path::Path>) -> Result<(), String> {
    let config = load_config(config)?;
    for descriptor in &config.signals {
        println!(
            "{:<24} {:<8} {:<18} weight {:.2}",
            descriptor.signal_id,
            descriptor.category.as_str(),
            match descriptor.direction {
                pulse_risk::Direction::HigherIsRiskier => "higher_is_riskier",
                pulse_risk::Direction::LowerIsRiskier => "lower_is_riskier",
            },
            descriptor.weight
        );
    }
    Ok(())
}
