//! Adaptive Sensing Agent CLI
//!
//! Runs an agent against synthetic probes, validates policies and reports
//! diagnostics.

use adaptive_sensing_agent::{
    config::Config,
    control::{AgentContext, AgentRuntime, TokioScheduler},
    core::{AccelerationCriterion, CompassCriterion, Criterion, DeclarativeCriterion},
    diagnostics::{create_shared_diagnostics_with_persistence, AgentDiagnostics},
    policy::Policy,
    probe::{
        ListeningProbe, LoggingWakeLock, ObservationKind, Reading, ReadingGenerator,
        SharedWakeLock, SyntheticProbe,
    },
    protocol::{LocalProtocol, StateTransitionRecord},
    AdaptiveAgent, VERSION,
};
use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sensing-agent")]
#[command(version = VERSION)]
#[command(about = "Adaptive sensing control agents", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an agent against synthetic probes
    Run {
        /// Which agent to run
        #[arg(long, value_enum, default_value = "acceleration")]
        agent: AgentKind,

        /// Policy file (JSON); overrides the configured policy path
        #[arg(long)]
        policy: Option<PathBuf>,

        /// How long to run, in seconds (0 = until Ctrl+C)
        #[arg(long, default_value = "60")]
        duration: u64,
    },

    /// Check a policy file without running anything
    Validate {
        /// Policy file (JSON)
        policy: PathBuf,

        /// Agent whose criterion keys to check
        #[arg(long, value_enum, default_value = "acceleration")]
        agent: AgentKind,
    },

    /// Pause the protocol; running agents relinquish control
    Pause,

    /// Resume the protocol
    Resume,

    /// Show persisted diagnostics
    Status,

    /// Show configuration
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum AgentKind {
    Acceleration,
    Compass,
    Declarative,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Could not load configuration ({e}); using defaults");
        Config::default()
    });
    init_tracing(&config);

    match cli.command {
        Commands::Run {
            agent,
            policy,
            duration,
        } => cmd_run(&config, agent, policy, duration),
        Commands::Validate { policy, agent } => cmd_validate(&policy, agent),
        Commands::Pause => cmd_set_paused(config, true),
        Commands::Resume => cmd_set_paused(config, false),
        Commands::Status => cmd_status(&config),
        Commands::Config => cmd_config(&config),
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn cmd_run(
    config: &Config,
    kind: AgentKind,
    policy_path: Option<PathBuf>,
    duration: u64,
) -> anyhow::Result<()> {
    config
        .ensure_directories()
        .context("Error creating data directories")?;

    let policy = match policy_path.or_else(|| config.policy_path.clone()) {
        Some(path) => read_policy(&path)?,
        None => default_policy(kind),
    };

    println!("Adaptive Sensing Agent v{VERSION}");
    println!("===============================");
    println!();
    println!("Agent: {kind:?}");
    println!(
        "Run time: {}",
        if duration == 0 {
            "until Ctrl+C".to_string()
        } else {
            format!("{duration}s")
        }
    );
    println!();

    match kind {
        AgentKind::Acceleration => run_agent::<AccelerationCriterion>(config, kind, &policy, duration),
        AgentKind::Compass => run_agent::<CompassCriterion>(config, kind, &policy, duration),
        AgentKind::Declarative => run_agent::<DeclarativeCriterion>(config, kind, &policy, duration),
    }
}

fn run_agent<C: Criterion>(
    config: &Config,
    kind: AgentKind,
    policy: &Value,
    duration: u64,
) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("Error starting async runtime")?;
    let scheduler = Arc::new(TokioScheduler::with_handle(
        runtime.handle().clone(),
        config.invocation_budget(),
    ));

    let diagnostics = create_shared_diagnostics_with_persistence(config.diagnostics_path());
    let (protocol, records) = LocalProtocol::new(format!("{kind:?}").to_lowercase());
    let protocol = Arc::new(protocol);
    protocol.set_running(!config.paused);

    let probes = synthetic_probes(kind);
    let wake_lock = SharedWakeLock::new(Arc::new(LoggingWakeLock::new()));
    let context = AgentContext::new(wake_lock, protocol.clone(), diagnostics.clone())
        .with_probe(probes[0].clone() as Arc<dyn ListeningProbe>);

    let agent = Arc::new(
        AdaptiveAgent::<C>::new(format!("{kind:?}").to_lowercase(), policy, context)
            .context("Policy rejected")?,
    );
    let agent_runtime = AgentRuntime::new(agent.clone(), scheduler.clone());
    agent_runtime.start().context("Error scheduling act cycles")?;

    for probe in &probes {
        probe
            .start()
            .with_context(|| format!("Error starting {} probe", probe.kind()))?;
    }

    let export_file = config.export_path.join(format!(
        "transitions_{}.jsonl",
        Utc::now().format("%Y%m%d_%H%M%S")
    ));
    let mut export = std::fs::File::create(&export_file)
        .with_context(|| format!("Error creating {export_file:?}"))?;

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    println!("Running. Press Ctrl+C to stop.");
    println!();

    let started = Instant::now();
    let deadline = (duration > 0).then(|| Duration::from_secs(duration));
    let mut paused = config.paused;
    let mut last_config_check = Instant::now();
    let mut exported = 0usize;

    while running.load(Ordering::SeqCst) {
        if deadline.is_some_and(|d| started.elapsed() >= d) {
            break;
        }

        // poll the config file so `sensing-agent pause/resume` reaches a running agent
        if last_config_check.elapsed() >= Duration::from_secs(1) {
            if let Ok(cfg) = Config::load() {
                if cfg.paused != paused {
                    paused = cfg.paused;
                    println!("{}", if paused { "Pausing protocol..." } else { "Resuming protocol..." });
                    protocol.set_running(!paused);
                }
            }
            last_config_check = Instant::now();
        }

        for probe in &probes {
            for observation in probe.receiver().try_iter() {
                if let Err(e) = agent_runtime.ingest(observation) {
                    tracing::warn!(error = %e, "Fast-path escalation could not be scheduled");
                }
            }
        }

        match records.recv_timeout(Duration::from_millis(50)) {
            Ok(record) => {
                print_record(&record);
                write_record(&mut export, &record)?;
                exported += 1;
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                eprintln!("Protocol record stream closed unexpectedly");
                break;
            }
        }
    }

    println!();
    println!("Stopping...");

    agent_runtime.stop();
    scheduler.shutdown();
    for probe in &probes {
        probe.stop();
    }

    for record in records.try_iter() {
        print_record(&record);
        write_record(&mut export, &record)?;
        exported += 1;
    }

    if let Err(e) = diagnostics.save() {
        eprintln!("Warning: Could not save diagnostics: {e}");
    }
    runtime.shutdown_timeout(Duration::from_secs(1));

    println!("Exported {exported} transition record(s) to {export_file:?}");
    println!();
    println!("{}", diagnostics.summary());
    Ok(())
}

fn cmd_validate(path: &Path, kind: AgentKind) -> anyhow::Result<()> {
    let payload = read_policy(path)?;
    let policy = Policy::parse(&payload).context("Invalid policy")?;

    let criterion = match kind {
        AgentKind::Acceleration => AccelerationCriterion::from_policy(&policy).map(|c| c.name()),
        AgentKind::Compass => CompassCriterion::from_policy(&policy).map(|c| c.name()),
        AgentKind::Declarative => DeclarativeCriterion::from_policy(&policy).map(|c| c.name()),
    }
    .context("Invalid criterion parameters")?;

    println!("Policy is valid for the {criterion} criterion.");
    println!();
    println!("{}", serde_json::to_string_pretty(&policy)?);
    Ok(())
}

fn cmd_set_paused(mut config: Config, paused: bool) -> anyhow::Result<()> {
    config.paused = paused;
    config.save().context("Error saving config")?;
    if paused {
        println!("Protocol paused. Use 'sensing-agent resume' to continue.");
    } else {
        println!("Protocol resumed.");
    }
    Ok(())
}

fn cmd_status(config: &Config) -> anyhow::Result<()> {
    println!("Adaptive Sensing Agent Status");
    println!("=============================");
    println!();
    println!("Paused: {}", config.paused);
    println!(
        "Policy: {}",
        config
            .policy_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "built-in default".to_string())
    );
    println!();

    let path = config.diagnostics_path();
    if path.exists() {
        let stats = AgentDiagnostics::read_persisted(&path)
            .with_context(|| format!("Error reading {path:?}"))?;
        println!("Cumulative {}", stats.summary());
    } else {
        println!("No previous session data found.");
    }
    Ok(())
}

fn cmd_config(config: &Config) -> anyhow::Result<()> {
    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) -> anyhow::Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("Error setting Ctrl+C handler")
}

fn read_policy(path: &Path) -> anyhow::Result<Value> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Error reading {path:?}"))?;
    let payload: Value = serde_json::from_str(&content)
        .with_context(|| format!("{path:?} is not valid JSON"))?;
    if !payload.is_object() {
        bail!("{path:?} must contain a JSON object");
    }
    Ok(payload)
}

fn print_record(record: &StateTransitionRecord) {
    println!(
        "[{}] {}: {}",
        record.timestamp.format("%H:%M:%S"),
        record.agent_id,
        record.description
    );
}

fn write_record(file: &mut std::fs::File, record: &StateTransitionRecord) -> anyhow::Result<()> {
    let line = serde_json::to_string(record)?;
    writeln!(file, "{line}").context("Error writing transition record")?;
    Ok(())
}

fn default_policy(kind: AgentKind) -> Value {
    match kind {
        AgentKind::Acceleration => json!({
            "id": "acceleration",
            "description": "Sample faster while the device is moving or face-down",
            "action-interval": "00:00:10",
            "observation-duration": "00:00:05",
            "threshold": 0.5,
            "completion-action-interval": "00:00:20",
            "elevated-sampling-rate": 50,
            "baseline-sampling-rate": 10,
        }),
        AgentKind::Compass => json!({
            "id": "compass",
            "description": "Sample faster while the device points north",
            "action-interval": null,
            "observation-duration": "00:00:05",
            "threshold": 0,
            "completion-action-interval": "00:00:10",
            "target-heading": 0,
            "heading-range": 90,
            "elevated-sampling-rate": 5,
            "baseline-sampling-rate": 1,
        }),
        AgentKind::Declarative => json!({
            "id": "heart-rate",
            "description": "Sample faster while heart rate is elevated",
            "action-interval": "00:00:30",
            "observation-duration": "00:00:10",
            "threshold": 0,
            "completion-action-interval": "00:00:15",
            "elevated-sampling-rate": 4,
            "baseline-sampling-rate": 1,
            "statements": [{
                "id": "elevated-heart-rate",
                "criterion": {
                    "logic": "conjunction",
                    "elements": [{
                        "property-type": "heart-rate",
                        "property-name": "bpm",
                        "aggregation": "average",
                        "relation": "greater-than",
                        "target": 100
                    }]
                }
            }],
        }),
    }
}

/// Probes for a simulated run. The first probe is the one the agent elevates.
fn synthetic_probes(kind: AgentKind) -> Vec<Arc<SyntheticProbe>> {
    fn probe(kind: ObservationKind, rate: f64, generator: ReadingGenerator) -> Arc<SyntheticProbe> {
        Arc::new(SyntheticProbe::new(kind, Some(rate), generator))
    }

    match kind {
        AgentKind::Acceleration => vec![
            // alternates between ~50 s at rest and ~50 s of shaking at 10 Hz
            probe(
                ObservationKind::Acceleration,
                10.0,
                Arc::new(|n: u64| {
                    let shaking = (n / 500) % 2 == 1;
                    let wobble = if shaking { 0.9 * (n as f64 * 0.7).sin() + 0.7 } else { 0.0 };
                    Reading::Acceleration {
                        x: 0.0,
                        y: 0.0,
                        z: 1.0 + wobble,
                    }
                }),
            ),
            // briefly face-down every few minutes
            probe(
                ObservationKind::Proximity,
                1.0,
                Arc::new(|n: u64| Reading::Proximity {
                    distance: if n % 180 < 3 { 0.0 } else { 5.0 },
                    max_distance: 5.0,
                }),
            ),
        ],
        AgentKind::Compass => vec![probe(
            ObservationKind::Compass,
            1.0,
            Arc::new(|n: u64| Reading::Compass {
                heading: (n as f64 * 3.0) % 360.0,
            }),
        )],
        AgentKind::Declarative => vec![probe(
            ObservationKind::HeartRate,
            1.0,
            Arc::new(|n: u64| Reading::HeartRate {
                bpm: 85.0 + 30.0 * (n as f64 / 60.0).sin(),
            }),
        )],
    }
}
