use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{ensure, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use shared_event_bus::{EventPublisher, FileEventPublisher};
use shared_logging::LogLevel;
use tokio::{
    runtime::Runtime,
    time::{self, MissedTickBehavior},
};
use tracing::info;
use turret_actuators::{WingFault, WingState};
use turret_behavior::{
    random_seed, sample_catalog, seeded_rng, BehaviorTelemetry, EngagementState, OuterState,
    RuntimeConfig, TickReport, Turret,
};
use turret_hardware::sim::{RigScript, SimulatedRig};
use turret_player::{
    AudioTransport, DirectorySource, PacedTransport, PcmFileTransport, Player, PlayerError,
    PlayerRuntime, SampleSource,
};

mod synth;

#[derive(Parser, Debug)]
#[command(name = "turret", version, about = "Sentry turret control loop on a simulated rig")]
struct Cli {
    /// JSON runtime config; flags override its values.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Runs the control loop against the simulated rig.
    Run(RunArgs),
    /// Lists every sample the firmware may request.
    Samples {
        /// Sample library to check for missing files.
        #[arg(long)]
        samples: Option<PathBuf>,
        /// Exit with an error when a sample is missing.
        #[arg(long)]
        strict: bool,
    },
}

#[derive(Parser, Debug, Default)]
struct RunArgs {
    /// Stop after this many ticks.
    #[arg(long)]
    ticks: Option<u64>,
    #[arg(long)]
    tick_period_ms: Option<u64>,
    /// Sample library directory; a synthesized library is used otherwise.
    #[arg(long)]
    samples: Option<PathBuf>,
    /// Raw 16-bit PCM capture of the mixer output.
    #[arg(long)]
    pcm_out: Option<PathBuf>,
    #[arg(long)]
    log_path: Option<PathBuf>,
    #[arg(long)]
    event_log: Option<PathBuf>,
    #[arg(long)]
    log_level: Option<LogLevel>,
    #[arg(long)]
    seed: Option<u64>,
    /// JSON rig script (presence, shake and tip windows).
    #[arg(long)]
    script: Option<PathBuf>,
    /// Mix as fast as possible instead of in real time.
    #[arg(long)]
    no_realtime: bool,
}

#[derive(Debug, Serialize)]
struct RunSummary {
    seed: u64,
    ticks: u64,
    outer: OuterState,
    engagement: EngagementState,
    wings: WingState,
    fault: Option<WingFault>,
    engagement_changes: u64,
    ticks_by_outer_state: BTreeMap<String, u64>,
}

impl RunSummary {
    fn new(seed: u64) -> Self {
        Self {
            seed,
            ticks: 0,
            outer: OuterState::Stable,
            engagement: EngagementState::Search,
            wings: WingState::Initial,
            fault: None,
            engagement_changes: 0,
            ticks_by_outer_state: BTreeMap::new(),
        }
    }

    fn record(&mut self, report: &TickReport) {
        if report.engagement != self.engagement {
            self.engagement_changes += 1;
        }
        self.ticks = report.tick;
        self.outer = report.outer;
        self.engagement = report.engagement;
        self.wings = report.wings;
        *self
            .ticks_by_outer_state
            .entry(report.outer.to_string())
            .or_default() += 1;
    }
}

/// Sink for mixed audio when no capture file is requested.
#[derive(Debug, Default)]
struct DiscardTransport;

impl AudioTransport for DiscardTransport {
    fn write(&mut self, buf: &[u8]) -> Result<usize, PlayerError> {
        Ok(buf.len())
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "turret=info".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => handle_run(cli.config.as_deref(), &args),
        Commands::Samples { samples, strict } => {
            let dir = match samples {
                Some(dir) => Some(dir),
                None => match cli.config.as_deref() {
                    Some(path) => RuntimeConfig::load(path)?.samples_dir,
                    None => None,
                },
            };
            handle_samples(dir.as_deref(), strict)
        }
    }
}

fn resolve_config(path: Option<&Path>, args: &RunArgs) -> Result<RuntimeConfig> {
    let mut config = match path {
        Some(path) => RuntimeConfig::load(path)?,
        None => RuntimeConfig::default(),
    };
    if args.ticks.is_some() {
        config.ticks = args.ticks;
    }
    if let Some(period) = args.tick_period_ms {
        config.tick_period_ms = period;
    }
    if args.samples.is_some() {
        config.samples_dir.clone_from(&args.samples);
    }
    if args.log_path.is_some() {
        config.log_path.clone_from(&args.log_path);
    }
    if args.event_log.is_some() {
        config.event_log.clone_from(&args.event_log);
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    if args.no_realtime {
        config.realtime_audio = false;
    }
    config.validate()?;
    Ok(config)
}

fn load_script(path: Option<&Path>, seed: u64) -> Result<RigScript> {
    let Some(path) = path else {
        return Ok(RigScript {
            seed,
            ..RigScript::default()
        });
    };
    let raw =
        fs::read_to_string(path).with_context(|| format!("reading rig script {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing rig script {}", path.display()))
}

fn build_telemetry(config: &RuntimeConfig) -> Result<BehaviorTelemetry> {
    let mut builder = BehaviorTelemetry::builder("turret").min_level(config.log_level);
    if let Some(path) = &config.log_path {
        builder = builder.log_path(path);
    }
    if let Some(path) = &config.event_log {
        let publisher: Arc<dyn EventPublisher> = Arc::new(FileEventPublisher::new(path)?);
        builder = builder.event_publisher(publisher);
    }
    builder.build()
}

fn start_player(player: Player, pcm_out: Option<&Path>, realtime: bool) -> Result<PlayerRuntime> {
    let runtime = match (pcm_out, realtime) {
        (Some(path), true) => {
            PlayerRuntime::spawn(player, PacedTransport::new(PcmFileTransport::create(path)?))?
        }
        (Some(path), false) => PlayerRuntime::spawn(player, PcmFileTransport::create(path)?)?,
        (None, true) => PlayerRuntime::spawn(player, PacedTransport::new(DiscardTransport))?,
        (None, false) => PlayerRuntime::spawn(player, DiscardTransport)?,
    };
    Ok(runtime)
}

fn handle_run(config_path: Option<&Path>, args: &RunArgs) -> Result<()> {
    let config = resolve_config(config_path, args)?;
    let seed = config.seed.unwrap_or_else(random_seed);
    let rig = SimulatedRig::new(load_script(args.script.as_deref(), seed)?);

    let player = match &config.samples_dir {
        Some(dir) => {
            ensure!(dir.is_dir(), "sample library {} not found", dir.display());
            Player::new(DirectorySource::new(dir))
        }
        None => Player::new(synth::library(seed)),
    };
    let mixer = start_player(player.clone(), args.pcm_out.as_deref(), config.realtime_audio)?;

    let telemetry = build_telemetry(&config)?;
    let mut turret =
        Turret::new(rig.hardware(), player, seeded_rng(seed)).with_telemetry(telemetry.clone());

    info!(seed, period_ms = config.tick_period_ms, ticks = ?config.ticks, "turret starting");
    let runtime = Runtime::new()?;
    let summary = runtime.block_on(async {
        let _ = telemetry.log(
            LogLevel::Info,
            0,
            "turret.run.start",
            json!({ "seed": seed, "tick_period_ms": config.tick_period_ms }),
        );
        let summary = control_loop(&mut turret, &rig, &config, seed).await;
        turret.shutdown();
        let _ = telemetry.log(
            LogLevel::Info,
            summary.ticks,
            "turret.run.complete",
            serde_json::to_value(&summary).unwrap_or_default(),
        );
        telemetry.flush().await;
        summary
    });
    mixer.shutdown();

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn control_loop<R: rand::Rng>(
    turret: &mut Turret<R>,
    rig: &SimulatedRig,
    config: &RuntimeConfig,
    seed: u64,
) -> RunSummary {
    let mut summary = RunSummary::new(seed);
    let mut interval = time::interval(Duration::from_millis(config.tick_period_ms));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    while config.ticks.map_or(true, |limit| turret.ticks() < limit) {
        tokio::select! {
            _ = interval.tick() => {}
            _ = &mut ctrl_c => {
                info!("interrupted");
                break;
            }
        }
        let report = turret.tick();
        rig.advance();
        if report.engagement != summary.engagement || report.outer != summary.outer {
            info!(
                tick = report.tick,
                outer = %report.outer,
                engagement = %report.engagement,
                wings = ?report.wings,
                "state"
            );
        }
        summary.record(&report);
    }
    summary.fault = turret.fault();
    summary
}

fn handle_samples(dir: Option<&Path>, strict: bool) -> Result<()> {
    let source = dir.map(DirectorySource::new);
    let mut missing = 0_usize;
    for group in sample_catalog() {
        println!("{}:", group.label);
        for id in group.ids {
            let status = match &source {
                Some(source) if source.contains(id) => "ok",
                Some(_) => {
                    missing += 1;
                    "MISSING"
                }
                None => "",
            };
            println!("  {id} {status}");
        }
    }
    if source.is_some() {
        println!("{missing} missing");
    }
    ensure!(!strict || missing == 0, "{missing} samples missing");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn flags_override_the_config_file() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("turret.json");
        fs::write(&path, r#"{ "seed": 1, "tick_period_ms": 20, "ticks": 50 }"#).unwrap();
        let args = RunArgs {
            ticks: Some(10),
            no_realtime: true,
            ..RunArgs::default()
        };
        let config = resolve_config(Some(&path), &args).unwrap();
        assert_eq!(config.ticks, Some(10));
        assert_eq!(config.seed, Some(1));
        assert_eq!(config.tick_period_ms, 20);
        assert!(!config.realtime_audio);
    }

    #[test]
    fn zero_period_flag_is_rejected() {
        let args = RunArgs {
            tick_period_ms: Some(0),
            ..RunArgs::default()
        };
        assert!(resolve_config(None, &args).is_err());
    }

    #[test]
    fn rig_script_defaults_fill_missing_fields() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("rig.json");
        fs::write(&path, r#"{ "jammed": true }"#).unwrap();
        let script = load_script(Some(&path), 5).unwrap();
        assert!(script.jammed);
        assert!(!script.presence.is_empty());
        assert_eq!(load_script(None, 5).unwrap().seed, 5);
    }

    #[test]
    fn summary_counts_engagement_changes() {
        let mut summary = RunSummary::new(3);
        let mut report = TickReport {
            tick: 1,
            outer: OuterState::Stable,
            engagement: EngagementState::Search,
            wings: WingState::Closed,
            stability: turret_stability_report(),
            fault: false,
        };
        summary.record(&report);
        report.tick = 2;
        report.engagement = EngagementState::Opening;
        summary.record(&report);
        assert_eq!(summary.engagement_changes, 1);
        assert_eq!(summary.ticks_by_outer_state.get("stable"), Some(&2));
    }

    #[test]
    fn samples_listing_reports_missing_files() {
        let tmp = tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("alert")).unwrap();
        fs::write(tmp.path().join("alert/i_see_you.s8"), [0u8; 8]).unwrap();
        assert!(handle_samples(Some(tmp.path()), false).is_ok());
        assert!(handle_samples(Some(tmp.path()), true).is_err());
        assert!(handle_samples(None, true).is_ok());
    }

    #[test]
    fn short_unpaced_run_completes() {
        let tmp = tempdir().unwrap();
        let pcm = tmp.path().join("out.pcm");
        let args = RunArgs {
            ticks: Some(400),
            tick_period_ms: Some(1),
            pcm_out: Some(pcm.clone()),
            event_log: Some(tmp.path().join("events.jsonl")),
            seed: Some(11),
            no_realtime: true,
            ..RunArgs::default()
        };
        handle_run(None, &args).unwrap();
        let events = fs::read_to_string(tmp.path().join("events.jsonl")).unwrap();
        assert!(events.contains("engagement_changed"));
        let ticks: Vec<u64> = events
            .lines()
            .map(|line| serde_json::from_str::<serde_json::Value>(line).unwrap()["tick"]
                .as_u64()
                .unwrap())
            .collect();
        assert!(ticks.windows(2).all(|pair| pair[0] <= pair[1]));
        assert!(fs::metadata(&pcm).unwrap().len() > 0);
    }

    fn turret_stability_report() -> turret_stability::StabilityReport {
        turret_stability::StabilityReport {
            filled: true,
            unstable: false,
            uneven: false,
        }
    }
}
