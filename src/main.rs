//! TriageWatch - live client for a multi-agent medical triage backend
//!
//! Submits a patient's symptoms, follows every specialist agent's progress
//! over the push channel, and writes the final triage report once the
//! analysis completes.
//!
//! Exit codes:
//!   0 - Success (report written, no --fail-on-esi threshold hit)
//!   1 - Runtime error (connection, start failure after retries, disconnect, etc.)
//!   2 - ESI level at or above the --fail-on-esi urgency
//!   3 - Cancelled with Ctrl-C

mod analysis;
mod api;
mod channel;
mod cli;
mod config;
mod error;
mod models;
mod report;
mod session;
mod view;

use analysis::{ProgressAggregator, ProgressPolicy, TerminalSignal};
use anyhow::{anyhow, Context, Result};
use api::ApiClient;
use channel::PushChannel;
use chrono::Utc;
use cli::{Args, OutputFormat};
use config::{Config, CONFIG_FILE};
use models::{AgentDescriptor, UrgencyBand};
use report::{ReportMetadata, TriageReport};
use session::{Session, SessionOutcome};
use std::future::Future;
use std::path::Path;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;
use view::ProgressView;

const EXIT_OK: i32 = 0;
const EXIT_ESI_THRESHOLD: i32 = 2;
const EXIT_CANCELLED: i32 = 3;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Initialize logging
    init_logging(&args);

    info!("TriageWatch v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run_triage(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Triage failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .triagewatch.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Edit it to point at your backend and customize the agent roster.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Run one triage from submission to report. Returns the exit code.
async fn run_triage(args: Args) -> Result<i32> {
    let start_time = Instant::now();

    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    let api = ApiClient::new(config.api_client_config())?;

    if args.check {
        return handle_check(&api).await;
    }

    let roster = resolve_roster(&api, &config).await?;
    let patient_id = args
        .patient_id
        .clone()
        .unwrap_or_else(|| format!("patient_{}", Utc::now().timestamp_millis()));
    let request = args.analysis_request(&patient_id);

    println!("🩺 Starting triage for {}", patient_id);
    println!("   Symptoms: {}", request.symptoms.join(", "));
    println!("   Backend: {}", api.base_url());

    let cancel = spawn_ctrl_c_watch();
    let mut channel = PushChannel::new(config.push_channel_config());
    println!("   Push channel: {} ({})", config.channel.url, channel.protocol());
    println!("   Specialists: {}\n", roster.len());

    let policy = ProgressPolicy::from(config.session.progress_policy);
    let attempts = config.session.start_retries + 1;

    let mut completed = None;
    for attempt in 1..=attempts {
        if attempt > 1 {
            println!("\n🔁 Retrying analysis (attempt {}/{})...", attempt, attempts);
        }

        if let Err(e) = channel.connect().await {
            if attempt == attempts {
                return Err(anyhow!(e).context("Could not connect to the push channel"));
            }
            warn!("Push channel connect failed: {}", e);
            continue;
        }

        let aggregator = ProgressAggregator::initialize(&patient_id, &roster, policy)
            .context("Invalid agent roster")?;
        let mut session = Session::initialize(&channel, aggregator, config.session_options())?;
        let mut view = ProgressView::new(session.aggregator().state(), args.quiet);

        let outcome = session
            .run(&api, &request, &mut view, cancelled(cancel.clone()))
            .await;
        session.teardown();
        drop(view);

        match outcome {
            SessionOutcome::Completed(signal) => {
                completed = Some((signal, session));
                break;
            }
            SessionOutcome::Cancelled => {
                channel.disconnect();
                eprintln!("\n⏹  Analysis cancelled.");
                return Ok(EXIT_CANCELLED);
            }
            SessionOutcome::Failed(e) => {
                if attempt == attempts {
                    channel.disconnect();
                    return Err(anyhow!(e).context("Analysis did not complete"));
                }
                warn!("Session {} failed: {}", patient_id, e);
            }
        }
    }
    channel.disconnect();

    let Some((signal, session)) = completed else {
        return Err(anyhow!("Analysis did not complete"));
    };

    write_results(&args, &config, &api, &signal, &session, start_time).await
}

/// Fetch results for a completed session, write the report, and print
/// the summary.
async fn write_results(
    args: &Args,
    config: &Config,
    api: &ApiClient,
    signal: &TerminalSignal,
    session: &Session,
    start_time: Instant,
) -> Result<i32> {
    println!("\n📥 Fetching results...");
    let results = api
        .get_results(session.session_id())
        .await
        .with_context(|| format!("Failed to fetch results for {}", session.session_id()))?;

    let aggregator = session.aggregator();
    let metadata = ReportMetadata {
        patient_id: results.patient_id.clone(),
        analysis_id: signal
            .analysis_id
            .clone()
            .or_else(|| aggregator.analysis_id().map(String::from))
            .unwrap_or_else(|| results.analysis_id.clone()),
        estimated_time: aggregator.estimated_time().map(String::from),
        backend: api.base_url().to_string(),
        generated_at: Utc::now(),
        results_timestamp: results.timestamp.clone(),
        duration_seconds: start_time.elapsed().as_secs_f64(),
        events_applied: aggregator.events_applied(),
        events_ignored: aggregator.events_ignored(),
    };
    let report = TriageReport::assemble(
        results,
        aggregator.state(),
        metadata,
        config.report.include_raw_results,
    );

    let output = match config.report.format {
        OutputFormat::Json => report::generate_json_report(&report)?,
        OutputFormat::Markdown => report::generate_markdown_report(&report),
    };

    let output_path = Path::new(&config.report.output);
    std::fs::write(output_path, &output)
        .with_context(|| format!("Failed to write report to {}", output_path.display()))?;

    let band = report.urgency_band();
    println!("\n📊 Triage Summary:");
    println!(
        "   {} ESI Level {}: {}",
        band.emoji(),
        report.summary.esi_level,
        band.label()
    );
    println!("   Primary concern: {}", report.summary.primary_concern);
    println!("   Recommendation: {}", report.summary.recommendation);
    println!(
        "   Specialists complete: {} of {}",
        aggregator.state().completed_count(),
        aggregator.state().total()
    );
    println!("\n✅ Report saved to: {}", output_path.display());

    if band <= UrgencyBand::High {
        println!("\n🚨 Seek emergency care now: call 911 (US) or 108 (India).");
    }

    if let Some(threshold) = args.fail_on_esi {
        if report.summary.esi_level <= threshold {
            eprintln!(
                "\n⛔ ESI level {} is at or above the requested urgency {}. Failing (exit code 2).",
                report.summary.esi_level, threshold
            );
            return Ok(EXIT_ESI_THRESHOLD);
        }
    }

    Ok(EXIT_OK)
}

/// Handle --check: report backend health and its agents, then exit.
async fn handle_check(api: &ApiClient) -> Result<i32> {
    println!("🔍 Checking backend at {}", api.base_url());

    let health = api.health_check().await.context("Health check failed")?;
    println!("   Status: {}", health.status);
    for (service, status) in &health.services {
        println!("   - {}: {}", service, status);
    }

    match api.agent_roster().await {
        Ok(roster) => {
            println!("\n   Agents ({}):", roster.len());
            for agent in &roster {
                println!("     🤖 {} ({})", agent.name, agent.id);
            }
        }
        Err(e) => warn!("Could not fetch agent roster: {}", e),
    }

    println!("\n✅ Backend is reachable.");
    Ok(EXIT_OK)
}

/// Configured roster, or the backend's when `fetch_roster` is set.
async fn resolve_roster(api: &ApiClient, config: &Config) -> Result<Vec<AgentDescriptor>> {
    if !config.session.fetch_roster {
        return Ok(config.session.roster.clone());
    }

    let roster = api
        .agent_roster()
        .await
        .context("Failed to fetch the agent roster")?;
    info!("Using backend roster of {} agents", roster.len());
    Ok(roster)
}

/// Flip a watch flag on the first Ctrl-C.
fn spawn_ctrl_c_watch() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = tx.send(true);
            }
            Err(e) => {
                warn!("Ctrl-C handler unavailable: {}", e);
                // keep the sender alive so receivers never see a close
                std::future::pending::<()>().await;
            }
        }
    });
    rx
}

/// Resolves once Ctrl-C was pressed.
fn cancelled(mut rx: watch::Receiver<bool>) -> impl Future<Output = ()> {
    async move {
        if rx.wait_for(|pressed| *pressed).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
