//! CourseDrip — lifecycle email engine for the learning platform.
//!
//! Main entry point: wires the stores, gating, renderer, and transport
//! together and exposes the HTTP surface. Scheduling stays external — an
//! operator points a cron-style trigger at `POST /v1/scheduler/run` — but
//! a built-in interval ticker can be enabled for single-node setups.

use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use tracing::{info, warn};

use coursedrip_api::AppState;
use coursedrip_core::types::InMemoryRecipientDirectory;
use coursedrip_core::AppConfig;
use coursedrip_delivery::email::MailProviderConfig;
use coursedrip_delivery::{SendLog, SuppressionFilter, TransactionalMailProvider};
use coursedrip_sequences::{
    EnrollmentService, EnrollmentStore, SendWindow, SequenceRunner, SequenceStore, TrackingService,
};

#[derive(Parser, Debug)]
#[command(name = "coursedrip")]
#[command(about = "Sequence enrollment and drip-scheduling email engine")]
#[command(version)]
struct Cli {
    /// HTTP host (overrides config)
    #[arg(long, env = "COURSEDRIP__API__HOST")]
    host: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "COURSEDRIP__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Shared secret for the scheduler trigger (overrides config)
    #[arg(long, env = "COURSEDRIP__SCHEDULER__RUN_SECRET")]
    run_secret: Option<String>,

    /// Run the scheduler internally every N seconds instead of waiting
    /// for external triggers
    #[arg(long)]
    run_interval_secs: Option<u64>,

    /// Seed a demo sequence and demo recipients
    #[arg(long, default_value_t = false)]
    seed_demo: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coursedrip=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("CourseDrip starting up");

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(host) = cli.host {
        config.api.host = host;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(secret) = cli.run_secret {
        config.scheduler.run_secret = Some(secret);
    }
    config.validate()?;

    info!(
        host = %config.api.host,
        http_port = config.api.http_port,
        batch_size = config.scheduler.batch_size,
        dedup_window_hours = config.scheduler.dedup_window_hours,
        preferred_hour = config.send_window.preferred_hour,
        "configuration loaded"
    );

    // Stores and collaborators.
    let sequences = Arc::new(SequenceStore::new());
    let enrollments = Arc::new(EnrollmentStore::new());
    let directory = Arc::new(InMemoryRecipientDirectory::new());
    let send_log = Arc::new(SendLog::new());
    let transport = Arc::new(TransactionalMailProvider::new(MailProviderConfig::default()));
    let window = SendWindow::from_config(&config.send_window);

    if cli.seed_demo {
        sequences.seed_demo_sequences();
        directory.seed_demo_recipients();
    }

    let enrollment = Arc::new(EnrollmentService::new(
        sequences.clone(),
        enrollments.clone(),
        directory.clone(),
        SuppressionFilter::new(),
        window.clone(),
        config.scheduler.clone(),
    ));
    let runner = Arc::new(SequenceRunner::new(
        sequences.clone(),
        enrollments.clone(),
        directory.clone(),
        SuppressionFilter::new(),
        send_log.clone(),
        transport,
        send_log.clone(),
        window,
        config.scheduler.clone(),
    ));
    let tracking = Arc::new(TrackingService::new(
        send_log.clone(),
        sequences.clone(),
        enrollments.clone(),
    ));

    if let Some(secs) = cli.run_interval_secs {
        let ticker_runner = runner.clone();
        info!(interval_secs = secs, "internal scheduler ticker enabled");
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(secs.max(1)));
            loop {
                interval.tick().await;
                ticker_runner.run_once().await;
            }
        });
    }

    let state = AppState {
        enrollment,
        runner,
        tracking,
        run_secret: config.scheduler.run_secret.clone(),
        start_time: Instant::now(),
    };

    coursedrip_api::serve(state, &config.api.host, config.api.http_port).await
}
