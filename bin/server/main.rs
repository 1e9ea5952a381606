//! Challenge Tracker Server
//!
//! Runs the REST API plus the deadline reminder worker.

use anyhow::Result;
use challenge_tracker::{
    auth::{DisabledIdentityVerifier, HttpIdentityVerifier, IdentityVerifier},
    notify::{HttpNotifier, NoopNotifier, Notifier},
    reminders::spawn_reminder_monitor,
    run_server,
    storage::ChallengeStore,
    upload::{DisabledEvidenceStore, EvidenceStore, HttpEvidenceStore},
    ApiState, AppConfig, Clock, Collaborators, MemoryStore, PgStore, SystemClock,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "challenge-tracker-server")]
#[command(about = "Challenge Tracker HTTP Server")]
struct Args {
    /// Server port
    #[arg(short, long, default_value = "3000", env = "PORT")]
    port: u16,

    /// Server host
    #[arg(long, default_value = "0.0.0.0", env = "CHALLENGE_HOST")]
    host: String,

    /// PostgreSQL connection string; in-memory storage when absent
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Secret used to sign bearer tokens
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    jwt_secret: String,

    /// Push gateway endpoint
    #[arg(long, env = "PUSH_GATEWAY_URL")]
    push_gateway_url: Option<String>,

    #[arg(long, env = "PUSH_API_KEY", hide_env_values = true)]
    push_api_key: Option<String>,

    /// Media host endpoint for proof uploads
    #[arg(long, env = "UPLOAD_URL")]
    upload_url: Option<String>,

    /// Identity provider token verification endpoint
    #[arg(long, env = "IDENTITY_URL")]
    identity_url: Option<String>,

    /// Optional TOML configuration file
    #[arg(short, long, env = "CONFIG_FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("challenge_tracker=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            AppConfig::load(path)?
        }
        None => AppConfig::default(),
    };

    info!("Starting Challenge Tracker Server");
    info!("  Policy: {:?}", config.policy);
    info!("  Listening on: {}:{}", args.host, args.port);

    let store: Arc<dyn ChallengeStore> = match &args.database_url {
        Some(url) => Arc::new(PgStore::new(url).await?),
        None => {
            warn!("DATABASE_URL not set, using in-memory storage");
            Arc::new(MemoryStore::new())
        }
    };

    let notifier: Arc<dyn Notifier> = match args.push_gateway_url {
        Some(url) => Arc::new(HttpNotifier::new(url, args.push_api_key)?),
        None => {
            warn!("PUSH_GATEWAY_URL not set, push notifications disabled");
            Arc::new(NoopNotifier)
        }
    };

    let evidence: Arc<dyn EvidenceStore> = match args.upload_url {
        Some(url) => Arc::new(HttpEvidenceStore::new(url)?),
        None => {
            warn!("UPLOAD_URL not set, proof uploads disabled");
            Arc::new(DisabledEvidenceStore)
        }
    };

    let identity: Arc<dyn IdentityVerifier> = match args.identity_url {
        Some(url) => Arc::new(HttpIdentityVerifier::new(url)?),
        None => {
            warn!("IDENTITY_URL not set, logins disabled");
            Arc::new(DisabledIdentityVerifier)
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    spawn_reminder_monitor(
        store.clone(),
        clock.clone(),
        notifier.clone(),
        config.reminders.clone(),
    );

    let state = Arc::new(ApiState::new(
        Collaborators {
            store,
            clock,
            notifier,
            evidence,
            identity,
        },
        &config,
        &args.jwt_secret,
    ));

    info!("Challenge Tracker Server ready");

    // Start server (blocks until shutdown)
    run_server(state, &args.host, args.port).await?;

    Ok(())
}
