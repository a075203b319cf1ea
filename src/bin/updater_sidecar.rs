//! The update sidecar's own process (§4.8/§4.9): a separate binary from
//! `skill-core` so a self-update that restarts the main runtime's
//! containers cannot also take down the thing performing the restart.
//! Shares only the wire contract in [`skill_core::sidecar`] and the
//! secret file on disk with the main process.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use skill_core::config::Config;
use skill_core::events::EventBus;
use skill_core::sidecar::auth::get_or_create_secret;
use skill_core::sidecar::{serve, SidecarState};
use skill_core::update::{DurableStore, HealthCheckConfig, UpdateExecutor};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return;
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")))
        .init();

    let config_path = args.iter().position(|a| a == "--config").and_then(|i| args.get(i + 1)).map(PathBuf::from);

    let config = match Config::load(config_path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!("failed to load config: {e}");
            return;
        }
    };

    info!(
        bind = %config.update.sidecar_bind,
        project_dir = %config.update.project_dir,
        "updater-sidecar starting"
    );

    let secret = match get_or_create_secret(&config.update.updater_secret_path) {
        Ok(s) => s,
        Err(e) => {
            error!("failed to load or create updater secret: {e}");
            return;
        }
    };

    let durable = match &config.update.history_db_path {
        Some(path) => match DurableStore::open(path) {
            Ok(store) => Some(store),
            Err(e) => {
                error!("failed to open update history store at {path}: {e}");
                None
            }
        },
        None => None,
    };

    let health_config = HealthCheckConfig {
        retries: config.health_check_retries,
        delay: Duration::from_secs(config.health_check_delay_secs),
        timeout: Duration::from_secs(config.sidecar_http_timeout_secs),
    };

    let executor = Arc::new(UpdateExecutor::new(
        &config.update,
        Duration::from_secs(config.update_build_timeout_secs),
        Duration::from_secs(config.update_restart_timeout_secs),
        health_config,
        durable,
        Arc::new(EventBus::default()),
    ));

    let state = SidecarState {
        executor,
        secret: Arc::new(secret),
    };

    if let Err(e) = serve(state, &config.update.sidecar_bind).await {
        error!("updater sidecar exited with error: {e}");
    }
}

fn print_usage() {
    println!(
        "updater-sidecar — out-of-band self-update executor for skill-core

USAGE:
    updater-sidecar [OPTIONS]

OPTIONS:
    --config <PATH>     Path to config file (default: ./config.toml)
    -h, --help          Print this help message

Shares [update] settings in config.toml with the main skill-core process.
Every route except /health requires the X-Updater-Secret header, whose
value is read from (or generated into) `updater_secret_path`."
    );
}
