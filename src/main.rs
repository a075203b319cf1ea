//! The skill orchestration core's own process: wires the registry,
//! dispatcher, heartbeat scheduler, and autonomy engine together, runs
//! the background heartbeat/sweep loops, and exposes a minimal local
//! HTTP surface so an embedding application has something to talk to.
//!
//! The HTTP surface here is intentionally thin — authenticating and
//! adapting external traffic into a [`skill_core::envelope::SkillRequest`]
//! is the embedding application's job, not this crate's (it is an
//! explicit non-goal). `/dispatch` exists so this binary is runnable
//! and testable on its own; a real deployment puts a real gateway in
//! front of it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::{watch, RwLock};
use tracing::{error, info};

use skill_core::audit::AuditLog;
use skill_core::autonomy::AutonomyEngine;
use skill_core::config::Config;
use skill_core::dispatcher::Dispatcher;
use skill_core::envelope::SkillRequest;
use skill_core::events::EventBus;
use skill_core::registry::SkillRegistry;
use skill_core::scheduler::HeartbeatScheduler;
use skill_core::skills::github::GitHubSkill;

/// Tracks which users have issued a request recently, so the heartbeat
/// scheduler has something to hand skills as `active_users` without the
/// core needing to own a real presence/session concept (§4.6's "the
/// scheduler is handed the list by whatever owns activity").
struct ActivityTracker {
    seen: RwLock<HashMap<String, Instant>>,
    window: Duration,
}

impl ActivityTracker {
    fn new(window: Duration) -> Self {
        Self {
            seen: RwLock::new(HashMap::new()),
            window,
        }
    }

    async fn touch(&self, user_id: &str) {
        self.seen.write().await.insert(user_id.to_string(), Instant::now());
    }

    async fn active_users(&self) -> Vec<String> {
        let now = Instant::now();
        self.seen
            .read()
            .await
            .iter()
            .filter(|(_, last_seen)| now.duration_since(**last_seen) < self.window)
            .map(|(user, _)| user.clone())
            .collect()
    }
}

#[derive(Clone)]
struct GatewayState {
    dispatcher: Arc<Dispatcher>,
    registry: Arc<SkillRegistry>,
    activity: Arc<ActivityTracker>,
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn skills(State(state): State<GatewayState>) -> Json<Vec<String>> {
    Json(state.registry.names().await)
}

async fn dispatch(State(state): State<GatewayState>, Json(request): Json<SkillRequest>) -> Json<skill_core::envelope::SkillResponse> {
    state.activity.touch(&request.user_id).await;
    Json(state.dispatcher.dispatch(request).await)
}

fn gateway_router(state: GatewayState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/skills", get(skills))
        .route("/dispatch", post(dispatch))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return;
    }

    if args.iter().any(|a| a == "--default-config") {
        print!("{}", Config::default_config_contents());
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
        gateway_bind = %config.gateway_bind,
        heartbeat_interval_secs = config.heartbeat_interval_secs,
        "skill-core starting"
    );

    if args.iter().any(|a| a == "--check") {
        info!("config loaded successfully, exiting (--check)");
        return;
    }

    let events = Arc::new(EventBus::default());

    let mut autonomy_engine = AutonomyEngine::new(
        Duration::from_secs(config.pending_action_ttl_secs),
        Duration::from_secs(config.pending_action_retention_secs),
        events.clone(),
    );
    if let Some(path) = &config.audit_log_db_path {
        match AuditLog::open(path) {
            Ok(log) => autonomy_engine = autonomy_engine.with_audit(Arc::new(log)),
            Err(e) => error!("failed to open audit log at {path}: {e}"),
        }
    }
    let autonomy_engine = Arc::new(autonomy_engine);

    let registry = Arc::new(SkillRegistry::new(config.registry_init_concurrency));

    if config.github.token.is_some() {
        let github = Arc::new(GitHubSkill::new(config.github.token.clone(), config.github.default_repo.clone(), autonomy_engine.clone()));
        if let Err(e) = registry.register(github).await {
            error!("failed to register github skill: {e}");
        }
    } else {
        info!("no github token configured, github_management skill not registered");
    }

    registry.initialize_all().await;

    let dispatcher = Arc::new(Dispatcher::new(registry.clone(), autonomy_engine.clone(), Duration::from_secs(config.request_timeout_secs)));
    if let Err(e) = dispatcher.rebuild_index().await {
        error!("fatal startup error: {e}");
        return;
    }

    let scheduler = Arc::new(HeartbeatScheduler::new(
        registry.clone(),
        events.clone(),
        Duration::from_secs(config.heartbeat_per_skill_timeout_secs),
        config.heartbeat_concurrency,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let activity = Arc::new(ActivityTracker::new(Duration::from_secs(config.heartbeat_interval_secs * 10)));

    let scheduler_handle = {
        let scheduler = scheduler.clone();
        let shutdown_rx = shutdown_rx.clone();
        let activity = activity.clone();
        let interval = Duration::from_secs(config.heartbeat_interval_secs);
        let grace = Duration::from_secs(config.heartbeat_shutdown_grace_secs);
        tokio::spawn(async move {
            scheduler.run(
                interval,
                grace,
                shutdown_rx,
                move || {
                    let activity = activity.clone();
                    async move { activity.active_users().await }
                },
                |actions| {
                    for action in actions {
                        info!(
                            skill = %action.skill_name,
                            user = %action.user_id,
                            action_type = %action.action_type,
                            priority = action.priority,
                            "heartbeat action produced"
                        );
                    }
                },
            )
            .await;
        })
    };

    let sweeper_handle = {
        let autonomy_engine = autonomy_engine.clone();
        let shutdown_rx = shutdown_rx.clone();
        let period = Duration::from_secs(config.sweep_interval_secs);
        tokio::spawn(async move {
            autonomy_engine.run_sweeper(period, shutdown_rx).await;
        })
    };

    let gateway_state = GatewayState {
        dispatcher,
        registry: registry.clone(),
        activity,
    };
    let gateway_bind = config.gateway_bind.clone();
    let gateway_handle = {
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let listener = match TcpListener::bind(&gateway_bind).await {
                Ok(l) => l,
                Err(e) => {
                    error!("failed to bind gateway at {gateway_bind}: {e}");
                    return;
                }
            };
            info!(bind = %gateway_bind, "gateway listening");
            let app = gateway_router(gateway_state);
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });
            if let Err(e) = serve.await {
                error!("gateway server error: {e}");
            }
        })
    };

    info!("skill-core is running — press Ctrl+C to stop");
    tokio::signal::ctrl_c().await.expect("failed to listen for ctrl+c");
    info!("shutdown signal received, stopping...");
    let _ = shutdown_tx.send(true);

    let _ = tokio::join!(scheduler_handle, sweeper_handle, gateway_handle);
    registry.shutdown_all().await;
    info!("skill-core stopped");
}

fn print_usage() {
    println!(
        "skill-core — skill orchestration core for a multi-tenant agent platform

USAGE:
    skill-core [OPTIONS]

OPTIONS:
    --config <PATH>     Path to config file (default: ./config.toml)
    --default-config    Print default config to stdout and exit
    --check             Validate config, then exit
    -h, --help          Print this help message

See config.example.toml for every available setting."
    );
}
