use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

use crate::error::{CoreError, Result};

/// Process-wide configuration for the skill orchestration core.
///
/// Every tunable named in the concurrency/resource model has a config
/// field with a default matching the documented default; a handful of
/// update-executor fields are additionally overridable by environment
/// variable, matching the deployment's shared-volume sidecar setup.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Request dispatch deadline (§5: default 60s).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Heartbeat tick cadence (§4.6: default every 60s).
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Per-skill heartbeat deadline (§4.6: default 15s).
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_per_skill_timeout_secs: u64,

    /// Bounded concurrency for heartbeat tasks (§4.6: 16).
    #[serde(default = "default_heartbeat_concurrency")]
    pub heartbeat_concurrency: usize,

    /// Grace window for in-flight ticks on shutdown (§4.6: 30s).
    #[serde(default = "default_heartbeat_shutdown_grace_secs")]
    pub heartbeat_shutdown_grace_secs: u64,

    /// Default pending-action TTL (§3: 10 minutes).
    #[serde(default = "default_pending_action_ttl_secs")]
    pub pending_action_ttl_secs: u64,

    /// How long an expired/consumed pending action is retained for
    /// diagnostic lookup after leaving WAITING (§4.7: 1 hour).
    #[serde(default = "default_pending_action_retention_secs")]
    pub pending_action_retention_secs: u64,

    /// Cadence of the pending-action sweeper (§4.7: every 60s).
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Bound on concurrent skill `initialize()` calls at startup (§4.4: 8).
    #[serde(default = "default_registry_init_concurrency")]
    pub registry_init_concurrency: usize,

    /// Docker build timeout for the self-update executor (§5: 600s).
    #[serde(default = "default_update_build_timeout_secs")]
    pub update_build_timeout_secs: u64,

    /// Per-service restart timeout (§5: 120s).
    #[serde(default = "default_update_restart_timeout_secs")]
    pub update_restart_timeout_secs: u64,

    /// Health check retry count (§4.8: 6).
    #[serde(default = "default_health_check_retries")]
    pub health_check_retries: u32,

    /// Health check retry spacing (§4.8: 10s).
    #[serde(default = "default_health_check_delay_secs")]
    pub health_check_delay_secs: u64,

    /// Sidecar HTTP client timeout (§5: 30s).
    #[serde(default = "default_sidecar_http_timeout_secs")]
    pub sidecar_http_timeout_secs: u64,

    /// Bind address for the main process's HTTP gateway (dispatch,
    /// confirm/cancel, health).
    #[serde(default = "default_gateway_bind")]
    pub gateway_bind: String,

    #[serde(default)]
    pub update: UpdateConfig,

    /// Path to the audit log's sqlite database. `None` disables durable
    /// auditing — confirm/cancel decisions are still logged via
    /// `tracing`, just not persisted to a queryable table (§6).
    #[serde(default)]
    pub audit_log_db_path: Option<String>,

    /// Reference GitHub management skill. Omit the table entirely (or
    /// leave `token` unset) to run without it.
    #[serde(default)]
    pub github: GitHubSkillConfig,
}

/// Configuration for the bundled reference GitHub skill.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitHubSkillConfig {
    /// Personal access token. An empty/missing token leaves the skill in
    /// `ERROR` after `initialize()` rather than disabling it outright —
    /// it still occupies a registry slot so its absence is visible.
    #[serde(default)]
    pub token: Option<String>,

    /// `owner/repo` used when a request's context omits `repository`.
    #[serde(default)]
    pub default_repo: Option<String>,
}

/// Settings consumed by the self-update executor / sidecar (§6).
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateConfig {
    /// `PROJECT_DIR` — working directory for git and compose invocations.
    #[serde(default = "default_project_dir")]
    pub project_dir: String,

    /// `COMPOSE_FILE` — path to the service manifest.
    #[serde(default = "default_compose_file")]
    pub compose_file: String,

    /// `HEALTH_URLS` — comma-separated `http://host:port/health` list.
    #[serde(default)]
    pub health_urls: String,

    /// `UPDATER_SECRET_PATH` — shared-secret file for sidecar auth.
    #[serde(default = "default_updater_secret_path")]
    pub updater_secret_path: String,

    /// Services to rebuild and restart, in dependency order.
    #[serde(default = "default_app_services")]
    pub services: Vec<String>,

    /// Sidecar bind address.
    #[serde(default = "default_sidecar_bind")]
    pub sidecar_bind: String,

    /// Path to the durable update-history sqlite database. `None` means
    /// only the bounded in-memory ring is kept (§3).
    #[serde(default)]
    pub history_db_path: Option<String>,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            project_dir: default_project_dir(),
            compose_file: default_compose_file(),
            health_urls: String::new(),
            updater_secret_path: default_updater_secret_path(),
            services: default_app_services(),
            sidecar_bind: default_sidecar_bind(),
            history_db_path: None,
        }
    }
}

fn default_request_timeout_secs() -> u64 {
    60
}
fn default_heartbeat_interval_secs() -> u64 {
    60
}
fn default_heartbeat_timeout_secs() -> u64 {
    15
}
fn default_heartbeat_concurrency() -> usize {
    16
}
fn default_heartbeat_shutdown_grace_secs() -> u64 {
    30
}
fn default_pending_action_ttl_secs() -> u64 {
    600
}
fn default_pending_action_retention_secs() -> u64 {
    3600
}
fn default_sweep_interval_secs() -> u64 {
    60
}
fn default_registry_init_concurrency() -> usize {
    8
}
fn default_update_build_timeout_secs() -> u64 {
    600
}
fn default_update_restart_timeout_secs() -> u64 {
    120
}
fn default_health_check_retries() -> u32 {
    6
}
fn default_health_check_delay_secs() -> u64 {
    10
}
fn default_sidecar_http_timeout_secs() -> u64 {
    30
}
fn default_project_dir() -> String {
    "/project".to_string()
}
fn default_compose_file() -> String {
    "/project/docker-compose.yml".to_string()
}
fn default_updater_secret_path() -> String {
    "/app/data/.updater-secret".to_string()
}
fn default_app_services() -> Vec<String> {
    vec!["skill-runtime".to_string()]
}
fn default_sidecar_bind() -> String {
    "0.0.0.0:9090".to_string()
}
fn default_gateway_bind() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            heartbeat_per_skill_timeout_secs: default_heartbeat_timeout_secs(),
            heartbeat_concurrency: default_heartbeat_concurrency(),
            heartbeat_shutdown_grace_secs: default_heartbeat_shutdown_grace_secs(),
            pending_action_ttl_secs: default_pending_action_ttl_secs(),
            pending_action_retention_secs: default_pending_action_retention_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            registry_init_concurrency: default_registry_init_concurrency(),
            update_build_timeout_secs: default_update_build_timeout_secs(),
            update_restart_timeout_secs: default_update_restart_timeout_secs(),
            health_check_retries: default_health_check_retries(),
            health_check_delay_secs: default_health_check_delay_secs(),
            sidecar_http_timeout_secs: default_sidecar_http_timeout_secs(),
            gateway_bind: default_gateway_bind(),
            update: UpdateConfig::default(),
            audit_log_db_path: None,
            github: GitHubSkillConfig::default(),
        }
    }
}

impl Config {
    /// Load config from the given path, or fall back to defaults if absent.
    ///
    /// After loading, a small set of identity/deployment-bearing update
    /// fields are overlaid from the environment (§6), matching how the
    /// shared-volume sidecar deployment expects to be configured.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_config_path(),
        };

        let mut config = if config_path.exists() {
            info!("loading config from {}", config_path.display());
            let contents = std::fs::read_to_string(&config_path).map_err(CoreError::Io)?;
            toml::from_str(&contents)
                .map_err(|e| CoreError::Config(format!("parse error: {e}")))?
        } else {
            info!("no config file found at {}, using defaults", config_path.display());
            Config::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("PROJECT_DIR") {
            self.update.project_dir = v;
        }
        if let Ok(v) = std::env::var("COMPOSE_FILE") {
            self.update.compose_file = v;
        }
        if let Ok(v) = std::env::var("HEALTH_URLS") {
            self.update.health_urls = v;
        }
        if let Ok(v) = std::env::var("UPDATER_SECRET_PATH") {
            self.update.updater_secret_path = v;
        }
    }

    /// Returns the default config file path: `./config.toml`.
    pub fn default_config_path() -> PathBuf {
        PathBuf::from("config.toml")
    }

    /// Generate the default config file contents.
    pub fn default_config_contents() -> &'static str {
        include_str!("../config.example.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let c = Config::default();
        assert_eq!(c.request_timeout_secs, 60);
        assert_eq!(c.heartbeat_interval_secs, 60);
        assert_eq!(c.heartbeat_per_skill_timeout_secs, 15);
        assert_eq!(c.heartbeat_concurrency, 16);
        assert_eq!(c.pending_action_ttl_secs, 600);
        assert_eq!(c.registry_init_concurrency, 8);
        assert_eq!(c.update_build_timeout_secs, 600);
        assert_eq!(c.update_restart_timeout_secs, 120);
        assert_eq!(c.health_check_retries, 6);
        assert_eq!(c.health_check_delay_secs, 10);
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let config = Config::load(Some(Path::new("/nonexistent/path/config.toml"))).unwrap();
        assert_eq!(config.request_timeout_secs, 60);
    }

    #[test]
    fn env_override_applies() {
        // SAFETY: test runs single-threaded w.r.t. this env var via serial use below.
        unsafe {
            std::env::set_var("PROJECT_DIR", "/tmp/test-project");
        }
        let config = Config::load(Some(Path::new("/nonexistent/path/config.toml"))).unwrap();
        assert_eq!(config.update.project_dir, "/tmp/test-project");
        unsafe {
            std::env::remove_var("PROJECT_DIR");
        }
    }
}
