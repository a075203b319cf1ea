//! Self-update executor (C8): applies a new release by fetching a git
//! tag, rebuilding containers, and restarting services one at a time
//! with a health check after each — rolling back to the previous
//! revision on any failure. Ported from the reference sidecar's
//! `executor.py`, one in-flight operation at a time via a single mutex.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::UpdateConfig;
use crate::error::{CoreError, Result};
use crate::events::{Event, EventBus};
use crate::update::health::{check_service_health, parse_health_urls, HealthCheckConfig};
use crate::update::store::{DurableStore, HistoryRing, UpdateRecord, UpdateStatus};

/// Current executor activity. Read by the sidecar's `/status` route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorState {
    Idle,
    Applying,
    RollingBack,
}

/// Distinct from [`CoreError`] so the sidecar's HTTP layer can map a
/// concurrent-operation attempt to `409 Conflict` instead of `500`.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("an update operation is already in progress")]
    Busy,
    #[error(transparent)]
    Core(#[from] CoreError),
}

pub struct UpdateExecutor {
    project_dir: String,
    compose_file: String,
    services: Vec<String>,
    health_urls: HashMap<String, String>,
    build_timeout: Duration,
    restart_timeout: Duration,
    health_config: HealthCheckConfig,
    state: Mutex<ExecutorState>,
    current_operation: Mutex<Option<String>>,
    process_started_at: std::time::Instant,
    history: HistoryRing,
    durable: Option<DurableStore>,
    events: Arc<EventBus>,
    http: reqwest::Client,
}

/// Outcome of walking the restart-plan for every configured service: the
/// ordered steps completed, and, on the first failure, the step name and
/// error that stopped the plan.
struct PlanOutcome {
    steps: Vec<String>,
    failure: Option<(String, String)>,
}

impl UpdateExecutor {
    pub fn new(
        config: &UpdateConfig,
        build_timeout: Duration,
        restart_timeout: Duration,
        health_config: HealthCheckConfig,
        durable: Option<DurableStore>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            project_dir: config.project_dir.clone(),
            compose_file: config.compose_file.clone(),
            services: config.services.clone(),
            health_urls: parse_health_urls(&config.health_urls, &config.services),
            build_timeout,
            restart_timeout,
            health_config,
            state: Mutex::new(ExecutorState::Idle),
            current_operation: Mutex::new(None),
            process_started_at: std::time::Instant::now(),
            history: HistoryRing::default(),
            durable,
            events,
            http: reqwest::Client::new(),
        }
    }

    pub fn state(&self) -> ExecutorState {
        self.state.try_lock().map(|g| *g).unwrap_or(ExecutorState::Applying)
    }

    /// Human-readable description of the in-flight operation, or `None`
    /// while idle. Read by the sidecar's `/status` route.
    pub fn current_operation(&self) -> Option<String> {
        self.current_operation.try_lock().ok().and_then(|g| g.clone())
    }

    /// Seconds since this executor was constructed, for `/status`'s
    /// `uptime_seconds` field.
    pub fn uptime_seconds(&self) -> u64 {
        self.process_started_at.elapsed().as_secs()
    }

    pub fn history(&self) -> Vec<UpdateRecord> {
        self.history.all()
    }

    pub fn last_result(&self) -> Option<UpdateRecord> {
        self.history.last()
    }

    /// Fetch `tag`, rebuild, and restart every configured service in
    /// order, rolling back automatically on any failure (§4.8).
    pub async fn apply_update(&self, tag: &str, version: Option<&str>) -> std::result::Result<UpdateRecord, ExecutorError> {
        let mut guard = self.state.try_lock().map_err(|_| ExecutorError::Busy)?;
        *guard = ExecutorState::Applying;
        drop(guard);
        *self.current_operation.lock().await = Some(format!("apply {tag}"));

        self.events.publish(Event::UpdateStarted { target_ref: tag.to_string() });

        let started_at = Utc::now();
        let record = self.do_apply(tag, version, started_at).await;

        *self.state.lock().await = ExecutorState::Idle;
        *self.current_operation.lock().await = None;
        self.record(&record);

        match record.status {
            UpdateStatus::Success => {
                self.events.publish(Event::UpdateSucceeded { target_ref: tag.to_string() });
            }
            UpdateStatus::RolledBack => {
                self.events.publish(Event::UpdateRolledBack {
                    from_ref: tag.to_string(),
                    to_sha: record.previous_sha.clone().unwrap_or_default(),
                });
            }
            UpdateStatus::Failed => {
                self.events.publish(Event::UpdateFailed {
                    target_ref: tag.to_string(),
                    reason: record.error.clone().unwrap_or_default(),
                });
            }
        }

        Ok(record)
    }

    async fn do_apply(&self, tag: &str, version: Option<&str>, started_at: chrono::DateTime<Utc>) -> UpdateRecord {
        let id = Uuid::new_v4();
        let version = version.map(str::to_string);

        let prev_sha = match self.run_git(&["rev-parse", "HEAD"]).await {
            Ok(sha) => sha.trim().to_string(),
            Err(e) => {
                return UpdateRecord {
                    id,
                    action: "apply".to_string(),
                    target_ref: tag.to_string(),
                    version,
                    previous_sha: None,
                    new_sha: None,
                    steps_completed: Vec::new(),
                    status: UpdateStatus::Failed,
                    error: Some(format!("could not determine current revision: {e}")),
                    started_at,
                    finished_at: Utc::now(),
                };
            }
        };

        let mut steps = Vec::new();

        if let Err(e) = self.run_git(&["fetch", "origin", "tag", tag, "--force"]).await {
            return self
                .rolled_back_or_failed_record(id, tag, version, Some(prev_sha.clone()), steps, started_at, "git_fetch", format!("{e}"), &prev_sha)
                .await;
        }
        steps.push("git_fetch".to_string());

        if let Err(e) = self.run_git(&["checkout", tag]).await {
            return self
                .rolled_back_or_failed_record(id, tag, version, Some(prev_sha.clone()), steps, started_at, "git_checkout", format!("{e}"), &prev_sha)
                .await;
        }
        steps.push("git_checkout".to_string());

        if let Err(e) = self.build().await {
            return self
                .rolled_back_or_failed_record(id, tag, version, Some(prev_sha.clone()), steps, started_at, "docker_build", format!("{e}"), &prev_sha)
                .await;
        }
        steps.push("docker_build".to_string());

        let outcome = self.run_restart_plan().await;
        steps.extend(outcome.steps);

        if let Some((step, error)) = outcome.failure {
            return self
                .rolled_back_or_failed_record(id, tag, version, Some(prev_sha.clone()), steps, started_at, &step, error, &prev_sha)
                .await;
        }

        let new_sha = self.run_git(&["rev-parse", "HEAD"]).await.ok().map(|s| s.trim().to_string());

        UpdateRecord {
            id,
            action: "apply".to_string(),
            target_ref: tag.to_string(),
            version,
            previous_sha: Some(prev_sha),
            new_sha,
            steps_completed: steps,
            status: UpdateStatus::Success,
            error: None,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Walk the restart plan (`restart_<service>` then, if a health URL
    /// is configured, `health_<service>`) for every configured service
    /// in order, stopping at the first failure (§4.8 step 4).
    async fn run_restart_plan(&self) -> PlanOutcome {
        let mut steps = Vec::new();
        for service in &self.services {
            if let Err(e) = self.restart(service).await {
                return PlanOutcome {
                    steps,
                    failure: Some((format!("restart_{service}"), e.to_string())),
                };
            }
            steps.push(format!("restart_{service}"));

            if let Some(url) = self.health_urls.get(service).cloned() {
                let healthy = check_service_health(&self.http, service, &url, &self.health_config).await;
                if !healthy {
                    return PlanOutcome {
                        steps,
                        failure: Some((format!("health_{service}"), format!("Health check failed for {service}"))),
                    };
                }
                steps.push(format!("health_{service}"));
            } else {
                info!(service = %service, "no health url configured, skipping check");
            }
        }
        PlanOutcome { steps, failure: None }
    }

    /// Build the failure record for a forward-apply step that failed at
    /// `failed_step`, attempting an automatic rollback to `prev_sha`
    /// first. §4.8: a rollback that itself succeeds yields `ROLLED_BACK`;
    /// a rollback that fails leaves the result `FAILED` and the system in
    /// an operator-attention state (logged prominently).
    #[allow(clippy::too_many_arguments)]
    async fn rolled_back_or_failed_record(
        &self,
        id: Uuid,
        tag: &str,
        version: Option<String>,
        previous_sha: Option<String>,
        steps_completed: Vec<String>,
        started_at: chrono::DateTime<Utc>,
        failed_step: &str,
        failure_reason: String,
        prev_sha: &str,
    ) -> UpdateRecord {
        warn!(step = %failed_step, error = %failure_reason, "update step failed, attempting automatic rollback");
        let rollback_ok = self.rollback_to(prev_sha).await;

        let (status, error) = if rollback_ok {
            (UpdateStatus::RolledBack, failure_reason)
        } else {
            error!(
                tag = %tag,
                failed_step = %failed_step,
                "rollback itself failed; system left in an operator-attention state"
            );
            (UpdateStatus::Failed, format!("{failure_reason} (automatic rollback also failed)"))
        };

        UpdateRecord {
            id,
            action: "apply".to_string(),
            target_ref: tag.to_string(),
            version,
            previous_sha,
            new_sha: None,
            steps_completed,
            status,
            error: Some(error),
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Explicitly roll back to a previous sha (operator-triggered, not
    /// the automatic in-`apply` rollback). `POST /update/rollback`.
    pub async fn rollback(&self, previous_sha: &str) -> std::result::Result<UpdateRecord, ExecutorError> {
        let mut guard = self.state.try_lock().map_err(|_| ExecutorError::Busy)?;
        *guard = ExecutorState::RollingBack;
        drop(guard);
        *self.current_operation.lock().await = Some(format!("rollback {previous_sha}"));

        let started_at = Utc::now();
        let id = Uuid::new_v4();
        let ok = self.rollback_to(previous_sha).await;
        let new_sha = self.run_git(&["rev-parse", "HEAD"]).await.ok().map(|s| s.trim().to_string());

        let record = UpdateRecord {
            id,
            action: "rollback".to_string(),
            target_ref: previous_sha.to_string(),
            version: None,
            previous_sha: None,
            new_sha,
            steps_completed: Vec::new(),
            status: if ok { UpdateStatus::RolledBack } else { UpdateStatus::Failed },
            error: if ok { None } else { Some(format!("rollback to {previous_sha} failed")) },
            started_at,
            finished_at: Utc::now(),
        };

        *self.state.lock().await = ExecutorState::Idle;
        *self.current_operation.lock().await = None;
        self.record(&record);

        if ok {
            self.events.publish(Event::UpdateRolledBack {
                from_ref: "operator-requested".to_string(),
                to_sha: previous_sha.to_string(),
            });
        }

        Ok(record)
    }

    fn record(&self, record: &UpdateRecord) {
        self.history.push(record.clone());
        if let Some(durable) = &self.durable {
            if let Err(e) = durable.append(record) {
                warn!(error = %e, "failed to persist update record to durable store");
            }
        }
    }

    /// Check out `target_sha`, rebuild, and restart every configured
    /// service, health-checking each. Returns whether the system was
    /// successfully brought back up (§4.8's rollback sequence).
    async fn rollback_to(&self, target_sha: &str) -> bool {
        if let Err(e) = self.run_git(&["checkout", target_sha]).await {
            error!(target_sha = %target_sha, error = %e, "rollback checkout failed");
            return false;
        }
        if let Err(e) = self.build().await {
            error!(target_sha = %target_sha, error = %e, "rollback build failed");
            return false;
        }
        for service in &self.services {
            if let Err(e) = self.restart(service).await {
                error!(service = %service, error = %e, "rollback restart failed");
                return false;
            }
            if let Some(url) = self.health_urls.get(service).cloned() {
                if !check_service_health(&self.http, service, &url, &self.health_config).await {
                    error!(service = %service, "rollback health check failed");
                    return false;
                }
            }
        }
        true
    }

    async fn build(&self) -> Result<()> {
        self.run_cmd(
            "docker",
            &["compose", "-f", &self.compose_file, "build"],
            self.build_timeout,
        )
        .await
        .map(|_| ())
    }

    async fn restart(&self, service: &str) -> Result<()> {
        self.run_cmd(
            "docker",
            &["compose", "-f", &self.compose_file, "restart", service],
            self.restart_timeout,
        )
        .await
        .map(|_| ())
    }

    async fn run_git(&self, args: &[&str]) -> Result<String> {
        self.run_cmd("git", args, Duration::from_secs(30)).await
    }

    async fn run_cmd(&self, program: &str, args: &[&str], timeout: Duration) -> Result<String> {
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&self.project_dir);

        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| CoreError::Update(format!("command '{program} {}' timed out", args.join(" "))))?
            .map_err(CoreError::Io)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CoreError::Update(format!(
                "command '{program} {}' exited with {}: {stderr}",
                args.join(" "),
                output.status
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Current git sha, ref, cleanliness, container status, and disk
    /// usage for the sidecar's `/diagnostics` route.
    pub async fn diagnostics(&self) -> Diagnostics {
        let git_sha = self.run_git(&["rev-parse", "HEAD"]).await.unwrap_or_default().trim().to_string();
        let git_ref = self
            .run_git(&["rev-parse", "--abbrev-ref", "HEAD"])
            .await
            .unwrap_or_default()
            .trim()
            .to_string();
        let status_output = self.run_git(&["status", "--porcelain"]).await.unwrap_or_default();
        let git_clean = status_output.trim().is_empty();
        let containers_raw = self
            .run_cmd("docker", &["compose", "-f", &self.compose_file, "ps"], Duration::from_secs(30))
            .await
            .unwrap_or_default();
        let disk_usage = self
            .run_cmd("df", &["-h", &self.project_dir], Duration::from_secs(10))
            .await
            .unwrap_or_default();

        Diagnostics {
            git_sha,
            git_ref,
            git_clean,
            containers_raw,
            disk_usage,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Diagnostics {
    pub git_sha: String,
    pub git_ref: String,
    pub git_clean: bool,
    pub containers_raw: String,
    pub disk_usage: String,
}
