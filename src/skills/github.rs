//! Reference skill: a compact GitHub management skill backed by
//! in-memory fake repository state (§1 "Supplemented features" —
//! grounded on `skills/github/skill.py` in the reference platform, with
//! its real `GitHubClient` HTTP calls replaced by a `HashMap` so this
//! module introduces no external GitHub dependency). It exists purely
//! to exercise the core end to end: intent routing through declared
//! permissions, an `ASK` action (`create_issue`), an `ALWAYS_ASK`
//! action (`merge_pr`), and a heartbeat that notices stale issues.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::info;

use crate::autonomy::{ActionHandler, AutonomyEngine};
use crate::envelope::{ErrorKind, SkillRequest, SkillResponse};
use crate::permissions::{AutonomyConfig, AutonomyLevel, Permission, PermissionSet};
use crate::skill::{HeartbeatAction, IntentSpec, Skill, SkillMetadata, SkillState, SkillStatus};

const STALE_ISSUE_DAYS: i64 = 7;

#[derive(Debug, Clone)]
struct Issue {
    number: u64,
    title: String,
    open: bool,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct PullRequest {
    number: u64,
    title: String,
    merged: bool,
}

#[derive(Debug, Default)]
struct RepoState {
    issues: Vec<Issue>,
    prs: Vec<PullRequest>,
    next_issue_number: u64,
}

type Repos = Arc<RwLock<HashMap<String, RepoState>>>;

/// Fake-backed GitHub management skill. `token` only gates
/// `initialize()` — there is no real client behind it. Repository state
/// lives behind an `Arc` (rather than directly in `self`) so the
/// per-action closures handed to the autonomy engine — which must be
/// `'static` — can clone just the state they touch instead of needing
/// an `Arc<Self>`.
pub struct GitHubSkill {
    metadata: SkillMetadata,
    status: SkillStatus,
    token: Option<String>,
    default_repo: Option<String>,
    repos: Repos,
    autonomy: RwLock<AutonomyConfig>,
    autonomy_engine: Arc<AutonomyEngine>,
}

impl GitHubSkill {
    pub fn new(token: Option<String>, default_repo: Option<String>, autonomy_engine: Arc<AutonomyEngine>) -> Self {
        let mut autonomy = AutonomyConfig::new();
        autonomy.declare("create_issue", AutonomyLevel::Ask);
        autonomy.declare("close_issue", AutonomyLevel::Ask);
        // Merging is high-risk and cannot be downgraded (§3, §4.2).
        autonomy.declare("merge_pr", AutonomyLevel::AlwaysAsk);

        let intents = vec![
            IntentSpec::new("list_issues", PermissionSet::new([Permission::ReadProfile])),
            IntentSpec::new("create_issue", PermissionSet::new([Permission::WriteMemories])),
            IntentSpec::new("close_issue", PermissionSet::new([Permission::WriteMemories])),
            IntentSpec::new("list_prs", PermissionSet::new([Permission::ReadProfile])),
            IntentSpec::new("merge_pr", PermissionSet::new([Permission::WriteMemories])),
            IntentSpec::open("set_autonomy"),
            IntentSpec::open("get_autonomy"),
        ];

        Self {
            metadata: SkillMetadata {
                name: "github_management".to_string(),
                description: "Manage GitHub repositories via natural language".to_string(),
                version: "1.0.0".to_string(),
                permissions: PermissionSet::new([
                    Permission::ReadProfile,
                    Permission::WriteMemories,
                    Permission::SendMessages,
                ]),
                collections: vec!["skill_github_config".to_string(), "skill_github_audit".to_string()],
                intents,
            },
            status: SkillStatus::new(),
            token,
            default_repo,
            repos: Arc::new(RwLock::new(HashMap::new())),
            autonomy: RwLock::new(autonomy),
            autonomy_engine,
        }
    }

    /// Seed a repo with a pre-existing issue, useful for demos and for
    /// exercising the stale-issue heartbeat without waiting a week.
    pub async fn seed_issue(&self, repo: &str, title: &str, created_at: DateTime<Utc>) -> u64 {
        let mut repos = self.repos.write().await;
        let state = repos.entry(repo.to_string()).or_default();
        state.next_issue_number += 1;
        let number = state.next_issue_number;
        state.issues.push(Issue {
            number,
            title: title.to_string(),
            open: true,
            created_at,
        });
        number
    }

    /// Seed a repo with a pre-existing open PR.
    pub async fn seed_pr(&self, repo: &str, number: u64, title: &str) {
        let mut repos = self.repos.write().await;
        let state = repos.entry(repo.to_string()).or_default();
        state.prs.push(PullRequest {
            number,
            title: title.to_string(),
            merged: false,
        });
    }

    fn repo_key(&self, request: &SkillRequest) -> Option<String> {
        request
            .context
            .get("repository")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| self.default_repo.clone())
    }

    /// Resolve an autonomy-gated action: run it immediately if the
    /// action's current level is `Autonomous`, otherwise suspend it as a
    /// pending action and return the confirmation-required response
    /// (§4.2, §8 scenario S1).
    async fn resolve_autonomy(&self, action: &str, request: &SkillRequest, description: String, handler: ActionHandler) -> SkillResponse {
        let level = self.autonomy.read().await.level_for(action);
        if level == AutonomyLevel::Autonomous {
            return handler(request.clone()).await;
        }

        let id = self
            .autonomy_engine
            .propose(
                request.user_id.clone(),
                self.metadata.name.clone(),
                action,
                description.clone(),
                request.clone(),
                handler,
            )
            .await;

        SkillResponse::success(request.correlation_id)
            .with_message(format!("Action requires confirmation.\n{description}\nConfirm with action ID: {id}"))
            .with_data("pending_action_id", json!(id.to_string()))
            .with_data("requires_confirmation", json!(true))
    }

    async fn handle_list_issues(&self, request: SkillRequest) -> SkillResponse {
        let Some(repo) = self.repo_key(&request) else {
            return SkillResponse::failure(request.correlation_id, ErrorKind::InvalidArgument, "context.repository is required");
        };
        let repos = self.repos.read().await;
        let issues: Vec<_> = repos
            .get(&repo)
            .map(|s| s.issues.iter().filter(|i| i.open).map(|i| json!({"number": i.number, "title": i.title})).collect())
            .unwrap_or_default();
        SkillResponse::success(request.correlation_id)
            .with_message(format!("{} open issue(s) in {repo}", issues.len()))
            .with_data("issues", json!(issues))
    }

    async fn handle_create_issue(&self, request: SkillRequest) -> SkillResponse {
        let Some(repo) = self.repo_key(&request) else {
            return SkillResponse::failure(request.correlation_id, ErrorKind::InvalidArgument, "context.repository is required");
        };
        let Some(title) = request.context.get("title").and_then(|v| v.as_str()).map(str::to_string) else {
            return SkillResponse::failure(request.correlation_id, ErrorKind::InvalidArgument, "context.title is required");
        };

        let description = format!("Create issue '{title}' in {repo}");
        let repos = self.repos.clone();
        let handler: ActionHandler = Box::new(move |req: SkillRequest| {
            let repos = repos.clone();
            let repo = repo.clone();
            let title = title.clone();
            Box::pin(async move {
                let mut repos = repos.write().await;
                let state = repos.entry(repo.clone()).or_default();
                state.next_issue_number += 1;
                let number = state.next_issue_number;
                state.issues.push(Issue {
                    number,
                    title: title.clone(),
                    open: true,
                    created_at: Utc::now(),
                });
                SkillResponse::success(req.correlation_id)
                    .with_message(format!("created issue #{number} in {repo}: {title}"))
                    .with_data("issue_number", json!(number))
            })
        });

        self.resolve_autonomy("create_issue", &request, description, handler).await
    }

    async fn handle_close_issue(&self, request: SkillRequest) -> SkillResponse {
        let Some(repo) = self.repo_key(&request) else {
            return SkillResponse::failure(request.correlation_id, ErrorKind::InvalidArgument, "context.repository is required");
        };
        let Some(issue_number) = request.context.get("issue_number").and_then(|v| v.as_u64()) else {
            return SkillResponse::failure(request.correlation_id, ErrorKind::InvalidArgument, "context.issue_number is required");
        };

        let description = format!("Close issue #{issue_number} in {repo}");
        let repos = self.repos.clone();
        let handler: ActionHandler = Box::new(move |req: SkillRequest| {
            let repos = repos.clone();
            let repo = repo.clone();
            Box::pin(async move {
                let mut repos = repos.write().await;
                let Some(state) = repos.get_mut(&repo) else {
                    return SkillResponse::failure(req.correlation_id, ErrorKind::NotFound, format!("no such repo '{repo}'"));
                };
                let Some(issue) = state.issues.iter_mut().find(|i| i.number == issue_number) else {
                    return SkillResponse::failure(req.correlation_id, ErrorKind::NotFound, format!("no issue #{issue_number}"));
                };
                issue.open = false;
                SkillResponse::success(req.correlation_id).with_message(format!("closed issue #{issue_number}"))
            })
        });

        self.resolve_autonomy("close_issue", &request, description, handler).await
    }

    async fn handle_list_prs(&self, request: SkillRequest) -> SkillResponse {
        let Some(repo) = self.repo_key(&request) else {
            return SkillResponse::failure(request.correlation_id, ErrorKind::InvalidArgument, "context.repository is required");
        };
        let repos = self.repos.read().await;
        let prs: Vec<_> = repos
            .get(&repo)
            .map(|s| s.prs.iter().filter(|p| !p.merged).map(|p| json!({"number": p.number, "title": p.title})).collect())
            .unwrap_or_default();
        SkillResponse::success(request.correlation_id)
            .with_message(format!("{} open PR(s) in {repo}", prs.len()))
            .with_data("prs", json!(prs))
    }

    async fn handle_merge_pr(&self, request: SkillRequest) -> SkillResponse {
        let Some(repo) = self.repo_key(&request) else {
            return SkillResponse::failure(request.correlation_id, ErrorKind::InvalidArgument, "context.repository is required");
        };
        let Some(pr_number) = request.context.get("pr_number").and_then(|v| v.as_u64()) else {
            return SkillResponse::failure(request.correlation_id, ErrorKind::InvalidArgument, "context.pr_number is required");
        };

        let description = format!("Merge PR #{pr_number} in {repo}");
        let repos = self.repos.clone();
        let handler: ActionHandler = Box::new(move |req: SkillRequest| {
            let repos = repos.clone();
            let repo = repo.clone();
            Box::pin(async move {
                let mut repos = repos.write().await;
                let Some(state) = repos.get_mut(&repo) else {
                    return SkillResponse::failure(req.correlation_id, ErrorKind::NotFound, format!("no such repo '{repo}'"));
                };
                let Some(pr) = state.prs.iter_mut().find(|p| p.number == pr_number) else {
                    return SkillResponse::failure(req.correlation_id, ErrorKind::NotFound, format!("no PR #{pr_number}"));
                };
                pr.merged = true;
                SkillResponse::success(req.correlation_id).with_message(format!("merged PR #{pr_number}"))
            })
        });

        // merge_pr is declared ALWAYS_ASK at construction time and
        // `resolve_autonomy` reads the live level, so even if a caller
        // tried to reconfigure it, `set_level` would have refused (§4.2).
        self.resolve_autonomy("merge_pr", &request, description, handler).await
    }

    async fn handle_set_autonomy(&self, request: SkillRequest) -> SkillResponse {
        let Some(action) = request.context.get("action").and_then(|v| v.as_str()) else {
            return SkillResponse::failure(request.correlation_id, ErrorKind::InvalidArgument, "context.action is required");
        };
        let level = match request.context.get("level").and_then(|v| v.as_str()) {
            Some("autonomous") => AutonomyLevel::Autonomous,
            Some("ask") => AutonomyLevel::Ask,
            Some("always_ask") => AutonomyLevel::AlwaysAsk,
            _ => return SkillResponse::failure(request.correlation_id, ErrorKind::InvalidArgument, "context.level must be autonomous|ask|always_ask"),
        };
        let changed = self.autonomy.write().await.set_level(action, level);
        SkillResponse::success(request.correlation_id).with_data("changed", json!(changed))
    }

    async fn handle_get_autonomy(&self, request: SkillRequest) -> SkillResponse {
        let autonomy = self.autonomy.read().await;
        if let Some(action) = request.context.get("action").and_then(|v| v.as_str()) {
            return SkillResponse::success(request.correlation_id).with_data("level", json!(autonomy.level_for(action).as_str()));
        }
        let levels: HashMap<String, &'static str> = autonomy.to_map().into_iter().map(|(k, v)| (k, v.as_str())).collect();
        SkillResponse::success(request.correlation_id).with_data("levels", json!(levels))
    }
}

#[async_trait]
impl Skill for GitHubSkill {
    fn metadata(&self) -> &SkillMetadata {
        &self.metadata
    }

    fn status(&self) -> SkillState {
        self.status.get()
    }

    fn error_reason(&self) -> Option<String> {
        self.status.error_reason()
    }

    async fn initialize(&self) -> bool {
        if self.token.as_deref().unwrap_or("").is_empty() {
            self.status.set_error("no GitHub token provided");
            return false;
        }
        self.status.set(SkillState::Ready);
        info!(skill = %self.metadata.name, "github skill initialized");
        true
    }

    async fn handle(&self, request: SkillRequest) -> SkillResponse {
        match request.intent.as_str() {
            "list_issues" => self.handle_list_issues(request).await,
            "create_issue" => self.handle_create_issue(request).await,
            "close_issue" => self.handle_close_issue(request).await,
            "list_prs" => self.handle_list_prs(request).await,
            "merge_pr" => self.handle_merge_pr(request).await,
            "set_autonomy" => self.handle_set_autonomy(request).await,
            "get_autonomy" => self.handle_get_autonomy(request).await,
            other => SkillResponse::failure(request.correlation_id, ErrorKind::InvalidArgument, format!("unhandled intent '{other}'")),
        }
    }

    async fn on_heartbeat(&self, active_users: &[String]) -> Vec<HeartbeatAction> {
        if active_users.is_empty() {
            return Vec::new();
        }
        let now = Utc::now();
        let repos = self.repos.read().await;
        let mut actions = Vec::new();
        for (repo, state) in repos.iter() {
            for issue in state.issues.iter().filter(|i| i.open) {
                if now.signed_duration_since(issue.created_at) > chrono::Duration::days(STALE_ISSUE_DAYS) {
                    actions.push(HeartbeatAction {
                        skill_name: self.metadata.name.clone(),
                        user_id: active_users[0].clone(),
                        action_type: "stale_issue".to_string(),
                        data: HashMap::from([
                            ("repository".to_string(), json!(repo)),
                            ("issue_number".to_string(), json!(issue.number)),
                            ("title".to_string(), json!(issue.title)),
                        ]),
                        priority: 5,
                    });
                }
            }
        }
        actions
    }

    fn system_prompt_fragment(&self, _user_id: &str) -> Option<String> {
        if self.status() == SkillState::Ready {
            Some("[github_management: ready]".to_string())
        } else {
            None
        }
    }

    async fn cleanup(&self) {
        self.repos.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use super::*;
    use crate::events::EventBus;

    fn engine() -> Arc<AutonomyEngine> {
        Arc::new(AutonomyEngine::new(StdDuration::from_secs(600), StdDuration::from_secs(3600), Arc::new(EventBus::new(16))))
    }

    async fn ready_skill(default_repo: &str) -> GitHubSkill {
        let skill = GitHubSkill::new(Some("tok".to_string()), Some(default_repo.to_string()), engine());
        assert!(skill.initialize().await);
        skill
    }

    #[tokio::test]
    async fn missing_token_leaves_skill_in_error() {
        let skill = GitHubSkill::new(None, None, engine());
        assert!(!skill.initialize().await);
        assert_eq!(skill.status(), SkillState::Error);
        assert_eq!(skill.error_reason().as_deref(), Some("no GitHub token provided"));
    }

    #[tokio::test]
    async fn create_issue_requires_confirmation_and_is_not_yet_created() {
        let skill = ready_skill("acme/widgets").await;
        let req = SkillRequest::new("u1", "create_issue").with_context("title", json!("bug: crash on startup"));
        let resp = skill.handle(req).await;

        assert!(resp.success);
        assert_eq!(resp.data.get("requires_confirmation"), Some(&json!(true)));
        assert!(resp.data.get("pending_action_id").is_some());

        let list = skill.handle(SkillRequest::new("u1", "list_issues")).await;
        assert_eq!(list.data.get("issues"), Some(&json!([])));
    }

    #[tokio::test]
    async fn confirming_create_issue_executes_the_captured_handler() {
        let engine = engine();
        let skill = GitHubSkill::new(Some("tok".to_string()), Some("acme/widgets".to_string()), engine.clone());
        skill.initialize().await;

        let req = SkillRequest::new("u1", "create_issue").with_context("title", json!("bug: crash on startup"));
        let propose_resp = skill.handle(req).await;
        let id_str = propose_resp.data.get("pending_action_id").unwrap().as_str().unwrap();
        let id = uuid::Uuid::parse_str(id_str).unwrap();

        let confirm_resp = engine.confirm("u1", id).await;
        assert!(confirm_resp.success);
        assert_eq!(confirm_resp.data.get("issue_number"), Some(&json!(1)));

        let list = skill.handle(SkillRequest::new("u1", "list_issues")).await;
        assert_eq!(list.data.get("issues"), Some(&json!([{"number": 1, "title": "bug: crash on startup"}])));
    }

    #[tokio::test]
    async fn merge_pr_is_always_ask_and_cannot_be_downgraded() {
        let skill = ready_skill("acme/widgets").await;

        let set_resp = skill
            .handle(SkillRequest::new("u1", "set_autonomy").with_context("action", json!("merge_pr")).with_context("level", json!("autonomous")))
            .await;
        assert_eq!(set_resp.data.get("changed"), Some(&json!(false)));

        let get_resp = skill
            .handle(SkillRequest::new("u1", "get_autonomy").with_context("action", json!("merge_pr")))
            .await;
        assert_eq!(get_resp.data.get("level"), Some(&json!("always_ask")));
    }

    #[tokio::test]
    async fn autonomous_create_issue_executes_immediately() {
        let skill = ready_skill("acme/widgets").await;
        skill
            .handle(SkillRequest::new("u1", "set_autonomy").with_context("action", json!("create_issue")).with_context("level", json!("autonomous")))
            .await;

        let req = SkillRequest::new("u1", "create_issue").with_context("title", json!("auto-filed"));
        let resp = skill.handle(req).await;
        assert!(resp.data.get("requires_confirmation").is_none());
        assert_eq!(resp.data.get("issue_number"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn heartbeat_flags_stale_issues() {
        let skill = ready_skill("acme/widgets").await;
        skill.seed_issue("acme/widgets", "ancient bug", Utc::now() - chrono::Duration::days(30)).await;
        skill.seed_issue("acme/widgets", "fresh bug", Utc::now()).await;

        let actions = skill.on_heartbeat(&["u1".to_string()]).await;
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action_type, "stale_issue");
        assert_eq!(actions[0].data.get("title"), Some(&json!("ancient bug")));
    }

    #[tokio::test]
    async fn merge_pr_requires_confirmation() {
        let skill = ready_skill("acme/widgets").await;
        skill.seed_pr("acme/widgets", 42, "add feature").await;

        let resp = skill.handle(SkillRequest::new("u1", "merge_pr").with_context("pr_number", json!(42))).await;
        assert!(resp.data.get("requires_confirmation").is_some());

        let prs = skill.handle(SkillRequest::new("u1", "list_prs")).await;
        assert_eq!(prs.data.get("prs"), Some(&json!([{"number": 42, "title": "add feature"}])));
    }
}
