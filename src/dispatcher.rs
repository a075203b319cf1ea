//! Intent dispatcher (C5): routes a [`SkillRequest`] to whichever skill
//! declared its `intent`, enforces the per-request deadline, and turns a
//! handler panic into a `HANDLER_FAULT` response instead of taking the
//! whole process down.
//!
//! Two intents are reserved by the dispatcher itself rather than routed
//! to a skill: `__confirm` and `__cancel`, which resolve a pending action
//! through the autonomy engine (§4.5 step 5, §8 scenarios S2/S3). A
//! skill never sees these intents in its own `intents` declaration.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{error, warn};
use uuid::Uuid;

use crate::autonomy::AutonomyEngine;
use crate::envelope::{ErrorKind, SkillRequest, SkillResponse};
use crate::error::{CoreError, Result};
use crate::permissions::PermissionSet;
use crate::registry::SkillRegistry;
use crate::skill::SkillState;

pub const CONFIRM_INTENT: &str = "__confirm";
pub const CANCEL_INTENT: &str = "__cancel";

/// intent -> (owning skill, permissions a request must carry to invoke it).
type IntentIndex = HashMap<String, (String, PermissionSet)>;

/// Maps intents to the skill that owns them and enforces dispatch-wide
/// invariants (§4.5): exactly one skill per intent, requests only reach
/// `Ready` skills, and every request completes or times out.
pub struct Dispatcher {
    registry: Arc<SkillRegistry>,
    autonomy: Arc<AutonomyEngine>,
    /// intent -> (skill name, required permissions), rebuilt whenever the
    /// registry's skill set changes. Built eagerly so normal dispatch
    /// never re-scans all skills' metadata on the hot path.
    intent_index: RwLock<IntentIndex>,
    request_timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: Arc<SkillRegistry>, autonomy: Arc<AutonomyEngine>, request_timeout: Duration) -> Self {
        Self {
            registry,
            autonomy,
            intent_index: RwLock::new(HashMap::new()),
            request_timeout,
        }
    }

    /// Rebuild the intent -> skill index from the registry's current
    /// skill set. Call after registration changes (startup, hot reload).
    /// Two skills declaring the same intent is a configuration bug, not
    /// a runtime decision: this fails rather than picking a winner, and
    /// leaves the previous index in place so a bad hot-reload doesn't
    /// take dispatch down.
    pub async fn rebuild_index(&self) -> Result<()> {
        let skills = self.registry.all().await;
        let mut index = IntentIndex::new();
        for skill in &skills {
            let meta = skill.metadata();
            for intent in &meta.intents {
                let entry = (meta.name.clone(), intent.required_permissions.clone());
                if let Some((existing, _)) = index.insert(intent.name.clone(), entry) {
                    let message = format!(
                        "intent '{}' declared by both '{existing}' and '{}'",
                        intent.name, meta.name
                    );
                    error!(intent = %intent.name, existing_skill = %existing, new_skill = %meta.name, "fatal intent conflict");
                    return Err(CoreError::Registry(message));
                }
            }
        }
        *self.intent_index.write().await = index;
        Ok(())
    }

    /// Dispatch a request. Always returns a response — never panics,
    /// never propagates a handler panic past this call (§4.5, §7).
    pub async fn dispatch(&self, request: SkillRequest) -> SkillResponse {
        if request.intent == CONFIRM_INTENT || request.intent == CANCEL_INTENT {
            return self.dispatch_confirmation(request).await;
        }

        let correlation_id = request.correlation_id;

        let lookup = {
            let index = self.intent_index.read().await;
            index.get(&request.intent).cloned()
        };
        let Some((skill_name, required_permissions)) = lookup else {
            return SkillResponse::failure(
                correlation_id,
                ErrorKind::UnknownIntent,
                format!("no skill declares intent '{}'", request.intent),
            );
        };

        let Some(skill) = self.registry.get(&skill_name).await else {
            // Index and registry disagreed; treat as unavailable rather
            // than panicking on the stale lookup.
            return SkillResponse::failure(
                correlation_id,
                ErrorKind::SkillUnavailable,
                format!("skill '{skill_name}' is not registered"),
            );
        };

        match skill.status() {
            SkillState::Ready => {}
            SkillState::Initializing | SkillState::Uninitialized => {
                return SkillResponse::failure(
                    correlation_id,
                    ErrorKind::SkillStarting,
                    format!("skill '{skill_name}' is still starting"),
                );
            }
            SkillState::Error | SkillState::Shutdown => {
                return SkillResponse::failure(
                    correlation_id,
                    ErrorKind::SkillUnavailable,
                    format!("skill '{skill_name}' is unavailable"),
                );
            }
        }

        if !skill.metadata().permissions.is_superset_of(&required_permissions) {
            return SkillResponse::failure(
                correlation_id,
                ErrorKind::PermissionDenied,
                format!("skill '{skill_name}' does not declare the permissions intent '{}' requires", request.intent),
            );
        }

        let timeout = self.request_timeout;
        let handle = tokio::spawn(async move { skill.handle(request).await });

        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(response)) => response,
            Ok(Err(join_err)) => {
                error!(skill = %skill_name, error = %join_err, "skill handler panicked");
                SkillResponse::failure(
                    correlation_id,
                    ErrorKind::HandlerFault,
                    format!("skill '{skill_name}' handler failed unexpectedly"),
                )
            }
            Err(_) => {
                warn!(skill = %skill_name, "request timed out");
                SkillResponse::failure(
                    correlation_id,
                    ErrorKind::Timeout,
                    format!("skill '{skill_name}' did not respond in time"),
                )
            }
        }
    }

    /// Route a `__confirm`/`__cancel` request through the autonomy
    /// engine instead of a skill's `handle` (§4.5 step 5). The returned
    /// response always echoes *this* request's correlation id, not the
    /// original request's that proposed the pending action — each
    /// request processed gets exactly one matching response (§8
    /// universal invariant 1).
    async fn dispatch_confirmation(&self, request: SkillRequest) -> SkillResponse {
        let correlation_id = request.correlation_id;

        let action_id = match request
            .context
            .get("action_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
        {
            Some(id) => id,
            None => {
                return SkillResponse::failure(
                    correlation_id,
                    ErrorKind::InvalidArgument,
                    "context.action_id must be a valid pending action id",
                );
            }
        };

        let mut response = if request.intent == CONFIRM_INTENT {
            self.autonomy.confirm(&request.user_id, action_id).await
        } else {
            let cancelled = self.autonomy.reject(&request.user_id, action_id).await;
            if cancelled {
                SkillResponse::success(correlation_id).with_message("pending action cancelled")
            } else {
                SkillResponse::failure(correlation_id, ErrorKind::NotFound, "no such pending action")
            }
        };
        response.correlation_id = correlation_id;
        response
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::envelope::ErrorInfo;
    use crate::events::EventBus;
    use crate::permissions::{Permission, PermissionSet};
    use crate::skill::{HeartbeatAction, IntentSpec, Skill, SkillMetadata, SkillStatus};

    struct EchoSkill {
        metadata: SkillMetadata,
        status: SkillStatus,
        delay: Option<Duration>,
    }

    impl EchoSkill {
        fn ready(name: &str, intents: Vec<IntentSpec>) -> Self {
            let status = SkillStatus::new();
            status.set(SkillState::Ready);
            Self {
                metadata: SkillMetadata {
                    name: name.to_string(),
                    description: "echo".to_string(),
                    version: "0.0.1".to_string(),
                    permissions: PermissionSet::empty(),
                    collections: vec![],
                    intents,
                },
                status,
                delay: None,
            }
        }

        fn with_permissions(mut self, permissions: PermissionSet) -> Self {
            self.metadata.permissions = permissions;
            self
        }

        fn slow(name: &str, intents: Vec<IntentSpec>, delay: Duration) -> Self {
            let mut s = Self::ready(name, intents);
            s.delay = Some(delay);
            s
        }
    }

    #[async_trait]
    impl Skill for EchoSkill {
        fn metadata(&self) -> &SkillMetadata {
            &self.metadata
        }
        fn status(&self) -> SkillState {
            self.status.get()
        }
        fn error_reason(&self) -> Option<String> {
            None
        }
        async fn initialize(&self) -> bool {
            true
        }
        async fn handle(&self, request: SkillRequest) -> SkillResponse {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if request.intent == "panic_please" {
                panic!("boom");
            }
            SkillResponse::success(request.correlation_id).with_message("echoed")
        }
        async fn on_heartbeat(&self, _active_users: &[String]) -> Vec<HeartbeatAction> {
            vec![]
        }
    }

    fn autonomy() -> Arc<AutonomyEngine> {
        Arc::new(AutonomyEngine::new(
            Duration::from_secs(600),
            Duration::from_secs(3600),
            Arc::new(EventBus::new(16)),
        ))
    }

    async fn dispatcher_with(skill: EchoSkill) -> Dispatcher {
        let registry = Arc::new(SkillRegistry::new(4));
        registry.register(Arc::new(skill)).await.unwrap();
        let dispatcher = Dispatcher::new(registry, autonomy(), Duration::from_millis(200));
        dispatcher.rebuild_index().await.unwrap();
        dispatcher
    }

    #[tokio::test]
    async fn dispatches_to_declaring_skill() {
        let dispatcher = dispatcher_with(EchoSkill::ready("github", vec![IntentSpec::open("list_prs")])).await;
        let resp = dispatcher.dispatch(SkillRequest::new("u1", "list_prs")).await;
        assert!(resp.success);
        assert_eq!(resp.message.as_deref(), Some("echoed"));
    }

    #[tokio::test]
    async fn unknown_intent_fails_with_unknown_intent() {
        let dispatcher = dispatcher_with(EchoSkill::ready("github", vec![IntentSpec::open("list_prs")])).await;
        let resp = dispatcher.dispatch(SkillRequest::new("u1", "nonexistent")).await;
        assert!(!resp.success);
        assert_eq!(resp.error.unwrap().kind, ErrorKind::UnknownIntent);
    }

    #[tokio::test]
    async fn not_ready_skill_fails_with_skill_unavailable() {
        let registry = Arc::new(SkillRegistry::new(4));
        let skill = EchoSkill::ready("github", vec![IntentSpec::open("list_prs")]);
        skill.status.set(SkillState::Error);
        registry.register(Arc::new(skill)).await.unwrap();
        let dispatcher = Dispatcher::new(registry, autonomy(), Duration::from_millis(200));
        dispatcher.rebuild_index().await.unwrap();

        let resp = dispatcher.dispatch(SkillRequest::new("u1", "list_prs")).await;
        assert!(!resp.success);
        assert_eq!(resp.error.unwrap().kind, ErrorKind::SkillUnavailable);
    }

    #[tokio::test]
    async fn slow_handler_times_out() {
        let dispatcher =
            dispatcher_with(EchoSkill::slow("slow", vec![IntentSpec::open("wait")], Duration::from_millis(500))).await;
        let resp = dispatcher.dispatch(SkillRequest::new("u1", "wait")).await;
        assert!(!resp.success);
        assert_eq!(resp.error.unwrap().kind, ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn panicking_handler_becomes_handler_fault() {
        let dispatcher = dispatcher_with(EchoSkill::ready("github", vec![IntentSpec::open("panic_please")])).await;
        let resp = dispatcher.dispatch(SkillRequest::new("u1", "panic_please")).await;
        assert!(!resp.success);
        assert_eq!(resp.error.unwrap().kind, ErrorKind::HandlerFault);
    }

    #[tokio::test]
    async fn missing_permission_is_denied_without_invoking_handler() {
        let intent = IntentSpec::new("merge_pr", PermissionSet::new([Permission::SendMessages]));
        let skill = EchoSkill::ready("github", vec![intent]).with_permissions(PermissionSet::empty());
        let dispatcher = dispatcher_with(skill).await;

        let resp = dispatcher.dispatch(SkillRequest::new("u1", "merge_pr")).await;
        assert!(!resp.success);
        assert_eq!(
            resp.error,
            Some(ErrorInfo {
                kind: ErrorKind::PermissionDenied,
                message: resp.error.as_ref().unwrap().message.clone(),
            })
        );
    }

    #[tokio::test]
    async fn declared_permission_allows_dispatch() {
        let intent = IntentSpec::new("merge_pr", PermissionSet::new([Permission::SendMessages]));
        let skill = EchoSkill::ready("github", vec![intent]).with_permissions(PermissionSet::new([Permission::SendMessages]));
        let dispatcher = dispatcher_with(skill).await;

        let resp = dispatcher.dispatch(SkillRequest::new("u1", "merge_pr")).await;
        assert!(resp.success);
    }

    #[tokio::test]
    async fn confirm_with_unknown_action_id_is_not_found() {
        let dispatcher = dispatcher_with(EchoSkill::ready("github", vec![])).await;
        let req = SkillRequest::new("u1", CONFIRM_INTENT).with_context("action_id", serde_json::json!(Uuid::new_v4().to_string()));
        let correlation_id = req.correlation_id;
        let resp = dispatcher.dispatch(req).await;
        assert!(!resp.success);
        assert_eq!(resp.correlation_id, correlation_id);
        assert_eq!(resp.error.unwrap().kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn conflicting_intent_declarations_fail_startup() {
        let registry = Arc::new(SkillRegistry::new(4));
        registry
            .register(Arc::new(EchoSkill::ready("a", vec![IntentSpec::open("do_thing")])))
            .await
            .unwrap();
        registry
            .register(Arc::new(EchoSkill::ready("b", vec![IntentSpec::open("do_thing")])))
            .await
            .unwrap();
        let dispatcher = Dispatcher::new(registry, autonomy(), Duration::from_millis(200));

        assert!(dispatcher.rebuild_index().await.is_err());
    }

    #[tokio::test]
    async fn confirm_missing_action_id_is_invalid_argument() {
        let dispatcher = dispatcher_with(EchoSkill::ready("github", vec![])).await;
        let resp = dispatcher.dispatch(SkillRequest::new("u1", CONFIRM_INTENT)).await;
        assert!(!resp.success);
        assert_eq!(resp.error.unwrap().kind, ErrorKind::InvalidArgument);
    }
}
