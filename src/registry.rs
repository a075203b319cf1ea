//! Skill registry (C4): owns every configured skill, drives bounded-
//! concurrency startup initialization, and is the lookup table the
//! dispatcher and heartbeat scheduler both read from.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{RwLock, Semaphore};
use tracing::{error, info, warn};

use crate::error::{CoreError, Result};
use crate::skill::{Skill, SkillState};

/// Registry of all skills known to this process. Skills are inserted once
/// at startup (or via [`register`](Self::register) for tests) and then
/// looked up by name for the lifetime of the process.
pub struct SkillRegistry {
    skills: RwLock<HashMap<String, Arc<dyn Skill>>>,
    /// Bounds concurrent `initialize()` calls (§4.4).
    init_concurrency: usize,
}

impl SkillRegistry {
    pub fn new(init_concurrency: usize) -> Self {
        Self {
            skills: RwLock::new(HashMap::new()),
            init_concurrency: init_concurrency.max(1),
        }
    }

    /// Register a skill. Fails if a skill with the same name is already
    /// registered — unlike the teacher's tool registry this returns an
    /// error rather than panicking, since skill registration can happen
    /// after process start (e.g. a hot-reloaded plugin).
    pub async fn register(&self, skill: Arc<dyn Skill>) -> Result<()> {
        let name = skill.metadata().name.clone();
        let mut skills = self.skills.write().await;
        if skills.contains_key(&name) {
            return Err(CoreError::Registry(format!("skill '{name}' already registered")));
        }
        skills.insert(name, skill);
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Skill>> {
        self.skills.read().await.get(name).cloned()
    }

    pub async fn names(&self) -> Vec<String> {
        self.skills.read().await.keys().cloned().collect()
    }

    /// Name of the skill that declared `collection`, if any (§4.4's
    /// declared-collection index). Unlike the intent index this is
    /// advisory, not exclusivity-checked at startup — nothing in the
    /// spec requires collection names to be unique across skills, only
    /// that a lookup can find whichever skill owns one.
    pub async fn skill_for_collection(&self, collection: &str) -> Option<String> {
        self.skills
            .read()
            .await
            .values()
            .find(|s| s.metadata().collections.iter().any(|c| c == collection))
            .map(|s| s.metadata().name.clone())
    }

    /// All skills currently in `Ready` state.
    pub async fn ready_skills(&self) -> Vec<Arc<dyn Skill>> {
        self.skills
            .read()
            .await
            .values()
            .filter(|s| s.status() == SkillState::Ready)
            .cloned()
            .collect()
    }

    pub async fn all(&self) -> Vec<Arc<dyn Skill>> {
        self.skills.read().await.values().cloned().collect()
    }

    /// Initialize every registered skill concurrently, bounded by
    /// `init_concurrency` in-flight `initialize()` calls at a time (§4.4).
    /// A skill whose `initialize()` returns `false` is left in `Error`
    /// and does not block the rest of the registry from starting.
    pub async fn initialize_all(&self) {
        let skills = self.all().await;
        let semaphore = Arc::new(Semaphore::new(self.init_concurrency));
        let mut tasks = FuturesUnordered::new();

        for skill in skills {
            let semaphore = semaphore.clone();
            tasks.push(async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                let name = skill.metadata().name.clone();
                let ok = skill.initialize().await;
                (name, ok)
            });
        }

        while let Some((name, ok)) = tasks.next().await {
            if ok {
                info!(skill = %name, "skill initialized");
            } else {
                warn!(skill = %name, "skill failed to initialize, left in ERROR");
            }
        }
    }

    /// Run `cleanup()` on every skill, best-effort, on process shutdown.
    pub async fn shutdown_all(&self) {
        let skills = self.all().await;
        for skill in skills {
            let name = skill.metadata().name.clone();
            skill.cleanup().await;
            info!(skill = %name, "skill cleaned up");
        }
    }

    /// Attempt to re-initialize a single skill currently in `Error`.
    /// Used by an operator-triggered recovery path; a no-op for skills
    /// that are not currently in `Error`.
    pub async fn reinitialize(&self, name: &str) -> Result<bool> {
        let skill = self
            .get(name)
            .await
            .ok_or_else(|| CoreError::Registry(format!("unknown skill '{name}'")))?;
        if skill.status() != SkillState::Error {
            return Ok(false);
        }
        let ok = skill.initialize().await;
        if !ok {
            error!(skill = %name, "re-initialization failed");
        }
        Ok(ok)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::envelope::{SkillRequest, SkillResponse};
    use crate::permissions::PermissionSet;
    use crate::skill::{HeartbeatAction, SkillMetadata, SkillStatus};

    struct StubSkill {
        metadata: SkillMetadata,
        status: SkillStatus,
        should_fail_init: bool,
        init_calls: AtomicUsize,
    }

    impl StubSkill {
        fn new(name: &str, should_fail_init: bool) -> Self {
            Self {
                metadata: SkillMetadata {
                    name: name.to_string(),
                    description: "stub".to_string(),
                    version: "0.0.1".to_string(),
                    permissions: PermissionSet::empty(),
                    collections: vec![],
                    intents: vec![],
                },
                status: SkillStatus::new(),
                should_fail_init,
                init_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Skill for StubSkill {
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
            self.init_calls.fetch_add(1, Ordering::SeqCst);
            if self.should_fail_init {
                self.status.set_error("stub failure");
                false
            } else {
                self.status.set(SkillState::Ready);
                true
            }
        }

        async fn handle(&self, request: SkillRequest) -> SkillResponse {
            SkillResponse::success(request.correlation_id)
        }

        async fn on_heartbeat(&self, _active_users: &[String]) -> Vec<HeartbeatAction> {
            vec![]
        }
    }

    #[tokio::test]
    async fn register_rejects_duplicate_names() {
        let registry = SkillRegistry::new(4);
        registry.register(Arc::new(StubSkill::new("a", false))).await.unwrap();
        let err = registry.register(Arc::new(StubSkill::new("a", false))).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn initialize_all_marks_ready_and_error_independently() {
        let registry = SkillRegistry::new(2);
        registry.register(Arc::new(StubSkill::new("good", false))).await.unwrap();
        registry.register(Arc::new(StubSkill::new("bad", true))).await.unwrap();

        registry.initialize_all().await;

        let good = registry.get("good").await.unwrap();
        let bad = registry.get("bad").await.unwrap();
        assert_eq!(good.status(), SkillState::Ready);
        assert_eq!(bad.status(), SkillState::Error);
        assert_eq!(bad.error_reason().as_deref(), Some("stub failure"));

        let ready = registry.ready_skills().await;
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].metadata().name, "good");
    }

    #[tokio::test]
    async fn skill_for_collection_finds_the_declaring_skill() {
        let registry = SkillRegistry::new(4);
        let mut stub = StubSkill::new("github", false);
        stub.metadata.collections.push("skill_github_config".to_string());
        registry.register(Arc::new(stub)).await.unwrap();

        assert_eq!(registry.skill_for_collection("skill_github_config").await.as_deref(), Some("github"));
        assert_eq!(registry.skill_for_collection("no_such_collection").await, None);
    }

    #[tokio::test]
    async fn reinitialize_only_acts_on_errored_skills() {
        let registry = SkillRegistry::new(2);
        registry.register(Arc::new(StubSkill::new("good", false))).await.unwrap();
        registry.initialize_all().await;

        // Not in ERROR, so reinitialize is a no-op.
        let did = registry.reinitialize("good").await.unwrap();
        assert!(!did);
    }
}
