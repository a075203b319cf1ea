//! Skill contract and lifecycle (C3): the platform's one polymorphism
//! point. Metadata is read-only after construction; status is an
//! observable state machine; the four lifecycle hooks are the only
//! methods the rest of the core relies on.

use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::envelope::{SkillRequest, SkillResponse};
use crate::permissions::PermissionSet;

/// A single intent a skill declares, paired with the permissions a
/// request must carry for the skill to be allowed to handle it (§4.2).
/// Keeping the requirement on the intent rather than the whole skill
/// lets one skill expose both low- and high-privilege operations
/// without over-declaring permissions for its safe intents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentSpec {
    pub name: String,
    #[serde(default)]
    pub required_permissions: PermissionSet,
}

impl IntentSpec {
    pub fn new(name: impl Into<String>, required_permissions: PermissionSet) -> Self {
        Self {
            name: name.into(),
            required_permissions,
        }
    }

    /// An intent that needs no particular capability to invoke.
    pub fn open(name: impl Into<String>) -> Self {
        Self::new(name, PermissionSet::empty())
    }
}

/// Static, read-only-after-construction description of a skill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillMetadata {
    pub name: String,
    pub description: String,
    pub version: String,
    pub permissions: PermissionSet,
    pub collections: Vec<String>,
    pub intents: Vec<IntentSpec>,
}

impl SkillMetadata {
    pub fn intent_names(&self) -> impl Iterator<Item = &str> {
        self.intents.iter().map(|i| i.name.as_str())
    }
}

/// A proactive, user-addressed action produced by [`Skill::on_heartbeat`].
/// Immutable value (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatAction {
    pub skill_name: String,
    pub user_id: String,
    pub action_type: String,
    #[serde(default)]
    pub data: std::collections::HashMap<String, serde_json::Value>,
    /// 1 = highest priority, 10 = lowest.
    pub priority: u8,
}

/// The skill status state machine (§3):
/// `Uninitialized -> Initializing -> Ready <-> Error -> Shutdown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkillState {
    Uninitialized,
    Initializing,
    Ready,
    Error,
    Shutdown,
}

/// Observable, shared status cell. A skill implementation owns one of
/// these and transitions it from within `initialize`/`handle`/etc; the
/// registry, dispatcher, and scheduler only ever read it.
#[derive(Debug, Default)]
pub struct SkillStatus {
    inner: RwLock<StatusInner>,
}

#[derive(Debug, Clone)]
struct StatusInner {
    state: SkillState,
    /// Short reason retained across a transition into `Error` (§3).
    error_reason: Option<String>,
}

impl Default for StatusInner {
    fn default() -> Self {
        Self {
            state: SkillState::Uninitialized,
            error_reason: None,
        }
    }
}

impl SkillStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> SkillState {
        self.inner.read().expect("status lock poisoned").state
    }

    pub fn error_reason(&self) -> Option<String> {
        self.inner.read().expect("status lock poisoned").error_reason.clone()
    }

    pub fn set(&self, state: SkillState) {
        let mut inner = self.inner.write().expect("status lock poisoned");
        if state != SkillState::Error {
            inner.error_reason = None;
        }
        inner.state = state;
    }

    /// Transition to `Error`, retaining a short reason (§3). Re-init from
    /// `Error` is permitted — callers simply call `set(Ready)`/`set(Error)`
    /// again after a fresh `initialize()`.
    pub fn set_error(&self, reason: impl Into<String>) {
        let mut inner = self.inner.write().expect("status lock poisoned");
        inner.state = SkillState::Error;
        inner.error_reason = Some(reason.into());
    }

    pub fn is_ready(&self) -> bool {
        self.get() == SkillState::Ready
    }
}

/// The Skill contract (§3, §4.3). Implementations own a [`SkillStatus`]
/// and transition it themselves; the core never mutates it directly.
#[async_trait]
pub trait Skill: Send + Sync {
    /// Static metadata. Must not change after construction.
    fn metadata(&self) -> &SkillMetadata;

    /// Current lifecycle state.
    fn status(&self) -> SkillState;

    /// Last error reason, if the skill is currently in `Error`.
    fn error_reason(&self) -> Option<String>;

    /// Perform any I/O needed to become ready. Must be idempotent if
    /// called again after `Error`. Must leave status at `Ready` or
    /// `Error` before returning.
    async fn initialize(&self) -> bool;

    /// Handle one request. Only called while `status() == Ready`. Must
    /// not block indefinitely — implementations that need to wait on
    /// human confirmation suspend via the autonomy engine and return.
    async fn handle(&self, request: SkillRequest) -> SkillResponse;

    /// Called once per heartbeat tick while `status() == Ready`. Must
    /// complete within the scheduler's per-skill timeout; must not
    /// mutate state that `handle` concurrently reads without its own
    /// synchronisation.
    async fn on_heartbeat(&self, active_users: &[String]) -> Vec<HeartbeatAction>;

    /// Pure, no-I/O fragment to splice into an agent's system prompt.
    fn system_prompt_fragment(&self, _user_id: &str) -> Option<String> {
        None
    }

    /// Release I/O resources. Called once on registry shutdown.
    async fn cleanup(&self) {}
}
