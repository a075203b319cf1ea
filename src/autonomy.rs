//! Autonomy / confirmation engine (C7): the per-user table of actions
//! that are waiting on human confirmation before they run, plus the
//! background sweeper that expires stale ones.
//!
//! A captured action is modelled as a typed closure rather than a
//! stringly-typed method name plus kwargs bag — the closure is
//! constructed by the skill at `check_autonomy` time and owns whatever
//! it needs to actually perform the action later, so the core never has
//! to know what a given action *does*, only that it can be run once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio::sync::{watch, RwLock};
use tokio::time::interval;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::AuditLog;
use crate::envelope::{ErrorKind, SkillRequest, SkillResponse};
use crate::events::{Event, EventBus};

/// Runs exactly once: executes the captured side effect and produces
/// the response that would have been returned had the original request
/// not needed confirmation.
pub type ActionHandler = Box<dyn FnOnce(SkillRequest) -> BoxFuture<'static, SkillResponse> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingStatus {
    Waiting,
    Approved,
    Rejected,
    Expired,
}

/// A side-effectful action a skill wants to run once a user confirms it.
pub struct PendingAction {
    pub id: Uuid,
    pub user_id: String,
    pub skill_name: String,
    pub action_type: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: PendingStatus,
    /// The original request, replayed into `handler` on confirmation.
    pub original_request: SkillRequest,
    /// Taken on confirmation; `None` after the action has been resolved
    /// one way or another.
    handler: Option<ActionHandler>,
}

impl std::fmt::Debug for PendingAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingAction")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("skill_name", &self.skill_name)
            .field("action_type", &self.action_type)
            .field("status", &self.status)
            .finish()
    }
}

/// Per-user table of pending actions, keyed by action id (§3, §4.7).
/// Pending actions are in-memory only and do not survive a process
/// restart — on restart, any action a user had not yet confirmed simply
/// no longer exists and must be re-proposed on the next matching intent.
pub struct AutonomyEngine {
    /// user_id -> (action_id -> action). The outer map is one lock;
    /// actions belonging to different users only contend when the outer
    /// map itself is being resized, which is rare next to request volume.
    actions: RwLock<HashMap<String, HashMap<Uuid, PendingAction>>>,
    ttl: Duration,
    retention: Duration,
    events: Arc<EventBus>,
    /// Optional append-only trail of confirm/cancel decisions (§6). Absent
    /// by default — callers that want an audit trail opt in via
    /// [`with_audit`](Self::with_audit) at construction time.
    audit: Option<Arc<AuditLog>>,
}

impl AutonomyEngine {
    pub fn new(ttl: Duration, retention: Duration, events: Arc<EventBus>) -> Self {
        Self {
            actions: RwLock::new(HashMap::new()),
            ttl,
            retention,
            events,
            audit: None,
        }
    }

    /// Attach an audit log: every confirm/cancel decision is recorded
    /// against the deciding user before its response is returned.
    pub fn with_audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    fn audit_record(&self, action: &str, user_id: &str) {
        if let Some(audit) = &self.audit {
            if let Err(e) = audit.record(action, user_id, user_id) {
                warn!(error = %e, "failed to write audit log entry");
            }
        }
    }

    /// Propose a new pending action, returning its id. Called by a skill
    /// when `AutonomyLevel` requires confirmation (§4.2, §4.7).
    pub async fn propose(
        &self,
        user_id: impl Into<String>,
        skill_name: impl Into<String>,
        action_type: impl Into<String>,
        description: impl Into<String>,
        original_request: SkillRequest,
        handler: ActionHandler,
    ) -> Uuid {
        let user_id = user_id.into();
        let action_type = action_type.into();
        let id = Uuid::new_v4();
        let now = Utc::now();
        let action = PendingAction {
            id,
            user_id: user_id.clone(),
            skill_name: skill_name.into(),
            action_type: action_type.clone(),
            description: description.into(),
            created_at: now,
            expires_at: now + chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::seconds(600)),
            status: PendingStatus::Waiting,
            original_request,
            handler: Some(handler),
        };

        let mut actions = self.actions.write().await;
        actions.entry(user_id.clone()).or_default().insert(id, action);
        drop(actions);

        self.events.publish(Event::PendingActionCreated {
            action_id: id,
            user_id,
            action_type,
        });
        id
    }

    /// List a user's currently-waiting actions.
    pub async fn pending_for(&self, user_id: &str) -> Vec<(Uuid, String, String)> {
        let actions = self.actions.read().await;
        actions
            .get(user_id)
            .map(|m| {
                m.values()
                    .filter(|a| a.status == PendingStatus::Waiting)
                    .map(|a| (a.id, a.action_type.clone(), a.description.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Approve and execute a pending action. Returns the handler's
    /// response, or a `NOT_FOUND`/`EXPIRED` failure response.
    pub async fn confirm(&self, user_id: &str, action_id: Uuid) -> SkillResponse {
        let taken = {
            let mut actions = self.actions.write().await;
            let Some(action) = actions.get_mut(user_id).and_then(|m| m.get_mut(&action_id)) else {
                return SkillResponse::failure(Uuid::new_v4(), ErrorKind::NotFound, "no such pending action");
            };

            if action.status != PendingStatus::Waiting {
                return SkillResponse::failure(
                    Uuid::new_v4(),
                    ErrorKind::Expired,
                    "this action is no longer waiting on confirmation",
                );
            }
            if action.expires_at < Utc::now() {
                action.status = PendingStatus::Expired;
                return SkillResponse::failure(
                    Uuid::new_v4(),
                    ErrorKind::Expired,
                    "this action expired before it was confirmed",
                );
            }

            action.status = PendingStatus::Approved;
            let handler = action.handler.take();
            let request = action.original_request.clone();
            (handler, request)
        };

        let (handler, request) = taken;
        let response = match handler {
            Some(handler) => handler(request).await,
            None => SkillResponse::failure(Uuid::new_v4(), ErrorKind::Expired, "action already resolved"),
        };

        self.audit_record("confirm", user_id);
        self.events.publish(Event::PendingActionResolved {
            action_id,
            user_id: user_id.to_string(),
            approved: true,
        });

        response
    }

    /// Reject a pending action without executing it.
    pub async fn reject(&self, user_id: &str, action_id: Uuid) -> bool {
        let mut actions = self.actions.write().await;
        let Some(action) = actions.get_mut(user_id).and_then(|m| m.get_mut(&action_id)) else {
            return false;
        };
        if action.status != PendingStatus::Waiting {
            return false;
        }
        action.status = PendingStatus::Rejected;
        action.handler = None;
        drop(actions);

        self.audit_record("cancel", user_id);
        self.events.publish(Event::PendingActionResolved {
            action_id,
            user_id: user_id.to_string(),
            approved: false,
        });
        true
    }

    /// Sweep all users' tables for expired actions and for actions past
    /// their retention window (§4.7). Intended to run on `sweep_interval_secs`.
    pub async fn sweep(&self) {
        let now = Utc::now();
        let mut actions = self.actions.write().await;
        let mut expired_events = Vec::new();

        for (user_id, table) in actions.iter_mut() {
            for (id, action) in table.iter_mut() {
                if action.status == PendingStatus::Waiting && action.expires_at < now {
                    action.status = PendingStatus::Expired;
                    action.handler = None;
                    expired_events.push((*id, user_id.clone()));
                }
            }
            let retention = chrono::Duration::from_std(self.retention).unwrap_or(chrono::Duration::hours(1));
            table.retain(|_, a| a.status == PendingStatus::Waiting || now.signed_duration_since(a.expires_at) < retention);
        }
        drop(actions);

        for (id, user_id) in expired_events {
            warn!(action_id = %id, user_id = %user_id, "pending action expired");
            self.events.publish(Event::PendingActionExpired { action_id: id, user_id });
        }
    }

    /// Run [`sweep`](Self::sweep) on a fixed interval until `shutdown`
    /// fires. Intended to be spawned once at process startup alongside
    /// the heartbeat scheduler, sharing the same shutdown signal.
    pub async fn run_sweeper(self: Arc<Self>, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(period);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.sweep().await,
                _ = shutdown.changed() => {
                    info!("autonomy sweeper shutting down");
                    break;
                }
            }
        }
    }
}
