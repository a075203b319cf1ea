//! Heartbeat scheduler (C6): periodically gives every ready skill a
//! chance to produce proactive actions for the users currently active,
//! bounded by concurrency and a per-skill deadline so one slow skill
//! cannot stall the tick.
//!
//! The scheduler never discovers active users itself — it is handed the
//! list on every tick by whatever owns the notion of "active" (a
//! session store, a presence tracker). This keeps the scheduler a pure
//! fan-out mechanism, not an owner of user-activity state.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{watch, Semaphore};
use tokio::time::interval;
use tracing::{debug, warn};

use crate::events::{Event, EventBus};
use crate::registry::SkillRegistry;
use crate::skill::HeartbeatAction;

pub struct HeartbeatScheduler {
    registry: Arc<SkillRegistry>,
    events: Arc<EventBus>,
    per_skill_timeout: Duration,
    concurrency: usize,
}

impl HeartbeatScheduler {
    pub fn new(registry: Arc<SkillRegistry>, events: Arc<EventBus>, per_skill_timeout: Duration, concurrency: usize) -> Self {
        Self {
            registry,
            events,
            per_skill_timeout,
            concurrency: concurrency.max(1),
        }
    }

    /// Run one heartbeat tick across every ready skill for the given set
    /// of active users, returning the aggregated actions (§4.6).
    pub async fn tick(&self, active_users: &[String]) -> Vec<HeartbeatAction> {
        let skills = self.registry.ready_skills().await;
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = FuturesUnordered::new();

        for skill in skills {
            let semaphore = semaphore.clone();
            let users = active_users.to_vec();
            let timeout = self.per_skill_timeout;
            tasks.push(async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                let name = skill.metadata().name.clone();
                let result = tokio::time::timeout(timeout, skill.on_heartbeat(&users)).await;
                (name, result)
            });
        }

        let mut actions = Vec::new();
        let mut skills_run = 0usize;
        let mut skills_timed_out = 0usize;

        while let Some((name, result)) = tasks.next().await {
            match result {
                Ok(produced) => {
                    debug!(skill = %name, produced = produced.len(), "heartbeat produced actions");
                    skills_run += 1;
                    actions.extend(produced);
                }
                Err(_) => {
                    warn!(skill = %name, "heartbeat timed out, skipping this tick for this skill");
                    skills_timed_out += 1;
                }
            }
        }

        self.events.publish(Event::HeartbeatTickCompleted {
            skills_run,
            skills_timed_out,
        });

        // Highest priority (lowest number) first, then skill name, then
        // action type (§4.6 ordering guarantee). Tasks complete in
        // whatever order `FuturesUnordered` finishes them, so the tie
        // break can't rely on insertion order — it must be explicit.
        actions.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.skill_name.cmp(&b.skill_name))
                .then_with(|| a.action_type.cmp(&b.action_type))
        });
        actions
    }

    /// Run `tick` on a fixed interval, sourcing the active-user list from
    /// `active_users_fn` each time and handing every tick's sorted
    /// actions to `on_actions`, until `shutdown` fires. On shutdown, the
    /// currently in-flight tick (if any) is allowed `grace` to finish —
    /// actions it produces within that window are still passed to
    /// `on_actions` — before the loop exits; new ticks are not started
    /// during grace, and a tick that overruns the grace window is
    /// abandoned (§4.6).
    ///
    /// The tick itself runs as its own spawned task rather than being
    /// raced directly against `shutdown`: a future dropped by a losing
    /// `select!` branch stops running immediately, which would silently
    /// discard whatever the tick was about to produce. Spawning lets the
    /// tick keep running detached from the select while we still get to
    /// wait on it, bounded by `grace`, once shutdown is signalled.
    pub async fn run<F, Fut, S>(
        self: Arc<Self>,
        interval_period: Duration,
        grace: Duration,
        mut shutdown: watch::Receiver<bool>,
        active_users_fn: F,
        on_actions: S,
    ) where
        F: Fn() -> Fut + Send + Sync,
        Fut: std::future::Future<Output = Vec<String>> + Send,
        S: Fn(Vec<HeartbeatAction>) + Send + Sync,
    {
        let mut ticker = interval(interval_period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let users = active_users_fn().await;
                    let scheduler = self.clone();
                    let mut handle = tokio::spawn(async move { scheduler.tick(&users).await });
                    tokio::select! {
                        result = &mut handle => {
                            match result {
                                Ok(actions) => on_actions(actions),
                                Err(join_err) => warn!(error = %join_err, "heartbeat tick task panicked"),
                            }
                        }
                        _ = shutdown.changed() => {
                            debug!("heartbeat scheduler shutting down mid-tick, draining within grace period");
                            match tokio::time::timeout(grace, &mut handle).await {
                                Ok(Ok(actions)) => on_actions(actions),
                                Ok(Err(join_err)) => warn!(error = %join_err, "heartbeat tick task panicked during shutdown drain"),
                                Err(_) => {
                                    warn!("heartbeat tick did not finish within the shutdown grace window, abandoning");
                                    handle.abort();
                                }
                            }
                            break;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    debug!("heartbeat scheduler shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::envelope::{SkillRequest, SkillResponse};
    use crate::permissions::PermissionSet;
    use crate::skill::{Skill, SkillMetadata, SkillState, SkillStatus};

    struct TickingSkill {
        metadata: SkillMetadata,
        status: SkillStatus,
        delay: Option<Duration>,
        priority: u8,
        calls: Arc<AtomicUsize>,
    }

    impl TickingSkill {
        fn ready(name: &str, delay: Option<Duration>) -> (Self, Arc<AtomicUsize>) {
            Self::with_priority(name, delay, 5)
        }

        fn with_priority(name: &str, delay: Option<Duration>, priority: u8) -> (Self, Arc<AtomicUsize>) {
            let status = SkillStatus::new();
            status.set(SkillState::Ready);
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    metadata: SkillMetadata {
                        name: name.to_string(),
                        description: "ticking".to_string(),
                        version: "0.0.1".to_string(),
                        permissions: PermissionSet::empty(),
                        collections: vec![],
                        intents: vec![],
                    },
                    status,
                    delay,
                    priority,
                    calls: calls.clone(),
                },
                calls,
            )
        }
    }

    #[async_trait]
    impl Skill for TickingSkill {
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
            SkillResponse::success(request.correlation_id)
        }
        async fn on_heartbeat(&self, active_users: &[String]) -> Vec<HeartbeatAction> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            active_users
                .iter()
                .map(|u| HeartbeatAction {
                    skill_name: self.metadata.name.clone(),
                    user_id: u.clone(),
                    action_type: "ping".to_string(),
                    data: Default::default(),
                    priority: self.priority,
                })
                .collect()
        }
    }

    #[tokio::test]
    async fn tick_collects_actions_from_ready_skills() {
        let registry = Arc::new(SkillRegistry::new(4));
        let (skill, calls) = TickingSkill::ready("a", None);
        registry.register(Arc::new(skill)).await.unwrap();

        let events = Arc::new(EventBus::new(16));
        let scheduler = HeartbeatScheduler::new(registry, events, Duration::from_millis(200), 4);

        let actions = scheduler.tick(&["u1".to_string(), "u2".to_string()]).await;
        assert_eq!(actions.len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_skill_times_out_without_blocking_tick() {
        let registry = Arc::new(SkillRegistry::new(4));
        let (slow, _) = TickingSkill::ready("slow", Some(Duration::from_millis(500)));
        registry.register(Arc::new(slow)).await.unwrap();

        let events = Arc::new(EventBus::new(16));
        let scheduler = HeartbeatScheduler::new(registry, events, Duration::from_millis(50), 4);

        let actions = scheduler.tick(&["u1".to_string()]).await;
        assert!(actions.is_empty());
    }

    #[tokio::test]
    async fn not_ready_skills_are_skipped() {
        let registry = Arc::new(SkillRegistry::new(4));
        let (skill, calls) = TickingSkill::ready("a", None);
        skill.status.set(SkillState::Error);
        registry.register(Arc::new(skill)).await.unwrap();

        let events = Arc::new(EventBus::new(16));
        let scheduler = HeartbeatScheduler::new(registry, events, Duration::from_millis(200), 4);
        let actions = scheduler.tick(&["u1".to_string()]).await;
        assert!(actions.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn actions_are_ordered_by_priority_then_skill_name() {
        // S4: sA priority 5, sB priority 2, sC priority 5 -> sB, sA, sC.
        let registry = Arc::new(SkillRegistry::new(4));
        let (s_a, _) = TickingSkill::with_priority("sA", None, 5);
        let (s_b, _) = TickingSkill::with_priority("sB", None, 2);
        let (s_c, _) = TickingSkill::with_priority("sC", None, 5);
        registry.register(Arc::new(s_a)).await.unwrap();
        registry.register(Arc::new(s_b)).await.unwrap();
        registry.register(Arc::new(s_c)).await.unwrap();

        let events = Arc::new(EventBus::new(16));
        let scheduler = HeartbeatScheduler::new(registry, events, Duration::from_millis(200), 16);
        let actions = scheduler.tick(&["u1".to_string()]).await;

        let order: Vec<&str> = actions.iter().map(|a| a.skill_name.as_str()).collect();
        assert_eq!(order, vec!["sB", "sA", "sC"]);
    }
}
