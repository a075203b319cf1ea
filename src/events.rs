//! Event bus (C10): the single fan-out mechanism for lifecycle
//! notifications. Skills never build ad hoc subscriber lists of their
//! own — every cross-cutting notification (autonomy decisions, update
//! progress, skill state changes) goes through this bus.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// Topics published on the bus. New variants are additive; subscribers
/// that only care about a subset filter in their own receive loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Event {
    SkillStateChanged {
        skill: String,
        state: String,
    },
    PendingActionCreated {
        action_id: uuid::Uuid,
        user_id: String,
        action_type: String,
    },
    PendingActionResolved {
        action_id: uuid::Uuid,
        user_id: String,
        approved: bool,
    },
    PendingActionExpired {
        action_id: uuid::Uuid,
        user_id: String,
    },
    HeartbeatTickCompleted {
        skills_run: usize,
        skills_timed_out: usize,
    },
    UpdateStarted {
        target_ref: String,
    },
    UpdateSucceeded {
        target_ref: String,
    },
    UpdateFailed {
        target_ref: String,
        reason: String,
    },
    UpdateRolledBack {
        from_ref: String,
        to_sha: String,
    },
    /// A domain event a skill publishes for other skills to observe —
    /// the generic escape hatch named in §3/§4.10 (e.g. the YouTube
    /// intelligence skill publishing `report_ready` for the strategy
    /// skill to pick up on its next heartbeat). `kind` and `payload` are
    /// free-form; the core does not interpret them.
    Domain {
        kind: String,
        skill: String,
        payload: serde_json::Value,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl Event {
    /// Construct a domain event with the current time, for skills to
    /// publish cross-cutting signals without the core knowing their shape.
    pub fn domain(skill: impl Into<String>, kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::Domain {
            kind: kind.into(),
            skill: skill.into(),
            payload,
            timestamp: chrono::Utc::now(),
        }
    }
}

/// A single-mutex broadcast bus (§3, §4.10). Publishing never blocks on
/// subscriber processing: a lagging subscriber misses the oldest
/// un-consumed events rather than stalling the publisher.
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// `capacity` bounds how many unconsumed events a lagging subscriber
    /// may fall behind by before old ones are dropped for it.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: Event) {
        trace!(?event, "publishing event");
        // An Err here only means there are currently no subscribers;
        // that is not a failure condition for the publisher.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(Event::SkillStateChanged {
            skill: "github".to_string(),
            state: "READY".to_string(),
        });

        let received = rx.recv().await.unwrap();
        match received {
            Event::SkillStateChanged { skill, state } => {
                assert_eq!(skill, "github");
                assert_eq!(state, "READY");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new(16);
        bus.publish(Event::HeartbeatTickCompleted {
            skills_run: 3,
            skills_timed_out: 0,
        });
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(Event::UpdateStarted {
            target_ref: "v1.2.3".to_string(),
        });

        assert!(rx1.recv().await.is_ok());
        assert!(rx2.recv().await.is_ok());
    }
}
