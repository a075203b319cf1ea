//! Reference skill implementations.
//!
//! Nothing in the core depends on this module — it exists so the crate
//! ships at least one complete, end-to-end example of the [`Skill`]
//! contract (intent routing, permission declarations, autonomy checks,
//! and heartbeat) that the integration tests exercise instead of a bare
//! stub. [`github::GitHubSkill`] is a compact, self-contained
//! implementation backed by in-memory fake repository state; it never
//! makes a real network call.
//!
//! [`Skill`]: crate::skill::Skill

pub mod github;
