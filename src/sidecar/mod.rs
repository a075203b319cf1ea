//! Update sidecar protocol (C9): the HTTP contract between the skill
//! runtime process and the out-of-band sidecar process that actually
//! performs self-updates.

pub mod auth;
pub mod client;
pub mod models;
pub mod server;

pub use client::SidecarClient;
pub use server::{serve, router, SidecarState};
