//! Request/response envelope (C1): the uniform typed message that carries
//! an intent, user, and context through dispatch, and the response that
//! always echoes it back.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single incoming request, constructed once at the transport boundary
/// and threaded unchanged through the rest of dispatch. Immutable after
/// construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillRequest {
    /// Unique per request; echoed on every response and log line.
    pub correlation_id: Uuid,
    /// Opaque id of the originating user.
    pub user_id: String,
    /// String key identifying the user-level operation.
    pub intent: String,
    /// Free-text message, e.g. the original natural-language utterance.
    #[serde(default)]
    pub message: String,
    /// Intent-specific arguments. Handlers destructure what they need and
    /// fail with `INVALID_ARGUMENT` if a required field is missing.
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
}

impl SkillRequest {
    pub fn new(user_id: impl Into<String>, intent: impl Into<String>) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            user_id: user_id.into(),
            intent: intent.into(),
            message: String::new(),
            context: HashMap::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

/// The fixed error taxonomy carried in a failed [`SkillResponse`] (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    UnknownIntent,
    SkillUnavailable,
    SkillStarting,
    PermissionDenied,
    InvalidArgument,
    Timeout,
    HandlerFault,
    NotFound,
    Expired,
    Busy,
    Upstream,
}

/// An error descriptor: kind plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

/// The response to a [`SkillRequest`], always carrying the same
/// `correlation_id`. Exactly one of (`data` populated, `error` populated)
/// holds — never both (§1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillResponse {
    pub correlation_id: Uuid,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl SkillResponse {
    /// Build a success response.
    pub fn success(correlation_id: Uuid) -> Self {
        Self {
            correlation_id,
            success: true,
            message: None,
            data: HashMap::new(),
            error: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Build a failure response with the given error kind and message.
    pub fn failure(correlation_id: Uuid, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            correlation_id,
            success: false,
            message: None,
            data: HashMap::new(),
            error: Some(ErrorInfo {
                kind,
                message: message.into(),
            }),
        }
    }
}
