//! Permissions and autonomy (C2): capability bits skills declare
//! statically, and the per-action autonomy policy that decides whether a
//! side-effectful operation proceeds, asks, or is always asked.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A capability bit a skill may declare. `Custom` is the extension point
/// named in §3 for permissions the core doesn't know about ahead of time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Permission {
    ReadProfile,
    WriteMemories,
    SendMessages,
    ReadOwnCollection,
    WriteOwnCollection,
    Custom(String),
}

impl Permission {
    fn as_str(&self) -> &str {
        match self {
            Self::ReadProfile => "READ_PROFILE",
            Self::WriteMemories => "WRITE_MEMORIES",
            Self::SendMessages => "SEND_MESSAGES",
            Self::ReadOwnCollection => "READ_OWN_COLLECTION",
            Self::WriteOwnCollection => "WRITE_OWN_COLLECTION",
            Self::Custom(s) => s,
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "READ_PROFILE" => Self::ReadProfile,
            "WRITE_MEMORIES" => Self::WriteMemories,
            "SEND_MESSAGES" => Self::SendMessages,
            "READ_OWN_COLLECTION" => Self::ReadOwnCollection,
            "WRITE_OWN_COLLECTION" => Self::WriteOwnCollection,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl Serialize for Permission {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Permission {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Permission::from_str(&s))
    }
}

/// A set of declared permissions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet(HashSet<Permission>);

impl PermissionSet {
    pub fn new(perms: impl IntoIterator<Item = Permission>) -> Self {
        Self(perms.into_iter().collect())
    }

    pub fn empty() -> Self {
        Self(HashSet::new())
    }

    pub fn contains(&self, perm: &Permission) -> bool {
        self.0.contains(perm)
    }

    /// True if every permission in `required` is present in `self`.
    pub fn is_superset_of(&self, required: &PermissionSet) -> bool {
        required.0.is_subset(&self.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Permission> {
        self.0.iter()
    }
}

/// Policy controlling whether a side-effectful action runs without
/// confirmation. `AlwaysAsk` is immutable by policy (§3): it declares a
/// high-risk operation and cannot be downgraded via [`AutonomyConfig::set_level`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyLevel {
    Autonomous,
    Ask,
    AlwaysAsk,
}

impl AutonomyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Autonomous => "autonomous",
            Self::Ask => "ask",
            Self::AlwaysAsk => "always_ask",
        }
    }
}

/// Per-action autonomy mapping. Skills declare initial levels at
/// construction time via [`AutonomyConfig::declare`]; users may later
/// reconfigure non-`AlwaysAsk` actions via [`AutonomyConfig::set_level`].
#[derive(Debug, Clone, Default)]
pub struct AutonomyConfig {
    levels: HashMap<String, AutonomyLevel>,
}

impl AutonomyConfig {
    pub fn new() -> Self {
        Self {
            levels: HashMap::new(),
        }
    }

    /// Declare an action's level. Used by skills at construction time to
    /// register their action catalogue (including `AlwaysAsk` actions).
    pub fn declare(&mut self, action: impl Into<String>, level: AutonomyLevel) {
        self.levels.insert(action.into(), level);
    }

    /// Current level for an action. Undeclared actions default to `Ask` —
    /// the safe default when a skill forgot to declare an action kind.
    pub fn level_for(&self, action: &str) -> AutonomyLevel {
        self.levels.get(action).copied().unwrap_or(AutonomyLevel::Ask)
    }

    pub fn is_autonomous(&self, action: &str) -> bool {
        self.level_for(action) == AutonomyLevel::Autonomous
    }

    /// Reconfigure an action's level. Fails closed (§4.2, §8 property 6)
    /// when the action is currently declared `AlwaysAsk`.
    pub fn set_level(&mut self, action: &str, level: AutonomyLevel) -> bool {
        if self.level_for(action) == AutonomyLevel::AlwaysAsk {
            return false;
        }
        self.levels.insert(action.to_string(), level);
        true
    }

    pub fn to_map(&self) -> HashMap<String, AutonomyLevel> {
        self.levels.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_set_superset_check() {
        let declared = PermissionSet::new([Permission::ReadProfile, Permission::SendMessages]);
        let required = PermissionSet::new([Permission::ReadProfile]);
        assert!(declared.is_superset_of(&required));

        let required_missing =
            PermissionSet::new([Permission::ReadProfile, Permission::WriteMemories]);
        assert!(!declared.is_superset_of(&required_missing));
    }

    #[test]
    fn always_ask_cannot_be_downgraded() {
        let mut cfg = AutonomyConfig::new();
        cfg.declare("merge_pr", AutonomyLevel::AlwaysAsk);
        assert!(!cfg.set_level("merge_pr", AutonomyLevel::Autonomous));
        assert_eq!(cfg.level_for("merge_pr"), AutonomyLevel::AlwaysAsk);
    }

    #[test]
    fn ask_and_autonomous_can_be_reconfigured() {
        let mut cfg = AutonomyConfig::new();
        cfg.declare("create_issue", AutonomyLevel::Ask);
        assert!(cfg.set_level("create_issue", AutonomyLevel::Autonomous));
        assert_eq!(cfg.level_for("create_issue"), AutonomyLevel::Autonomous);
    }

    #[test]
    fn undeclared_action_defaults_to_ask() {
        let cfg = AutonomyConfig::new();
        assert_eq!(cfg.level_for("unknown_action"), AutonomyLevel::Ask);
        assert!(!cfg.is_autonomous("unknown_action"));
    }
}
