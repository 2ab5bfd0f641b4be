//! User record and identifier

use serde::{Deserialize, Serialize};

/// Opaque external user identifier supplied by the messaging platform
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for UserId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A user as persisted by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// External identifier (primary key)
    pub id: UserId,

    /// Latest display name seen for this user
    pub display_name: String,

    /// Cumulative points, may be negative
    pub total_points: i64,

    /// Consecutive completions since the last failure
    pub current_streak: u32,
}

impl User {
    /// A freshly seen user with no points and no streak
    pub fn new(id: impl Into<UserId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            total_points: 0,
            current_streak: 0,
        }
    }
}
