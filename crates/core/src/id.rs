//! Strongly-typed identifiers used across the domain.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of a call record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(Uuid);

impl CallId {
    /// Create a new identifier.
    ///
    /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
    /// for determinism.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for CallId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<Uuid> for CallId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<CallId> for Uuid {
    fn from(value: CallId) -> Self {
        value.0
    }
}

impl FromStr for CallId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = Uuid::from_str(s)
            .map_err(|e| DomainError::invalid_id(format!("CallId: {}", e)))?;
        Ok(Self(uuid))
    }
}

/// A call's destination (e.g. a phone number).
///
/// The mutual-exclusion key: at most one call per destination may be
/// in flight at any instant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Destination(String);

impl Destination {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lock-service key for this destination.
    pub fn lock_key(&self) -> String {
        format!("lock:{}", self.0)
    }

    /// Substring match used by test-only outcome patterns.
    pub fn matches_pattern(&self, pattern: &str) -> bool {
        self.0.contains(pattern)
    }
}

impl core::fmt::Display for Destination {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Destination {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Destination {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_id_round_trips_through_string() {
        let id = CallId::new();
        let parsed: CallId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn call_id_rejects_garbage() {
        assert!("not-a-uuid".parse::<CallId>().is_err());
    }

    #[test]
    fn destination_lock_key_is_prefixed() {
        let d = Destination::new("+15550001111");
        assert_eq!(d.lock_key(), "lock:+15550001111");
    }

    #[test]
    fn destination_pattern_match_is_substring() {
        let d = Destination::new("+1-555-perm-fail");
        assert!(d.matches_pattern("perm-fail"));
        assert!(!d.matches_pattern("fail-then-succeed"));
    }
}
