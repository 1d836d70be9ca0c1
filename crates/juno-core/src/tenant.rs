//! Tenant identity: the authenticated principal plus the selected downstream
//! sub-account.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Sub-identity used when a client does not select one.
pub const DEFAULT_SUB_IDENTITY: &str = "1111111111";

/// Composite key scoping tool sessions and conversation records.
///
/// `primary` is the authenticated session owner. It is absent in legacy mode,
/// where the sub-identity alone scopes the tenant. The struct itself is the
/// map key, so distinct `(primary, sub)` pairs never alias.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct TenantIdentity {
    pub primary: Option<String>,
    pub sub: String,
}

impl TenantIdentity {
    pub fn new(primary: impl Into<String>, sub: impl Into<String>) -> Self {
        Self {
            primary: Some(primary.into()),
            sub: sub.into(),
        }
    }

    pub fn legacy(sub: impl Into<String>) -> Self {
        Self {
            primary: None,
            sub: sub.into(),
        }
    }

    /// Build from optional wire fields. Empty strings count as absent.
    pub fn from_parts(primary: Option<&str>, sub: Option<&str>) -> Self {
        let primary = primary.filter(|p| !p.is_empty()).map(str::to_owned);
        let sub = sub
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SUB_IDENTITY)
            .to_owned();
        Self { primary, sub }
    }

    pub fn is_legacy(&self) -> bool {
        self.primary.is_none()
    }

    /// Whether this identity is owned by the given primary principal.
    pub fn belongs_to(&self, primary: &str) -> bool {
        self.primary.as_deref() == Some(primary)
    }
}

impl fmt::Display for TenantIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.primary {
            Some(primary) => write!(f, "{primary}/{}", self.sub),
            None => write!(f, "legacy/{}", self.sub),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn from_parts_defaults_sub_identity() {
        let t = TenantIdentity::from_parts(Some("uid42"), None);
        assert_eq!(t.primary.as_deref(), Some("uid42"));
        assert_eq!(t.sub, DEFAULT_SUB_IDENTITY);
    }

    #[test]
    fn empty_primary_is_legacy() {
        let t = TenantIdentity::from_parts(Some(""), Some("2222222222"));
        assert!(t.is_legacy());
        assert_eq!(t.sub, "2222222222");
    }

    #[test]
    fn distinct_primaries_with_same_sub_differ() {
        let a = TenantIdentity::new("alice", "1111111111");
        let b = TenantIdentity::new("bob", "1111111111");
        let legacy = TenantIdentity::legacy("1111111111");
        let set: HashSet<_> = [a, b, legacy].into_iter().collect();
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn underscore_split_cannot_collide() {
        let a = TenantIdentity::new("a_b", "c");
        let b = TenantIdentity::new("a", "b_c");
        assert_ne!(a, b);
    }

    #[test]
    fn belongs_to_matches_primary_only() {
        let t = TenantIdentity::new("uid42", "1111111111");
        assert!(t.belongs_to("uid42"));
        assert!(!t.belongs_to("uid4"));
        assert!(!TenantIdentity::legacy("uid42").belongs_to("uid42"));
    }

    #[test]
    fn display_format() {
        assert_eq!(TenantIdentity::new("u", "1").to_string(), "u/1");
        assert_eq!(TenantIdentity::legacy("1").to_string(), "legacy/1");
    }
}
