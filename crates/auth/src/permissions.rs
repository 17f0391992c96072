use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier.
///
/// Permissions are leaf strings of the form `module:entity:action`
/// (e.g. `"admin:user:view"`). They are compared by exact string equality;
/// there is no wildcard or prefix matching at this layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into `(module, entity, action)` when the identifier follows the
    /// three-segment convention.
    pub fn segments(&self) -> Option<(&str, &str, &str)> {
        let mut parts = self.as_str().splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(m), Some(e), Some(a)) if !m.is_empty() && !e.is_empty() && !a.is_empty() => {
                Some((m, e, a))
            }
            _ => None,
        }
    }

    /// The trailing action segment, if the identifier is well-formed.
    pub fn action(&self) -> Option<&str> {
        self.segments().map(|(_, _, action)| action)
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Permission {
    fn from(value: &str) -> Self {
        Self::new(value.to_string())
    }
}

impl From<String> for Permission {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Permissions the HTTP surface of this crate family relies on.
pub mod builtin {
    use super::Permission;

    /// Run a database-backed, resource-level authorization decision.
    pub const AUTHZ_DECISION_CHECK: Permission = Permission::from_static("authz:decision:check");

    /// Register, rotate and disable service principals.
    pub const SERVICE_MANAGE: Permission = Permission::from_static("system:service:manage");

    /// Grant and revoke role assignments.
    pub const ROLE_ASSIGN: Permission = Permission::from_static("system:role:assign");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_three_segment_identifiers() {
        let p = Permission::new("admin:user:view");
        assert_eq!(p.segments(), Some(("admin", "user", "view")));
        assert_eq!(p.action(), Some("view"));
    }

    #[test]
    fn rejects_short_or_empty_segments() {
        assert_eq!(Permission::new("assets:read").segments(), None);
        assert_eq!(Permission::new("a::c").segments(), None);
    }

    #[test]
    fn serializes_as_bare_string() {
        let p = Permission::new("a:b:view");
        assert_eq!(serde_json::to_string(&p).unwrap(), "\"a:b:view\"");
    }
}
