//! Attribute-based allow policies.
//!
//! Policies only ever grant. The engine evaluates them in registration order
//! and the first one that matches wins; no match means deny.

use serde_json::{Map, Value};

use warden_core::{GroupId, UserId};

use crate::Permission;

/// Attributes describing the acting user, assembled by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectAttributes {
    pub user_id: UserId,
    pub group_ids: Vec<GroupId>,
    /// Names of the roles active for this request.
    pub roles: Vec<String>,
}

/// Everything a policy may look at.
#[derive(Debug, Clone, Copy)]
pub struct PolicyContext<'a> {
    pub permission: &'a Permission,
    pub subject: &'a SubjectAttributes,
    pub resource_type: Option<&'a str>,
    pub resource_id: Option<&'a str>,
    pub resource: &'a Map<String, Value>,
}

pub trait AbacPolicy: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this policy grants access in `ctx`.
    fn allows(&self, ctx: &PolicyContext<'_>) -> bool;
}

/// Grants when a resource attribute names the acting user as owner.
#[derive(Debug, Clone)]
pub struct OwnershipPolicy {
    owner_attribute: String,
    /// Empty means any action.
    actions: Vec<String>,
}

impl OwnershipPolicy {
    /// Owner is read from `resource.ownerId`.
    pub fn new() -> Self {
        Self {
            owner_attribute: "ownerId".to_string(),
            actions: Vec::new(),
        }
    }

    pub fn with_owner_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.owner_attribute = attribute.into();
        self
    }

    /// Limit the grant to permissions whose action segment is listed.
    pub fn for_actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.actions = actions.into_iter().map(Into::into).collect();
        self
    }
}

impl Default for OwnershipPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl AbacPolicy for OwnershipPolicy {
    fn name(&self) -> &str {
        "ownership"
    }

    fn allows(&self, ctx: &PolicyContext<'_>) -> bool {
        if !self.actions.is_empty() {
            let Some(action) = ctx.permission.action() else {
                return false;
            };
            if !self.actions.iter().any(|a| a == action) {
                return false;
            }
        }
        match ctx.resource.get(&self.owner_attribute) {
            Some(Value::String(owner)) => owner
                .parse::<UserId>()
                .is_ok_and(|owner| owner == ctx.subject.user_id),
            _ => false,
        }
    }
}

/// Grants listed permissions when a resource attribute equals a fixed value,
/// e.g. `visibility == "public"` grants `docs:document:view`.
#[derive(Debug, Clone)]
pub struct AttributeMatchPolicy {
    name: String,
    attribute: String,
    expected: Value,
    grants: Vec<Permission>,
}

impl AttributeMatchPolicy {
    pub fn new(
        name: impl Into<String>,
        attribute: impl Into<String>,
        expected: Value,
        grants: Vec<Permission>,
    ) -> Self {
        Self {
            name: name.into(),
            attribute: attribute.into(),
            expected,
            grants,
        }
    }
}

impl AbacPolicy for AttributeMatchPolicy {
    fn name(&self) -> &str {
        &self.name
    }

    fn allows(&self, ctx: &PolicyContext<'_>) -> bool {
        self.grants.contains(ctx.permission)
            && ctx.resource.get(&self.attribute) == Some(&self.expected)
    }
}
