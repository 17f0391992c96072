//! RBAC graph: roles, groups and (optionally scoped, time-boxed) assignments.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use warden_core::{DomainError, GroupId, RoleAssignmentId, RoleId, UserId};

use crate::Permission;
use crate::error::RepositoryError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub permissions: Vec<Permission>,
}

/// Who a role is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum AssignmentSubject {
    User(UserId),
    Group(GroupId),
}

/// Restricts an assignment to one resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssignmentScope {
    pub scope_type: String,
    pub scope_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub id: RoleAssignmentId,
    pub role_id: RoleId,
    pub subject: AssignmentSubject,
    pub scope: Option<AssignmentScope>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
}

impl RoleAssignment {
    /// Assignments outside their validity window are inert.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.valid_from.is_none_or(|from| from <= now)
            && self.valid_until.is_none_or(|until| now < until)
    }

    /// Unscoped assignments apply everywhere; scoped ones only to their resource.
    pub fn applies_to(&self, resource_type: Option<&str>, resource_id: Option<&str>) -> bool {
        match &self.scope {
            None => true,
            Some(scope) => {
                resource_type == Some(scope.scope_type.as_str())
                    && resource_id == Some(scope.scope_id.as_str())
            }
        }
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if let (Some(from), Some(until)) = (self.valid_from, self.valid_until) {
            if until <= from {
                return Err(DomainError::validation("valid_until must be after valid_from"));
            }
        }
        if let Some(scope) = &self.scope {
            if scope.scope_type.trim().is_empty() || scope.scope_id.trim().is_empty() {
                return Err(DomainError::validation("scope requires both type and id"));
            }
        }
        Ok(())
    }
}

/// Read and grant/revoke access to the RBAC graph.
///
/// Implementations return assignments regardless of their validity window;
/// the engine filters on its own clock.
#[async_trait]
pub trait RbacRepository: Send + Sync {
    /// Group memberships for each requested user. Users without groups may be absent.
    async fn groups_of_users(
        &self,
        users: &[UserId],
    ) -> Result<HashMap<UserId, Vec<GroupId>>, RepositoryError>;

    async fn assignments_for(
        &self,
        subjects: &[AssignmentSubject],
    ) -> Result<Vec<RoleAssignment>, RepositoryError>;

    async fn roles_by_ids(&self, ids: &[RoleId]) -> Result<Vec<Role>, RepositoryError>;

    async fn insert_assignment(&self, assignment: &RoleAssignment) -> Result<(), RepositoryError>;

    /// Returns whether an assignment was removed.
    async fn delete_assignment(&self, id: RoleAssignmentId) -> Result<bool, RepositoryError>;
}

#[derive(Debug, Default)]
struct RbacState {
    roles: HashMap<RoleId, Role>,
    memberships: HashMap<UserId, Vec<GroupId>>,
    assignments: Vec<RoleAssignment>,
}

/// In-process RBAC store for tests and single-node deployments without a database.
#[derive(Debug, Default)]
pub struct InMemoryRbacRepository {
    state: RwLock<RbacState>,
}

impl InMemoryRbacRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_role(&self, role: Role) {
        self.write().roles.insert(role.id, role);
    }

    pub fn add_group_member(&self, user: UserId, group: GroupId) {
        let mut state = self.write();
        let groups = state.memberships.entry(user).or_default();
        if !groups.contains(&group) {
            groups.push(group);
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RbacState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, RbacState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl RbacRepository for InMemoryRbacRepository {
    async fn groups_of_users(
        &self,
        users: &[UserId],
    ) -> Result<HashMap<UserId, Vec<GroupId>>, RepositoryError> {
        let state = self.read();
        Ok(users
            .iter()
            .filter_map(|u| state.memberships.get(u).map(|g| (*u, g.clone())))
            .collect())
    }

    async fn assignments_for(
        &self,
        subjects: &[AssignmentSubject],
    ) -> Result<Vec<RoleAssignment>, RepositoryError> {
        let wanted: HashSet<&AssignmentSubject> = subjects.iter().collect();
        Ok(self
            .read()
            .assignments
            .iter()
            .filter(|a| wanted.contains(&a.subject))
            .cloned()
            .collect())
    }

    async fn roles_by_ids(&self, ids: &[RoleId]) -> Result<Vec<Role>, RepositoryError> {
        let state = self.read();
        Ok(ids.iter().filter_map(|id| state.roles.get(id).cloned()).collect())
    }

    async fn insert_assignment(&self, assignment: &RoleAssignment) -> Result<(), RepositoryError> {
        let mut state = self.write();
        if state.assignments.iter().any(|a| a.id == assignment.id) {
            return Err(RepositoryError::Conflict(format!(
                "assignment {} already exists",
                assignment.id
            )));
        }
        state.assignments.push(assignment.clone());
        Ok(())
    }

    async fn delete_assignment(&self, id: RoleAssignmentId) -> Result<bool, RepositoryError> {
        let mut state = self.write();
        let before = state.assignments.len();
        state.assignments.retain(|a| a.id != id);
        Ok(state.assignments.len() != before)
    }
}
