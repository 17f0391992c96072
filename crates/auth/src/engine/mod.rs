//! Database-backed authorization: RBAC first, ABAC only when RBAC denies.
//!
//! Unlike [`crate::authorize::PermissionChecker`], every decision here reads the
//! current RBAC graph, so revocations take effect immediately.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use warden_core::{Clock, GroupId, RoleAssignmentId, RoleId, UserId};

use crate::Permission;
use crate::error::EngineError;

pub mod abac;
pub mod repository;

pub use abac::{AbacPolicy, AttributeMatchPolicy, OwnershipPolicy, PolicyContext, SubjectAttributes};
pub use repository::{
    AssignmentScope, AssignmentSubject, InMemoryRbacRepository, RbacRepository, Role,
    RoleAssignment,
};

/// A resource-level authorization question.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AccessRequest {
    pub user_id: UserId,
    pub permission: Permission,
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub resource_id: Option<String>,
    /// Supplying attributes opts into the ABAC phase.
    #[serde(default)]
    pub resource_attributes: Option<Map<String, Value>>,
}

impl AccessRequest {
    pub fn new(user_id: UserId, permission: Permission) -> Self {
        Self {
            user_id,
            permission,
            resource_type: None,
            resource_id: None,
            resource_attributes: None,
        }
    }

    pub fn on_resource(
        mut self,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        self.resource_type = Some(resource_type.into());
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_attributes(mut self, attributes: Map<String, Value>) -> Self {
        self.resource_attributes = Some(attributes);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub allowed: bool,
    pub reason: String,
}

impl Decision {
    fn allow(reason: String) -> Self {
        Self {
            allowed: true,
            reason,
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

/// Parameters for a new role assignment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RoleGrant {
    pub subject: AssignmentSubject,
    pub role_id: RoleId,
    #[serde(default)]
    pub scope: Option<AssignmentScope>,
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
}

pub struct AuthorizationEngine {
    repository: Arc<dyn RbacRepository>,
    policies: Vec<Arc<dyn AbacPolicy>>,
    clock: Arc<dyn Clock>,
}

impl AuthorizationEngine {
    pub fn new(repository: Arc<dyn RbacRepository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            repository,
            policies: Vec::new(),
            clock,
        }
    }

    /// Append an ABAC policy; policies are evaluated in the order added.
    pub fn with_policy(mut self, policy: Arc<dyn AbacPolicy>) -> Self {
        self.policies.push(policy);
        self
    }

    pub async fn check_permission(&self, request: &AccessRequest) -> Result<Decision, EngineError> {
        let now = self.clock.now();
        let user = request.user_id;
        let resource_type = request.resource_type.as_deref();
        let resource_id = request.resource_id.as_deref();

        let group_ids = self
            .repository
            .groups_of_users(&[user])
            .await?
            .remove(&user)
            .unwrap_or_default();

        let mut subjects = vec![AssignmentSubject::User(user)];
        subjects.extend(group_ids.iter().copied().map(AssignmentSubject::Group));

        let role_ids: Vec<RoleId> = dedup(
            self.repository
                .assignments_for(&subjects)
                .await?
                .into_iter()
                .filter(|a| a.is_active_at(now) && a.applies_to(resource_type, resource_id))
                .map(|a| a.role_id),
        );
        let roles = self.repository.roles_by_ids(&role_ids).await?;

        // RBAC
        if let Some(role) = roles
            .iter()
            .find(|r| r.permissions.contains(&request.permission))
        {
            tracing::debug!(permission = %request.permission, role = %role.name, "rbac allow");
            return Ok(Decision::allow(format!("granted by role '{}'", role.name)));
        }

        // ABAC
        let Some(resource) = &request.resource_attributes else {
            return Ok(Decision::deny("no active role grants the permission"));
        };
        let subject = SubjectAttributes {
            user_id: user,
            group_ids,
            roles: roles.iter().map(|r| r.name.clone()).collect(),
        };
        let ctx = PolicyContext {
            permission: &request.permission,
            subject: &subject,
            resource_type,
            resource_id,
            resource,
        };
        for policy in &self.policies {
            if policy.allows(&ctx) {
                tracing::debug!(permission = %request.permission, policy = policy.name(), "abac allow");
                return Ok(Decision::allow(format!("granted by policy '{}'", policy.name())));
            }
        }
        Ok(Decision::deny("no role or policy grants the permission"))
    }

    /// Globally effective permissions (unscoped, currently active assignments)
    /// for each well-formed user id. Malformed ids are dropped, never keyed.
    pub async fn get_user_permissions_batch<S: AsRef<str>>(
        &self,
        user_ids: &[S],
    ) -> Result<HashMap<UserId, Vec<Permission>>, EngineError> {
        let roles = self.user_roles(user_ids, true).await?;
        Ok(roles
            .into_iter()
            .map(|(user, roles)| {
                let permissions =
                    dedup(roles.into_iter().flat_map(|r| r.permissions.into_iter()));
                (user, permissions)
            })
            .collect())
    }

    pub async fn get_user_permissions(&self, user_id: UserId) -> Result<Vec<Permission>, EngineError> {
        let mut batch = self.get_user_permissions_batch(&[user_id.to_string()]).await?;
        Ok(batch.remove(&user_id).unwrap_or_default())
    }

    /// Roles from every currently active assignment, direct or via groups.
    pub async fn get_user_roles_batch<S: AsRef<str>>(
        &self,
        user_ids: &[S],
    ) -> Result<HashMap<UserId, Vec<Role>>, EngineError> {
        self.user_roles(user_ids, false).await
    }

    pub async fn get_group_roles_batch<S: AsRef<str>>(
        &self,
        group_ids: &[S],
    ) -> Result<HashMap<GroupId, Vec<Role>>, EngineError> {
        let groups: Vec<GroupId> = parse_ids(group_ids);
        let subjects: Vec<AssignmentSubject> =
            groups.iter().copied().map(AssignmentSubject::Group).collect();

        let mut role_ids: HashMap<GroupId, Vec<RoleId>> =
            groups.iter().map(|g| (*g, Vec::new())).collect();
        for a in self.active_assignments(&subjects, false).await? {
            if let AssignmentSubject::Group(g) = a.subject {
                role_ids.entry(g).or_default().push(a.role_id);
            }
        }
        self.resolve_roles(role_ids).await
    }

    pub async fn get_role_permissions_batch<S: AsRef<str>>(
        &self,
        role_ids: &[S],
    ) -> Result<HashMap<RoleId, Vec<Permission>>, EngineError> {
        let ids: Vec<RoleId> = parse_ids(role_ids);
        let mut result: HashMap<RoleId, Vec<Permission>> =
            ids.iter().map(|id| (*id, Vec::new())).collect();
        if !ids.is_empty() {
            for role in self.repository.roles_by_ids(&ids).await? {
                result.insert(role.id, role.permissions);
            }
        }
        Ok(result)
    }

    pub async fn grant_role(&self, grant: RoleGrant) -> Result<RoleAssignment, EngineError> {
        if self.repository.roles_by_ids(&[grant.role_id]).await?.is_empty() {
            return Err(EngineError::UnknownRole(grant.role_id));
        }
        let assignment = RoleAssignment {
            id: RoleAssignmentId::new(),
            role_id: grant.role_id,
            subject: grant.subject,
            scope: grant.scope,
            valid_from: grant.valid_from,
            valid_until: grant.valid_until,
        };
        assignment.validate()?;
        self.repository.insert_assignment(&assignment).await?;
        tracing::info!(assignment_id = %assignment.id, role_id = %assignment.role_id, "role granted");
        Ok(assignment)
    }

    /// Returns whether the assignment existed.
    pub async fn revoke_assignment(&self, id: RoleAssignmentId) -> Result<bool, EngineError> {
        let removed = self.repository.delete_assignment(id).await?;
        if removed {
            tracing::info!(assignment_id = %id, "role assignment revoked");
        }
        Ok(removed)
    }

    async fn user_roles<S: AsRef<str>>(
        &self,
        user_ids: &[S],
        unscoped_only: bool,
    ) -> Result<HashMap<UserId, Vec<Role>>, EngineError> {
        let users: Vec<UserId> = parse_ids(user_ids);
        let memberships = self.repository.groups_of_users(&users).await?;

        let mut subjects: Vec<AssignmentSubject> =
            users.iter().copied().map(AssignmentSubject::User).collect();
        let groups: Vec<GroupId> = dedup(memberships.values().flatten().copied());
        subjects.extend(groups.into_iter().map(AssignmentSubject::Group));

        let mut by_subject: HashMap<AssignmentSubject, Vec<RoleId>> = HashMap::new();
        for a in self.active_assignments(&subjects, unscoped_only).await? {
            by_subject.entry(a.subject).or_default().push(a.role_id);
        }

        let role_ids: HashMap<UserId, Vec<RoleId>> = users
            .iter()
            .map(|user| {
                let direct = by_subject.get(&AssignmentSubject::User(*user)).into_iter().flatten();
                let inherited = memberships
                    .get(user)
                    .into_iter()
                    .flatten()
                    .filter_map(|g| by_subject.get(&AssignmentSubject::Group(*g)))
                    .flatten();
                (*user, direct.chain(inherited).copied().collect::<Vec<_>>())
            })
            .collect();
        self.resolve_roles(role_ids).await
    }

    async fn active_assignments(
        &self,
        subjects: &[AssignmentSubject],
        unscoped_only: bool,
    ) -> Result<Vec<RoleAssignment>, EngineError> {
        if subjects.is_empty() {
            return Ok(Vec::new());
        }
        let now = self.clock.now();
        Ok(self
            .repository
            .assignments_for(subjects)
            .await?
            .into_iter()
            .filter(|a| a.is_active_at(now) && (!unscoped_only || a.scope.is_none()))
            .collect())
    }

    async fn resolve_roles<K: Eq + Hash>(
        &self,
        role_ids: HashMap<K, Vec<RoleId>>,
    ) -> Result<HashMap<K, Vec<Role>>, EngineError> {
        let all: Vec<RoleId> = dedup(role_ids.values().flatten().copied());
        let roles: HashMap<RoleId, Role> = if all.is_empty() {
            HashMap::new()
        } else {
            self.repository
                .roles_by_ids(&all)
                .await?
                .into_iter()
                .map(|r| (r.id, r))
                .collect()
        };
        Ok(role_ids
            .into_iter()
            .map(|(key, ids)| {
                let resolved = dedup(ids)
                    .into_iter()
                    .filter_map(|id| roles.get(&id).cloned())
                    .collect();
                (key, resolved)
            })
            .collect())
    }
}

/// Parse ids, silently dropping (and logging) the ones that do not parse.
fn parse_ids<T, S>(raw: &[S]) -> Vec<T>
where
    T: FromStr + Eq + Hash + Copy,
    T::Err: core::fmt::Display,
    S: AsRef<str>,
{
    dedup(raw.iter().filter_map(|s| match s.as_ref().parse::<T>() {
        Ok(id) => Some(id),
        Err(e) => {
            tracing::debug!(error = %e, "dropping malformed id from batch");
            None
        }
    }))
}

/// Order-preserving de-duplication.
fn dedup<T: Eq + Hash + Clone>(items: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Duration;
    use serde_json::json;
    use warden_core::ManualClock;

    use super::*;

    struct CountingPolicy {
        calls: AtomicUsize,
        verdict: bool,
    }

    impl AbacPolicy for CountingPolicy {
        fn name(&self) -> &str {
            "counting"
        }

        fn allows(&self, _ctx: &PolicyContext<'_>) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.verdict
        }
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        repo: Arc<InMemoryRbacRepository>,
        viewer: Role,
        editor: Role,
    }

    impl Fixture {
        fn new() -> Self {
            let repo = Arc::new(InMemoryRbacRepository::new());
            let viewer = Role {
                id: RoleId::new(),
                name: "viewer".to_string(),
                permissions: vec![Permission::new("a:b:view")],
            };
            let editor = Role {
                id: RoleId::new(),
                name: "editor".to_string(),
                permissions: vec![Permission::new("a:b:view"), Permission::new("a:b:edit")],
            };
            repo.put_role(viewer.clone());
            repo.put_role(editor.clone());
            Self {
                clock: Arc::new(ManualClock::starting_now()),
                repo,
                viewer,
                editor,
            }
        }

        fn engine(&self) -> AuthorizationEngine {
            AuthorizationEngine::new(self.repo.clone(), self.clock.clone())
        }

        fn grant(&self, subject: AssignmentSubject, role: &Role) -> RoleGrant {
            RoleGrant {
                subject,
                role_id: role.id,
                scope: None,
                valid_from: None,
                valid_until: None,
            }
        }
    }

    fn attrs(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[tokio::test]
    async fn rbac_allow_skips_abac() {
        let f = Fixture::new();
        let user = UserId::new();
        let policy = Arc::new(CountingPolicy {
            calls: AtomicUsize::new(0),
            verdict: false,
        });
        let engine = f.engine().with_policy(policy.clone());
        engine
            .grant_role(f.grant(AssignmentSubject::User(user), &f.viewer))
            .await
            .unwrap();

        let request = AccessRequest::new(user, Permission::new("a:b:view"))
            .with_attributes(attrs(json!({"ownerId": "someone"})));
        let decision = engine.check_permission(&request).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.reason, "granted by role 'viewer'");
        assert_eq!(policy.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn abac_runs_only_when_attributes_supplied() {
        let f = Fixture::new();
        let user = UserId::new();
        let policy = Arc::new(CountingPolicy {
            calls: AtomicUsize::new(0),
            verdict: true,
        });
        let engine = f.engine().with_policy(policy.clone());

        let bare = AccessRequest::new(user, Permission::new("a:b:edit"));
        assert!(!engine.check_permission(&bare).await.unwrap().allowed);
        assert_eq!(policy.calls.load(Ordering::SeqCst), 0);

        let with_attrs = bare.with_attributes(Map::new());
        let decision = engine.check_permission(&with_attrs).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.reason, "granted by policy 'counting'");
        assert_eq!(policy.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ownership_policy_grants_owner() {
        let f = Fixture::new();
        let user = UserId::new();
        let engine = f.engine().with_policy(Arc::new(OwnershipPolicy::new()));

        let request = AccessRequest::new(user, Permission::new("a:b:edit"))
            .on_resource("document", "d-1")
            .with_attributes(attrs(json!({"ownerId": user.to_string()})));
        assert!(engine.check_permission(&request).await.unwrap().allowed);

        let stranger = AccessRequest {
            user_id: UserId::new(),
            ..request
        };
        assert!(!engine.check_permission(&stranger).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn expired_assignment_is_inert() {
        let f = Fixture::new();
        let user = UserId::new();
        let engine = f.engine();
        let yesterday = f.clock.now() - Duration::days(1);
        engine
            .grant_role(RoleGrant {
                valid_from: Some(yesterday - Duration::days(30)),
                valid_until: Some(yesterday),
                ..f.grant(AssignmentSubject::User(user), &f.editor)
            })
            .await
            .unwrap();

        let request = AccessRequest::new(user, Permission::new("a:b:edit"));
        assert!(!engine.check_permission(&request).await.unwrap().allowed);

        let batch = engine.get_user_permissions_batch(&[user.to_string()]).await.unwrap();
        assert_eq!(batch.get(&user), Some(&vec![]));
    }

    #[tokio::test]
    async fn assignment_lapses_as_time_passes() {
        let f = Fixture::new();
        let user = UserId::new();
        let engine = f.engine();
        engine
            .grant_role(RoleGrant {
                valid_until: Some(f.clock.now() + Duration::hours(1)),
                ..f.grant(AssignmentSubject::User(user), &f.viewer)
            })
            .await
            .unwrap();

        let request = AccessRequest::new(user, Permission::new("a:b:view"));
        assert!(engine.check_permission(&request).await.unwrap().allowed);
        f.clock.advance(Duration::hours(1));
        assert!(!engine.check_permission(&request).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn group_roles_are_inherited() {
        let f = Fixture::new();
        let user = UserId::new();
        let group = GroupId::new();
        f.repo.add_group_member(user, group);
        let engine = f.engine();
        engine
            .grant_role(f.grant(AssignmentSubject::Group(group), &f.editor))
            .await
            .unwrap();

        let request = AccessRequest::new(user, Permission::new("a:b:edit"));
        let decision = engine.check_permission(&request).await.unwrap();
        assert_eq!(decision.reason, "granted by role 'editor'");
    }

    #[tokio::test]
    async fn scoped_assignment_counts_only_on_its_resource() {
        let f = Fixture::new();
        let user = UserId::new();
        let engine = f.engine();
        engine
            .grant_role(RoleGrant {
                scope: Some(AssignmentScope {
                    scope_type: "project".to_string(),
                    scope_id: "p-1".to_string(),
                }),
                ..f.grant(AssignmentSubject::User(user), &f.editor)
            })
            .await
            .unwrap();

        let edit = Permission::new("a:b:edit");
        let on_p1 = AccessRequest::new(user, edit.clone()).on_resource("project", "p-1");
        let on_p2 = AccessRequest::new(user, edit.clone()).on_resource("project", "p-2");
        assert!(engine.check_permission(&on_p1).await.unwrap().allowed);
        assert!(!engine.check_permission(&on_p2).await.unwrap().allowed);
        assert!(!engine.check_permission(&AccessRequest::new(user, edit)).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn revocation_takes_effect_immediately() {
        let f = Fixture::new();
        let user = UserId::new();
        let engine = f.engine();
        let assignment = engine
            .grant_role(f.grant(AssignmentSubject::User(user), &f.viewer))
            .await
            .unwrap();

        let request = AccessRequest::new(user, Permission::new("a:b:view"));
        assert!(engine.check_permission(&request).await.unwrap().allowed);
        assert!(engine.revoke_assignment(assignment.id).await.unwrap());
        assert!(!engine.check_permission(&request).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn granting_unknown_role_fails() {
        let f = Fixture::new();
        let role_id = RoleId::new();
        let err = f
            .engine()
            .grant_role(RoleGrant {
                role_id,
                ..f.grant(AssignmentSubject::User(UserId::new()), &f.viewer)
            })
            .await
            .unwrap_err();
        assert_eq!(err, EngineError::UnknownRole(role_id));
    }

    #[tokio::test]
    async fn batches_key_every_well_formed_id_and_drop_malformed() {
        let f = Fixture::new();
        let engine = f.engine();
        let with_role = UserId::new();
        let without_role = UserId::new();
        let group = GroupId::new();
        f.repo.add_group_member(with_role, group);
        engine
            .grant_role(f.grant(AssignmentSubject::Group(group), &f.viewer))
            .await
            .unwrap();

        let ids = vec![
            with_role.to_string(),
            without_role.to_string(),
            "not-a-uuid".to_string(),
            String::new(),
        ];

        let permissions = engine.get_user_permissions_batch(&ids).await.unwrap();
        assert_eq!(permissions.len(), 2);
        assert_eq!(permissions[&with_role], vec![Permission::new("a:b:view")]);
        assert!(permissions[&without_role].is_empty());

        let roles = engine.get_user_roles_batch(&ids).await.unwrap();
        assert_eq!(roles.len(), 2);
        assert_eq!(roles[&with_role], vec![f.viewer.clone()]);

        let group_roles = engine
            .get_group_roles_batch(&[group.to_string(), "bogus".to_string()])
            .await
            .unwrap();
        assert_eq!(group_roles.len(), 1);
        assert_eq!(group_roles[&group], vec![f.viewer.clone()]);

        let unknown_role = RoleId::new();
        let role_permissions = engine
            .get_role_permissions_batch(&[f.editor.id.to_string(), unknown_role.to_string()])
            .await
            .unwrap();
        assert_eq!(role_permissions[&f.editor.id], f.editor.permissions);
        assert!(role_permissions[&unknown_role].is_empty());

        assert_eq!(
            engine.get_user_permissions(with_role).await.unwrap(),
            vec![Permission::new("a:b:view")]
        );
    }

    #[tokio::test]
    async fn permissions_batch_ignores_scoped_grants() {
        let f = Fixture::new();
        let engine = f.engine();
        let user = UserId::new();
        engine
            .grant_role(RoleGrant {
                scope: Some(AssignmentScope {
                    scope_type: "project".to_string(),
                    scope_id: "p-1".to_string(),
                }),
                ..f.grant(AssignmentSubject::User(user), &f.editor)
            })
            .await
            .unwrap();

        let permissions = engine.get_user_permissions_batch(&[user.to_string()]).await.unwrap();
        assert!(permissions[&user].is_empty());
        let roles = engine.get_user_roles_batch(&[user.to_string()]).await.unwrap();
        assert_eq!(roles[&user], vec![f.editor.clone()]);
    }
}
