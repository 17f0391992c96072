use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use warden_auth::engine::{AssignmentScope, AssignmentSubject, RbacRepository, Role, RoleAssignment};
use warden_auth::{Permission, RepositoryError};
use warden_core::{GroupId, RoleAssignmentId, RoleId, UserId};

use super::map_sqlx_error;

/// RBAC graph stored in `roles`, `role_permissions`, `group_members` and
/// `role_assignments`.
///
/// Assignments are returned regardless of their validity window; the engine
/// filters on its own clock.
#[derive(Debug, Clone)]
pub struct PostgresRbacRepository {
    pool: Arc<PgPool>,
}

impl PostgresRbacRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create or replace a role and its permission set in one transaction.
    #[instrument(skip(self, role), fields(role_id = %role.id, role = %role.name), err)]
    pub async fn put_role(&self, role: &Role) -> Result<(), RepositoryError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query(
            r#"
            INSERT INTO roles (id, name)
            VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name
            "#,
        )
        .bind(role.id.as_uuid())
        .bind(&role.name)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("upsert_role", e))?;

        sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
            .bind(role.id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("clear_role_permissions", e))?;

        let permissions: Vec<String> = role.permissions.iter().map(|p| p.as_str().to_string()).collect();
        sqlx::query(
            r#"
            INSERT INTO role_permissions (role_id, permission)
            SELECT $1, p FROM UNNEST($2::TEXT[]) AS p
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(role.id.as_uuid())
        .bind(&permissions)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_role_permissions", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self), fields(user_id = %user, group_id = %group), err)]
    pub async fn add_group_member(&self, user: UserId, group: GroupId) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO group_members (group_id, user_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(group.as_uuid())
        .bind(user.as_uuid())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("add_group_member", e))?;
        Ok(())
    }
}

#[async_trait]
impl RbacRepository for PostgresRbacRepository {
    #[instrument(skip(self, users), fields(users = users.len()), err)]
    async fn groups_of_users(
        &self,
        users: &[UserId],
    ) -> Result<HashMap<UserId, Vec<GroupId>>, RepositoryError> {
        let ids: Vec<Uuid> = users.iter().map(|u| *u.as_uuid()).collect();
        let rows = sqlx::query(
            r#"
            SELECT user_id, group_id
            FROM group_members
            WHERE user_id = ANY($1)
            "#,
        )
        .bind(&ids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("groups_of_users", e))?;

        let mut memberships: HashMap<UserId, Vec<GroupId>> = HashMap::new();
        for row in rows {
            let user: Uuid = row
                .try_get("user_id")
                .map_err(|e| map_sqlx_error("groups_of_users", e))?;
            let group: Uuid = row
                .try_get("group_id")
                .map_err(|e| map_sqlx_error("groups_of_users", e))?;
            memberships
                .entry(UserId::from_uuid(user))
                .or_default()
                .push(GroupId::from_uuid(group));
        }
        Ok(memberships)
    }

    #[instrument(skip(self, subjects), fields(subjects = subjects.len()), err)]
    async fn assignments_for(
        &self,
        subjects: &[AssignmentSubject],
    ) -> Result<Vec<RoleAssignment>, RepositoryError> {
        let mut users = Vec::new();
        let mut groups = Vec::new();
        for subject in subjects {
            match subject {
                AssignmentSubject::User(id) => users.push(*id.as_uuid()),
                AssignmentSubject::Group(id) => groups.push(*id.as_uuid()),
            }
        }

        let rows = sqlx::query(
            r#"
            SELECT id, role_id, subject_kind, subject_id, scope_type, scope_id, valid_from, valid_until
            FROM role_assignments
            WHERE (subject_kind = 'user' AND subject_id = ANY($1))
               OR (subject_kind = 'group' AND subject_id = ANY($2))
            "#,
        )
        .bind(&users)
        .bind(&groups)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("assignments_for", e))?;

        rows.iter()
            .map(|row| {
                AssignmentRow::from_row(row)
                    .map_err(|e| map_sqlx_error("assignments_for", e))?
                    .into_assignment()
            })
            .collect()
    }

    #[instrument(skip(self, ids), fields(roles = ids.len()), err)]
    async fn roles_by_ids(&self, ids: &[RoleId]) -> Result<Vec<Role>, RepositoryError> {
        let ids: Vec<Uuid> = ids.iter().map(|r| *r.as_uuid()).collect();
        let rows = sqlx::query(
            r#"
            SELECT
                r.id,
                r.name,
                COALESCE(
                    array_agg(rp.permission ORDER BY rp.permission)
                        FILTER (WHERE rp.permission IS NOT NULL),
                    '{}'
                ) AS permissions
            FROM roles r
            LEFT JOIN role_permissions rp ON rp.role_id = r.id
            WHERE r.id = ANY($1)
            GROUP BY r.id, r.name
            "#,
        )
        .bind(&ids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("roles_by_ids", e))?;

        let mut roles = Vec::with_capacity(rows.len());
        for row in rows {
            let id: Uuid = row.try_get("id").map_err(|e| map_sqlx_error("roles_by_ids", e))?;
            let name: String = row.try_get("name").map_err(|e| map_sqlx_error("roles_by_ids", e))?;
            let permissions: Vec<String> = row
                .try_get("permissions")
                .map_err(|e| map_sqlx_error("roles_by_ids", e))?;
            roles.push(Role {
                id: RoleId::from_uuid(id),
                name,
                permissions: permissions.into_iter().map(Permission::from).collect(),
            });
        }
        Ok(roles)
    }

    #[instrument(
        skip(self, assignment),
        fields(assignment_id = %assignment.id, role_id = %assignment.role_id),
        err
    )]
    async fn insert_assignment(&self, assignment: &RoleAssignment) -> Result<(), RepositoryError> {
        let (kind, subject_id) = match assignment.subject {
            AssignmentSubject::User(id) => ("user", *id.as_uuid()),
            AssignmentSubject::Group(id) => ("group", *id.as_uuid()),
        };
        let (scope_type, scope_id) = match &assignment.scope {
            Some(scope) => (Some(scope.scope_type.as_str()), Some(scope.scope_id.as_str())),
            None => (None, None),
        };

        sqlx::query(
            r#"
            INSERT INTO role_assignments (
                id, role_id, subject_kind, subject_id, scope_type, scope_id, valid_from, valid_until
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(assignment.id.as_uuid())
        .bind(assignment.role_id.as_uuid())
        .bind(kind)
        .bind(subject_id)
        .bind(scope_type)
        .bind(scope_id)
        .bind(assignment.valid_from)
        .bind(assignment.valid_until)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_assignment", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(assignment_id = %id), err)]
    async fn delete_assignment(&self, id: RoleAssignmentId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM role_assignments WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_assignment", e))?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug)]
struct AssignmentRow {
    id: Uuid,
    role_id: Uuid,
    subject_kind: String,
    subject_id: Uuid,
    scope_type: Option<String>,
    scope_id: Option<String>,
    valid_from: Option<DateTime<Utc>>,
    valid_until: Option<DateTime<Utc>>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for AssignmentRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(AssignmentRow {
            id: row.try_get("id")?,
            role_id: row.try_get("role_id")?,
            subject_kind: row.try_get("subject_kind")?,
            subject_id: row.try_get("subject_id")?,
            scope_type: row.try_get("scope_type")?,
            scope_id: row.try_get("scope_id")?,
            valid_from: row.try_get("valid_from")?,
            valid_until: row.try_get("valid_until")?,
        })
    }
}

impl AssignmentRow {
    fn into_assignment(self) -> Result<RoleAssignment, RepositoryError> {
        let subject = match self.subject_kind.as_str() {
            "user" => AssignmentSubject::User(UserId::from_uuid(self.subject_id)),
            "group" => AssignmentSubject::Group(GroupId::from_uuid(self.subject_id)),
            other => {
                return Err(RepositoryError::Query(format!(
                    "assignment {} has unknown subject kind '{other}'",
                    self.id
                )));
            }
        };
        let scope = match (self.scope_type, self.scope_id) {
            (Some(scope_type), Some(scope_id)) => Some(AssignmentScope { scope_type, scope_id }),
            _ => None,
        };
        Ok(RoleAssignment {
            id: RoleAssignmentId::from_uuid(self.id),
            role_id: RoleId::from_uuid(self.role_id),
            subject,
            scope,
            valid_from: self.valid_from,
            valid_until: self.valid_until,
        })
    }
}
