use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use warden_auth::{RepositoryError, UserDirectory, UserRecord, UserStatus};
use warden_core::UserId;

use super::map_sqlx_error;

/// Read-only view of the `users` table.
#[derive(Debug, Clone)]
pub struct PostgresUserDirectory {
    pool: Arc<PgPool>,
}

impl PostgresUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

fn parse_status(raw: &str) -> Result<UserStatus, RepositoryError> {
    match raw {
        "active" => Ok(UserStatus::Active),
        "suspended" => Ok(UserStatus::Suspended),
        other => Err(RepositoryError::Query(format!("unknown user status '{other}'"))),
    }
}

#[async_trait]
impl UserDirectory for PostgresUserDirectory {
    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn find_user(&self, id: UserId) -> Result<Option<UserRecord>, RepositoryError> {
        let row = sqlx::query("SELECT id, email, status FROM users WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_user", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let user_id: Uuid = row.try_get("id").map_err(|e| map_sqlx_error("find_user", e))?;
        let email: String = row.try_get("email").map_err(|e| map_sqlx_error("find_user", e))?;
        let status: String = row.try_get("status").map_err(|e| map_sqlx_error("find_user", e))?;

        Ok(Some(UserRecord {
            id: UserId::from_uuid(user_id),
            email,
            status: parse_status(&status)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_column_round_trips_through_as_str() {
        for status in [UserStatus::Active, UserStatus::Suspended] {
            assert_eq!(parse_status(status.as_str()).unwrap(), status);
        }
        assert!(parse_status("deleted").is_err());
    }
}
