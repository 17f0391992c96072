use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use warden_auth::service::ServicePrincipalRepository;
use warden_auth::{Permission, RepositoryError, ServicePrincipal};
use warden_core::ServicePrincipalId;

use super::map_sqlx_error;

#[derive(Debug, Clone)]
pub struct PostgresServicePrincipalRepository {
    pool: Arc<PgPool>,
}

impl PostgresServicePrincipalRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

fn permission_strings(principal: &ServicePrincipal) -> Vec<String> {
    principal
        .permissions
        .iter()
        .map(|p| p.as_str().to_string())
        .collect()
}

#[async_trait]
impl ServicePrincipalRepository for PostgresServicePrincipalRepository {
    #[instrument(skip(self), err)]
    async fn find(&self, service_id: &str) -> Result<Option<ServicePrincipal>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, service_id, client_secret_hash, permissions, enabled, created_at, updated_at
            FROM service_principals
            WHERE service_id = $1
            "#,
        )
        .bind(service_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_service_principal", e))?;

        row.map(|row| {
            ServicePrincipalRow::from_row(&row)
                .map(ServicePrincipal::from)
                .map_err(|e| map_sqlx_error("find_service_principal", e))
        })
        .transpose()
    }

    #[instrument(skip(self, principal), fields(service_id = %principal.service_id), err)]
    async fn insert(&self, principal: &ServicePrincipal) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO service_principals (
                id, service_id, client_secret_hash, permissions, enabled, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(principal.id.as_uuid())
        .bind(&principal.service_id)
        .bind(&principal.client_secret_hash)
        .bind(permission_strings(principal))
        .bind(principal.enabled)
        .bind(principal.created_at)
        .bind(principal.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_service_principal", e))?;
        Ok(())
    }

    #[instrument(skip(self, principal), fields(service_id = %principal.service_id), err)]
    async fn update(&self, principal: &ServicePrincipal) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE service_principals
            SET id = $1,
                client_secret_hash = $3,
                permissions = $4,
                enabled = $5,
                updated_at = $6
            WHERE service_id = $2
            "#,
        )
        .bind(principal.id.as_uuid())
        .bind(&principal.service_id)
        .bind(&principal.client_secret_hash)
        .bind(permission_strings(principal))
        .bind(principal.enabled)
        .bind(principal.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_service_principal", e))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Query(format!(
                "no service principal '{}'",
                principal.service_id
            )));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct ServicePrincipalRow {
    id: Uuid,
    service_id: String,
    client_secret_hash: String,
    permissions: Vec<String>,
    enabled: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for ServicePrincipalRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(ServicePrincipalRow {
            id: row.try_get("id")?,
            service_id: row.try_get("service_id")?,
            client_secret_hash: row.try_get("client_secret_hash")?,
            permissions: row.try_get("permissions")?,
            enabled: row.try_get("enabled")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl From<ServicePrincipalRow> for ServicePrincipal {
    fn from(row: ServicePrincipalRow) -> Self {
        ServicePrincipal {
            id: ServicePrincipalId::from_uuid(row.id),
            service_id: row.service_id,
            client_secret_hash: row.client_secret_hash,
            permissions: row.permissions.into_iter().map(Permission::from).collect(),
            enabled: row.enabled,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
