//! OAuth2 client-credentials grant and refresh-token exchange.

use std::sync::Arc;

use axum::{
    Form, Json,
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::app::dto::{RefreshRequest, TokenRequest};
use crate::app::{errors, services::AppServices};

const CLIENT_CREDENTIALS: &str = "client_credentials";

fn required(value: Option<String>, field: &'static str) -> Result<String, Response> {
    value.filter(|v| !v.is_empty()).ok_or_else(|| {
        errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            format!("{field} is required"),
        )
    })
}

/// POST /oauth/token
pub async fn token(
    Extension(services): Extension<Arc<AppServices>>,
    Form(request): Form<TokenRequest>,
) -> Response {
    if request.grant_type != CLIENT_CREDENTIALS {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "unsupported_grant_type",
            "only client_credentials is supported",
        );
    }

    let fields = required(request.client_id, "client_id").and_then(|client_id| {
        let secret = required(request.client_secret, "client_secret")?;
        let audience = required(request.audience, "audience")?;
        Ok((client_id, secret, audience))
    });
    let (client_id, client_secret, audience) = match fields {
        Ok(fields) => fields,
        Err(response) => return response,
    };

    match services
        .credentials
        .issue_token(&client_id, &client_secret, &audience)
        .await
    {
        Ok(grant) => {
            tracing::info!(service_id = %client_id, audience = %audience, "service token issued");
            Json(grant).into_response()
        }
        Err(e) => errors::credential_error(e),
    }
}

/// POST /auth/refresh
pub async fn refresh(
    Extension(services): Extension<Arc<AppServices>>,
    Json(request): Json<RefreshRequest>,
) -> Response {
    match services.sessions.refresh(&request.refresh_token).await {
        Ok(tokens) => Json(tokens).into_response(),
        Err(e) => errors::session_error(e),
    }
}
