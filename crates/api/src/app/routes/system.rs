use axum::{Json, extract::Extension, http::StatusCode};

use crate::app::dto::WhoAmIResponse;
use crate::context::PrincipalContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(Extension(ctx): Extension<PrincipalContext>) -> Json<WhoAmIResponse> {
    Json(WhoAmIResponse::from(ctx.principal()))
}
