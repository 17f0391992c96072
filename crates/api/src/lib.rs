//! HTTP surface of warden: bearer-token middleware, OAuth2 token endpoint and
//! administrative routes.

pub mod app;
pub mod context;
pub mod middleware;
