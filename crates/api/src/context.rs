use std::sync::Arc;

use warden_auth::RequestPrincipal;

/// Authenticated caller for the current request.
///
/// Inserted by the auth middleware once the route's permission (if any) has
/// been checked; present on every protected route.
#[derive(Debug, Clone)]
pub struct PrincipalContext {
    principal: Arc<RequestPrincipal>,
}

impl PrincipalContext {
    pub fn new(principal: RequestPrincipal) -> Self {
        Self {
            principal: Arc::new(principal),
        }
    }

    pub fn principal(&self) -> &RequestPrincipal {
        &self.principal
    }
}
