//! Token-based permission checks.
//!
//! - No I/O
//! - No panics
//! - Exact string membership, no wildcards
//!
//! These checks trust the permissions embedded at issuance time. A revoked
//! permission stays effective until the presenting token expires; callers that
//! cannot tolerate that window use [`crate::engine::AuthorizationEngine`].

use crate::Permission;
use crate::error::AuthFailure;
use crate::principal::{PrincipalType, RequestPrincipal};

#[derive(Debug, Default, Clone, Copy)]
pub struct PermissionChecker;

impl PermissionChecker {
    /// Require `permission` among the permissions carried by the token itself.
    pub fn require(
        &self,
        principal: &RequestPrincipal,
        permission: &Permission,
    ) -> Result<(), AuthFailure> {
        check(&principal.permissions_from_token, permission)
    }

    /// Require `permission` on behalf of the end user.
    ///
    /// Service principals are judged on the propagated `user_permissions` and
    /// are denied when no user context travels with the token. User principals
    /// are judged on their own token permissions.
    pub fn require_user_scoped(
        &self,
        principal: &RequestPrincipal,
        permission: &Permission,
    ) -> Result<(), AuthFailure> {
        match principal.principal_type {
            PrincipalType::User => check(&principal.permissions_from_token, permission),
            PrincipalType::Service => match &principal.user_permissions {
                Some(granted) => check(granted, permission),
                None => Err(denied(permission)),
            },
        }
    }

    /// Require every permission; reports the first one missing.
    pub fn require_all(
        &self,
        principal: &RequestPrincipal,
        permissions: &[Permission],
    ) -> Result<(), AuthFailure> {
        permissions
            .iter()
            .try_for_each(|p| self.require(principal, p))
    }

    /// Require at least one of `permissions`. An empty list is always denied.
    pub fn require_any(
        &self,
        principal: &RequestPrincipal,
        permissions: &[Permission],
    ) -> Result<(), AuthFailure> {
        if permissions
            .iter()
            .any(|p| principal.permissions_from_token.contains(p))
        {
            return Ok(());
        }
        let reported = permissions
            .first()
            .cloned()
            .unwrap_or_else(|| Permission::from_static("<none>"));
        Err(AuthFailure::AuthorizationDenied {
            permission: reported,
        })
    }
}

fn check(granted: &[Permission], required: &Permission) -> Result<(), AuthFailure> {
    if granted.contains(required) {
        Ok(())
    } else {
        Err(denied(required))
    }
}

fn denied(permission: &Permission) -> AuthFailure {
    AuthFailure::AuthorizationDenied {
        permission: permission.clone(),
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn user(perms: &[&str]) -> RequestPrincipal {
        RequestPrincipal {
            principal_type: PrincipalType::User,
            user_id: Some("user-1".to_string()),
            service_id: None,
            email: None,
            token: "t".to_string(),
            permissions_from_token: perms.iter().map(|p| Permission::new(p.to_string())).collect(),
            user_permissions: None,
        }
    }

    fn service(perms: &[&str], user_perms: Option<&[&str]>) -> RequestPrincipal {
        RequestPrincipal {
            principal_type: PrincipalType::Service,
            user_id: user_perms.map(|_| "user-1".to_string()),
            service_id: Some("svc".to_string()),
            user_permissions: user_perms
                .map(|ps| ps.iter().map(|p| Permission::new(p.to_string())).collect()),
            ..user(perms)
        }
    }

    #[test]
    fn view_does_not_imply_edit() {
        let principal = user(&["a:b:view"]);
        let checker = PermissionChecker;
        assert!(checker.require(&principal, &Permission::new("a:b:view")).is_ok());
        assert_eq!(
            checker.require(&principal, &Permission::new("a:b:edit")),
            Err(AuthFailure::AuthorizationDenied {
                permission: Permission::new("a:b:edit")
            })
        );
    }

    #[test]
    fn user_scoped_check_uses_propagated_permissions() {
        let checker = PermissionChecker;
        let p = Permission::new("a:b:view");

        let with_context = service(&[], Some(&["a:b:view"]));
        assert!(checker.require(&with_context, &p).is_err());
        assert!(checker.require_user_scoped(&with_context, &p).is_ok());

        let without_context = service(&["a:b:view"], None);
        assert!(checker.require_user_scoped(&without_context, &p).is_err());

        assert!(checker.require_user_scoped(&user(&["a:b:view"]), &p).is_ok());
    }

    #[test]
    fn require_all_reports_first_missing() {
        let principal = user(&["x:y:view"]);
        let err = PermissionChecker
            .require_all(
                &principal,
                &[
                    Permission::new("x:y:view"),
                    Permission::new("x:y:edit"),
                    Permission::new("x:y:delete"),
                ],
            )
            .unwrap_err();
        assert_eq!(
            err,
            AuthFailure::AuthorizationDenied {
                permission: Permission::new("x:y:edit")
            }
        );
    }

    #[test]
    fn require_any_of_nothing_is_denied() {
        let principal = user(&["x:y:view"]);
        assert!(PermissionChecker.require_any(&principal, &[]).is_err());
        assert!(PermissionChecker
            .require_any(
                &principal,
                &[Permission::new("x:y:edit"), Permission::new("x:y:view")]
            )
            .is_ok());
    }

    proptest! {
        #[test]
        fn require_is_membership_and_idempotent(
            granted in proptest::collection::vec("[a-c]:[a-c]:[a-c]", 0..6),
            wanted in "[a-c]:[a-c]:[a-c]",
        ) {
            let refs: Vec<&str> = granted.iter().map(String::as_str).collect();
            let principal = user(&refs);
            let permission = Permission::new(wanted.clone());

            let first = PermissionChecker.require(&principal, &permission);
            let second = PermissionChecker.require(&principal, &permission);
            prop_assert_eq!(first.is_ok(), granted.contains(&wanted));
            prop_assert_eq!(first, second);
        }
    }
}
