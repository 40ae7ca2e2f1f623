//! Caller identity and route access requirements.

mod gate;

pub use gate::{token_of, AnonymousPaths};

use crate::error::AppError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;

/// Authenticated caller: numeric id, opaque profile payload, and the role and
/// permission sets the access checks run against.
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub id: i64,
    pub info: Value,
    pub roles: BTreeSet<String>,
    pub permissions: BTreeSet<String>,
}

impl AuthUser {
    pub fn new(id: i64, info: Value) -> Self {
        AuthUser {
            id,
            info,
            roles: BTreeSet::new(),
            permissions: BTreeSet::new(),
        }
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = collect_non_blank(roles);
        self
    }

    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions = collect_non_blank(permissions);
        self
    }
}

/// Composition mode for a required role/permission set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Caller's set must exactly equal the required set.
    And,
    /// At least one required element must be present in the caller's set.
    Or,
}

/// Access requirement attached to a route at registration time.
#[derive(Clone, Debug, Default)]
pub enum Access {
    #[default]
    Public,
    RequireRole {
        roles: BTreeSet<String>,
        mode: Mode,
    },
    RequirePermission {
        permissions: BTreeSet<String>,
        mode: Mode,
        /// Non-empty: a caller whose role set AND-matches this set is allowed
        /// without a permission check.
        or_roles: BTreeSet<String>,
    },
}

impl Access {
    pub fn require_role<I, S>(roles: I, mode: Mode) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Access::RequireRole {
            roles: collect_non_blank(roles),
            mode,
        }
    }

    pub fn require_permission<I, J, S, T>(permissions: I, mode: Mode, or_roles: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Access::RequirePermission {
            permissions: collect_non_blank(permissions),
            mode,
            or_roles: collect_non_blank(or_roles),
        }
    }

    /// Evaluate this requirement against an authenticated caller.
    pub fn permits(&self, user: &AuthUser) -> bool {
        match self {
            Access::Public => true,
            Access::RequireRole { roles, mode } => {
                if user.roles.is_empty() {
                    return false;
                }
                validate_set(roles, &user.roles, *mode)
            }
            Access::RequirePermission {
                permissions,
                mode,
                or_roles,
            } => {
                if user.permissions.is_empty() && user.roles.is_empty() {
                    return false;
                }
                if !or_roles.is_empty() && validate_set(or_roles, &user.roles, Mode::And) {
                    return true;
                }
                validate_set(permissions, &user.permissions, *mode)
            }
        }
    }
}

/// AND requires exact set equality (a superset is denied); OR requires any
/// intersection. An empty requirement always passes.
fn validate_set(required: &BTreeSet<String>, actual: &BTreeSet<String>, mode: Mode) -> bool {
    if required.is_empty() {
        return true;
    }
    match mode {
        Mode::And => required == actual,
        Mode::Or => required.iter().any(|r| actual.contains(r)),
    }
}

fn collect_non_blank<I, S>(items: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items
        .into_iter()
        .map(Into::into)
        .filter(|s| !s.trim().is_empty())
        .collect()
}

/// External authentication collaborator: resolves a bearer token to a caller
/// identity, or nothing. The dispatcher treats "nothing" as an
/// authentication failure.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<Option<AuthUser>, AppError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user(roles: &[&str], permissions: &[&str]) -> AuthUser {
        AuthUser::new(1, json!({}))
            .with_roles(roles.iter().copied())
            .with_permissions(permissions.iter().copied())
    }

    #[test]
    fn and_mode_requires_exact_equality() {
        let access = Access::require_role(["admin"], Mode::And);
        assert!(access.permits(&user(&["admin"], &[])));
        // superset is denied
        assert!(!access.permits(&user(&["admin", "user"], &[])));
        assert!(!access.permits(&user(&["user"], &[])));
    }

    #[test]
    fn or_mode_requires_any_intersection() {
        let access = Access::require_role(["admin", "auditor"], Mode::Or);
        assert!(access.permits(&user(&["auditor", "user"], &[])));
        assert!(!access.permits(&user(&["user"], &[])));
    }

    #[test]
    fn empty_caller_role_set_fails_role_requirement() {
        let access = Access::require_role(["admin"], Mode::Or);
        assert!(!access.permits(&user(&[], &["read"])));
    }

    #[test]
    fn blank_entries_are_filtered_at_construction() {
        let access = Access::require_role(["admin", "", "  "], Mode::And);
        assert!(access.permits(&user(&["admin"], &[])));
    }

    #[test]
    fn or_roles_short_circuit_permission_check() {
        let access = Access::require_permission(["user:write"], Mode::And, ["admin"]);
        assert!(access.permits(&user(&["admin"], &[])));
        assert!(access.permits(&user(&[], &["user:write"])));
        assert!(!access.permits(&user(&["user"], &["user:read"])));
    }

    #[test]
    fn public_permits_everyone() {
        assert!(Access::Public.permits(&user(&[], &[])));
    }
}
