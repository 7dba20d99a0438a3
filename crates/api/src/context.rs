//! Per-request identity context.

use mercato_auth::{Role, RoleSet};
use mercato_core::UserId;

/// Authenticated identity, derived from the bearer token by the auth
/// middleware and attached to every protected request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    user_id: UserId,
    username: String,
    roles: RoleSet,
}

impl AuthContext {
    pub fn new(user_id: UserId, username: String, roles: RoleSet) -> Self {
        Self {
            user_id,
            username,
            roles,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}
