//! JWT claims model.
//!
//! The token is parsed once into this schema; a type mismatch on any
//! field rejects the token. No duck-typed map lookups downstream.

use serde::{Deserialize, Serialize};

use mercato_core::UserId;

use crate::roles::RoleSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: UserId,

    pub username: String,

    /// Token id; lets a blacklist target a single grant.
    #[serde(default)]
    pub jti: String,

    /// Expiry, seconds since the epoch.
    pub exp: i64,

    #[serde(default)]
    pub roles: RoleSet,
}

#[cfg(test)]
mod tests {
    use crate::roles::Role;

    use super::*;

    #[test]
    fn parses_full_claims() {
        let raw = r#"{
            "user_id": 7,
            "username": "alice",
            "jti": "abc-123",
            "exp": 1893456000,
            "roles": ["courier"]
        }"#;

        let claims: Claims = serde_json::from_str(raw).unwrap();
        assert_eq!(claims.user_id, UserId::new(7));
        assert!(claims.roles.contains(&Role::Courier));
    }

    #[test]
    fn missing_optionals_default() {
        let raw = r#"{"user_id": 7, "username": "alice", "exp": 1893456000}"#;
        let claims: Claims = serde_json::from_str(raw).unwrap();
        assert!(claims.jti.is_empty());
        assert!(claims.roles.is_empty());
    }

    #[test]
    fn type_mismatch_is_rejected() {
        // user_id as a string is a malformed token, not a coercion case.
        let raw = r#"{"user_id": "7", "username": "alice", "exp": 1893456000}"#;
        assert!(serde_json::from_str::<Claims>(raw).is_err());
    }
}
