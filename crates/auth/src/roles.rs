//! RBAC roles.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Courier,
    Admin,
}

/// Roles surface as a set: duplicates collapse, lookups are O(log n).
pub type RoleSet = BTreeSet<Role>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_parse_lowercase() {
        let roles: RoleSet = serde_json::from_str(r#"["courier", "courier", "admin"]"#).unwrap();
        assert_eq!(roles.len(), 2);
        assert!(roles.contains(&Role::Courier));
    }

    #[test]
    fn unknown_role_is_rejected() {
        assert!(serde_json::from_str::<RoleSet>(r#"["superuser"]"#).is_err());
    }
}
