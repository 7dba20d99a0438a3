//! Auth: typed JWT claims, roles, token validation.

pub mod claims;
pub mod roles;
pub mod validator;

pub use claims::Claims;
pub use roles::{Role, RoleSet};
pub use validator::{Hs256JwtValidator, JwtValidator, TokenError};
