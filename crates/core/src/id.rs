//! Strongly-typed identifiers used across the domain.
//!
//! All rows use 64-bit serial ids; the wire format carries them as plain
//! integers. A zero id is the "absent" sentinel on incoming messages and is
//! rejected during validation.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

macro_rules! impl_i64_newtype {
    ($t:ident, $name:literal) => {
        #[derive(
            Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $t(i64);

        impl $t {
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            pub const fn as_i64(&self) -> i64 {
                self.0
            }

            /// Zero is the wire-format sentinel for a missing id.
            pub const fn is_nil(&self) -> bool {
                self.0 == 0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<i64> for $t {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$t> for i64 {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let id = s
                    .parse::<i64>()
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(id))
            }
        }
    };
}

impl_i64_newtype!(UserId, "UserId");
impl_i64_newtype!(OrderId, "OrderId");
impl_i64_newtype!(ItemId, "ItemId");
impl_i64_newtype!(StockId, "StockId");
impl_i64_newtype!(StockChangeId, "StockChangeId");
impl_i64_newtype!(PaymentId, "PaymentId");
impl_i64_newtype!(AccountId, "AccountId");
impl_i64_newtype!(CourierId, "CourierId");
impl_i64_newtype!(ReservationId, "ReservationId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_displays() {
        let id: OrderId = "42".parse().unwrap();
        assert_eq!(id, OrderId::new(42));
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn zero_is_nil() {
        assert!(OrderId::new(0).is_nil());
        assert!(!OrderId::new(1).is_nil());
    }

    #[test]
    fn rejects_garbage() {
        assert!("abc".parse::<PaymentId>().is_err());
    }
}
