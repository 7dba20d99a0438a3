//! Topic names.
//!
//! Each `X` / `X_status` pair links one processor's input and output; the
//! saga coordinator consumes the `_status` side and produces into the
//! command side. `notifications` is produce-only for the coordinator.

pub const STOCK_CHANGES: &str = "stock_changes";
pub const STOCK_CHANGES_STATUS: &str = "stock_changes_status";

pub const PAYMENTS: &str = "payments";
pub const PAYMENTS_STATUS: &str = "payments_status";

pub const COUR_RESERVE: &str = "cour_reserve";
pub const COUR_RESERVE_STATUS: &str = "cour_reserve_status";

pub const NOTIFICATIONS: &str = "notifications";
