//! Monetary comparison helpers.
//!
//! Amounts are stored with two decimal places; every inequality runs on
//! integer cents so float drift can never flip a funding decision. The
//! available side rounds down, the required side rounds up.

/// Cents available: rounds toward zero funds.
pub fn floor_cents(amount: f64) -> i64 {
    (amount * 100.0).floor() as i64
}

/// Cents required: rounds toward more owed.
pub fn ceil_cents(amount: f64) -> i64 {
    (amount * 100.0).ceil() as i64
}

/// True when `balance` can cover `required`.
pub fn covers(balance: f64, required: f64) -> bool {
    floor_cents(balance) >= ceil_cents(required)
}

/// Round an order total up to whole cents.
pub fn round_up_to_cents(amount: f64) -> f64 {
    (amount * 100.0).ceil() / 100.0
}

/// Round a deposit down to whole cents.
pub fn round_down_to_cents(amount: f64) -> f64 {
    (amount * 100.0).floor() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cent_rounding() {
        assert_eq!(floor_cents(10.019), 1001);
        assert_eq!(ceil_cents(10.011), 1002);
        assert_eq!(round_up_to_cents(19.999), 20.0);
        assert_eq!(round_down_to_cents(19.999), 19.99);
    }

    #[test]
    fn exact_balance_covers() {
        assert!(covers(20.0, 20.0));
        assert!(covers(100.0, 20.0));
    }

    #[test]
    fn short_balance_does_not_cover() {
        assert!(!covers(5.0, 20.0));
        // A fraction of a cent short still fails.
        assert!(!covers(19.99, 20.0));
    }
}
