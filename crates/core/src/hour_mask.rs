//! 24-bit delivery-hour masks.
//!
//! Bit `i` set means the wall-clock hour `[i, i+1)` is taken (in a
//! schedule) or requested (in a reservation).

use chrono::Timelike;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// All 24 hour bits.
const FULL_DAY: u32 = (1 << 24) - 1;

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HourMask(u32);

impl HourMask {
    pub const EMPTY: HourMask = HourMask(0);

    pub fn new(bits: u32) -> Self {
        Self(bits & FULL_DAY)
    }

    pub fn from_hour(hour: u32) -> Result<Self, DomainError> {
        if hour >= 24 {
            return Err(DomainError::validation(format!("hour {hour} out of range")));
        }
        Ok(Self(1 << hour))
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// True when any requested hour is already taken.
    pub fn overlaps(&self, other: HourMask) -> bool {
        self.0 & other.0 != 0
    }

    /// Schedule after reserving `requested`.
    pub fn reserve(&self, requested: HourMask) -> HourMask {
        HourMask(self.0 | requested.0)
    }

    /// Schedule after releasing `requested`. Clearing an already-clear bit
    /// is a no-op.
    pub fn release(&self, requested: HourMask) -> HourMask {
        HourMask(self.0 & !requested.0)
    }

    /// Lowest set hour, if any.
    pub fn first_hour(&self) -> Option<u32> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros())
        }
    }
}

impl core::fmt::Display for HourMask {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#08x}", self.0)
    }
}

/// Placeholder for the address→slot service: pick the next whole delivery
/// hour, rounding past half past up, and reject orders that would land the
/// one-hour window beyond the day.
pub fn next_delivery_hour<T: Timelike>(now: &T) -> Result<HourMask, DomainError> {
    let mut start = now.hour();
    if now.minute() > 30 {
        start += 1;
    }

    if start + 1 > 23 {
        return Err(DomainError::validation("too late to deliver"));
    }

    HourMask::from_hour(start)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveTime;

    use super::*;

    #[test]
    fn reserve_and_release_roundtrip() {
        let schedule = HourMask::EMPTY;
        let slot = HourMask::from_hour(14).unwrap();
        assert_eq!(slot.bits(), 0x4000);

        let taken = schedule.reserve(slot);
        assert!(taken.overlaps(slot));
        assert_eq!(taken.release(slot), HourMask::EMPTY);
    }

    #[test]
    fn release_of_clear_bit_is_noop() {
        let schedule = HourMask::new(0b0110);
        let slot = HourMask::from_hour(14).unwrap();
        assert_eq!(schedule.release(slot), schedule);
    }

    #[test]
    fn rounds_past_half_hour_up() {
        let t = NaiveTime::from_hms_opt(10, 31, 0).unwrap();
        assert_eq!(next_delivery_hour(&t).unwrap(), HourMask::from_hour(11).unwrap());

        let t = NaiveTime::from_hms_opt(10, 30, 0).unwrap();
        assert_eq!(next_delivery_hour(&t).unwrap(), HourMask::from_hour(10).unwrap());
    }

    #[test]
    fn too_late_to_deliver() {
        let t = NaiveTime::from_hms_opt(23, 0, 0).unwrap();
        assert!(next_delivery_hour(&t).is_err());

        let t = NaiveTime::from_hms_opt(22, 45, 0).unwrap();
        assert!(next_delivery_hour(&t).is_err());
    }

    #[test]
    fn mask_is_capped_to_24_bits() {
        assert_eq!(HourMask::new(u32::MAX).bits(), (1 << 24) - 1);
    }
}
