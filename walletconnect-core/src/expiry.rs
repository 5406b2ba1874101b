//! Expiry arithmetic shared by pairings and sessions.
//!
//! An expiry only ever moves forward, and never past `now + ceiling`.

/// `current + ttl`, if that is a strict increase within `now + ceiling`.
pub fn extend_by(current: i64, ttl: i64, now: i64, ceiling: i64) -> Option<i64> {
    if ttl <= 0 {
        return None;
    }
    let proposed = current.checked_add(ttl)?;
    extend_to(current, proposed, now, ceiling)
}

/// `proposed`, if it is a strict increase within `now + ceiling`.
pub fn extend_to(current: i64, proposed: i64, now: i64, ceiling: i64) -> Option<i64> {
    let max = now.checked_add(ceiling)?;
    (proposed > current && proposed <= max).then_some(proposed)
}

/// Whether `expiry` has passed at `now`.
pub fn is_expired(expiry: i64, now: i64) -> bool {
    expiry <= now
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DAY, SESSION_TTL};
    use proptest::prelude::*;

    #[test]
    fn extend_by_one_day_with_three_left() {
        let now = 1_000_000;
        let current = now + 3 * DAY;
        assert_eq!(extend_by(current, DAY, now, SESSION_TTL), Some(now + 4 * DAY));
    }

    #[test]
    fn extend_rejects_ceiling_and_non_increase() {
        let now = 1_000_000;
        let current = now + 3 * DAY;
        assert_eq!(extend_by(current, 5 * DAY, now, SESSION_TTL), None);
        assert_eq!(extend_by(current, 0, now, SESSION_TTL), None);
        assert_eq!(extend_to(current, current, now, SESSION_TTL), None);
        assert_eq!(extend_to(current, now + SESSION_TTL, now, SESSION_TTL), Some(now + SESSION_TTL));
    }

    #[test]
    fn expiry_boundary() {
        assert!(is_expired(10, 10));
        assert!(!is_expired(11, 10));
    }

    proptest! {
        #[test]
        fn accepted_expiry_is_increasing_and_bounded(
            now in 0i64..1_000_000_000,
            left in 0i64..SESSION_TTL,
            ttl in -DAY..(10 * DAY),
        ) {
            let current = now + left;
            match extend_by(current, ttl, now, SESSION_TTL) {
                Some(next) => {
                    prop_assert!(next > current);
                    prop_assert!(next <= now + SESSION_TTL);
                }
                None => prop_assert!(ttl <= 0 || current + ttl > now + SESSION_TTL),
            }
        }
    }
}
