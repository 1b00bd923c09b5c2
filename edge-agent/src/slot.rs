//! Component A: Clock & Slot Mapper.

/// Maps an event timestamp (Unix seconds) to a non-negative slot index.
/// Negative event times clamp to zero rather than producing a negative slot.
pub fn slot_of(event_time: f64, slot_seconds: i64) -> i64 {
    let clamped = event_time.max(0.0);
    (clamped / slot_seconds as f64).floor() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_event_time_is_slot_zero() {
        assert_eq!(slot_of(0.0, 300), 0);
    }

    #[test]
    fn floors_within_a_slot() {
        assert_eq!(slot_of(299.999, 300), 0);
        assert_eq!(slot_of(300.0, 300), 1);
        assert_eq!(slot_of(599.0, 300), 1);
        assert_eq!(slot_of(600.0, 300), 2);
    }

    #[test]
    fn negative_event_time_clamps_to_zero() {
        assert_eq!(slot_of(-50.0, 300), 0);
    }

    #[test]
    fn matches_integer_division_for_real_unix_time() {
        assert_eq!(slot_of(1_700_000_000.0, 300), 1_700_000_000 / 300);
    }

    #[test]
    fn honors_a_narrower_slot_width() {
        assert_eq!(slot_of(61.0, 60), 1);
        assert_eq!(slot_of(59.999, 60), 0);
    }
}
