//! Rate estimator.
//!
//! Pure arithmetic shown to the operator before committing a batch: how many
//! groups the recipient set splits into and roughly how long the run takes
//! at the configured pace.

use serde::{Deserialize, Serialize};
use sw_common::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    pub batches: u32,
    pub estimated_seconds: f64,
}

/// The last group incurs no trailing delay; `per_send_seconds` adds a fixed
/// per-message floor (pass 0.0 to estimate delays only).
pub fn estimate(
    total_customers: u32,
    batch_size: u32,
    delay_seconds: f64,
    per_send_seconds: f64,
) -> Result<Estimate> {
    if total_customers == 0 {
        return Err(EngineError::InvalidInput(
            "total_customers must be a positive integer".into(),
        ));
    }
    if batch_size == 0 {
        return Err(EngineError::InvalidInput(
            "batch_size must be a positive integer".into(),
        ));
    }
    if !delay_seconds.is_finite() || delay_seconds < 0.0 {
        return Err(EngineError::InvalidInput(
            "delay_seconds must be a non-negative number".into(),
        ));
    }
    if !per_send_seconds.is_finite() || per_send_seconds < 0.0 {
        return Err(EngineError::InvalidInput(
            "per_send_seconds must be a non-negative number".into(),
        ));
    }

    let batches = total_customers.div_ceil(batch_size);
    let estimated_seconds =
        (batches - 1) as f64 * delay_seconds + total_customers as f64 * per_send_seconds;

    Ok(Estimate { batches, estimated_seconds })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batches_is_ceil_of_total_over_size() {
        for (total, size, expected) in [
            (10u32, 3u32, 4u32),
            (10, 5, 2),
            (10, 10, 1),
            (10, 20, 1),
            (1, 1, 1),
            (11, 3, 4),
            (12, 3, 4),
            (13, 3, 5),
        ] {
            let e = estimate(total, size, 0.0, 0.0).unwrap();
            assert_eq!(e.batches, expected, "total={total} size={size}");
            assert!(e.batches >= 1);
        }
    }

    #[test]
    fn last_group_has_no_trailing_delay() {
        let e = estimate(10, 3, 5.0, 0.0).unwrap();
        assert_eq!(e.batches, 4);
        assert_eq!(e.estimated_seconds, 15.0);

        // Single group: no delay at all.
        let e = estimate(3, 10, 5.0, 0.0).unwrap();
        assert_eq!(e.estimated_seconds, 0.0);
    }

    #[test]
    fn per_send_floor_scales_with_total() {
        let e = estimate(10, 3, 0.0, 0.5).unwrap();
        assert_eq!(e.estimated_seconds, 5.0);
    }

    #[test]
    fn rejects_non_positive_inputs() {
        assert!(estimate(0, 3, 0.0, 0.0).is_err());
        assert!(estimate(10, 0, 0.0, 0.0).is_err());
        assert!(estimate(10, 3, -1.0, 0.0).is_err());
        assert!(estimate(10, 3, f64::NAN, 0.0).is_err());
    }
}
