//! Product timeout resolution

/// Limits applied to every product timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutLimits {
    pub min_minutes: u64,
    pub max_minutes: u64,
    pub default_minutes: u64,
}

impl Default for TimeoutLimits {
    fn default() -> Self {
        Self {
            min_minutes: 1,
            max_minutes: 4 * 24 * 60,
            default_minutes: 120,
        }
    }
}

/// Aligns `minutes` to a granularity
///
/// Values below the granularity round up to it, all others round down
/// to the nearest multiple. A granularity of 0 or 1 keeps the value.
pub fn align_to_granularity(minutes: u64, granularity: u64) -> u64 {
    if granularity <= 1 {
        return minutes;
    }
    if minutes < granularity {
        granularity
    } else {
        minutes - minutes % granularity
    }
}

/// Resolves the minutes to wait for a product
///
/// `requested` is the job value, `product_default` the product setting,
/// `granularity` the product's timeout granularity. The result is always
/// inside the configured limits.
pub fn resolve_timeout_minutes(
    requested: Option<u64>,
    product_default: Option<u64>,
    granularity: Option<u64>,
    limits: TimeoutLimits,
) -> u64 {
    let minutes = requested.or(product_default).unwrap_or(limits.default_minutes);
    let aligned = match granularity {
        Some(granularity) => align_to_granularity(minutes, granularity),
        None => minutes,
    };
    let min = limits.min_minutes.max(1);
    aligned.clamp(min, limits.max_minutes.max(min))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_to_hour() {
        assert_eq!(align_to_granularity(5, 60), 60);
        assert_eq!(align_to_granularity(129, 60), 120);
        assert_eq!(align_to_granularity(180, 60), 180);
        assert_eq!(align_to_granularity(60, 60), 60);
    }

    #[test]
    fn test_align_without_granularity() {
        assert_eq!(align_to_granularity(7, 0), 7);
        assert_eq!(align_to_granularity(7, 1), 7);
    }

    #[test]
    fn test_resolve_prefers_job_value() {
        let limits = TimeoutLimits::default();
        assert_eq!(resolve_timeout_minutes(Some(5), Some(30), Some(60), limits), 60);
        assert_eq!(resolve_timeout_minutes(Some(129), None, Some(60), limits), 120);
        assert_eq!(resolve_timeout_minutes(Some(180), None, Some(60), limits), 180);
        assert_eq!(resolve_timeout_minutes(None, Some(30), None, limits), 30);
        assert_eq!(resolve_timeout_minutes(None, None, None, limits), 120);
    }

    #[test]
    fn test_resolve_clamps_into_limits() {
        let limits = TimeoutLimits {
            min_minutes: 1,
            max_minutes: 90,
            default_minutes: 120,
        };
        assert_eq!(resolve_timeout_minutes(Some(0), None, None, limits), 1);
        assert_eq!(resolve_timeout_minutes(Some(500), None, None, limits), 90);
        assert_eq!(resolve_timeout_minutes(None, None, None, limits), 90);
    }

    #[test]
    fn test_zero_minimum_is_raised_to_one_minute() {
        let limits = TimeoutLimits {
            min_minutes: 0,
            max_minutes: 10,
            default_minutes: 5,
        };
        assert_eq!(resolve_timeout_minutes(Some(0), None, None, limits), 1);
    }
}
