//! Human-duration parsing shared by the wait normalizer/executor and the
//! aggregate executor's timeout budget.

use crate::error::ValidationError;
use std::time::Duration;

/// Parse `raw` as a positive human duration ("2m", "30s", ...). Empty,
/// zero, or unparsable input is rejected.
pub fn parse_positive_duration(raw: &str) -> Result<Duration, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::NonPositiveTimeout {
            raw: raw.to_string(),
        });
    }
    let parsed = humantime::parse_duration(trimmed).map_err(|_| ValidationError::InvalidTimeoutFormat {
        raw: raw.to_string(),
    })?;
    if parsed.is_zero() {
        return Err(ValidationError::NonPositiveTimeout {
            raw: raw.to_string(),
        });
    }
    Ok(parsed)
}
