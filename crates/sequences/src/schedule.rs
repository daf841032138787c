//! Due-time math for sequence steps.
//!
//! A step's delay is relative to the previous step's send time. Zero-delay
//! steps fire "soon" rather than instantly so a freshly-created enrollment
//! never loops tightly with the runner. Delayed steps are normalized to a
//! preferred send hour in a reference zone, with the guarantee that
//! normalization never shortens the requested spacing: if truncating to
//! the send hour would land before `previous + delay`, the send rolls
//! forward one day.

use chrono::{DateTime, Duration, FixedOffset, Offset, TimeZone, Utc};
use tracing::warn;

use coursedrip_core::config::SendWindowConfig;

/// Send-hour policy resolved from configuration.
#[derive(Debug, Clone)]
pub struct SendWindow {
    preferred_hour: u32,
    reference_offset: FixedOffset,
    immediate_offset: Duration,
}

impl SendWindow {
    pub fn from_config(config: &SendWindowConfig) -> Self {
        let preferred_hour = if config.preferred_hour > 23 {
            warn!(
                hour = config.preferred_hour,
                "preferred_hour out of range, clamping to 23"
            );
            23
        } else {
            config.preferred_hour
        };

        let reference_offset = FixedOffset::east_opt(config.utc_offset_hours * 3600)
            .unwrap_or_else(|| {
                warn!(
                    offset_hours = config.utc_offset_hours,
                    "invalid utc offset, falling back to UTC"
                );
                Utc.fix()
            });

        Self {
            preferred_hour,
            reference_offset,
            immediate_offset: Duration::minutes(i64::from(config.immediate_offset_mins)),
        }
    }

    /// When a step with the given delay should go out, counted from the
    /// previous send (or enrollment) time.
    pub fn next_send_at(
        &self,
        previous: DateTime<Utc>,
        delay_days: u32,
        delay_hours: u32,
    ) -> DateTime<Utc> {
        if delay_days == 0 && delay_hours == 0 {
            return previous + self.immediate_offset;
        }

        let minimum = previous
            + Duration::days(i64::from(delay_days))
            + Duration::hours(i64::from(delay_hours));

        // Truncate to the preferred hour on the minimum's local day.
        let local_minimum = minimum.with_timezone(&self.reference_offset);
        let preferred_naive = match local_minimum
            .date_naive()
            .and_hms_opt(self.preferred_hour, 0, 0)
        {
            Some(n) => n,
            None => return minimum,
        };
        let candidate = match self.reference_offset.from_local_datetime(&preferred_naive).single() {
            Some(c) => c.with_timezone(&Utc),
            None => return minimum,
        };

        // Truncation must never shorten the requested spacing.
        if candidate < minimum {
            candidate + Duration::days(1)
        } else {
            candidate
        }
    }

    /// How soon a zero-delay step fires.
    pub fn immediate_offset(&self) -> Duration {
        self.immediate_offset
    }
}
