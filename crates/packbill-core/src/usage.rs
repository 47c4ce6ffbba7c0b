//! Monthly usage counters.
//!
//! Counters reset lazily: the first recorded use in a new calendar month zeroes
//! them before incrementing. There is no background job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::calendar::same_month;

/// Per-month usage attached to a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    /// Packing calculations run this month.
    pub calculations_this_month: u64,

    /// Box types submitted across this month's calculations.
    pub boxes_used_this_month: u64,

    /// When the counters were last zeroed.
    pub last_reset_date: DateTime<Utc>,
}

impl UsageStats {
    /// Fresh counters starting at `now`.
    #[must_use]
    pub const fn new(now: DateTime<Utc>) -> Self {
        Self {
            calculations_this_month: 0,
            boxes_used_this_month: 0,
            last_reset_date: now,
        }
    }

    /// Record one calculation over `boxes` box types.
    pub fn record(&mut self, now: DateTime<Utc>, boxes: u64) {
        if !same_month(self.last_reset_date, now) {
            self.calculations_this_month = 0;
            self.boxes_used_this_month = 0;
            self.last_reset_date = now;
        }
        self.calculations_this_month = self.calculations_this_month.saturating_add(1);
        self.boxes_used_this_month = self.boxes_used_this_month.saturating_add(boxes);
    }
}
