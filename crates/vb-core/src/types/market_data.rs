//! Market data structures.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One completed daily candle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyCandle {
    /// Trading day of the candle (exchange-local), when known.
    pub date: Option<NaiveDate>,
    pub high: f64,
    pub low: f64,
    /// Closing (last traded) price of the day.
    pub close: f64,
}

impl DailyCandle {
    pub fn new(high: f64, low: f64, close: f64) -> Self {
        Self { date: None, high, low, close }
    }

    /// High-low range of the day.
    #[inline]
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// Breakout threshold for the following day: `close + range * k`.
    #[inline]
    pub fn breakout_target(&self, k: f64) -> f64 {
        self.close + self.range() * k
    }

    /// Sanity check for data coming off the wire.
    pub fn is_valid(&self) -> bool {
        self.high.is_finite()
            && self.low.is_finite()
            && self.close.is_finite()
            && self.low > 0.0
            && self.high >= self.low
    }
}
