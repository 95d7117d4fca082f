use anyhow::ensure;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Daily OHLC bar. Serializes as `{date: "YYYY-MM-DD", open, high, low, close}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// Date-ascending bars covering one lookback window.
///
/// Dates strictly increase and every price field is positive and finite.
#[derive(Debug, Clone, PartialEq)]
pub struct BarSeries {
    bars: Vec<Bar>,
}

impl BarSeries {
    pub fn new(bars: Vec<Bar>) -> anyhow::Result<Self> {
        for bar in &bars {
            for (field, value) in [
                ("open", bar.open),
                ("high", bar.high),
                ("low", bar.low),
                ("close", bar.close),
            ] {
                ensure!(
                    value.is_finite() && value > 0.0,
                    "{field} must be positive (date={}, {field}={value})",
                    bar.date
                );
            }
        }
        for pair in bars.windows(2) {
            ensure!(
                pair[0].date < pair[1].date,
                "bar dates must be strictly increasing ({} then {})",
                pair[0].date,
                pair[1].date
            );
        }
        Ok(Self { bars })
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn closes(&self) -> impl Iterator<Item = f64> + '_ {
        self.bars.iter().map(|b| b.close)
    }

    /// The most recent `n` bars (or all of them when shorter), still ascending.
    pub fn tail(&self, n: usize) -> &[Bar] {
        let start = self.bars.len().saturating_sub(n);
        &self.bars[start..]
    }
}
