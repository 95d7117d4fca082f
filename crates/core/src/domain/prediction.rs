use crate::domain::bar::Bar;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Up => "up",
            Trend::Down => "down",
        }
    }
}

/// Output of the trend engine for one series.
#[derive(Debug, Clone, PartialEq)]
pub struct TrendEstimate {
    pub trend: Trend,
    pub current_price: f64,
    pub predicted_price: i64,
    pub confidence: f64,
    pub change_rate: f64,
    pub change_rate_percent: f64,
    pub ma5: f64,
    pub ma20: f64,
    pub volatility: f64,
    pub max_change: f64,
}

/// Response payload for one prediction request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionResult {
    pub stock_name: String,
    pub current_price: i64,
    pub predicted_price: i64,
    pub confidence: f64,
    pub trend: Trend,
    pub change_rate: f64,
    pub historical_data: Vec<Bar>,
}
