use crate::domain::bar::BarSeries;
use crate::domain::prediction::{Trend, TrendEstimate};
use crate::predict::error::PredictError;
use crate::predict::sampler::UnitSampler;

pub const SHORT_WINDOW: usize = 5;
pub const LONG_WINDOW: usize = 20;
pub const MIN_BARS: usize = LONG_WINDOW;

pub const MAX_CHANGE_CAP: f64 = 0.03;

const BASE_CONFIDENCE: f64 = 0.7;
const CONFIDENCE_SPAN: f64 = 0.2;
const MAX_CONFIDENCE: f64 = 0.9;

pub fn estimate(
    series: &BarSeries,
    sampler: &dyn UnitSampler,
) -> Result<TrendEstimate, PredictError> {
    if series.len() < MIN_BARS {
        return Err(PredictError::InsufficientHistory {
            bars: series.len(),
            minimum: MIN_BARS,
        });
    }

    let closes: Vec<f64> = series.closes().collect();
    let current_price = closes[closes.len() - 1];

    let ma5 = trailing_mean(&closes, SHORT_WINDOW);
    let ma20 = trailing_mean(&closes, LONG_WINDOW);
    let trend = if ma5 > ma20 { Trend::Up } else { Trend::Down };

    let volatility = volatility(&closes);
    let max_change = volatility.min(MAX_CHANGE_CAP);
    let min_change = max_change / 3.0;

    let magnitude = min_change + sampler.sample_unit() * (max_change - min_change);
    let change_rate = match trend {
        _ if magnitude == 0.0 => 0.0,
        Trend::Up => magnitude,
        Trend::Down => -magnitude,
    };

    let confidence = if max_change > 0.0 {
        BASE_CONFIDENCE + CONFIDENCE_SPAN * (1.0 - change_rate.abs() / max_change)
    } else {
        // Flat history: the draw collapses to zero, the minimum magnitude.
        MAX_CONFIDENCE
    };

    let predicted_price = (current_price * (1.0 + change_rate)).trunc() as i64;

    Ok(TrendEstimate {
        trend,
        current_price,
        predicted_price,
        confidence,
        change_rate,
        change_rate_percent: round2(change_rate * 100.0),
        ma5,
        ma20,
        volatility,
        max_change,
    })
}

fn trailing_mean(values: &[f64], window: usize) -> f64 {
    let tail = &values[values.len() - window..];
    tail.iter().sum::<f64>() / window as f64
}

/// Sample standard deviation (n-1) of day-over-day fractional close changes.
pub fn volatility(closes: &[f64]) -> f64 {
    let changes: Vec<f64> = closes.windows(2).map(|w| w[1] / w[0] - 1.0).collect();
    if changes.len() < 2 {
        return 0.0;
    }

    let n = changes.len() as f64;
    let mean = changes.iter().sum::<f64>() / n;
    let var = changes.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / (n - 1.0);
    var.sqrt()
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
