use crate::config::{Settings, DEFAULT_LOOKBACK_DAYS};
use crate::domain::bar::BarSeries;
use crate::domain::prediction::PredictionResult;
use crate::market::cache::CachedListingDirectory;
use crate::market::kis::KisClient;
use crate::market::{ListingDirectory, PriceHistorySource};
use crate::predict::engine;
use crate::predict::error::PredictError;
use crate::predict::resolver;
use crate::predict::sampler::{ThreadRngSampler, UnitSampler};
use crate::time::kr_market;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Number of trailing bars echoed back as `historicalData`.
pub const HISTORY_ECHO_LEN: usize = 20;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub lookback_days: i64,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            lookback_days: DEFAULT_LOOKBACK_DAYS,
        }
    }
}

impl PipelineOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            lookback_days: settings.lookback_days,
        }
    }
}

/// Resolve -> fetch history -> estimate -> assemble, once per query.
#[derive(Clone)]
pub struct Predictor {
    listings: Arc<dyn ListingDirectory>,
    history: Arc<dyn PriceHistorySource>,
    sampler: Arc<dyn UnitSampler>,
    opts: PipelineOptions,
}

impl Predictor {
    pub fn new(
        listings: Arc<dyn ListingDirectory>,
        history: Arc<dyn PriceHistorySource>,
        opts: PipelineOptions,
    ) -> Self {
        Self {
            listings,
            history,
            sampler: Arc::new(ThreadRngSampler),
            opts,
        }
    }

    /// Production wiring: KIS serves both the listing and the daily bars.
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let kis = Arc::new(KisClient::from_settings(settings)?);

        let listings: Arc<dyn ListingDirectory> = if settings.listing_cache_ttl_secs > 0 {
            Arc::new(CachedListingDirectory::new(
                kis.clone(),
                Duration::from_secs(settings.listing_cache_ttl_secs),
            ))
        } else {
            kis.clone()
        };

        Ok(Self::new(
            listings,
            kis,
            PipelineOptions::from_settings(settings),
        ))
    }

    pub fn with_sampler(mut self, sampler: Arc<dyn UnitSampler>) -> Self {
        self.sampler = sampler;
        self
    }

    pub async fn run(&self, query: &str) -> Result<PredictionResult, PredictError> {
        self.run_at(query, Utc::now()).await
    }

    /// `now` fixes the start of the lookback window. The end of the window is chosen by
    /// the history source; KIS reads up to the current KST date.
    #[tracing::instrument(name = "predict", skip_all, fields(query = %query.trim()))]
    pub async fn run_at(
        &self,
        query: &str,
        now: DateTime<Utc>,
    ) -> Result<PredictionResult, PredictError> {
        let stock = resolver::resolve(self.listings.as_ref(), query).await?;
        tracing::info!(code = %stock.code, name = %stock.name, "resolved stock");

        let start_date = kr_market::lookback_start(now, self.opts.lookback_days)
            .map_err(PredictError::Upstream)?;

        let bars = self
            .history
            .read(&stock.code, start_date)
            .await
            .map_err(PredictError::Upstream)?;

        if bars.is_empty() {
            return Err(PredictError::HistoryUnavailable {
                code: stock.code,
                name: stock.name,
            });
        }

        let series = BarSeries::new(bars).map_err(|e| {
            PredictError::Upstream(e.context(format!(
                "{} returned an invalid series for {}",
                self.history.source_name(),
                stock.code
            )))
        })?;

        tracing::debug!(
            code = %stock.code,
            %start_date,
            bars = series.len(),
            "price history loaded"
        );

        let est = engine::estimate(&series, self.sampler.as_ref())?;

        tracing::debug!(
            trend = est.trend.as_str(),
            ma5 = est.ma5,
            ma20 = est.ma20,
            volatility = est.volatility,
            max_change = est.max_change,
            change_rate = est.change_rate,
            confidence = est.confidence,
            "trend estimate computed"
        );

        Ok(PredictionResult {
            stock_name: stock.name,
            current_price: est.current_price.trunc() as i64,
            predicted_price: est.predicted_price,
            confidence: est.confidence,
            trend: est.trend,
            change_rate: est.change_rate_percent,
            historical_data: series.tail(HISTORY_ECHO_LEN).to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::bar::Bar;
    use crate::domain::listing::ListingEntry;
    use crate::domain::prediction::Trend;
    use crate::predict::error::ErrorKind;
    use crate::predict::sampler::FixedSampler;
    use chrono::{Duration, NaiveDate, TimeZone};
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct MemoryListings(Vec<ListingEntry>);

    #[async_trait::async_trait]
    impl ListingDirectory for MemoryListings {
        fn source_name(&self) -> &'static str {
            "memory"
        }

        async fn snapshot(&self) -> anyhow::Result<Vec<ListingEntry>> {
            Ok(self.0.clone())
        }
    }

    struct FailingListings;

    #[async_trait::async_trait]
    impl ListingDirectory for FailingListings {
        fn source_name(&self) -> &'static str {
            "failing"
        }

        async fn snapshot(&self) -> anyhow::Result<Vec<ListingEntry>> {
            anyhow::bail!("master zip HTTP 503 Service Unavailable")
        }
    }

    #[derive(Default)]
    struct MemoryHistory {
        bars: HashMap<String, Vec<Bar>>,
        fail_with: Option<String>,
        requests: Mutex<Vec<(String, NaiveDate)>>,
    }

    impl MemoryHistory {
        fn with_bars(mut self, code: &str, bars: Vec<Bar>) -> Self {
            self.bars.insert(code.to_string(), bars);
            self
        }
    }

    #[async_trait::async_trait]
    impl PriceHistorySource for MemoryHistory {
        fn source_name(&self) -> &'static str {
            "memory"
        }

        async fn read(&self, code: &str, start_date: NaiveDate) -> anyhow::Result<Vec<Bar>> {
            self.requests
                .lock()
                .unwrap()
                .push((code.to_string(), start_date));
            if let Some(msg) = &self.fail_with {
                anyhow::bail!("{msg}");
            }
            Ok(self.bars.get(code).cloned().unwrap_or_default())
        }
    }

    fn listing() -> Vec<ListingEntry> {
        vec![
            ListingEntry::new("005930", "Samsung Electronics"),
            ListingEntry::new("006400", "Samsung SDI"),
        ]
    }

    fn bars(n: usize, step: f64) -> Vec<Bar> {
        let start = NaiveDate::from_ymd_opt(2026, 8, 18).unwrap();
        (0..n)
            .map(|i| {
                let close = 70_000.0 + step * i as f64;
                Bar {
                    date: start + Duration::days(i as i64),
                    open: close - 100.0,
                    high: close + 300.0,
                    low: close - 400.0,
                    close,
                }
            })
            .collect()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 3, 0, 0).unwrap()
    }

    fn predictor(history: MemoryHistory) -> (Predictor, Arc<MemoryHistory>) {
        let history = Arc::new(history);
        let p = Predictor::new(
            Arc::new(MemoryListings(listing())),
            history.clone(),
            PipelineOptions::default(),
        );
        (p, history)
    }

    #[tokio::test]
    async fn numeric_query_produces_full_result() {
        let (p, history) =
            predictor(MemoryHistory::default().with_bars("005930", bars(40, 150.0)));
        let p = p.with_sampler(Arc::new(FixedSampler(0.0)));

        let res = p.run_at("005930", now()).await.unwrap();

        assert_eq!(res.stock_name, "Samsung Electronics");
        assert_eq!(res.current_price, 75_850);
        assert_eq!(res.trend, Trend::Up);
        assert!(res.change_rate >= 0.0);
        assert!(res.confidence > 0.7 && res.confidence <= 0.9);
        assert!(res.predicted_price >= res.current_price);

        let requests = history.requests.lock().unwrap();
        assert_eq!(
            requests.as_slice(),
            &[(
                "005930".to_string(),
                NaiveDate::from_ymd_opt(2026, 8, 17).unwrap()
            )]
        );
    }

    #[tokio::test]
    async fn historical_data_is_last_twenty_ascending() {
        let (p, _) = predictor(MemoryHistory::default().with_bars("005930", bars(40, -50.0)));

        let res = p.run_at("Samsung Electronics", now()).await.unwrap();

        assert_eq!(res.trend, Trend::Down);
        assert!(res.change_rate <= 0.0);
        assert_eq!(res.historical_data.len(), 20);
        assert_eq!(
            res.historical_data.last().unwrap().date,
            NaiveDate::from_ymd_opt(2026, 8, 18).unwrap() + Duration::days(39)
        );
        assert!(res
            .historical_data
            .windows(2)
            .all(|w| w[0].date < w[1].date));
    }

    #[tokio::test]
    async fn name_query_uses_first_listing_match() {
        let (p, history) = predictor(
            MemoryHistory::default()
                .with_bars("005930", bars(25, 10.0))
                .with_bars("006400", bars(25, 10.0)),
        );

        let res = p.run_at("samsung", now()).await.unwrap();
        assert_eq!(res.stock_name, "Samsung Electronics");
        assert_eq!(history.requests.lock().unwrap()[0].0, "005930");
    }

    #[tokio::test]
    async fn unknown_symbol_is_not_found_with_query() {
        let (p, history) = predictor(MemoryHistory::default());

        let err = p.run_at("NoSuchCo", now()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_body().error.contains("NoSuchCo"));
        assert!(history.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_history_is_not_found_with_stock_name() {
        let (p, _) = predictor(MemoryHistory::default());

        let err = p.run_at("006400", now()).await.unwrap_err();
        assert!(matches!(err, PredictError::HistoryUnavailable { .. }));
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().contains("Samsung SDI"));
    }

    #[tokio::test]
    async fn short_history_is_a_server_error() {
        let (p, _) = predictor(MemoryHistory::default().with_bars("005930", bars(12, 10.0)));

        let err = p.run_at("005930", now()).await.unwrap_err();
        assert!(matches!(
            err,
            PredictError::InsufficientHistory {
                bars: 12,
                minimum: 20
            }
        ));
        assert_eq!(err.kind(), ErrorKind::ServerError);
    }

    #[tokio::test]
    async fn upstream_failures_pass_message_through() {
        let (p, _) = predictor(MemoryHistory {
            fail_with: Some("KIS daily itemchartprice HTTP 500".to_string()),
            ..Default::default()
        });
        let err = p.run_at("005930", now()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ServerError);
        assert_eq!(err.to_string(), "KIS daily itemchartprice HTTP 500");

        let p = Predictor::new(
            Arc::new(FailingListings),
            Arc::new(MemoryHistory::default()),
            PipelineOptions::default(),
        );
        let err = p.run_at("005930", now()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ServerError);
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn unordered_source_output_is_rejected() {
        let mut out_of_order = bars(25, 10.0);
        out_of_order.swap(3, 4);
        let (p, _) = predictor(MemoryHistory::default().with_bars("005930", out_of_order));

        let err = p.run_at("005930", now()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ServerError);
        assert!(err.to_string().contains("strictly increasing"));
    }

    #[tokio::test]
    async fn lookback_option_moves_start_date() {
        let history = Arc::new(MemoryHistory::default().with_bars("005930", bars(25, 10.0)));
        let p = Predictor::new(
            Arc::new(MemoryListings(listing())),
            history.clone(),
            PipelineOptions { lookback_days: 30 },
        );

        p.run_at("005930", now()).await.unwrap();
        assert_eq!(
            history.requests.lock().unwrap()[0].1,
            NaiveDate::from_ymd_opt(2026, 9, 16).unwrap()
        );
    }
}
