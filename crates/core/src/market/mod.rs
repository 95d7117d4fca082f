use crate::domain::bar::Bar;
use crate::domain::listing::ListingEntry;
use anyhow::Result;
use chrono::NaiveDate;

pub mod cache;
pub mod kis;

/// Full exchange listing, read on demand.
#[async_trait::async_trait]
pub trait ListingDirectory: Send + Sync {
    fn source_name(&self) -> &'static str;

    /// Every listed (code, name) row, in directory order.
    async fn snapshot(&self) -> Result<Vec<ListingEntry>>;
}

/// Daily bars for one code from `start_date` up to today.
#[async_trait::async_trait]
pub trait PriceHistorySource: Send + Sync {
    fn source_name(&self) -> &'static str;

    /// The end of the range is the source's own notion of today, not the caller's clock.
    async fn read(&self, code: &str, start_date: NaiveDate) -> Result<Vec<Bar>>;
}
