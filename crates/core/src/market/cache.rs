use crate::domain::listing::ListingEntry;
use crate::market::ListingDirectory;
use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Keeps the last listing snapshot for `ttl` before asking the inner directory again.
pub struct CachedListingDirectory {
    inner: Arc<dyn ListingDirectory>,
    ttl: Duration,
    cached: tokio::sync::RwLock<Option<CachedSnapshot>>,
}

struct CachedSnapshot {
    entries: Arc<Vec<ListingEntry>>,
    fetched_at: Instant,
}

impl CachedListingDirectory {
    pub fn new(inner: Arc<dyn ListingDirectory>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cached: tokio::sync::RwLock::new(None),
        }
    }

    fn fresh(&self, snap: &CachedSnapshot) -> Option<Arc<Vec<ListingEntry>>> {
        (snap.fetched_at.elapsed() < self.ttl).then(|| snap.entries.clone())
    }
}

#[async_trait::async_trait]
impl ListingDirectory for CachedListingDirectory {
    fn source_name(&self) -> &'static str {
        self.inner.source_name()
    }

    async fn snapshot(&self) -> Result<Vec<ListingEntry>> {
        if let Some(entries) = self.cached.read().await.as_ref().and_then(|s| self.fresh(s)) {
            return Ok(entries.as_ref().clone());
        }

        let mut guard = self.cached.write().await;
        // Another request may have refreshed while we waited for the write lock.
        if let Some(entries) = guard.as_ref().and_then(|s| self.fresh(s)) {
            return Ok(entries.as_ref().clone());
        }

        let entries = Arc::new(self.inner.snapshot().await?);
        tracing::debug!(
            source = self.inner.source_name(),
            entries = entries.len(),
            ttl_secs = self.ttl.as_secs(),
            "listing snapshot refreshed"
        );
        *guard = Some(CachedSnapshot {
            entries: entries.clone(),
            fetched_at: Instant::now(),
        });
        Ok(entries.as_ref().clone())
    }
}
