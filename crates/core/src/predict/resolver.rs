use crate::domain::listing::ListingEntry;
use crate::market::ListingDirectory;
use crate::predict::error::PredictError;

/// Resolve a free-form query against a fresh directory snapshot.
///
/// All-digit queries match `code` exactly; anything else is a case-insensitive substring
/// match on `name`, first entry in listing order wins.
pub async fn resolve(
    directory: &dyn ListingDirectory,
    query: &str,
) -> Result<ListingEntry, PredictError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(PredictError::InvalidQuery);
    }

    let listing = directory
        .snapshot()
        .await
        .map_err(PredictError::Upstream)?;

    tracing::debug!(
        source = directory.source_name(),
        entries = listing.len(),
        "listing snapshot loaded"
    );

    find_listing(&listing, query)
        .cloned()
        .ok_or_else(|| PredictError::SymbolNotFound {
            query: query.to_string(),
        })
}

pub fn find_listing<'a>(listing: &'a [ListingEntry], query: &str) -> Option<&'a ListingEntry> {
    let query = query.trim();
    if query.is_empty() {
        return None;
    }

    if is_code_query(query) {
        return listing.iter().find(|entry| entry.code == query);
    }

    let needle = query.to_lowercase();
    listing
        .iter()
        .find(|entry| entry.name.to_lowercase().contains(&needle))
}

fn is_code_query(query: &str) -> bool {
    query.bytes().all(|b| b.is_ascii_digit())
}
