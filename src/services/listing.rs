//! Cached, paginated book listing
//!
//! Rendered pages are stored as JSON strings under a key derived from the
//! page parameters and expire after the configured TTL. Loans and returns do
//! not invalidate entries: the projection carries no availability data, so a
//! cached page is stale by at most one TTL.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;

use super::cache::CacheStore;
use crate::{
    config::ListingConfig,
    error::{AppError, AppResult},
    models::{book::total_pages, window_offset, BookPage},
    repository::CatalogStore,
};

type Flights = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

pub fn cache_key(page: i64, page_size: i64) -> String {
    format!("books_page_{}_size_{}", page, page_size)
}

#[derive(Clone)]
pub struct ListingService {
    catalog: Arc<dyn CatalogStore>,
    cache: Arc<dyn CacheStore>,
    config: ListingConfig,
    flights: Flights,
}

impl ListingService {
    pub fn new(catalog: Arc<dyn CatalogStore>, cache: Arc<dyn CacheStore>, config: ListingConfig) -> Self {
        Self {
            catalog,
            cache,
            config,
            flights: Flights::default(),
        }
    }

    /// Serialized [`BookPage`] for the requested window
    pub async fn list_books(&self, page: Option<i64>, page_size: Option<i64>) -> AppResult<String> {
        let page = page.unwrap_or(1);
        let page_size = page_size.unwrap_or(self.config.default_page_size);
        self.validate(page, page_size)?;

        let key = cache_key(page, page_size);
        if let Some(hit) = self.cached(&key).await {
            return Ok(hit);
        }

        // Single flight: one caller renders, the rest wait and re-read the cache
        let flight = self.join_flight(&key);
        let result = async {
            let _turn = flight.lock().await;
            if let Some(hit) = self.cached(&key).await {
                return Ok(hit);
            }
            let rendered = self.render(page, page_size).await?;
            self.store(&key, &rendered).await;
            Ok(rendered)
        }
        .await;
        self.leave_flight(&key, flight);

        result
    }

    fn validate(&self, page: i64, page_size: i64) -> AppResult<()> {
        if page < 1 {
            return Err(AppError::InvalidArgument("page must be at least 1".to_string()));
        }
        if page_size < 1 || page_size > self.config.max_page_size {
            return Err(AppError::InvalidArgument(format!(
                "page_size must be between 1 and {}",
                self.config.max_page_size
            )));
        }
        Ok(())
    }

    async fn cached(&self, key: &str) -> Option<String> {
        match self.cache.get(key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, error = %e, "Listing cache read failed, falling back to store");
                None
            }
        }
    }

    async fn store(&self, key: &str, rendered: &str) {
        let ttl = Duration::from_secs(self.config.ttl_seconds);
        if let Err(e) = self.cache.set(key, rendered, ttl).await {
            tracing::warn!(key, error = %e, "Listing cache write failed");
        }
    }

    async fn render(&self, page: i64, page_size: i64) -> AppResult<String> {
        // No catalog reaches an offset past i64::MAX
        let offset = window_offset(page, page_size)
            .ok_or_else(|| AppError::NotFound(format!("Invalid page {}", page)))?;
        let (results, count) = self.catalog.list_book_listings(offset, page_size).await?;

        if page > total_pages(count, page_size) {
            return Err(AppError::NotFound(format!("Invalid page {}", page)));
        }

        tracing::debug!(page, page_size, count, "Rendered book listing page");
        serde_json::to_string(&BookPage::new(results, count, page, page_size))
            .map_err(|e| AppError::Internal(format!("Failed to serialize book page: {}", e)))
    }

    fn join_flight(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut flights = self.flights.lock().unwrap_or_else(|e| e.into_inner());
        flights.entry(key.to_string()).or_default().clone()
    }

    fn leave_flight(&self, key: &str, flight: Arc<AsyncMutex<()>>) {
        let mut flights = self.flights.lock().unwrap_or_else(|e| e.into_inner());
        // The map's handle plus ours: nobody else is waiting on this key
        if Arc::strong_count(&flight) <= 2 {
            flights.remove(key);
        }
    }
}
