//! Listing Detector (C6) — two independently-ticking pollers that turn
//! MEXC calendar entries and exchange-info symbol diffs into
//! `ListingEvent`s, grounded on the teacher's dual-timer screening actor
//! shape (one task per timer, each observing its own cancellation token).

use crate::domain::entities::{DetectionSource, ListingEvent};
use crate::error::TradingError;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[async_trait]
pub trait ListingSource: Send + Sync {
    async fn get_calendar(&self) -> Result<Vec<ListingEvent>, TradingError>;
    async fn symbol_snapshot(&self) -> Result<HashSet<String>, TradingError>;
}

#[async_trait]
impl ListingSource for crate::infrastructure::mexc_client::MexcClient {
    async fn get_calendar(&self) -> Result<Vec<ListingEvent>, TradingError> {
        crate::infrastructure::mexc_client::MexcClient::get_calendar(self).await
    }

    async fn symbol_snapshot(&self) -> Result<HashSet<String>, TradingError> {
        Ok(self.get_exchange_info().await?.into_keys().collect())
    }
}

#[async_trait]
pub trait SignalStore: Send + Sync {
    async fn exists_recent(&self, symbol: &str, source: DetectionSource, within: chrono::Duration) -> Result<bool, TradingError>;
    async fn append(&self, event: &ListingEvent) -> Result<(), TradingError>;
    async fn get_unprocessed(&self) -> Result<Vec<ListingEvent>, TradingError>;
    async fn mark_processed(&self, id: Uuid) -> Result<(), TradingError>;
}

#[async_trait]
impl SignalStore for crate::persistence::repository::ListingEventRepository {
    async fn exists_recent(&self, symbol: &str, source: DetectionSource, within: chrono::Duration) -> Result<bool, TradingError> {
        Ok(crate::persistence::repository::ListingEventRepository::exists_recent(self, symbol, source, within).await?)
    }
    async fn append(&self, event: &ListingEvent) -> Result<(), TradingError> {
        Ok(crate::persistence::repository::ListingEventRepository::append(self, event).await?)
    }
    async fn get_unprocessed(&self) -> Result<Vec<ListingEvent>, TradingError> {
        Ok(crate::persistence::repository::ListingEventRepository::get_unprocessed(self).await?)
    }
    async fn mark_processed(&self, id: Uuid) -> Result<(), TradingError> {
        Ok(crate::persistence::repository::ListingEventRepository::mark_processed(self, id).await?)
    }
}

const DEDUP_WINDOW_SECS: i64 = 60;
const SYMBOL_DIFF_FRESHNESS_SECS: i64 = 60;
const CALENDAR_LOOKAHEAD_DAYS: i64 = 7;

pub struct ListingDetector {
    source: Arc<dyn ListingSource>,
    signals: Arc<dyn SignalStore>,
    previous_symbols: Mutex<Option<HashSet<String>>>,
}

impl ListingDetector {
    pub fn new(source: Arc<dyn ListingSource>, signals: Arc<dyn SignalStore>) -> Self {
        ListingDetector {
            source,
            signals,
            previous_symbols: Mutex::new(None),
        }
    }

    /// Primes the symbol snapshot so the first diff tick doesn't treat
    /// every already-listed symbol as new.
    pub async fn initialize(&self) -> Result<(), TradingError> {
        let snapshot = self.source.symbol_snapshot().await?;
        *self.previous_symbols.lock().await = Some(snapshot);
        Ok(())
    }

    pub async fn run_calendar_poller(&self, interval: std::time::Duration, token: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("calendar poller stopping on cancellation");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.poll_calendar_once().await {
                        warn!(error = %err, "calendar poll failed");
                    }
                }
            }
        }
    }

    pub async fn run_symbol_diff_poller(&self, interval: std::time::Duration, token: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("symbol diff poller stopping on cancellation");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.poll_symbol_diff_once().await {
                        warn!(error = %err, "symbol diff poll failed");
                    }
                }
            }
        }
    }

    async fn poll_calendar_once(&self) -> Result<(), TradingError> {
        let now = Utc::now();
        let lookahead = now + chrono::Duration::days(CALENDAR_LOOKAHEAD_DAYS);
        for event in self.source.get_calendar().await? {
            let Some(listing_time) = event.listing_time else { continue };
            if listing_time > lookahead {
                continue;
            }
            let dup = self
                .signals
                .exists_recent(&event.symbol, DetectionSource::Calendar, chrono::Duration::seconds(DEDUP_WINDOW_SECS))
                .await?;
            if dup {
                continue;
            }
            debug!(symbol = %event.symbol, "new calendar listing detected");
            self.signals.append(&event).await?;
        }
        Ok(())
    }

    async fn poll_symbol_diff_once(&self) -> Result<(), TradingError> {
        let current = self.source.symbol_snapshot().await?;
        let mut guard = self.previous_symbols.lock().await;
        let Some(previous) = guard.clone() else {
            *guard = Some(current);
            return Ok(());
        };
        drop(guard);

        let now = Utc::now();
        for symbol in current.difference(&previous) {
            let dup = self
                .signals
                .exists_recent(symbol, DetectionSource::SymbolComparison, chrono::Duration::seconds(DEDUP_WINDOW_SECS))
                .await?;
            if dup {
                continue;
            }
            let event = ListingEvent {
                id: Uuid::new_v4(),
                symbol: symbol.clone(),
                vcoin_id: None,
                detection_source: DetectionSource::SymbolComparison,
                confidence: crate::domain::entities::Confidence::Medium,
                listing_time: Some(now),
                detected_at: now,
                freshness_deadline: now + chrono::Duration::seconds(SYMBOL_DIFF_FRESHNESS_SECS),
                processed: false,
            };
            debug!(symbol = %event.symbol, "new symbol detected via exchange-info diff");
            self.signals.append(&event).await?;
        }

        *self.previous_symbols.lock().await = Some(current);
        Ok(())
    }
}

/// §4.6: a calendar listing is ready to trade once its open time is at
/// most 5 seconds away — a small lead so the order hits the book immediately.
pub fn is_ready_to_trade(listing_time: chrono::DateTime<Utc>, now: chrono::DateTime<Utc>) -> bool {
    listing_time <= now + chrono::Duration::seconds(5)
}
