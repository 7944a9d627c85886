//! Background sweeper that expires lapsed reservations.

use std::time::Duration;

use chrono::{DateTime, Utc};
use stock_store::StockStore;

use crate::error::Result;

/// Periodically transitions overdue reservations to expired so their held
/// stock returns to availability.
///
/// Availability queries already ignore lapsed holds, so the sweeper is
/// about keeping stored state truthful rather than about correctness of
/// the availability number.
pub struct ExpirationSweeper<S: StockStore> {
    store: S,
    interval: Duration,
}

impl<S: StockStore> ExpirationSweeper<S> {
    /// Creates a sweeper that runs every `interval`.
    pub fn new(store: S, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Runs one sweep. Returns how many reservations were expired.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<usize> {
        let expired = self.store.expire_due_reservations(now).await?;
        if !expired.is_empty() {
            metrics::counter!("reservations_expired").increment(expired.len() as u64);
            tracing::info!(count = expired.len(), "expired overdue reservations");
        }
        Ok(expired.len())
    }

    /// Runs the sweep loop forever. A failed sweep is logged and retried
    /// on the next tick.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            if let Err(error) = self.sweep_once(Utc::now()).await {
                tracing::error!(%error, "expiration sweep failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use common::{ProductId, StoreId};
    use domain::{ItemRef, ReservationRequest, StockLevel};
    use stock_store::{InMemoryStockStore, StockStore};

    #[tokio::test]
    async fn sweeps_only_overdue_holds() {
        let store = InMemoryStockStore::new();
        let store_id = StoreId::new();
        let item = ItemRef::product(ProductId::new());
        store
            .upsert_stock_level(StockLevel::new(store_id, item, 10))
            .await
            .unwrap();
        let t0 = Utc::now();

        store
            .create_reservations(store_id, &[ReservationRequest::new(item, 2)], None, 15, t0)
            .await
            .unwrap();
        store
            .create_reservations(store_id, &[ReservationRequest::new(item, 3)], None, 30, t0)
            .await
            .unwrap();

        let sweeper = ExpirationSweeper::new(store.clone(), Duration::from_secs(60));
        assert_eq!(
            sweeper
                .sweep_once(t0 + ChronoDuration::minutes(15))
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            sweeper
                .sweep_once(t0 + ChronoDuration::minutes(30))
                .await
                .unwrap(),
            1
        );
        // Nothing left to sweep.
        assert_eq!(
            sweeper
                .sweep_once(t0 + ChronoDuration::minutes(60))
                .await
                .unwrap(),
            0
        );
    }
}
