//! Ledger event listener for cache invalidation.
//!
//! The [`InvalidationListener`] subscribes to bid events and drops the cached
//! aggregations of the affected company. A lagging receiver may have missed
//! events for any company, so lag clears the whole cache.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use bidscope_traits::BidEvent;

use crate::cache::AggregationCache;

/// Applies bid events to the aggregation cache.
pub struct InvalidationListener {
    /// Cache to invalidate
    cache: Arc<AggregationCache>,

    /// Bid event receiver
    events: broadcast::Receiver<BidEvent>,

    /// Shutdown signal receiver
    shutdown_rx: broadcast::Receiver<()>,
}

impl InvalidationListener {
    /// Create a new listener.
    pub fn new(
        cache: Arc<AggregationCache>,
        events: broadcast::Receiver<BidEvent>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            cache,
            events,
            shutdown_rx,
        }
    }

    /// Run until the event channel closes or a shutdown signal is received.
    pub async fn run(&mut self) {
        info!("Invalidation listener started");

        loop {
            tokio::select! {
                result = self.events.recv() => {
                    match result {
                        Ok(event) => self.apply(&event),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Invalidation listener lagged by {} events, clearing cache", n);
                            self.cache.invalidate_all();
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            info!("Bid event channel closed");
                            break;
                        }
                    }
                }
                _ = self.shutdown_rx.recv() => {
                    info!("Invalidation listener shutting down");
                    break;
                }
            }
        }
    }

    fn apply(&self, event: &BidEvent) {
        debug!(company = %event.company_id(), bid = %event.bid_id(), "invalidating");
        self.cache.invalidate(event.company_id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::Utc;

    use bidscope_traits::{BidStatus, CompanyId};

    use crate::cache::CacheKey;
    use crate::result::{MetricKind, MetricPayload, MetricResult, StatusDistribution};

    fn cached(company: &str) -> (CacheKey, Arc<MetricResult>) {
        let key = CacheKey::company(CompanyId::new(company), MetricKind::Distribution);
        let result = MetricResult {
            company_id: Some(CompanyId::new(company)),
            metric: MetricKind::Distribution,
            window: None,
            granularity: None,
            project_type: None,
            payload: MetricPayload::Distribution(StatusDistribution::default()),
            computed_at: Utc::now(),
        };
        (key, Arc::new(result))
    }

    fn submitted(company: &str) -> BidEvent {
        BidEvent::Submitted {
            company_id: CompanyId::new(company),
            bid_id: "b1".into(),
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_event_invalidates_company() {
        let cache = Arc::new(AggregationCache::new(Duration::from_secs(60), 100));
        let (a_key, a) = cached("A");
        let (b_key, b) = cached("B");
        cache.put(a_key.clone(), a, Duration::from_secs(60));
        cache.put(b_key.clone(), b, Duration::from_secs(60));

        let (events_tx, events_rx) = broadcast::channel(16);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let mut listener = InvalidationListener::new(cache.clone(), events_rx, shutdown_rx);
        let handle = tokio::spawn(async move { listener.run().await });

        events_tx.send(submitted("A")).unwrap();
        drop(events_tx);
        handle.await.unwrap();

        assert!(cache.get(&a_key).is_none());
        assert!(cache.get(&b_key).is_some());
        drop(shutdown_tx);
    }

    #[tokio::test]
    async fn test_status_change_invalidates_company() {
        let cache = Arc::new(AggregationCache::new(Duration::from_secs(60), 100));
        let (a_key, a) = cached("A");
        let (b_key, b) = cached("B");
        cache.put(a_key.clone(), a, Duration::from_secs(60));
        cache.put(b_key.clone(), b, Duration::from_secs(60));

        let (events_tx, events_rx) = broadcast::channel(16);
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let mut listener = InvalidationListener::new(cache.clone(), events_rx, shutdown_rx);

        events_tx
            .send(BidEvent::StatusChanged {
                company_id: CompanyId::new("B"),
                bid_id: "b9".into(),
                from: BidStatus::Pending,
                to: BidStatus::Won,
                at: Utc::now(),
            })
            .unwrap();
        drop(events_tx);
        listener.run().await;

        assert!(cache.get(&a_key).is_some());
        assert!(cache.get(&b_key).is_none());
    }

    #[tokio::test]
    async fn test_lag_clears_everything() {
        let cache = Arc::new(AggregationCache::new(Duration::from_secs(60), 100));
        let (b_key, b) = cached("B");
        cache.put(b_key.clone(), b, Duration::from_secs(60));

        let (events_tx, events_rx) = broadcast::channel(2);
        for _ in 0..5 {
            events_tx.send(submitted("A")).unwrap();
        }
        drop(events_tx);

        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let mut listener = InvalidationListener::new(cache.clone(), events_rx, shutdown_rx);
        listener.run().await;

        assert!(cache.get(&b_key).is_none());
    }

    #[tokio::test]
    async fn test_shutdown_stops_listener() {
        let cache = Arc::new(AggregationCache::default());
        let (_events_tx, events_rx) = broadcast::channel::<BidEvent>(4);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let mut listener = InvalidationListener::new(cache, events_rx, shutdown_rx);
        let handle = tokio::spawn(async move { listener.run().await });

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
