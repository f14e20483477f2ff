//! Invalidation through the ledger's event channel.
//!
//! The engine is wired the way the server wires it: the listener consumes
//! `InMemoryBidLedger::subscribe()` and nothing calls `invalidate` directly.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use rust_decimal_macros::dec;

use bidscope_engine::{AnalyticsEngine, AnalyticsEngineBuilder};
use bidscope_ext_memory::InMemoryBidLedger;
use bidscope_traits::{AnalyticsConfig, Bid, BidId, BidStatus, CompanyId, FixedClock, ProjectType};

fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 9, 0, 0).unwrap()
}

fn bid(id: &str, company: &str, submitted: DateTime<Utc>, status: BidStatus) -> Bid {
    let b = Bid::submitted(
        id,
        CompanyId::new(company),
        ProjectType::parse("construction").unwrap(),
        dec!(12000),
        submitted,
    );
    if status.is_terminal() {
        b.with_resolution(status, submitted + ChronoDuration::days(1))
    } else {
        b.with_status(status)
    }
}

fn wired_engine() -> (Arc<AnalyticsEngine>, Arc<InMemoryBidLedger>) {
    let ledger = Arc::new(InMemoryBidLedger::new());
    ledger.record(bid("b1", "C1", at(2024, 2, 2), BidStatus::Won)).unwrap();
    ledger.record(bid("b2", "C1", at(2024, 2, 5), BidStatus::Pending)).unwrap();
    ledger.record(bid("b3", "C2", at(2024, 2, 6), BidStatus::Lost)).unwrap();

    let engine = AnalyticsEngineBuilder::new()
        .with_config(AnalyticsConfig::minimal())
        .with_ledger(ledger.clone())
        .with_events(ledger.subscribe())
        .with_clock(Arc::new(FixedClock::new(at(2024, 2, 20))))
        .build()
        .unwrap();
    engine.start();

    (Arc::new(engine), ledger)
}

async fn february_rate(engine: &AnalyticsEngine, company: &str) -> Option<f64> {
    let result = engine.get_bid_success_rate(company, Some(1), None).await.unwrap();
    result.success_rate().unwrap()[0].value
}

async fn february_volume(engine: &AnalyticsEngine, company: &str) -> u64 {
    let result = engine.get_bid_volume(company, Some(1), None).await.unwrap();
    result.volume().unwrap()[0].value
}

#[tokio::test]
async fn test_status_change_reaches_cache_through_listener() {
    let (engine, ledger) = wired_engine();
    assert_eq!(february_rate(&engine, "C1").await, Some(1.0));
    let c2_before = engine.get_bid_success_rate("C2", Some(1), None).await.unwrap();

    ledger
        .update_status(&BidId::new("b2"), BidStatus::Lost, at(2024, 2, 10))
        .unwrap();

    let refreshed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if february_rate(&engine, "C1").await == Some(0.5) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(refreshed.is_ok(), "status change never invalidated C1");

    let c2_after = engine.get_bid_success_rate("C2", Some(1), None).await.unwrap();
    assert!(Arc::ptr_eq(&c2_before, &c2_after));

    engine.shutdown().await;
}

#[tokio::test]
async fn test_recorded_bid_reaches_cache_through_listener() {
    let (engine, ledger) = wired_engine();
    assert_eq!(february_volume(&engine, "C1").await, 2);

    ledger
        .record(bid("b4", "C1", at(2024, 2, 12), BidStatus::Submitted))
        .unwrap();

    let refreshed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if february_volume(&engine, "C1").await == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(refreshed.is_ok(), "new bid never invalidated C1");
    assert!(engine.cache_stats().invalidations >= 1);

    engine.shutdown().await;
}
