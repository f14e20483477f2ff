//! In-memory mutable bid ledger.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use tokio::sync::broadcast;
use tracing::debug;

use bidscope_traits::error::TraitError;
use bidscope_traits::ids::*;
use bidscope_traits::{Bid, BidEvent, BidLedger, BidStatus, LedgerScan};

/// Default capacity of the event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

// =============================================================================
// IN-MEMORY BID LEDGER
// =============================================================================

/// In-memory bid ledger.
///
/// Supports recording and updating bids, used by the REST server and tests.
/// Every change is published on a broadcast channel as a [`BidEvent`].
pub struct InMemoryBidLedger {
    bids: DashMap<BidId, Bid>,
    companies: DashSet<CompanyId>,
    project_types: DashSet<ProjectType>,
    events: broadcast::Sender<BidEvent>,
}

impl InMemoryBidLedger {
    /// Create a new empty ledger.
    pub fn new() -> Self {
        Self::with_event_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Create a new empty ledger whose event channel buffers `capacity` events.
    pub fn with_event_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            bids: DashMap::new(),
            companies: DashSet::new(),
            project_types: DashSet::new(),
            events,
        }
    }

    /// Subscribe to bid events.
    pub fn subscribe(&self) -> broadcast::Receiver<BidEvent> {
        self.events.subscribe()
    }

    /// Make a company known to the ledger.
    pub fn register_company(&self, company_id: CompanyId) {
        self.companies.insert(company_id);
    }

    /// Make a project type known to the ledger.
    pub fn register_project_type(&self, project_type: ProjectType) {
        self.project_types.insert(project_type);
    }

    /// Record a bid.
    ///
    /// The bid may carry any status, so historical data can be loaded as is.
    /// Its company and project type become known to the ledger.
    pub fn record(&self, bid: Bid) -> Result<Bid, TraitError> {
        bid.validate()?;
        if bid.status.is_terminal() && bid.resolved_at.is_none() {
            return Err(TraitError::InvalidInput(format!(
                "bid {} is {} but has no resolution time",
                bid.id, bid.status
            )));
        }

        match self.bids.entry(bid.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(TraitError::AlreadyExists(format!("bid {}", bid.id)));
            }
            dashmap::mapref::entry::Entry::Vacant(e) => {
                e.insert(bid.clone());
            }
        }
        self.companies.insert(bid.company_id.clone());
        self.project_types.insert(bid.project_type.clone());

        debug!(bid = %bid.id, company = %bid.company_id, "recorded bid");
        self.publish(BidEvent::Submitted {
            company_id: bid.company_id.clone(),
            bid_id: bid.id.clone(),
            at: bid.submitted_at,
        });
        Ok(bid)
    }

    /// Move a bid to a new status.
    ///
    /// Terminal statuses stamp `resolved_at` with `at`.
    pub fn update_status(
        &self,
        bid_id: &BidId,
        status: BidStatus,
        at: DateTime<Utc>,
    ) -> Result<Bid, TraitError> {
        let (updated, from) = {
            let mut entry = self
                .bids
                .get_mut(bid_id)
                .ok_or_else(|| TraitError::NotFound(format!("bid {}", bid_id)))?;
            let bid = entry.value_mut();

            let from = bid.status;
            if !from.can_transition_to(status) {
                return Err(TraitError::InvalidTransition(format!(
                    "bid {} cannot move from {} to {}",
                    bid_id, from, status
                )));
            }
            if at < bid.submitted_at {
                return Err(TraitError::InvalidInput(format!(
                    "bid {} cannot change status before it was submitted",
                    bid_id
                )));
            }

            bid.status = status;
            if status.is_terminal() {
                bid.resolved_at = Some(at);
            }
            (bid.clone(), from)
        };

        debug!(bid = %bid_id, %from, to = %status, "status changed");
        self.publish(BidEvent::StatusChanged {
            company_id: updated.company_id.clone(),
            bid_id: bid_id.clone(),
            from,
            to: status,
            at,
        });
        Ok(updated)
    }

    /// Get a bid by ID.
    pub fn get(&self, bid_id: &BidId) -> Option<Bid> {
        self.bids.get(bid_id).map(|b| b.clone())
    }

    /// Get total count of bids.
    pub fn len(&self) -> usize {
        self.bids.len()
    }

    /// Check if the ledger is empty.
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty()
    }

    fn publish(&self, event: BidEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

impl Default for InMemoryBidLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BidLedger for InMemoryBidLedger {
    async fn scan(&self, scan: &LedgerScan) -> Result<Vec<Bid>, TraitError> {
        Ok(self
            .bids
            .iter()
            .filter(|r| scan.matches(r.value()))
            .map(|r| r.value().clone())
            .collect())
    }

    async fn company_exists(&self, company_id: &CompanyId) -> Result<bool, TraitError> {
        Ok(self.companies.contains(company_id))
    }

    async fn project_types(&self) -> Result<Vec<ProjectType>, TraitError> {
        let mut types: Vec<ProjectType> = self.project_types.iter().map(|p| p.clone()).collect();
        types.sort();
        Ok(types)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap()
    }

    fn new_bid(id: &str, company: &str) -> Bid {
        Bid::submitted(
            id,
            CompanyId::new(company),
            ProjectType::parse("roofing").unwrap(),
            dec!(12000),
            at(1),
        )
    }

    #[tokio::test]
    async fn test_record_and_scan() {
        let ledger = InMemoryBidLedger::new();
        ledger.record(new_bid("B1", "C1")).unwrap();
        ledger.record(new_bid("B2", "C2")).unwrap();

        let c1 = ledger.scan(&LedgerScan::company(CompanyId::new("C1"))).await.unwrap();
        assert_eq!(c1.len(), 1);
        assert_eq!(c1[0].id.as_str(), "B1");

        let all = ledger.scan(&LedgerScan::all()).await.unwrap();
        assert_eq!(all.len(), 2);

        assert!(ledger.company_exists(&CompanyId::new("C2")).await.unwrap());
        assert!(!ledger.company_exists(&CompanyId::new("C9")).await.unwrap());
        assert_eq!(
            ledger.project_types().await.unwrap(),
            vec![ProjectType::parse("roofing").unwrap()]
        );
    }

    #[test]
    fn test_duplicate_bid_rejected() {
        let ledger = InMemoryBidLedger::new();
        ledger.record(new_bid("B1", "C1")).unwrap();
        assert!(matches!(
            ledger.record(new_bid("B1", "C1")),
            Err(TraitError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_terminal_bid_needs_resolution_time() {
        let ledger = InMemoryBidLedger::new();
        let bid = new_bid("B1", "C1").with_status(BidStatus::Won);
        assert!(matches!(ledger.record(bid), Err(TraitError::InvalidInput(_))));
    }

    #[test]
    fn test_update_status_follows_lifecycle() {
        let ledger = InMemoryBidLedger::new();
        let id = BidId::new("B1");
        ledger.record(new_bid("B1", "C1")).unwrap();

        let pending = ledger.update_status(&id, BidStatus::Pending, at(2)).unwrap();
        assert_eq!(pending.resolved_at, None);

        let won = ledger.update_status(&id, BidStatus::Won, at(5)).unwrap();
        assert_eq!(won.resolved_at, Some(at(5)));
        assert_eq!(won.response_time(), Some(Duration::days(4)));

        assert!(matches!(
            ledger.update_status(&id, BidStatus::Lost, at(6)),
            Err(TraitError::InvalidTransition(_))
        ));
        assert!(matches!(
            ledger.update_status(&BidId::new("B404"), BidStatus::Won, at(6)),
            Err(TraitError::NotFound(_))
        ));
    }

    #[test]
    fn test_events_published() {
        let ledger = InMemoryBidLedger::new();
        let mut rx = ledger.subscribe();

        ledger.record(new_bid("B1", "C1")).unwrap();
        ledger
            .update_status(&BidId::new("B1"), BidStatus::Lost, at(3))
            .unwrap();

        match rx.try_recv().unwrap() {
            BidEvent::Submitted { company_id, .. } => assert_eq!(company_id.as_str(), "C1"),
            other => panic!("unexpected event {:?}", other),
        }
        match rx.try_recv().unwrap() {
            BidEvent::StatusChanged { from, to, .. } => {
                assert_eq!(from, BidStatus::Submitted);
                assert_eq!(to, BidStatus::Lost);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
