//! Bid ledger trait.
//!
//! The ledger is the read-only view of the bid store the engine aggregates
//! over. Storage implementations are EXTENSIONS (in-memory, SQL, ...).

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::bid::Bid;
use crate::error::TraitError;
use crate::ids::{CompanyId, ProjectType};

/// Filter for a ledger scan.
///
/// Every field narrows the result; an empty scan returns the whole ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerScan {
    /// Restrict to one company (`None` = all companies)
    pub company_id: Option<CompanyId>,
    /// Only bids submitted at or after this instant
    pub since: Option<DateTime<Utc>>,
    /// Restrict to one project type
    pub project_type: Option<ProjectType>,
}

impl LedgerScan {
    /// Scan the full history of one company.
    pub fn company(company_id: CompanyId) -> Self {
        Self {
            company_id: Some(company_id),
            ..Default::default()
        }
    }

    /// Scan across all companies.
    pub fn all() -> Self {
        Self::default()
    }

    /// Only bids submitted at or after `since`.
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// Only bids of `project_type`.
    pub fn project_type(mut self, project_type: ProjectType) -> Self {
        self.project_type = Some(project_type);
        self
    }

    /// Whether a bid passes this filter.
    pub fn matches(&self, bid: &Bid) -> bool {
        if let Some(ref company) = self.company_id {
            if &bid.company_id != company {
                return false;
            }
        }
        if let Some(since) = self.since {
            if bid.submitted_at < since {
                return false;
            }
        }
        if let Some(ref project_type) = self.project_type {
            if &bid.project_type != project_type {
                return false;
            }
        }
        true
    }
}

/// Read-only bid store consumed by the analytics engine.
#[async_trait]
pub trait BidLedger: Send + Sync {
    /// Return every bid matching the scan, in any order.
    async fn scan(&self, scan: &LedgerScan) -> Result<Vec<Bid>, TraitError>;

    /// Whether the company is known to the ledger.
    async fn company_exists(&self, company_id: &CompanyId) -> Result<bool, TraitError>;

    /// The set of project types the ledger knows about.
    async fn project_types(&self) -> Result<Vec<ProjectType>, TraitError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn test_scan_matches() {
        let bid = Bid::submitted(
            "B1",
            CompanyId::new("C1"),
            ProjectType::parse("it").unwrap(),
            dec!(100),
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
        );

        assert!(LedgerScan::all().matches(&bid));
        assert!(LedgerScan::company("C1".into()).matches(&bid));
        assert!(!LedgerScan::company("C2".into()).matches(&bid));

        let since_march = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        assert!(LedgerScan::all().since(since_march).matches(&bid));
        let since_april = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();
        assert!(!LedgerScan::all().since(since_april).matches(&bid));

        let road = ProjectType::parse("roads").unwrap();
        assert!(!LedgerScan::all().project_type(road).matches(&bid));
    }
}
