//! JSON seed loading.
//!
//! A seed file lists the known companies and project types and the bids to
//! preload:
//!
//! ```json
//! {
//!   "companies": ["C1"],
//!   "project_types": ["construction"],
//!   "bids": [
//!     {
//!       "id": "B1",
//!       "company_id": "C1",
//!       "project_type": "construction",
//!       "amount": 25000.0,
//!       "status": "ACCEPTED",
//!       "submitted_at": "2024-01-05T09:00:00Z",
//!       "resolved_at": "2024-01-12T09:00:00Z"
//!     }
//!   ]
//! }
//! ```

use std::path::Path;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::info;

use bidscope_traits::error::TraitError;
use bidscope_traits::ids::*;
use bidscope_traits::{Bid, BidStatus};

use crate::ledger::InMemoryBidLedger;

#[derive(Debug, Deserialize)]
struct SeedFile {
    #[serde(default)]
    companies: Vec<String>,
    #[serde(default)]
    project_types: Vec<String>,
    #[serde(default)]
    bids: Vec<BidRecord>,
}

#[derive(Debug, Deserialize)]
struct BidRecord {
    id: String,
    company_id: String,
    project_type: String,
    amount: f64,
    status: String,
    submitted_at: DateTime<Utc>,
    #[serde(default)]
    resolved_at: Option<DateTime<Utc>>,
}

impl BidRecord {
    fn into_bid(self) -> Result<Bid, TraitError> {
        let status: BidStatus = self.status.parse()?;
        let amount = Decimal::try_from(self.amount)
            .map_err(|e| TraitError::ParseError(format!("bid {} amount: {}", self.id, e)))?;
        let bid = Bid::submitted(
            self.id,
            CompanyId::new(self.company_id),
            ProjectType::parse(&self.project_type)?,
            amount,
            self.submitted_at,
        );
        Ok(match self.resolved_at {
            Some(resolved_at) => bid.with_resolution(status, resolved_at),
            None => bid.with_status(status),
        })
    }
}

/// Load seed data from a JSON string into `ledger`. Returns the number of bids loaded.
pub fn load_seed_str(ledger: &InMemoryBidLedger, content: &str) -> Result<usize, TraitError> {
    let seed: SeedFile =
        serde_json::from_str(content).map_err(|e| TraitError::ParseError(e.to_string()))?;

    for company in seed.companies {
        ledger.register_company(CompanyId::new(company));
    }
    for project_type in seed.project_types {
        ledger.register_project_type(ProjectType::parse(&project_type)?);
    }

    let mut loaded = 0;
    for record in seed.bids {
        ledger.record(record.into_bid()?)?;
        loaded += 1;
    }
    Ok(loaded)
}

/// Load seed data from a JSON file. A missing file loads nothing.
pub fn load_seed_file(
    ledger: &InMemoryBidLedger,
    file_path: impl AsRef<Path>,
) -> Result<usize, TraitError> {
    let file_path = file_path.as_ref();
    if !file_path.exists() {
        return Ok(0); // Empty ledger
    }

    let content = std::fs::read_to_string(file_path)
        .map_err(|e| TraitError::IoError(e.to_string()))?;
    let loaded = load_seed_str(ledger, &content)?;
    info!("Loaded {} bids from {}", loaded, file_path.display());
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use bidscope_traits::{BidLedger, LedgerScan};

    const SEED: &str = r#"{
        "companies": ["C1", "C2"],
        "project_types": ["construction", "Roofing"],
        "bids": [
            {
                "id": "B1",
                "company_id": "C1",
                "project_type": "construction",
                "amount": 25000.0,
                "status": "ACCEPTED",
                "submitted_at": "2024-01-05T09:00:00Z",
                "resolved_at": "2024-01-12T09:00:00Z"
            },
            {
                "id": "B2",
                "company_id": "C1",
                "project_type": "construction",
                "amount": 8000.5,
                "status": "PENDING",
                "submitted_at": "2024-02-01T09:00:00Z"
            }
        ]
    }"#;

    #[tokio::test]
    async fn test_load_seed() {
        let ledger = InMemoryBidLedger::new();
        assert_eq!(load_seed_str(&ledger, SEED).unwrap(), 2);

        let bids = ledger.scan(&LedgerScan::all()).await.unwrap();
        assert_eq!(bids.len(), 2);
        let b1 = ledger.get(&BidId::new("B1")).unwrap();
        assert_eq!(b1.status, BidStatus::Won);
        assert!(b1.is_resolved());

        // companies without bids are still known
        assert!(ledger.company_exists(&CompanyId::new("C2")).await.unwrap());
        let types = ledger.project_types().await.unwrap();
        assert!(types.contains(&ProjectType::parse("roofing").unwrap()));
    }

    #[test]
    fn test_unknown_status_rejected() {
        let ledger = InMemoryBidLedger::new();
        let seed = SEED.replace("PENDING", "MAYBE");
        assert!(matches!(
            load_seed_str(&ledger, &seed),
            Err(TraitError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_malformed_json_rejected() {
        let ledger = InMemoryBidLedger::new();
        assert!(matches!(
            load_seed_str(&ledger, "{ not json"),
            Err(TraitError::ParseError(_))
        ));
    }

    #[test]
    fn test_load_seed_file() {
        let ledger = InMemoryBidLedger::new();
        assert_eq!(load_seed_file(&ledger, "/nonexistent/seed.json").unwrap(), 0);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SEED.as_bytes()).unwrap();
        assert_eq!(load_seed_file(&ledger, file.path()).unwrap(), 2);
        assert_eq!(ledger.len(), 2);
    }
}
