//! Bid events.
//!
//! Ledgers publish an event whenever a bid is submitted or changes status.
//! The engine uses them to invalidate cached aggregations per company.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bid::BidStatus;
use crate::ids::{BidId, CompanyId};

/// A change in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BidEvent {
    /// A new bid was recorded
    Submitted {
        /// Owning company
        company_id: CompanyId,
        /// New bid
        bid_id: BidId,
        /// Submission instant
        at: DateTime<Utc>,
    },

    /// An existing bid changed status
    StatusChanged {
        /// Owning company
        company_id: CompanyId,
        /// Affected bid
        bid_id: BidId,
        /// Previous status
        from: BidStatus,
        /// New status
        to: BidStatus,
        /// Change instant
        at: DateTime<Utc>,
    },
}

impl BidEvent {
    /// Company whose aggregations this event affects.
    pub fn company_id(&self) -> &CompanyId {
        match self {
            BidEvent::Submitted { company_id, .. } => company_id,
            BidEvent::StatusChanged { company_id, .. } => company_id,
        }
    }

    /// Bid the event is about.
    pub fn bid_id(&self) -> &BidId {
        match self {
            BidEvent::Submitted { bid_id, .. } => bid_id,
            BidEvent::StatusChanged { bid_id, .. } => bid_id,
        }
    }
}
