//! The bid entity.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::TraitError;
use crate::ids::{BidId, CompanyId, ProjectType};

/// Lifecycle status of a bid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BidStatus {
    /// Just submitted, not yet reviewed
    Submitted,
    /// Under consideration
    Pending,
    /// Accepted by the client
    Won,
    /// Rejected by the client
    Lost,
    /// Pulled back by the company
    Withdrawn,
}

impl BidStatus {
    /// All statuses, in display order.
    pub const ALL: [BidStatus; 5] = [
        BidStatus::Submitted,
        BidStatus::Pending,
        BidStatus::Won,
        BidStatus::Lost,
        BidStatus::Withdrawn,
    ];

    /// Terminal statuses can never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Won | Self::Lost | Self::Withdrawn)
    }

    /// Won or lost: the bid counts towards win rates.
    pub fn is_decided(&self) -> bool {
        matches!(self, Self::Won | Self::Lost)
    }

    /// Submitted or pending.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: BidStatus) -> bool {
        match self {
            Self::Submitted => next != Self::Submitted,
            Self::Pending => next.is_terminal(),
            _ => false,
        }
    }

    /// Canonical upper-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "SUBMITTED",
            Self::Pending => "PENDING",
            Self::Won => "WON",
            Self::Lost => "LOST",
            Self::Withdrawn => "WITHDRAWN",
        }
    }
}

impl fmt::Display for BidStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BidStatus {
    type Err = TraitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SUBMITTED" => Ok(Self::Submitted),
            "PENDING" => Ok(Self::Pending),
            "WON" | "ACCEPTED" => Ok(Self::Won),
            "LOST" | "REJECTED" => Ok(Self::Lost),
            "WITHDRAWN" => Ok(Self::Withdrawn),
            other => Err(TraitError::InvalidInput(format!("unknown bid status: {}", other))),
        }
    }
}

/// A company's bid against a client request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bid {
    /// Unique bid identifier
    pub id: BidId,
    /// Owning company
    pub company_id: CompanyId,
    /// Project category
    pub project_type: ProjectType,
    /// Monetary value (never negative)
    pub amount: Decimal,
    /// Current lifecycle status
    pub status: BidStatus,
    /// Submission instant
    pub submitted_at: DateTime<Utc>,
    /// Resolution instant, set once the bid reaches a terminal status
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Bid {
    /// Create a freshly submitted bid.
    pub fn submitted(
        id: impl Into<String>,
        company_id: CompanyId,
        project_type: ProjectType,
        amount: Decimal,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: BidId::new(id),
            company_id,
            project_type,
            amount,
            status: BidStatus::Submitted,
            submitted_at,
            resolved_at: None,
        }
    }

    /// Set the status and resolution instant.
    pub fn with_resolution(mut self, status: BidStatus, resolved_at: DateTime<Utc>) -> Self {
        self.status = status;
        self.resolved_at = Some(resolved_at);
        self
    }

    /// Set the status without a resolution instant.
    pub fn with_status(mut self, status: BidStatus) -> Self {
        self.status = status;
        self
    }

    /// Whether the bid reached a terminal status and carries its resolution instant.
    pub fn is_resolved(&self) -> bool {
        self.status.is_terminal() && self.resolved_at.is_some()
    }

    /// Time from submission to resolution, for resolved bids only.
    pub fn response_time(&self) -> Option<Duration> {
        if !self.status.is_terminal() {
            return None;
        }
        self.resolved_at.map(|r| r - self.submitted_at)
    }

    /// Check the entity invariants.
    pub fn validate(&self) -> Result<(), TraitError> {
        if self.amount.is_sign_negative() && !self.amount.is_zero() {
            return Err(TraitError::InvalidInput(format!(
                "bid {} has negative amount {}",
                self.id, self.amount
            )));
        }
        if let Some(resolved) = self.resolved_at {
            if resolved < self.submitted_at {
                return Err(TraitError::InvalidInput(format!(
                    "bid {} resolved before it was submitted",
                    self.id
                )));
            }
        }
        Ok(())
    }
}
