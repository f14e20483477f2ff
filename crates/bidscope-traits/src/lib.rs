//! # Bidscope Traits
//!
//! Domain types and collaborator traits for the Bidscope analytics engine.
//!
//! This crate contains the bid model and the interfaces the engine consumes.
//! Implementations live in extension crates.
//!
//! ## Module Structure
//!
//! - [`bid`]: The bid entity and its lifecycle status
//! - [`ids`]: Identifier types (companies, bids, project types)
//! - [`ledger`]: Read-only bid ledger trait (range/filter scans)
//! - [`events`]: Bid events used for cache invalidation
//! - [`clock`]: Time source abstraction
//! - [`config`]: Engine configuration
//!
//! ## Dependency Injection
//!
//! ```ignore
//! AnalyticsEngineBuilder::new()
//!     .with_ledger(impl BidLedger)
//!     .with_clock(impl Clock)
//!     .with_config(AnalyticsConfig::default())
//!     .build()
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bid;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod ledger;

// Re-export commonly used types
pub use bid::{Bid, BidStatus};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::AnalyticsConfig;
pub use error::TraitError;
pub use events::BidEvent;
pub use ids::*;
pub use ledger::{BidLedger, LedgerScan};
