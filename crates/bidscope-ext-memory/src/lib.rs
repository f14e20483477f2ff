//! # Bidscope Ext Memory
//!
//! In-memory bid ledger for the Bidscope analytics engine.
//!
//! This crate provides a default [`BidLedger`](bidscope_traits::BidLedger)
//! implementation for testing, demos and small deployments:
//! - [`InMemoryBidLedger`]: DashMap-backed ledger publishing [`BidEvent`](bidscope_traits::BidEvent)s
//! - JSON seed loading via [`load_seed_file`] and [`load_seed_str`]
//!
//! For production data, implement `BidLedger` over the system of record.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod ledger;
mod seed;

pub use ledger::*;
pub use seed::*;

use std::path::Path;
use std::sync::Arc;

use bidscope_traits::error::TraitError;

/// Create an in-memory ledger preloaded from a JSON seed file.
pub fn create_seeded_ledger(
    seed_file: Option<impl AsRef<Path>>,
) -> Result<Arc<InMemoryBidLedger>, TraitError> {
    let ledger = InMemoryBidLedger::new();
    if let Some(path) = seed_file {
        load_seed_file(&ledger, path)?;
    }
    Ok(Arc::new(ledger))
}
