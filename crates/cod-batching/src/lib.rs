//! COD Batching - Groups delivered COD shipments into collection batches
//!
//! Batches are created three ways:
//!
//! 1. **Manual**: a person picks a carrier, a date and optionally shipments
//! 2. **Scheduled**: the weekday scan, at most one per (carrier, date)
//! 3. **Overdue**: the sweep for shipments collected too long ago
//!
//! A batch stays side-effect free while in `draft`. Member shipments move to
//! `received_from_courier` only when the batch is confirmed.

pub mod aggregator;
pub mod schedule;
pub mod sweep;

pub use aggregator::{BatchAggregator, CreateBatchRequest};
pub use schedule::{CarrierScan, ScanOutcome, ScanReport};
pub use sweep::{SweepFailure, SweepReport};

#[cfg(test)]
pub(crate) mod testing;
