//! COD Types - Canonical domain types for cash-on-delivery settlement
//!
//! This crate contains the foundational types of the engine with zero
//! dependencies on other cod crates:
//!
//! - Identity types (ShipmentId, BatchId, CarrierId, SellerId, ...)
//! - `Money`, a fixed-point decimal amount with half-up rounding
//! - Shipments, carriers, batches and customer payouts with their state machines
//! - References to documents and payments held by the accounting subsystem
//! - `CodError`, the error type shared by every engine crate
//!
//! # Money Flow
//!
//! ```text
//! Shipment → Batch (per carrier) → Carrier settlement → Seller payouts → Ledger
//! ```

pub mod identity;
pub mod money;
pub mod annotation;
pub mod shipment;
pub mod carrier;
pub mod batch;
pub mod payout;
pub mod accounting;
pub mod error;

pub use identity::*;
pub use money::*;
pub use annotation::*;
pub use shipment::*;
pub use carrier::*;
pub use batch::*;
pub use payout::*;
pub use accounting::*;
pub use error::*;
