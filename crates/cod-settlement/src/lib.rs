//! COD Settlement - Carrier settlement and seller payouts
//!
//! After a batch is confirmed the cash moves in two legs:
//!
//! ```text
//! carrier ──(actual received)──▶ merchant ──(payouts)──▶ sellers
//!            settles vendor bills            offsets invoices, credits the rest
//! ```
//!
//! Every leg posts through the [`cod_ledger::Accounting`] seam and persists
//! through one [`cod_store::ChangeSet`]. When a later step fails, the
//! payments and credit notes already posted are voided so the batch is left
//! as it was. Within one process a batch or payout is settled by one caller
//! at a time; a concurrent caller gets `ConcurrentModification`.

pub mod advance;
pub mod billing;
pub mod carrier;
pub mod config;
pub mod engine;
mod inflight;
pub mod payout;

pub use advance::AdvancePayments;
pub use billing::{ShipmentBilling, ShipmentDocuments};
pub use carrier::{BillApplication, CarrierSettlement, CarrierSettlementEngine};
pub use config::SettlementConfig;
pub use engine::CodEngine;
pub use payout::{PayoutEngine, PayoutFailure, PayoutRunReport};

#[cfg(test)]
pub(crate) mod testing;
