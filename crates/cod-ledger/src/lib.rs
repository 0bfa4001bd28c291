//! COD Ledger - Accounting collaborator for COD settlement
//!
//! The engine decides *what* gets reconciled and *how much*. Posting,
//! matching and voiding of entries belong to the accounting subsystem,
//! reached through the [`Accounting`] trait.
//!
//! The ledger is:
//! - Document-keyed (vendor bills, customer invoices, credit notes)
//! - Append-only (every posting, match and void is a journal entry)
//! - Residual-tracking (a document's residual never goes below zero)
//! - Reversible (voiding a payment unwinds its reconciliations)
//!
//! # Invariants
//!
//! 1. A reconciliation never exceeds the document's current residual
//! 2. A reconciliation never exceeds the payment's unapplied amount
//! 3. Outbound payments settle vendor bills, inbound payments settle invoices

pub mod accounting;
pub mod memory;

pub use accounting::{Accounting, NewDocument};
pub use memory::{InMemoryLedger, LedgerEntry, LedgerSnapshot, Reconciliation};

use cod_types::CodError;
use thiserror::Error;

/// Errors that can occur in ledger operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Document not found: {document_id}")]
    DocumentNotFound { document_id: String },

    #[error("Payment not found: {payment_id}")]
    PaymentNotFound { payment_id: String },

    #[error("Invalid amount: {message}")]
    InvalidAmount { message: String },

    #[error("Cannot reconcile payment {payment_id} with document {document_id}: {reason}")]
    ReconciliationRejected {
        payment_id: String,
        document_id: String,
        reason: String,
    },

    #[error("{entity} {id} is already voided")]
    AlreadyVoided { entity: String, id: String },

    #[error("Accounting backend unavailable: {message}")]
    Unavailable { message: String },
}

pub type Result<T> = std::result::Result<T, LedgerError>;

impl LedgerError {
    /// Attach the engine-level operation that failed
    pub fn during(self, operation: &str) -> CodError {
        CodError::accounting(operation, self.to_string())
    }
}

impl From<LedgerError> for CodError {
    fn from(e: LedgerError) -> Self {
        e.during("ledger call")
    }
}
