//! Error types for the COD engine
//!
//! Every failure is explicit. Variance and negative margins are not errors;
//! they are recorded as annotations instead.

use thiserror::Error;

/// Result type for COD engine operations
pub type Result<T> = std::result::Result<T, CodError>;

/// COD engine error types
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodError {
    // ========================================================================
    // Batching Preconditions
    // ========================================================================

    /// Nothing to batch; the caller treats this as a no-op
    #[error("No eligible shipments for carrier {carrier_id}")]
    NoEligibleShipments { carrier_id: String },

    /// An explicitly requested shipment cannot be batched
    #[error("Shipment {shipment_id} is not eligible for batching: {reason}")]
    IneligibleShipment { shipment_id: String, reason: String },

    /// One or more shipments are already claimed by an open batch
    #[error("Shipments already claimed by an open batch: {}", shipment_ids.join(", "))]
    ShipmentAlreadyBatched { shipment_ids: Vec<String> },

    /// A scheduled batch already exists for this carrier and date
    #[error("Scheduled batch already exists for carrier {carrier_id} on {date}")]
    DuplicateScheduledBatch { carrier_id: String, date: String },

    /// A batch cannot be confirmed without shipments
    #[error("Batch {batch_id} has no shipments")]
    EmptyBatch { batch_id: String },

    // ========================================================================
    // Settlement Preconditions
    // ========================================================================

    /// Settlement requires a posted vendor bill for every shipment
    #[error("Missing vendor bills for shipments: {}", shipment_ids.join(", "))]
    MissingVendorBills { shipment_ids: Vec<String> },

    /// Operation not allowed in the batch's current state
    #[error("Batch {batch_id} is {actual}, expected {expected}")]
    InvalidBatchState {
        batch_id: String,
        expected: String,
        actual: String,
    },

    /// Operation not allowed in the payout's current state
    #[error("Payout {payout_id} is {actual}, expected {expected}")]
    InvalidPayoutState {
        payout_id: String,
        expected: String,
        actual: String,
    },

    /// Illegal COD status transition on a shipment
    #[error("Shipment {shipment_id} cannot move from {from} to {to}")]
    InvalidCodTransition {
        shipment_id: String,
        from: String,
        to: String,
    },

    /// Cost inputs can no longer change
    #[error("Shipment {shipment_id} costs are locked in status {status}")]
    CostsLocked { shipment_id: String, status: String },

    /// Amount outside its allowed range
    #[error("Invalid amount: {message}")]
    InvalidAmount { message: String },

    /// Request is malformed
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    // ========================================================================
    // Lookup Errors
    // ========================================================================

    #[error("Shipment {shipment_id} not found")]
    ShipmentNotFound { shipment_id: String },

    #[error("Batch {batch_id} not found")]
    BatchNotFound { batch_id: String },

    #[error("Payout {payout_id} not found")]
    PayoutNotFound { payout_id: String },

    #[error("Carrier {carrier_id} not found")]
    CarrierNotFound { carrier_id: String },

    // ========================================================================
    // Conflicts
    // ========================================================================

    /// Another writer committed first
    #[error("{entity} {id} was modified concurrently")]
    ConcurrentModification { entity: String, id: String },

    // ========================================================================
    // Collaborator Failures
    // ========================================================================

    /// The accounting subsystem rejected or failed a call
    #[error("Accounting {operation} failed: {message}")]
    Accounting { operation: String, message: String },

    /// The persistence layer failed
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// Invalid configuration
    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Coarse classification used by callers to decide how to react
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Rejected before any mutation; correct the input and retry
    Precondition,
    NotFound,
    /// Expected race or stale write; safe to skip or reload
    Conflict,
    /// External call failed; the operation was rolled back
    External,
    Storage,
    Configuration,
}

impl CodError {
    pub fn class(&self) -> ErrorClass {
        match self {
            CodError::NoEligibleShipments { .. }
            | CodError::IneligibleShipment { .. }
            | CodError::EmptyBatch { .. }
            | CodError::MissingVendorBills { .. }
            | CodError::InvalidBatchState { .. }
            | CodError::InvalidPayoutState { .. }
            | CodError::InvalidCodTransition { .. }
            | CodError::CostsLocked { .. }
            | CodError::InvalidAmount { .. }
            | CodError::InvalidRequest { .. } => ErrorClass::Precondition,
            CodError::ShipmentNotFound { .. }
            | CodError::BatchNotFound { .. }
            | CodError::PayoutNotFound { .. }
            | CodError::CarrierNotFound { .. } => ErrorClass::NotFound,
            CodError::ShipmentAlreadyBatched { .. }
            | CodError::DuplicateScheduledBatch { .. }
            | CodError::ConcurrentModification { .. } => ErrorClass::Conflict,
            CodError::Accounting { .. } => ErrorClass::External,
            CodError::Storage { .. } => ErrorClass::Storage,
            CodError::Config { .. } => ErrorClass::Configuration,
        }
    }

    /// Outcomes a periodic scan skips silently
    pub fn is_benign_race(&self) -> bool {
        matches!(
            self,
            CodError::NoEligibleShipments { .. }
                | CodError::ShipmentAlreadyBatched { .. }
                | CodError::DuplicateScheduledBatch { .. }
        )
    }

    pub fn accounting(operation: impl Into<String>, message: impl Into<String>) -> Self {
        CodError::Accounting {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        CodError::Storage {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_bills_lists_every_shipment() {
        let err = CodError::MissingVendorBills {
            shipment_ids: vec!["shp_a".into(), "shp_b".into()],
        };
        assert_eq!(err.to_string(), "Missing vendor bills for shipments: shp_a, shp_b");
        assert_eq!(err.class(), ErrorClass::Precondition);
    }

    #[test]
    fn test_races_are_conflicts() {
        let err = CodError::ShipmentAlreadyBatched {
            shipment_ids: vec!["shp_a".into()],
        };
        assert_eq!(err.class(), ErrorClass::Conflict);
        assert!(err.is_benign_race());
        assert!(!CodError::storage("down").is_benign_race());
    }
}
