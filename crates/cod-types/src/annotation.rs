//! Observational annotations attached to batches and payouts
//!
//! Annotations surface data-quality signals (variance, negative margin) to a
//! human reviewer. Nothing in the engine ever acts on them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What an annotation is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationKind {
    /// Lifecycle information (creation, confirmation, cancellation)
    Info,
    /// Received amount differs from the expected amount
    Variance,
    /// A shipment costs the merchant more than it charges the seller
    NegativeMargin,
    /// A seller's net payout is below zero
    NegativePayout,
    /// Summary of a settlement run
    Settlement,
}

/// A single append-only note
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub kind: AnnotationKind,
    pub message: String,
    pub recorded_at: DateTime<Utc>,
}

impl Annotation {
    pub fn new(kind: AnnotationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            recorded_at: Utc::now(),
        }
    }
}
