//! Units of atomic persistence

use cod_types::{Batch, CustomerPayout, PayoutId, Shipment};

/// A batch write; updates carry the version they were read at
#[derive(Debug, Clone, PartialEq)]
pub enum BatchWrite {
    Insert(Batch),
    Update(Batch),
}

impl BatchWrite {
    pub fn batch(&self) -> &Batch {
        match self {
            BatchWrite::Insert(b) | BatchWrite::Update(b) => b,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PayoutWrite {
    Insert(CustomerPayout),
    Update(CustomerPayout),
    Delete(PayoutId),
}

/// Everything one engine operation persists
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub batches: Vec<BatchWrite>,
    pub payouts: Vec<PayoutWrite>,
    /// Inserted when new, otherwise updated at the version they carry
    pub shipments: Vec<Shipment>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_batch(mut self, batch: Batch) -> Self {
        self.batches.push(BatchWrite::Insert(batch));
        self
    }

    pub fn update_batch(mut self, batch: Batch) -> Self {
        self.batches.push(BatchWrite::Update(batch));
        self
    }

    pub fn insert_payout(mut self, payout: CustomerPayout) -> Self {
        self.payouts.push(PayoutWrite::Insert(payout));
        self
    }

    pub fn update_payout(mut self, payout: CustomerPayout) -> Self {
        self.payouts.push(PayoutWrite::Update(payout));
        self
    }

    pub fn delete_payout(mut self, id: PayoutId) -> Self {
        self.payouts.push(PayoutWrite::Delete(id));
        self
    }

    pub fn with_shipment(mut self, shipment: Shipment) -> Self {
        self.shipments.push(shipment);
        self
    }

    pub fn with_shipments(mut self, shipments: impl IntoIterator<Item = Shipment>) -> Self {
        self.shipments.extend(shipments);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty() && self.payouts.is_empty() && self.shipments.is_empty()
    }
}

/// Persisted state of everything a commit wrote, with fresh versions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitReceipt {
    pub batches: Vec<Batch>,
    pub payouts: Vec<CustomerPayout>,
    pub shipments: Vec<Shipment>,
}

impl CommitReceipt {
    /// The first batch written, which is the only one for most operations
    pub fn batch(&self) -> Option<&Batch> {
        self.batches.first()
    }
}
