//! In-memory store
//!
//! A commit clones the state, applies the change set to the clone and swaps
//! it in only if every write validated, all under one write lock.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use cod_amounts::{batch_totals, Calculator};
use cod_types::{
    Batch, BatchId, BatchOrigin, Carrier, CarrierId, CodError, CustomerPayout, PayoutId, Result,
    Shipment, ShipmentId,
};

use crate::{
    BatchFilter, BatchWrite, ChangeSet, CodStore, CommitReceipt, EligibilityCriteria, PayoutWrite,
};

/// Serializable contents of a store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub carriers: Vec<Carrier>,
    pub shipments: Vec<Shipment>,
    pub batches: Vec<Batch>,
    pub payouts: Vec<CustomerPayout>,
}

#[derive(Debug, Clone, Default)]
struct StoreState {
    carriers: HashMap<CarrierId, Carrier>,
    shipments: HashMap<ShipmentId, Shipment>,
    batches: HashMap<BatchId, Batch>,
    payouts: HashMap<PayoutId, CustomerPayout>,
    /// shipment → open batch holding it
    claims: HashMap<ShipmentId, BatchId>,
}

fn conflict(entity: &str, id: impl ToString) -> CodError {
    CodError::ConcurrentModification {
        entity: entity.to_string(),
        id: id.to_string(),
    }
}

impl StoreState {
    fn rebuild_claims(&mut self) {
        self.claims = self
            .batches
            .values()
            .filter(|b| b.is_open())
            .flat_map(|b| b.shipment_ids.iter().map(move |s| (s.clone(), b.id.clone())))
            .collect();
    }

    fn refresh_totals(&mut self, batch_id: &BatchId) {
        let totals = match self.batches.get(batch_id) {
            Some(batch) => batch_totals(
                batch
                    .shipment_ids
                    .iter()
                    .filter_map(|id| self.shipments.get(id)),
            ),
            None => return,
        };
        if let Some(batch) = self.batches.get_mut(batch_id) {
            batch.totals = totals;
        }
    }

    fn next_sequence(&self, batch: &Batch) -> u32 {
        let existing = self
            .batches
            .values()
            .filter(|b| b.carrier_id == batch.carrier_id && b.collection_date == batch.collection_date)
            .count();
        existing as u32 + 1
    }

    fn apply(&mut self, changes: ChangeSet, calculator: &Calculator) -> Result<CommitReceipt> {
        // Shipments first so batch totals see the new figures
        let mut shipment_ids = Vec::with_capacity(changes.shipments.len());
        for mut shipment in changes.shipments {
            match self.shipments.get(&shipment.id) {
                Some(current) if current.version != shipment.version => {
                    return Err(conflict("Shipment", &shipment.id));
                }
                None if shipment.version != 0 => {
                    return Err(CodError::ShipmentNotFound {
                        shipment_id: shipment.id.to_string(),
                    });
                }
                _ => {}
            }
            calculator.recompute(&mut shipment);
            shipment.version += 1;
            shipment_ids.push(shipment.id.clone());
            self.shipments.insert(shipment.id.clone(), shipment);
        }

        let mut batch_ids = Vec::with_capacity(changes.batches.len());
        for write in changes.batches {
            let batch = match write {
                BatchWrite::Insert(mut batch) => {
                    if self.batches.contains_key(&batch.id) {
                        return Err(conflict("Batch", &batch.id));
                    }
                    let carrier = self.carriers.get(&batch.carrier_id).ok_or_else(|| {
                        CodError::CarrierNotFound {
                            carrier_id: batch.carrier_id.to_string(),
                        }
                    })?;
                    if batch.origin == BatchOrigin::Scheduled && batch.is_open() {
                        let duplicate = self.batches.values().any(|b| {
                            b.origin == BatchOrigin::Scheduled
                                && b.is_open()
                                && b.carrier_id == batch.carrier_id
                                && b.collection_date == batch.collection_date
                        });
                        if duplicate {
                            return Err(CodError::DuplicateScheduledBatch {
                                carrier_id: batch.carrier_id.to_string(),
                                date: batch.collection_date.to_string(),
                            });
                        }
                    }
                    if batch.name.is_empty() {
                        batch.name = Batch::format_name(
                            &carrier.code,
                            batch.collection_date,
                            self.next_sequence(&batch),
                        );
                    }
                    batch.version = 1;
                    batch
                }
                BatchWrite::Update(mut batch) => {
                    let current = self.batches.get(&batch.id).ok_or_else(|| {
                        CodError::BatchNotFound {
                            batch_id: batch.id.to_string(),
                        }
                    })?;
                    if current.version != batch.version {
                        return Err(conflict("Batch", &batch.id));
                    }
                    batch.version += 1;
                    batch
                }
            };
            batch_ids.push(batch.id.clone());
            self.batches.insert(batch.id.clone(), batch);
        }

        // Re-claim membership of every written batch
        for id in &batch_ids {
            self.claims.retain(|_, owner| owner != id);
        }
        let mut contested = BTreeSet::new();
        for id in &batch_ids {
            let Some(batch) = self.batches.get(id) else {
                continue;
            };
            if !batch.is_open() {
                continue;
            }
            for shipment_id in &batch.shipment_ids {
                if !self.shipments.contains_key(shipment_id) {
                    return Err(CodError::ShipmentNotFound {
                        shipment_id: shipment_id.to_string(),
                    });
                }
                match self.claims.get(shipment_id) {
                    Some(owner) if owner != id => {
                        contested.insert(shipment_id.to_string());
                    }
                    _ => {
                        self.claims.insert(shipment_id.clone(), id.clone());
                    }
                }
            }
        }
        if !contested.is_empty() {
            return Err(CodError::ShipmentAlreadyBatched {
                shipment_ids: contested.into_iter().collect(),
            });
        }

        // Derived totals of written batches and of open batches holding written shipments
        let mut refresh: BTreeSet<BatchId> = batch_ids.iter().cloned().collect();
        for shipment_id in &shipment_ids {
            if let Some(owner) = self.claims.get(shipment_id) {
                refresh.insert(owner.clone());
            }
        }
        for id in &refresh {
            self.refresh_totals(id);
        }

        let mut payouts = Vec::with_capacity(changes.payouts.len());
        for write in changes.payouts {
            match write {
                PayoutWrite::Insert(mut payout) => {
                    if self.payouts.contains_key(&payout.id) {
                        return Err(conflict("Payout", &payout.id));
                    }
                    payout.version = 1;
                    payouts.push(payout.clone());
                    self.payouts.insert(payout.id.clone(), payout);
                }
                PayoutWrite::Update(mut payout) => {
                    let current = self.payouts.get(&payout.id).ok_or_else(|| {
                        CodError::PayoutNotFound {
                            payout_id: payout.id.to_string(),
                        }
                    })?;
                    if current.version != payout.version {
                        return Err(conflict("Payout", &payout.id));
                    }
                    payout.version += 1;
                    payouts.push(payout.clone());
                    self.payouts.insert(payout.id.clone(), payout);
                }
                PayoutWrite::Delete(id) => {
                    if self.payouts.remove(&id).is_none() {
                        return Err(CodError::PayoutNotFound {
                            payout_id: id.to_string(),
                        });
                    }
                }
            }
        }

        Ok(CommitReceipt {
            batches: batch_ids
                .iter()
                .filter_map(|id| self.batches.get(id).cloned())
                .collect(),
            payouts,
            shipments: shipment_ids
                .iter()
                .filter_map(|id| self.shipments.get(id).cloned())
                .collect(),
        })
    }
}

/// In-memory implementation of [`CodStore`]
#[derive(Clone)]
pub struct InMemoryStore {
    state: Arc<RwLock<StoreState>>,
    calculator: Calculator,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_calculator(Calculator::default())
    }

    pub fn with_calculator(calculator: Calculator) -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState::default())),
            calculator,
        }
    }

    /// Restore from a snapshot, recomputing every derived figure
    pub fn from_snapshot(snapshot: StoreSnapshot, calculator: Calculator) -> Self {
        let mut state = StoreState {
            carriers: snapshot
                .carriers
                .into_iter()
                .map(|c| (c.id.clone(), c))
                .collect(),
            shipments: snapshot
                .shipments
                .into_iter()
                .map(|mut s| {
                    calculator.recompute(&mut s);
                    (s.id.clone(), s)
                })
                .collect(),
            batches: snapshot
                .batches
                .into_iter()
                .map(|b| (b.id.clone(), b))
                .collect(),
            payouts: snapshot
                .payouts
                .into_iter()
                .map(|p| (p.id.clone(), p))
                .collect(),
            claims: HashMap::new(),
        };
        state.rebuild_claims();
        let ids: Vec<BatchId> = state.batches.keys().cloned().collect();
        for id in &ids {
            state.refresh_totals(id);
        }
        Self {
            state: Arc::new(RwLock::new(state)),
            calculator,
        }
    }

    /// Capture the current contents in a stable order
    pub fn snapshot(&self) -> StoreSnapshot {
        let state = self.state.read();
        let mut carriers: Vec<Carrier> = state.carriers.values().cloned().collect();
        carriers.sort_by(|a, b| a.code.cmp(&b.code));
        let mut shipments: Vec<Shipment> = state.shipments.values().cloned().collect();
        shipments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.reference.cmp(&b.reference)));
        let mut batches: Vec<Batch> = state.batches.values().cloned().collect();
        batches.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        let mut payouts: Vec<CustomerPayout> = state.payouts.values().cloned().collect();
        payouts.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        StoreSnapshot {
            carriers,
            shipments,
            batches,
            payouts,
        }
    }

    pub fn calculator(&self) -> Calculator {
        self.calculator
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CodStore for InMemoryStore {
    async fn list_carriers(&self) -> Result<Vec<Carrier>> {
        let mut carriers: Vec<Carrier> = self.state.read().carriers.values().cloned().collect();
        carriers.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(carriers)
    }

    async fn get_carrier(&self, id: &CarrierId) -> Result<Carrier> {
        self.state
            .read()
            .carriers
            .get(id)
            .cloned()
            .ok_or_else(|| CodError::CarrierNotFound {
                carrier_id: id.to_string(),
            })
    }

    async fn upsert_carrier(&self, carrier: Carrier) -> Result<()> {
        self.state.write().carriers.insert(carrier.id.clone(), carrier);
        Ok(())
    }

    async fn get_shipment(&self, id: &ShipmentId) -> Result<Shipment> {
        self.state
            .read()
            .shipments
            .get(id)
            .cloned()
            .ok_or_else(|| CodError::ShipmentNotFound {
                shipment_id: id.to_string(),
            })
    }

    async fn get_shipments(&self, ids: &[ShipmentId]) -> Result<Vec<Shipment>> {
        let state = self.state.read();
        ids.iter()
            .map(|id| {
                state
                    .shipments
                    .get(id)
                    .cloned()
                    .ok_or_else(|| CodError::ShipmentNotFound {
                        shipment_id: id.to_string(),
                    })
            })
            .collect()
    }

    async fn list_eligible_shipments(
        &self,
        criteria: &EligibilityCriteria,
    ) -> Result<Vec<Shipment>> {
        let state = self.state.read();
        let mut shipments: Vec<Shipment> = state
            .shipments
            .values()
            .filter(|s| s.is_batch_eligible())
            .filter(|s| criteria.carrier_id.as_ref().map_or(true, |c| &s.carrier_id == c))
            .filter(|s| match criteria.collected_on_or_before {
                Some(cutoff) => s.cod_collected_at.map_or(false, |at| at <= cutoff),
                None => true,
            })
            .filter(|s| criteria.include_claimed || !state.claims.contains_key(&s.id))
            .cloned()
            .collect();
        shipments.sort_by(|a, b| {
            a.cod_collected_at
                .cmp(&b.cod_collected_at)
                .then(a.reference.cmp(&b.reference))
        });
        debug!("{} eligible shipments for {:?}", shipments.len(), criteria.carrier_id);
        Ok(shipments)
    }

    async fn claims(&self, ids: &[ShipmentId]) -> Result<HashMap<ShipmentId, BatchId>> {
        let state = self.state.read();
        Ok(ids
            .iter()
            .filter_map(|id| state.claims.get(id).map(|b| (id.clone(), b.clone())))
            .collect())
    }

    async fn get_batch(&self, id: &BatchId) -> Result<Batch> {
        self.state
            .read()
            .batches
            .get(id)
            .cloned()
            .ok_or_else(|| CodError::BatchNotFound {
                batch_id: id.to_string(),
            })
    }

    async fn find_batches(&self, filter: &BatchFilter) -> Result<Vec<Batch>> {
        let mut batches: Vec<Batch> = self
            .state
            .read()
            .batches
            .values()
            .filter(|b| filter.matches(b))
            .cloned()
            .collect();
        batches.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        Ok(batches)
    }

    async fn get_payout(&self, id: &PayoutId) -> Result<CustomerPayout> {
        self.state
            .read()
            .payouts
            .get(id)
            .cloned()
            .ok_or_else(|| CodError::PayoutNotFound {
                payout_id: id.to_string(),
            })
    }

    async fn list_payouts(&self, batch_id: &BatchId) -> Result<Vec<CustomerPayout>> {
        let mut payouts: Vec<CustomerPayout> = self
            .state
            .read()
            .payouts
            .values()
            .filter(|p| &p.batch_id == batch_id)
            .cloned()
            .collect();
        payouts.sort_by(|a, b| a.seller_id.cmp(&b.seller_id));
        Ok(payouts)
    }

    async fn commit(&self, changes: ChangeSet) -> Result<CommitReceipt> {
        let mut state = self.state.write();
        let mut next = state.clone();
        let receipt = next.apply(changes, &self.calculator)?;
        *state = next;
        Ok(receipt)
    }
}
