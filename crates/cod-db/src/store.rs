//! PostgreSQL implementation of [`CodStore`]
//!
//! A commit runs in one transaction. Versioned rows are updated with
//! `WHERE version = $n`; claims rely on the primary key of `batch_claims`,
//! so two transactions claiming the same shipment cannot both commit.

use std::collections::{BTreeSet, HashMap};

use sqlx::{PgConnection, PgPool};
use tracing::{debug, info};
use uuid::Uuid;

use cod_amounts::{batch_totals, Calculator};
use cod_store::{
    BatchFilter, BatchWrite, ChangeSet, CodStore, CommitReceipt, EligibilityCriteria, PayoutWrite,
};
use cod_types::{
    Batch, BatchId, BatchOrigin, BatchTotals, Carrier, CarrierId, CodError, CustomerPayout, PayoutId, Result,
    Shipment, ShipmentId,
};

use crate::error::SCHEDULED_BATCH_INDEX;
use crate::{
    BatchRepo, CarrierRepo, DbBatch, DbError, DbPayout, DbResult, DbShipment, PayoutRepo,
    ShipmentRepo,
};

fn conflict(entity: &str, id: impl ToString) -> CodError {
    CodError::ConcurrentModification {
        entity: entity.to_string(),
        id: id.to_string(),
    }
}

/// [`CodStore`] backed by PostgreSQL
#[derive(Clone)]
pub struct PgCodStore {
    pool: PgPool,
    calculator: Calculator,
}

impl PgCodStore {
    pub fn new(pool: PgPool, calculator: Calculator) -> Self {
        Self { pool, calculator }
    }

    pub fn calculator(&self) -> Calculator {
        self.calculator
    }

    fn carriers(&self) -> CarrierRepo {
        CarrierRepo::new(self.pool.clone())
    }

    fn shipments(&self) -> ShipmentRepo {
        ShipmentRepo::new(self.pool.clone())
    }

    fn batches(&self) -> BatchRepo {
        BatchRepo::new(self.pool.clone())
    }

    fn payouts(&self) -> PayoutRepo {
        PayoutRepo::new(self.pool.clone())
    }

    /// Attach membership to batch rows
    async fn hydrate(&self, rows: Vec<DbBatch>) -> Result<Vec<Batch>> {
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let mut members: HashMap<Uuid, BTreeSet<ShipmentId>> = HashMap::new();
        for (batch_id, shipment_id) in self.batches().members(&ids).await? {
            members
                .entry(batch_id)
                .or_default()
                .insert(ShipmentId::from_uuid(shipment_id));
        }
        let batches = rows
            .into_iter()
            .map(|row| {
                let shipment_ids = members.remove(&row.id).unwrap_or_default();
                row.into_batch(shipment_ids)
            })
            .collect::<DbResult<Vec<_>>>()?;
        Ok(batches)
    }

    async fn write_shipment(&self, conn: &mut PgConnection, mut shipment: Shipment) -> Result<Shipment> {
        self.calculator.recompute(&mut shipment);
        let row = DbShipment::from_shipment(&shipment)?;
        let uuid = *shipment.id.as_uuid();
        if shipment.version == 0 {
            if !ShipmentRepo::insert(conn, &row).await? {
                return Err(conflict("Shipment", &shipment.id));
            }
        } else if !ShipmentRepo::update(conn, &row).await? {
            return Err(if ShipmentRepo::exists(conn, uuid).await? {
                conflict("Shipment", &shipment.id)
            } else {
                CodError::ShipmentNotFound {
                    shipment_id: shipment.id.to_string(),
                }
            });
        }
        shipment.version += 1;
        Ok(shipment)
    }

    async fn write_batch(&self, conn: &mut PgConnection, write: BatchWrite) -> Result<Batch> {
        match write {
            BatchWrite::Insert(mut batch) => {
                let carrier_uuid = *batch.carrier_id.as_uuid();
                let carrier = self
                    .carriers()
                    .find_by_id(carrier_uuid)
                    .await?
                    .ok_or_else(|| CodError::CarrierNotFound {
                        carrier_id: batch.carrier_id.to_string(),
                    })?;
                if batch.name.is_empty() {
                    BatchRepo::lock_sequence(conn, carrier_uuid, batch.collection_date).await?;
                    let seq = BatchRepo::next_sequence(conn, carrier_uuid, batch.collection_date).await?;
                    batch.name = Batch::format_name(&carrier.code, batch.collection_date, seq);
                }
                let row = DbBatch::from_batch(&batch)?;
                match BatchRepo::insert(conn, &row).await {
                    Ok(()) => {}
                    Err(e) => {
                        return Err(match e.unique_violation().as_deref() {
                            Some(SCHEDULED_BATCH_INDEX) if batch.origin == BatchOrigin::Scheduled => {
                                CodError::DuplicateScheduledBatch {
                                    carrier_id: batch.carrier_id.to_string(),
                                    date: batch.collection_date.to_string(),
                                }
                            }
                            Some(_) => conflict("Batch", &batch.id),
                            None => e.into(),
                        });
                    }
                }
                batch.version = 1;
                Ok(batch)
            }
            BatchWrite::Update(mut batch) => {
                let row = DbBatch::from_batch(&batch)?;
                if !BatchRepo::update(conn, &row).await? {
                    return Err(if BatchRepo::exists(conn, row.id).await? {
                        conflict("Batch", &batch.id)
                    } else {
                        CodError::BatchNotFound {
                            batch_id: batch.id.to_string(),
                        }
                    });
                }
                batch.version += 1;
                Ok(batch)
            }
        }
    }

    /// Rewrite membership and claims of a written batch
    async fn claim_members(&self, conn: &mut PgConnection, batch: &Batch) -> Result<()> {
        let batch_uuid = *batch.id.as_uuid();
        let members: Vec<Uuid> = batch.shipment_ids.iter().map(|id| *id.as_uuid()).collect();
        if let Some(missing) = ShipmentRepo::missing(conn, &members).await?.into_iter().next() {
            return Err(CodError::ShipmentNotFound {
                shipment_id: ShipmentId::from_uuid(missing).to_string(),
            });
        }
        BatchRepo::set_members(conn, batch_uuid, &members).await?;
        BatchRepo::release_claims(conn, batch_uuid).await?;
        if !batch.is_open() {
            return Ok(());
        }
        let contested = BatchRepo::claim(conn, batch_uuid, &members).await?;
        if !contested.is_empty() {
            return Err(CodError::ShipmentAlreadyBatched {
                shipment_ids: contested
                    .into_iter()
                    .map(|id| ShipmentId::from_uuid(id).to_string())
                    .collect(),
            });
        }
        Ok(())
    }

    async fn refresh_totals(&self, conn: &mut PgConnection, batch_id: Uuid) -> Result<BatchTotals> {
        let members = ShipmentRepo::members_of(conn, batch_id)
            .await?
            .into_iter()
            .map(|row| row.into_shipment(&self.calculator))
            .collect::<DbResult<Vec<_>>>()?;
        let totals = batch_totals(members.iter());
        BatchRepo::set_totals(conn, batch_id, &serde_json::to_value(&totals).map_err(DbError::from)?)
            .await?;
        Ok(totals)
    }

    async fn write_payout(
        &self,
        conn: &mut PgConnection,
        write: PayoutWrite,
    ) -> Result<Option<CustomerPayout>> {
        match write {
            PayoutWrite::Insert(mut payout) => {
                payout.version = 1;
                if !PayoutRepo::insert(conn, &DbPayout::from_payout(&payout)?).await? {
                    return Err(conflict("Payout", &payout.id));
                }
                Ok(Some(payout))
            }
            PayoutWrite::Update(mut payout) => {
                let current = payout.version;
                payout.version += 1;
                let mut row = DbPayout::from_payout(&payout)?;
                row.version = crate::models::version_to_db(current);
                if !PayoutRepo::update(conn, &row).await? {
                    return Err(if PayoutRepo::exists(conn, row.id).await? {
                        conflict("Payout", &payout.id)
                    } else {
                        CodError::PayoutNotFound {
                            payout_id: payout.id.to_string(),
                        }
                    });
                }
                Ok(Some(payout))
            }
            PayoutWrite::Delete(id) => {
                if !PayoutRepo::delete(conn, *id.as_uuid()).await? {
                    return Err(CodError::PayoutNotFound {
                        payout_id: id.to_string(),
                    });
                }
                Ok(None)
            }
        }
    }
}

#[async_trait::async_trait]
impl CodStore for PgCodStore {
    async fn list_carriers(&self) -> Result<Vec<Carrier>> {
        let carriers = self
            .carriers()
            .list()
            .await?
            .into_iter()
            .map(|row| row.into_carrier())
            .collect::<DbResult<Vec<_>>>()?;
        Ok(carriers)
    }

    async fn get_carrier(&self, id: &CarrierId) -> Result<Carrier> {
        match self.carriers().find_by_id(*id.as_uuid()).await? {
            Some(row) => Ok(row.into_carrier()?),
            None => Err(CodError::CarrierNotFound {
                carrier_id: id.to_string(),
            }),
        }
    }

    async fn upsert_carrier(&self, carrier: Carrier) -> Result<()> {
        self.carriers().upsert(&carrier).await?;
        Ok(())
    }

    async fn get_shipment(&self, id: &ShipmentId) -> Result<Shipment> {
        match self.shipments().find_by_id(*id.as_uuid()).await? {
            Some(row) => Ok(row.into_shipment(&self.calculator)?),
            None => Err(CodError::ShipmentNotFound {
                shipment_id: id.to_string(),
            }),
        }
    }

    async fn get_shipments(&self, ids: &[ShipmentId]) -> Result<Vec<Shipment>> {
        let uuids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        let rows: HashMap<Uuid, DbShipment> = self
            .shipments()
            .find_many(&uuids)
            .await?
            .into_iter()
            .map(|row| (row.id, row))
            .collect();
        ids.iter()
            .map(|id| {
                let row = rows
                    .get(id.as_uuid())
                    .cloned()
                    .ok_or_else(|| CodError::ShipmentNotFound {
                        shipment_id: id.to_string(),
                    })?;
                Ok(row.into_shipment(&self.calculator)?)
            })
            .collect()
    }

    async fn list_eligible_shipments(
        &self,
        criteria: &EligibilityCriteria,
    ) -> Result<Vec<Shipment>> {
        let rows = self
            .shipments()
            .list_eligible(
                criteria.carrier_id.as_ref().map(|c| *c.as_uuid()),
                criteria.collected_on_or_before,
                criteria.include_claimed,
            )
            .await?;
        let shipments = rows
            .into_iter()
            .map(|row| row.into_shipment(&self.calculator))
            .collect::<DbResult<Vec<_>>>()?;
        debug!("{} eligible shipments for {:?}", shipments.len(), criteria.carrier_id);
        Ok(shipments)
    }

    async fn claims(&self, ids: &[ShipmentId]) -> Result<HashMap<ShipmentId, BatchId>> {
        let uuids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        Ok(self
            .batches()
            .claims(&uuids)
            .await?
            .into_iter()
            .map(|(shipment, batch)| (ShipmentId::from_uuid(shipment), BatchId::from_uuid(batch)))
            .collect())
    }

    async fn get_batch(&self, id: &BatchId) -> Result<Batch> {
        let row = self
            .batches()
            .find_by_id(*id.as_uuid())
            .await?
            .ok_or_else(|| CodError::BatchNotFound {
                batch_id: id.to_string(),
            })?;
        let mut batches = self.hydrate(vec![row]).await?;
        batches.pop().ok_or_else(|| CodError::BatchNotFound {
            batch_id: id.to_string(),
        })
    }

    async fn find_batches(&self, filter: &BatchFilter) -> Result<Vec<Batch>> {
        let rows = self
            .batches()
            .find(
                filter.carrier_id.as_ref().map(|c| *c.as_uuid()),
                filter.collection_date,
                filter.open_only,
            )
            .await?;
        self.hydrate(rows).await
    }

    async fn get_payout(&self, id: &PayoutId) -> Result<CustomerPayout> {
        match self.payouts().find_by_id(*id.as_uuid()).await? {
            Some(row) => Ok(row.into_payout()?),
            None => Err(CodError::PayoutNotFound {
                payout_id: id.to_string(),
            }),
        }
    }

    async fn list_payouts(&self, batch_id: &BatchId) -> Result<Vec<CustomerPayout>> {
        let payouts = self
            .payouts()
            .list_by_batch(*batch_id.as_uuid())
            .await?
            .into_iter()
            .map(|row| row.into_payout())
            .collect::<DbResult<Vec<_>>>()?;
        Ok(payouts)
    }

    async fn commit(&self, changes: ChangeSet) -> Result<CommitReceipt> {
        if changes.is_empty() {
            return Ok(CommitReceipt::default());
        }
        let mut tx = self.pool.begin().await.map_err(DbError::from)?;

        // Shipments first so batch totals see the new figures
        let mut shipments = Vec::with_capacity(changes.shipments.len());
        for shipment in changes.shipments {
            shipments.push(self.write_shipment(&mut *tx, shipment).await?);
        }

        let mut batches = Vec::with_capacity(changes.batches.len());
        for write in changes.batches {
            batches.push(self.write_batch(&mut *tx, write).await?);
        }
        for batch in &batches {
            self.claim_members(&mut *tx, batch).await?;
        }

        // Totals of written batches and of open batches holding written shipments
        let mut refresh: BTreeSet<Uuid> = batches.iter().map(|b| *b.id.as_uuid()).collect();
        let written: Vec<Uuid> = shipments.iter().map(|s| *s.id.as_uuid()).collect();
        if !written.is_empty() {
            refresh.extend(BatchRepo::claim_owners(&mut *tx, &written).await?);
        }
        for batch_id in refresh {
            let totals = self.refresh_totals(&mut *tx, batch_id).await?;
            if let Some(batch) = batches.iter_mut().find(|b| *b.id.as_uuid() == batch_id) {
                batch.totals = totals;
            }
        }

        let mut payouts = Vec::with_capacity(changes.payouts.len());
        for write in changes.payouts {
            if let Some(payout) = self.write_payout(&mut *tx, write).await? {
                payouts.push(payout);
            }
        }

        tx.commit().await.map_err(DbError::from)?;
        for batch in batches.iter().filter(|b| b.version == 1) {
            info!("Batch {} stored with {} shipments", batch.name, batch.shipment_ids.len());
        }
        Ok(CommitReceipt {
            batches,
            payouts,
            shipments,
        })
    }
}
