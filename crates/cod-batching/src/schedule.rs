//! Weekday scan that opens one scheduled batch per carrier and collection day

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use cod_store::BatchFilter;
use cod_types::{BatchId, BatchOrigin, Carrier, CarrierId, CodError, Result};

use crate::{BatchAggregator, CreateBatchRequest};

/// What the scan did for one carrier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum ScanOutcome {
    NotCollectionDay,
    /// An open batch already covers this carrier and date
    AlreadyExists { batch_id: BatchId },
    Created {
        batch_id: BatchId,
        name: String,
        shipment_count: usize,
    },
    NoEligibleShipments,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarrierScan {
    pub carrier_id: CarrierId,
    pub carrier_code: String,
    pub outcome: ScanOutcome,
}

/// Per-carrier results of one scheduled scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub date: NaiveDate,
    pub carriers: Vec<CarrierScan>,
}

impl ScanReport {
    pub fn created(&self) -> impl Iterator<Item = &CarrierScan> {
        self.carriers
            .iter()
            .filter(|c| matches!(c.outcome, ScanOutcome::Created { .. }))
    }

    pub fn failures(&self) -> impl Iterator<Item = &CarrierScan> {
        self.carriers
            .iter()
            .filter(|c| matches!(c.outcome, ScanOutcome::Failed { .. }))
    }
}

impl BatchAggregator {
    /// Run the scheduled scan for `today`.
    ///
    /// Only carriers with automatic batching whose collection days include
    /// today's weekday are considered. A failure for one carrier is recorded
    /// in the report and does not stop the others.
    pub async fn run_scheduled_scan(&self, today: NaiveDate) -> Result<ScanReport> {
        let carriers = self.store.list_carriers().await?;
        let mut report = ScanReport {
            date: today,
            carriers: Vec::new(),
        };

        for carrier in carriers.into_iter().filter(|c| c.auto_create_batch) {
            let outcome = self.scan_carrier(&carrier, today).await;
            report.carriers.push(CarrierScan {
                carrier_id: carrier.id.clone(),
                carrier_code: carrier.code.clone(),
                outcome,
            });
        }

        info!(
            "Scheduled scan {}: {} carriers, {} batches created, {} failures",
            today,
            report.carriers.len(),
            report.created().count(),
            report.failures().count()
        );
        Ok(report)
    }

    async fn scan_carrier(&self, carrier: &Carrier, today: NaiveDate) -> ScanOutcome {
        if !carrier.is_collection_day(today) {
            return ScanOutcome::NotCollectionDay;
        }

        let filter = BatchFilter {
            carrier_id: Some(carrier.id.clone()),
            collection_date: Some(today),
            open_only: true,
        };
        match self.store.find_batches(&filter).await {
            Ok(existing) => {
                if let Some(batch) = existing.into_iter().next() {
                    debug!("{}: batch {} already covers {}", carrier.code, batch.name, today);
                    return ScanOutcome::AlreadyExists { batch_id: batch.id };
                }
            }
            Err(e) => return self.failed(carrier, e),
        }

        let request = CreateBatchRequest::all_eligible(carrier.id.clone(), today)
            .origin(BatchOrigin::Scheduled);
        match self.create_batch(request).await {
            Ok(batch) => ScanOutcome::Created {
                shipment_count: batch.shipment_ids.len(),
                batch_id: batch.id,
                name: batch.name,
            },
            Err(CodError::NoEligibleShipments { .. }) => {
                debug!("{}: nothing to batch on {}", carrier.code, today);
                ScanOutcome::NoEligibleShipments
            }
            Err(e) if e.is_benign_race() => {
                // A concurrent scan or manual batch got there first
                debug!("{}: lost creation race: {}", carrier.code, e);
                match self.store.find_batches(&filter).await {
                    Ok(existing) => match existing.into_iter().next() {
                        Some(batch) => ScanOutcome::AlreadyExists { batch_id: batch.id },
                        None => ScanOutcome::NoEligibleShipments,
                    },
                    Err(e) => self.failed(carrier, e),
                }
            }
            Err(e) => self.failed(carrier, e),
        }
    }

    fn failed(&self, carrier: &Carrier, e: CodError) -> ScanOutcome {
        error!("Scheduled scan failed for {}: {}", carrier.code, e);
        ScanOutcome::Failed {
            error: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use chrono::Weekday;
    use cod_store::CodStore;
    use cod_types::Carrier;
    use futures::future::join_all;

    // 2026-10-16 is a Friday
    fn scheduled_carrier() -> Carrier {
        Carrier::new("ARX", "Aramex").with_schedule([Weekday::Mon, Weekday::Fri])
    }

    #[tokio::test]
    async fn test_scan_creates_on_collection_day() {
        let fx = Fixture::with_carrier(scheduled_carrier()).await;
        fx.delivered(100).await;
        fx.delivered(40).await;

        let report = fx.aggregator.run_scheduled_scan(fx.today()).await.unwrap();
        assert_eq!(report.carriers.len(), 1);
        match &report.carriers[0].outcome {
            ScanOutcome::Created {
                name,
                shipment_count,
                ..
            } => {
                assert_eq!(name, "ARX-20261016-001");
                assert_eq!(*shipment_count, 2);
            }
            other => panic!("expected a created batch, got {:?}", other),
        }

        // Rerunning the same day is a no-op
        let again = fx.aggregator.run_scheduled_scan(fx.today()).await.unwrap();
        assert!(matches!(
            again.carriers[0].outcome,
            ScanOutcome::AlreadyExists { .. }
        ));
        assert_eq!(fx.all_batches().await.len(), 1);
    }

    #[tokio::test]
    async fn test_scan_skips_other_days_and_manual_carriers() {
        let fx = Fixture::with_carrier(scheduled_carrier()).await;
        fx.delivered(100).await;
        let manual = Carrier::new("BOSTA", "Bosta");
        fx.store.upsert_carrier(manual).await.unwrap();

        let tuesday = NaiveDate::from_ymd_opt(2026, 10, 13).unwrap();
        let report = fx.aggregator.run_scheduled_scan(tuesday).await.unwrap();
        assert_eq!(report.carriers.len(), 1);
        assert_eq!(report.carriers[0].outcome, ScanOutcome::NotCollectionDay);
        assert!(fx.all_batches().await.is_empty());
    }

    #[tokio::test]
    async fn test_scan_without_shipments_creates_nothing() {
        let fx = Fixture::with_carrier(scheduled_carrier()).await;
        let report = fx.aggregator.run_scheduled_scan(fx.today()).await.unwrap();
        assert_eq!(report.carriers[0].outcome, ScanOutcome::NoEligibleShipments);
        assert_eq!(report.failures().count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_scans_create_one_batch() {
        let fx = Fixture::with_carrier(scheduled_carrier()).await;
        for goods in [10, 20, 30] {
            fx.delivered(goods).await;
        }

        let scans = (0..6).map(|_| {
            let aggregator = fx.aggregator.clone();
            let today = fx.today();
            tokio::spawn(async move { aggregator.run_scheduled_scan(today).await })
        });
        let reports: Vec<ScanReport> = join_all(scans)
            .await
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .collect();

        let created = reports.iter().map(|r| r.created().count()).sum::<usize>();
        assert_eq!(created, 1);
        assert!(reports.iter().all(|r| r.failures().count() == 0));
        assert_eq!(fx.all_batches().await.len(), 1);
    }
}
