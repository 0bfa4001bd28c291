//! Facade wiring every engine to one store and one accounting backend

use std::sync::Arc;

use chrono::{DateTime, Utc};

use cod_amounts::Calculator;
use cod_batching::{BatchAggregator, SweepReport};
use cod_ledger::Accounting;
use cod_store::CodStore;
use cod_types::{CodAmounts, CostInputs, PaymentMethod, PlannedAdvance, Result};

use crate::{
    AdvancePayments, CarrierSettlementEngine, PayoutEngine, SettlementConfig, ShipmentBilling,
};

/// The COD batch and settlement engine
#[derive(Clone)]
pub struct CodEngine {
    pub batches: BatchAggregator,
    pub carrier: CarrierSettlementEngine,
    pub payouts: PayoutEngine,
    pub billing: ShipmentBilling,
    pub advances: AdvancePayments,
    store: Arc<dyn CodStore>,
    config: SettlementConfig,
}

impl CodEngine {
    pub fn new(
        store: Arc<dyn CodStore>,
        accounting: Arc<dyn Accounting>,
        config: SettlementConfig,
    ) -> Self {
        Self {
            batches: BatchAggregator::new(store.clone()),
            carrier: CarrierSettlementEngine::new(store.clone(), accounting.clone(), config.clone()),
            payouts: PayoutEngine::new(store.clone(), accounting.clone(), config.clone()),
            billing: ShipmentBilling::new(store.clone(), accounting.clone()),
            advances: AdvancePayments::new(store.clone(), accounting),
            store,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn CodStore> {
        &self.store
    }

    pub fn config(&self) -> &SettlementConfig {
        &self.config
    }

    pub fn calculator(&self) -> Calculator {
        Calculator::for_currency(&self.config.currency)
    }

    /// Figures a shipment with these inputs would carry
    pub fn quote(
        &self,
        payment_method: PaymentMethod,
        costs: &CostInputs,
        advance: &PlannedAdvance,
    ) -> CodAmounts {
        self.calculator().compute(payment_method, costs, advance)
    }

    /// Overdue sweep with the configured threshold
    pub async fn run_overdue_sweep(&self, as_of: DateTime<Utc>) -> Result<SweepReport> {
        self.batches
            .run_overdue_sweep(self.config.overdue_days, as_of)
            .await
    }
}
