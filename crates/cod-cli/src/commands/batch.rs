//! Batch lifecycle commands and the scheduled jobs

use chrono::{NaiveDate, Utc};
use colored::*;

use cod_batching::{CreateBatchRequest, ScanOutcome};
use cod_store::{BatchFilter, CodStore};
use cod_types::{CodError, ShipmentId};

use crate::commands::{resolve_batch, resolve_carrier};
use crate::display;
use crate::state::Workspace;

pub async fn create(
    ws: &Workspace,
    carrier: &str,
    date: NaiveDate,
    shipments: Vec<ShipmentId>,
) -> anyhow::Result<()> {
    let carrier = resolve_carrier(ws.store(), carrier).await?;
    let request = if shipments.is_empty() {
        CreateBatchRequest::all_eligible(carrier.id.clone(), date)
    } else {
        CreateBatchRequest::with_shipments(carrier.id.clone(), date, shipments)
    };
    match ws.engine.batches.create_batch(request).await {
        Ok(batch) => {
            display::success(&format!("Batch {} created", batch.name.bright_cyan()));
            display::batch(&batch);
        }
        Err(CodError::NoEligibleShipments { .. }) => {
            display::info(&format!("No eligible shipments for {}", carrier.code));
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

pub async fn confirm(ws: &Workspace, key: &str) -> anyhow::Result<()> {
    let id = resolve_batch(ws.store(), key).await?;
    let batch = ws.engine.batches.confirm_batch(&id).await?;
    display::success(&format!("Batch {} confirmed", batch.name.bright_cyan()));
    display::batch(&batch);
    Ok(())
}

pub async fn cancel(ws: &Workspace, key: &str) -> anyhow::Result<()> {
    let id = resolve_batch(ws.store(), key).await?;
    let batch = ws.engine.batches.cancel_batch(&id).await?;
    display::success(&format!("Batch {} cancelled", batch.name.bright_cyan()));
    Ok(())
}

pub async fn show(ws: &Workspace, key: &str) -> anyhow::Result<()> {
    let id = resolve_batch(ws.store(), key).await?;
    let batch = ws.store().get_batch(&id).await?;
    display::batch(&batch);

    let payouts = ws.store().list_payouts(&id).await?;
    if !payouts.is_empty() {
        println!();
        println!("  {}", "Payouts".bright_white());
        for payout in &payouts {
            display::payout(payout);
        }
    }
    Ok(())
}

pub async fn list(ws: &Workspace, carrier: Option<&str>, open_only: bool) -> anyhow::Result<()> {
    let carrier_id = match carrier {
        Some(key) => Some(resolve_carrier(ws.store(), key).await?.id),
        None => None,
    };
    let batches = ws
        .store()
        .find_batches(&BatchFilter {
            carrier_id,
            collection_date: None,
            open_only,
        })
        .await?;

    display::section("Batches");
    if batches.is_empty() {
        println!("  {}", "No batches yet".yellow());
    }
    for batch in &batches {
        display::batch_line(batch);
    }
    Ok(())
}

pub async fn scan(ws: &Workspace, date: NaiveDate) -> anyhow::Result<()> {
    let report = ws.engine.batches.run_scheduled_scan(date).await?;

    display::section(&format!("Scheduled scan for {}", report.date));
    for scan in &report.carriers {
        let code = scan.carrier_code.bright_white();
        match &scan.outcome {
            ScanOutcome::Created {
                name,
                shipment_count,
                ..
            } => display::success(&format!("{}: created {} ({} shipments)", code, name, shipment_count)),
            ScanOutcome::AlreadyExists { batch_id } => {
                display::info(&format!("{}: batch {} already open", code, batch_id))
            }
            ScanOutcome::NoEligibleShipments => {
                display::info(&format!("{}: nothing to batch", code))
            }
            ScanOutcome::NotCollectionDay => {
                display::info(&format!("{}: not a collection day", code))
            }
            ScanOutcome::Failed { error } => display::error(&format!("{}: {}", code, error)),
        }
    }
    Ok(())
}

pub async fn sweep(ws: &Workspace, days: Option<u32>) -> anyhow::Result<()> {
    let report = match days {
        Some(days) => ws.engine.batches.run_overdue_sweep(days, Utc::now()).await?,
        None => ws.engine.run_overdue_sweep(Utc::now()).await?,
    };

    display::section(&format!("Overdue sweep ({} days)", report.threshold_days));
    display::kv("Collected before", &report.cutoff.to_rfc3339());
    display::kv("Unbatched candidates", &report.candidates.to_string());
    for batch in &report.created {
        display::batch_line(batch);
    }
    for failure in &report.failures {
        display::error(&format!("carrier {}: {}", failure.carrier_id, failure.error));
    }
    if report.created.is_empty() && report.failures.is_empty() {
        display::info("No overdue shipments");
    } else {
        display::success(&format!(
            "{} shipments batched in {} batches",
            report.batched_shipments(),
            report.created.len()
        ));
    }
    Ok(())
}
