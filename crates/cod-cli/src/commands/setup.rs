//! Seeding carriers and shipments, and posting shipment documents

use std::path::Path;

use anyhow::Context;
use chrono::Weekday;
use colored::*;

use cod_store::CodStore;
use cod_types::{Carrier, Shipment, ShipmentId};

use crate::display;
use crate::state::Workspace;

pub async fn add_carrier(
    ws: &Workspace,
    code: &str,
    name: &str,
    days: Vec<Weekday>,
) -> anyhow::Result<()> {
    let mut carrier = Carrier::new(code.to_uppercase(), name);
    if !days.is_empty() {
        carrier = carrier.with_schedule(days);
    }
    ws.store().upsert_carrier(carrier.clone()).await?;

    display::success(&format!("Carrier {} added", carrier.code.bright_cyan()));
    display::kv("ID", &carrier.id.to_string());
    if carrier.auto_create_batch {
        let days: Vec<String> = carrier.collection_days.iter().map(|d| d.to_string()).collect();
        display::kv("Collection days", &days.join(", "));
    }
    Ok(())
}

/// Load shipments from a JSON array as pushed by the shipment system
pub async fn import_shipments(ws: &Workspace, file: &Path) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let shipments: Vec<Shipment> =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", file.display()))?;

    let mut imported = 0;
    for shipment in shipments {
        let reference = shipment.reference.clone();
        match ws.store().save_shipment(shipment).await {
            Ok(saved) => {
                imported += 1;
                display::info(&format!(
                    "{} {} declared {}",
                    saved.reference,
                    saved.cod_status,
                    saved.amounts.declared_cod
                ));
            }
            Err(e) => display::error(&format!("{}: {}", reference, e)),
        }
    }
    display::success(&format!("{} shipments imported", imported));
    Ok(())
}

pub async fn bill_shipments(ws: &Workspace, ids: &[ShipmentId]) -> anyhow::Result<()> {
    display::section("Shipment Documents");
    for id in ids {
        let docs = ws.engine.billing.ensure_shipment_documents(id).await?;
        let status = if docs.created > 0 {
            format!("{} posted", docs.created).bright_green()
        } else {
            "up to date".bright_black()
        };
        println!("  {} {} {}", "●".bright_cyan(), docs.shipment.reference.bright_white(), status);
        if let Some(invoice) = &docs.invoice {
            display::kv("Invoice", &format!("{} residual {}", invoice.id, invoice.residual));
        }
        if let Some(bill) = &docs.vendor_bill {
            display::kv("Vendor bill", &format!("{} residual {}", bill.id, bill.residual));
        }
    }
    Ok(())
}
