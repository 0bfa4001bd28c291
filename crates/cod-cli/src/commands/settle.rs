//! Carrier settlement and seller payout commands

use colored::*;

use cod_store::CodStore;
use cod_types::{Money, PayoutMethod, PayoutState};

use crate::commands::resolve_batch;
use crate::display;
use crate::state::Workspace;

pub async fn receive(ws: &Workspace, key: &str, amount: Money) -> anyhow::Result<()> {
    let id = resolve_batch(ws.store(), key).await?;
    let batch = ws.engine.carrier.record_actual_received(&id, amount).await?;

    display::success(&format!(
        "Batch {} collected: {} received",
        batch.name.bright_cyan(),
        amount
    ));
    if let Some(variance) = batch.variance() {
        if variance.abs() > ws.engine.config().variance_tolerance {
            display::warning(&format!(
                "Variance of {} against expected {}",
                variance,
                batch.expected_net_amount()
            ));
        }
    }
    Ok(())
}

pub async fn settle_carrier(ws: &Workspace, key: &str) -> anyhow::Result<()> {
    let id = resolve_batch(ws.store(), key).await?;
    let settlement = ws.engine.carrier.settle_with_carrier(&id).await?;

    display::section(&format!("Carrier settlement {}", settlement.batch.name));
    display::money("Outstanding bills", settlement.outstanding);
    display::money("Paid to carrier", settlement.payable);
    if let Some(payment) = &settlement.payment_id {
        display::kv("Payment", &payment.to_string());
    }
    for application in &settlement.applications {
        println!(
            "  {} {} {} of {}",
            "●".bright_cyan(),
            application.bill_id.to_string().bright_white(),
            application.applied.to_string().bright_cyan(),
            application.residual_before
        );
    }
    display::success(&format!("Batch is {}", settlement.batch.state));
    Ok(())
}

pub async fn prepare_payouts(ws: &Workspace, key: &str) -> anyhow::Result<()> {
    let id = resolve_batch(ws.store(), key).await?;
    let payouts = ws.engine.payouts.prepare_payouts(&id).await?;

    display::section("Seller payouts");
    for payout in &payouts {
        display::payout(payout);
    }
    let total: Money = payouts.iter().map(|p| p.net_amount()).sum();
    display::success(&format!("{} payouts prepared, {} in total", payouts.len(), total));
    Ok(())
}

pub async fn settle_payouts(
    ws: &Workspace,
    key: &str,
    method: Option<PayoutMethod>,
    reference: Option<String>,
) -> anyhow::Result<()> {
    let id = resolve_batch(ws.store(), key).await?;
    if method.is_some() || reference.is_some() {
        for payout in ws.store().list_payouts(&id).await? {
            if payout.state == PayoutState::Paid {
                continue;
            }
            ws.engine
                .payouts
                .set_payment_details(
                    &payout.id,
                    method.unwrap_or(payout.payment_method),
                    reference.clone().or(payout.payment_reference),
                )
                .await?;
        }
    }
    let report = ws.engine.payouts.settle_all_payouts(&id).await?;

    display::section(&format!("Payout run {}", report.batch.name));
    for payout in &report.settled {
        display::payout(payout);
    }
    for failure in &report.failures {
        display::error(&format!("{} {}: {}", failure.payout_id, failure.seller_id, failure.error));
    }
    if report.is_complete() {
        display::success(&format!("Batch is {}", report.batch.state));
    } else {
        display::warning(&format!(
            "{} payouts failed; rerun to retry them",
            report.failures.len()
        ));
    }
    Ok(())
}
