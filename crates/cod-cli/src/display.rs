//! Display utilities for the CLI

use colored::*;

use cod_types::{Annotation, AnnotationKind, Batch, BatchState, CustomerPayout, Money, PayoutState};

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", "━".repeat(60).bright_black());
    println!(" {}", title.bright_white().bold());
    println!("{}", "━".repeat(60).bright_black());
}

/// Print a success message
pub fn success(message: &str) {
    println!("  {} {}", "✓".bright_green(), message);
}

/// Print an error message
pub fn error(message: &str) {
    println!("  {} {}", "✗".bright_red(), message.bright_red());
}

/// Print an info message
pub fn info(message: &str) {
    println!("  {} {}", "→".bright_blue(), message);
}

/// Print a warning message
pub fn warning(message: &str) {
    println!("  {} {}", "⚠".yellow(), message.yellow());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("      {}: {}", key, value.bright_cyan());
}

pub fn money(key: &str, amount: Money) {
    let text = amount.to_string();
    let value = if amount.is_negative() {
        text.bright_red()
    } else {
        text.bright_cyan()
    };
    println!("      {:<24} {:>14}", format!("{}:", key), value);
}

fn state_label(state: BatchState) -> ColoredString {
    match state {
        BatchState::Draft => state.as_str().bright_black(),
        BatchState::Cancelled => state.as_str().bright_red(),
        BatchState::Completed => state.as_str().bright_green(),
        _ => state.as_str().bright_yellow(),
    }
}

fn annotation(note: &Annotation) {
    let kind = match note.kind {
        AnnotationKind::Variance | AnnotationKind::NegativeMargin | AnnotationKind::NegativePayout => {
            format!("{:?}", note.kind).yellow()
        }
        _ => format!("{:?}", note.kind).bright_black(),
    };
    println!(
        "      {} {} {}",
        note.recorded_at.format("%Y-%m-%d %H:%M").to_string().bright_black(),
        kind,
        note.message
    );
}

/// One-line summary of a batch
pub fn batch_line(batch: &Batch) {
    println!(
        "  {} {:<22} {:<18} {:>4} shipments  expected {}",
        "●".bright_cyan(),
        batch.name.bright_white(),
        state_label(batch.state),
        batch.totals.shipment_count,
        batch.totals.expected_net_amount.to_string().bright_cyan()
    );
}

/// Full batch view with totals and annotations
pub fn batch(batch: &Batch) {
    section(&format!("Batch {}", batch.name));
    kv("ID", &batch.id.to_string());
    kv("State", &state_label(batch.state).to_string());
    kv("Collection date", &batch.collection_date.to_string());
    kv("Origin", batch.origin.as_str());
    println!();

    let t = &batch.totals;
    kv("Shipments", &t.shipment_count.to_string());
    kv("Sellers", &t.seller_count.to_string());
    money("Declared COD", t.total_declared_cod);
    money("Goods value", t.total_goods_value);
    money("Shipping charges", t.total_shipping_charges);
    money("Company charges", t.total_company_charges);
    money("Expected from carrier", t.expected_net_amount);
    money("For sellers", t.amount_for_sellers);
    money("Merchant profit", t.merchant_profit);
    if let Some(actual) = batch.actual_received {
        money("Actually received", actual);
    }
    if let Some(variance) = batch.variance() {
        money("Variance", variance);
    }
    if t.negative_margin_shipments > 0 {
        warning(&format!("{} shipments with negative margin", t.negative_margin_shipments));
    }

    if !batch.annotations.is_empty() {
        println!();
        println!("  {}", "Annotations".bright_white());
        for note in &batch.annotations {
            annotation(note);
        }
    }
}

pub fn payout(payout: &CustomerPayout) {
    let state = match payout.state {
        PayoutState::Paid => payout.state.as_str().bright_green(),
        _ => payout.state.as_str().bright_yellow(),
    };
    println!(
        "  {} {} {:<10} {:>3} shipments  net {}",
        "●".bright_cyan(),
        payout.seller_id.to_string().bright_white(),
        state,
        payout.totals.shipment_count,
        payout.net_amount().to_string().bright_cyan()
    );
    if payout.state == PayoutState::Paid {
        kv("Applied to invoices", &payout.applied_to_invoices.to_string());
        kv("Credit note", &payout.credit_note_amount().to_string());
        match &payout.payment_reference {
            Some(reference) => kv("Paid by", &format!("{} ({})", payout.payment_method, reference)),
            None => kv("Paid by", payout.payment_method.as_str()),
        }
    }
    for note in payout
        .annotations
        .iter()
        .filter(|n| n.kind == AnnotationKind::NegativePayout)
    {
        annotation(note);
    }
}
