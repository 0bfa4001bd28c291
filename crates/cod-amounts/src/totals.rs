//! Batch and seller aggregates
//!
//! Totals are order-independent sums over the member shipments' derived
//! figures. Non-COD shipments contribute nothing.

use std::collections::{BTreeMap, BTreeSet};

use cod_types::{BatchTotals, Money, PayoutTotals, SellerId, Shipment};

/// Aggregate figures of a batch from its member shipments
pub fn batch_totals<'a>(shipments: impl IntoIterator<Item = &'a Shipment>) -> BatchTotals {
    let mut totals = BatchTotals::default();
    let mut sellers = BTreeSet::new();

    for shipment in shipments.into_iter().filter(|s| s.is_cod()) {
        let a = &shipment.amounts;
        totals.shipment_count += 1;
        totals.total_declared_cod += a.declared_cod;
        totals.total_goods_value += shipment.costs.goods_value;
        totals.total_shipping_charges += shipment.costs.shipping_cost;
        totals.total_company_charges += shipment.costs.company_service_cost;
        totals.amount_from_carrier += a.amount_from_carrier;
        totals.amount_for_sellers += a.seller_net_payout;
        if a.negative_margin {
            totals.negative_margin_shipments += 1;
        }
        sellers.insert(shipment.seller_id.clone());
    }

    totals.expected_net_amount = totals.amount_from_carrier;
    totals.seller_count = sellers.len();
    totals.merchant_profit = totals.amount_from_carrier - totals.amount_for_sellers;
    totals
}

/// Per-seller sums for a payout
pub fn payout_totals<'a>(shipments: impl IntoIterator<Item = &'a Shipment>) -> PayoutTotals {
    let mut totals = PayoutTotals::default();
    for shipment in shipments.into_iter().filter(|s| s.is_cod()) {
        let a = &shipment.amounts;
        totals.shipment_count += 1;
        totals.total_cod += a.declared_cod;
        totals.total_goods_value += shipment.costs.goods_value;
        totals.shipping_charges += shipment.costs.shipping_cost;
        totals.amount_from_carrier += a.amount_from_carrier;
        totals.total_deductions += a.total_deductions;
        totals.net_amount += a.seller_net_payout;
        if a.negative_margin {
            totals.negative_margin_shipments += 1;
        }
    }
    totals
}

/// Partition shipments by seller, in seller id order
pub fn group_by_seller<'a>(
    shipments: impl IntoIterator<Item = &'a Shipment>,
) -> BTreeMap<SellerId, Vec<&'a Shipment>> {
    let mut groups: BTreeMap<SellerId, Vec<&Shipment>> = BTreeMap::new();
    for shipment in shipments {
        groups
            .entry(shipment.seller_id.clone())
            .or_default()
            .push(shipment);
    }
    groups
}

/// Σ net payout across groups; equals the batch's `amount_for_sellers`
pub fn total_net<'a>(totals: impl IntoIterator<Item = &'a PayoutTotals>) -> Money {
    totals.into_iter().map(|t| t.net_amount).sum()
}
