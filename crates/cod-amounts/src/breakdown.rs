//! Human-readable calculation breakdown for one shipment

use cod_types::{Shipment, PaymentMethod};

/// Numbered lines explaining how a shipment's figures were derived
pub fn breakdown(shipment: &Shipment) -> Vec<String> {
    if shipment.payment_method != PaymentMethod::Cod {
        return vec!["Not a COD shipment".to_string()];
    }

    let c = &shipment.costs;
    let a = &shipment.amounts;
    let service_label = if c.include_services_in_cod {
        "service cost"
    } else {
        "base cost"
    };
    let service_part = if c.include_services_in_cod {
        c.company_service_cost
    } else {
        c.company_base_cost
    };

    let mut lines = vec![
        format!(
            "1. Base COD: goods {} + {} {} = {}",
            c.goods_value, service_label, service_part, a.base_cod
        ),
        format!("2. Advance deducted: {}", a.advance),
        format!("3. Declared to carrier: {}", a.declared_cod),
        format!("4. Carrier keeps shipping: {}", c.shipping_cost),
        format!("5. Amount from carrier: {}", a.amount_from_carrier),
        format!(
            "6. Merchant margin: service {} - shipping {} = {}",
            c.company_service_cost, c.shipping_cost, a.merchant_margin
        ),
        format!("7. Deducted from seller: {}", a.total_deductions),
        format!("8. Seller net payout: {}", a.seller_net_payout),
    ];
    if a.negative_margin {
        lines.push("Negative margin absorbed by the merchant".to_string());
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Calculator;
    use cod_types::{CarrierId, CostInputs, Money, SellerId};

    #[test]
    fn test_breakdown_lines() {
        let mut s = Shipment::cod(
            "SO-9",
            CarrierId::new(),
            SellerId::new(),
            CostInputs {
                goods_value: Money::from(100),
                shipping_cost: Money::from(10),
                company_service_cost: Money::from(15),
                company_base_cost: Money::from(15),
                include_services_in_cod: true,
            },
        );
        Calculator::default().recompute(&mut s);

        let lines = breakdown(&s);
        assert_eq!(lines.len(), 8);
        assert_eq!(lines[0], "1. Base COD: goods 100.00 + service cost 15.00 = 115.00");
        assert_eq!(lines[7], "8. Seller net payout: 100.00");
    }
}
