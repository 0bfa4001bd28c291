//! COD figures for hypothetical cost inputs

use colored::*;

use cod_amounts::{breakdown, Calculator};
use cod_types::{
    AdvanceStatus, CarrierId, CostInputs, Money, PlannedAdvance, SellerId, Shipment,
};

use crate::display;

pub struct QuoteInput {
    pub goods: Money,
    pub shipping: Money,
    pub service: Money,
    pub base: Money,
    pub exclude_services: bool,
    pub advance: Option<Money>,
}

pub fn show_quote(calculator: &Calculator, input: QuoteInput) -> anyhow::Result<()> {
    let costs = CostInputs {
        goods_value: input.goods,
        shipping_cost: input.shipping,
        company_service_cost: input.service,
        company_base_cost: input.base,
        include_services_in_cod: !input.exclude_services,
    };
    let advance = match input.advance {
        Some(amount) if amount.is_positive() => PlannedAdvance {
            amount,
            status: AdvanceStatus::Planned,
            ..PlannedAdvance::default()
        },
        _ => PlannedAdvance::default(),
    };

    let mut shipment = Shipment::cod("QUOTE", CarrierId::new(), SellerId::new(), costs);
    shipment.advance = advance;
    calculator.recompute(&mut shipment);

    display::section("COD Quote");
    for line in breakdown(&shipment) {
        println!("  {}", line);
    }
    println!();
    println!(
        "  {} {}",
        "Carrier collects:".bright_white(),
        shipment.amounts.declared_cod.to_string().bright_cyan().bold()
    );
    println!(
        "  {} {}",
        "Seller receives: ".bright_white(),
        shipment.amounts.seller_net_payout.to_string().bright_cyan().bold()
    );
    if shipment.amounts.negative_margin {
        display::warning("Shipping costs more than the service fee; the merchant absorbs the difference");
    }
    Ok(())
}
