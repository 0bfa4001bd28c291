//! Per-shipment COD figures

use cod_types::{
    CodAmounts, CostInputs, Money, PaymentMethod, PlannedAdvance, SettlementCurrency, Shipment,
    DEFAULT_MINOR_UNITS,
};
use serde::{Deserialize, Serialize};

/// Computes [`CodAmounts`] with a fixed minor-unit rounding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Calculator {
    minor_units: u32,
}

impl Calculator {
    pub fn new(minor_units: u32) -> Self {
        Self { minor_units }
    }

    pub fn for_currency(currency: &SettlementCurrency) -> Self {
        Self::new(currency.minor_units)
    }

    pub fn minor_units(&self) -> u32 {
        self.minor_units
    }

    /// Derive all figures from raw inputs
    pub fn compute(
        &self,
        payment_method: PaymentMethod,
        costs: &CostInputs,
        advance: &PlannedAdvance,
    ) -> CodAmounts {
        if payment_method != PaymentMethod::Cod {
            return CodAmounts::default();
        }

        let service_part = if costs.include_services_in_cod {
            costs.company_service_cost
        } else {
            costs.company_base_cost
        };
        let base_cod = (costs.goods_value + service_part).round_to(self.minor_units);
        let advance = advance.effective_amount();
        let declared_cod = (base_cod - advance).non_negative();
        let amount_from_carrier = declared_cod - costs.shipping_cost;
        let merchant_margin = costs.company_service_cost - costs.shipping_cost;
        let total_deductions = merchant_margin.non_negative();

        CodAmounts {
            base_cod,
            advance,
            declared_cod,
            amount_from_carrier,
            merchant_margin,
            total_deductions,
            seller_net_payout: amount_from_carrier - total_deductions,
            negative_margin: merchant_margin.is_negative(),
        }
    }

    /// Recompute a shipment's derived figures in place.
    ///
    /// Every store write goes through here, so `amounts` never drifts from
    /// the inputs.
    pub fn recompute(&self, shipment: &mut Shipment) {
        shipment.amounts = self.compute(shipment.payment_method, &shipment.costs, &shipment.advance);
    }

    /// Round an arbitrary amount the same way `base_cod` is rounded
    pub fn round(&self, amount: Money) -> Money {
        amount.round_to(self.minor_units)
    }
}

impl Default for Calculator {
    fn default() -> Self {
        Self::new(DEFAULT_MINOR_UNITS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cod_types::AdvanceStatus;
    use proptest::prelude::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn costs(goods: i64, shipping: i64, service: i64, include: bool) -> CostInputs {
        CostInputs {
            goods_value: Money::from(goods),
            shipping_cost: Money::from(shipping),
            company_service_cost: Money::from(service),
            company_base_cost: Money::from(service),
            include_services_in_cod: include,
        }
    }

    fn planned(amount: i64, status: AdvanceStatus) -> PlannedAdvance {
        PlannedAdvance {
            amount: Money::from(amount),
            status,
            ..PlannedAdvance::default()
        }
    }

    #[test]
    fn test_reference_shipment() {
        let amounts = Calculator::default().compute(
            PaymentMethod::Cod,
            &costs(100, 10, 15, true),
            &PlannedAdvance::default(),
        );
        assert_eq!(amounts.base_cod, Money::from(115));
        assert_eq!(amounts.declared_cod, Money::from(115));
        assert_eq!(amounts.amount_from_carrier, Money::from(105));
        assert_eq!(amounts.merchant_margin, Money::from(5));
        assert_eq!(amounts.seller_net_payout, Money::from(100));
        assert!(!amounts.negative_margin);
    }

    #[test]
    fn test_services_excluded_uses_base_cost() {
        let mut inputs = costs(100, 10, 15, false);
        inputs.company_base_cost = Money::from(8);
        let amounts =
            Calculator::default().compute(PaymentMethod::Cod, &inputs, &PlannedAdvance::default());
        assert_eq!(amounts.base_cod, Money::from(108));
        // margin is always measured on the full service cost
        assert_eq!(amounts.merchant_margin, Money::from(5));
        assert_eq!(amounts.seller_net_payout, Money::from(93));
    }

    #[test]
    fn test_advance_reduces_declared_cod() {
        let calc = Calculator::default();
        let inputs = costs(100, 10, 15, true);

        let amounts = calc.compute(PaymentMethod::Cod, &inputs, &planned(40, AdvanceStatus::Planned));
        assert_eq!(amounts.advance, Money::from(40));
        assert_eq!(amounts.declared_cod, Money::from(75));
        assert_eq!(amounts.amount_from_carrier, Money::from(65));

        let skipped = calc.compute(PaymentMethod::Cod, &inputs, &planned(40, AdvanceStatus::Skipped));
        assert_eq!(skipped.declared_cod, Money::from(115));
    }

    #[test]
    fn test_advance_larger_than_cod_clamps_to_zero() {
        let amounts = Calculator::default().compute(
            PaymentMethod::Cod,
            &costs(100, 10, 15, true),
            &planned(500, AdvanceStatus::Confirmed),
        );
        assert_eq!(amounts.declared_cod, Money::ZERO);
        assert_eq!(amounts.amount_from_carrier, Money::from(-10));
    }

    #[test]
    fn test_negative_margin_absorbed_by_merchant() {
        let amounts = Calculator::default().compute(
            PaymentMethod::Cod,
            &costs(100, 20, 15, true),
            &PlannedAdvance::default(),
        );
        assert_eq!(amounts.merchant_margin, Money::from(-5));
        assert_eq!(amounts.total_deductions, Money::ZERO);
        assert_eq!(amounts.seller_net_payout, amounts.amount_from_carrier);
        assert!(amounts.negative_margin);
    }

    #[test]
    fn test_base_cod_rounds_half_up() {
        let inputs = CostInputs {
            goods_value: Money::new(dec!(10.005)),
            company_service_cost: Money::new(dec!(5)),
            include_services_in_cod: true,
            ..CostInputs::default()
        };
        let amounts =
            Calculator::new(2).compute(PaymentMethod::Cod, &inputs, &PlannedAdvance::default());
        assert_eq!(amounts.base_cod, Money::new(dec!(15.01)));
    }

    #[test]
    fn test_non_cod_is_all_zero() {
        let amounts = Calculator::default().compute(
            PaymentMethod::Prepaid,
            &costs(100, 10, 15, true),
            &PlannedAdvance::default(),
        );
        assert_eq!(amounts, CodAmounts::default());
    }

    fn money() -> impl Strategy<Value = Money> {
        (0i64..1_000_000).prop_map(|cents| Money::new(Decimal::new(cents, 2)))
    }

    fn status() -> impl Strategy<Value = AdvanceStatus> {
        prop_oneof![
            Just(AdvanceStatus::None),
            Just(AdvanceStatus::Planned),
            Just(AdvanceStatus::Confirmed),
            Just(AdvanceStatus::Skipped),
        ]
    }

    proptest! {
        #[test]
        fn declared_cod_never_negative(
            goods in money(),
            shipping in money(),
            service in money(),
            base in money(),
            include in any::<bool>(),
            advance in money(),
            advance_status in status(),
        ) {
            let inputs = CostInputs {
                goods_value: goods,
                shipping_cost: shipping,
                company_service_cost: service,
                company_base_cost: base,
                include_services_in_cod: include,
            };
            let advance = PlannedAdvance { amount: advance, status: advance_status, ..PlannedAdvance::default() };
            let a = Calculator::default().compute(PaymentMethod::Cod, &inputs, &advance);

            prop_assert!(!a.declared_cod.is_negative());
            prop_assert!(a.declared_cod <= a.base_cod);
            prop_assert_eq!(a.amount_from_carrier, a.declared_cod - shipping);
            prop_assert!(a.seller_net_payout <= a.amount_from_carrier);
            prop_assert_eq!(a.seller_net_payout + a.total_deductions, a.amount_from_carrier);
        }
    }
}
