//! COD Amount Calculator
//!
//! Pure functions deriving the money figures of the COD pipeline.
//!
//! # Per-shipment figures
//!
//! | Figure                | Formula                                                   |
//! |-----------------------|-----------------------------------------------------------|
//! | `base_cod`            | goods + (services included ? service cost : base cost)    |
//! | `advance`             | planned advance if planned or confirmed, else 0           |
//! | `declared_cod`        | max(0, base_cod − advance)                                |
//! | `amount_from_carrier` | declared_cod − shipping_cost                              |
//! | `merchant_margin`     | service cost − shipping_cost (may be negative)            |
//! | `seller_net_payout`   | amount_from_carrier − max(margin, 0)                      |
//!
//! A negative margin is absorbed by the merchant and flagged, never charged
//! back to the seller.

pub mod breakdown;
pub mod calculator;
pub mod totals;

pub use breakdown::breakdown;
pub use calculator::Calculator;
pub use totals::{batch_totals, group_by_seller, payout_totals, total_net};
