//! Repository implementations

mod batch;
mod carrier;
mod payout;
mod shipment;

pub use batch::BatchRepo;
pub use carrier::CarrierRepo;
pub use payout::PayoutRepo;
pub use shipment::ShipmentRepo;
