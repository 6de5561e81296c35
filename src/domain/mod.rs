//! Domain model of the reservation engine: dates, listings, prices,
//! reservations, payment attempts and the ports to the outside world.

pub mod calendar;
pub mod identity;
pub mod item;
pub mod payment;
pub mod ports;
pub mod pricing;
pub mod reservation;
