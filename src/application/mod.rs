//! Application layer orchestrating the booking core.
//!
//! [`engine::ReservationEngine`] is the entry point. It composes the
//! availability index, the price calculator and the payment orchestrator
//! over the storage and processor ports defined in `domain::ports`.

pub mod availability;
pub mod engine;
pub mod notifications;
pub mod payments;
