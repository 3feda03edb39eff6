//! Application layer: payment intake and the settlement pipeline.
//!
//! `PaymentService` persists payments and publishes their settlement tasks.
//! `WorkerPool` runs a set of workers that each drive claimed tasks through
//! `SettlementProcessor`, which relies on the store's conditional transition
//! for exactly-once settlement over an at-least-once channel.

pub mod payments;
pub mod pool;
pub mod redrive;
pub mod retry;
pub mod settlement;
