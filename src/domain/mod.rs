//! Domain layer: payments, settlement tasks and the ports the pipeline
//! talks to.

pub mod payment;
pub mod ports;
pub mod task;
