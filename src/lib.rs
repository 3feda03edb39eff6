//! Asynchronous payment settlement.
//!
//! Payments are created `Pending`, a settlement task is published for each one,
//! and a pool of workers drives every task to a terminal state. Delivery is
//! at-least-once; the store's conditional transition makes the settlement
//! effect happen exactly once per payment.

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod interfaces;
