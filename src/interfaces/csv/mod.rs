//! CSV adapters for the command-line entry point.

pub mod dead_letter_writer;
pub mod payment_reader;
pub mod payment_writer;
