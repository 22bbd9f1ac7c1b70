//! Input and output adapters for the batch driver.

pub mod csv;
pub mod jsonl;
