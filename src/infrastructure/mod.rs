//! Storage and provider adapter implementations behind the domain ports.

pub mod in_memory;
pub mod manual_rail;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
