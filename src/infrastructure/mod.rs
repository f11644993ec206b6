//! Adapters implementing the domain ports.

pub mod audit;
pub mod clock;
pub mod gateway;
pub mod in_memory;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
