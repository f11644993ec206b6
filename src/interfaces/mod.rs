//! Operator-facing adapters: the CSV command reader and the replay driver
//! used by the binary.

pub mod csv;
pub mod replay;
