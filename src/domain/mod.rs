//! Plain data records and the ports the application layer depends on.
//!
//! Records carry no lifecycle behaviour; every state transition lives in the
//! services under [`crate::application`].

pub mod audit;
pub mod booking;
pub mod changeset;
pub mod event;
pub mod gateway;
pub mod ids;
pub mod payment;
pub mod ports;
pub mod venue;
