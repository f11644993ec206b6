//! Application layer containing the booking lifecycle orchestration.
//!
//! [`engine::BookingEngine`] is the entry point. It wires one shared
//! [`context::Context`] into the services that own each state machine:
//! capacity arbitration, bookings, events, payments, refunds and the
//! periodic sweeper. Services stage their writes in a unit of work and commit
//! once, under per-event and per-booking locks.

pub mod bookings;
pub mod capacity;
pub mod context;
pub mod engine;
pub mod events;
pub mod locks;
pub mod payments;
pub mod refunds;
pub mod sweeper;
mod unit_of_work;
