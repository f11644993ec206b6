use super::locks::LockManager;
use super::unit_of_work::UnitOfWork;
use crate::config::BookingConfig;
use crate::domain::audit::{Actor, AuditRecord};
use crate::domain::booking::Booking;
use crate::domain::event::Event;
use crate::domain::ids::{BookingId, EventId, VenueId};
use crate::domain::ports::{AuditSinkRef, ClockRef, GatewayRef, StoreRef};
use crate::domain::venue::Venue;
use crate::error::{BookingError, GatewayError, Result};
use chrono::{DateTime, Utc};
use std::future::Future;

/// Collaborators and policy shared by every service.
pub struct Context {
    pub(crate) store: StoreRef,
    pub(crate) gateway: GatewayRef,
    pub(crate) clock: ClockRef,
    pub(crate) audit: AuditSinkRef,
    pub(crate) config: BookingConfig,
    pub(crate) locks: LockManager,
}

impl Context {
    pub fn new(
        store: StoreRef,
        gateway: GatewayRef,
        clock: ClockRef,
        audit: AuditSinkRef,
        config: BookingConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            clock,
            audit,
            config,
            locks: LockManager::new(),
        }
    }

    pub fn config(&self) -> &BookingConfig {
        &self.config
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) fn unit_of_work(&self, actor: Actor) -> UnitOfWork {
        UnitOfWork::new(actor)
    }

    /// Applies the staged rows atomically, then emits the staged audit records.
    pub(crate) async fn commit(&self, uow: UnitOfWork) -> Result<()> {
        if uow.is_empty() {
            return Ok(());
        }
        self.store.commit(uow.changes).await?;
        let at = self.now();
        for event in uow.audit {
            self.audit.record(AuditRecord {
                at,
                actor: uow.actor,
                event,
            });
        }
        Ok(())
    }

    /// Bounds a gateway call by the configured timeout.
    pub(crate) async fn call_gateway<T>(
        &self,
        call: impl Future<Output = std::result::Result<T, GatewayError>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.config.gateway_timeout(), call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(GatewayError::Timeout.into()),
        }
    }

    pub(crate) async fn load_venue(&self, id: VenueId) -> Result<Venue> {
        self.store
            .venue(id)
            .await?
            .ok_or_else(|| BookingError::not_found(format!("venue {id}")))
    }

    pub(crate) async fn load_event(&self, id: EventId) -> Result<Event> {
        self.store
            .event(id)
            .await?
            .ok_or_else(|| BookingError::not_found(format!("event {id}")))
    }

    pub(crate) async fn load_booking(&self, id: BookingId) -> Result<Booking> {
        self.store
            .booking(id)
            .await?
            .ok_or_else(|| BookingError::not_found(format!("booking {id}")))
    }
}
