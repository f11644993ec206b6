//! Booking policy configuration.
//!
//! Every service receives the same immutable [`BookingConfig`] at construction.
//! Values can be overridden from `EVENTBOOK_*` environment variables by the
//! binary; the library itself never reads ambient state.

use crate::error::{BookingError, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookingConfig {
    /// Minutes a PENDING booking stays valid.
    pub booking_ttl_minutes: i64,
    /// Hours before start after which confirmed bookings can no longer be cancelled.
    pub cancellation_deadline_hours: i64,
    /// Hours before start after which refunds are refused.
    pub refund_deadline_hours: i64,
    /// Payment rows (any status) a booking may accumulate.
    pub max_payment_attempts: u32,
    /// Confirmed bookings an event needs to survive the auto-cancel sweep.
    pub min_participants: u32,
    /// Seats a slot must still offer to admit a new event or booking.
    pub min_available_seats: u32,
    /// Seats a slot must offer when an existing event is being rescheduled.
    pub reschedule_min_seats: u32,
    /// Seats reserved from the venue per event.
    pub default_event_seats: u32,
    pub event_duration_minutes: i64,
    /// Events starting within this many minutes are checked by the auto-cancel sweep.
    pub auto_cancel_horizon_minutes: i64,
    pub min_lead_hours: i64,
    pub max_lead_days: i64,
    pub earliest_start_hour: u32,
    pub latest_start_hour: u32,
    pub currency: String,
    pub gateway_timeout_secs: u64,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            booking_ttl_minutes: 15,
            cancellation_deadline_hours: 3,
            refund_deadline_hours: 3,
            max_payment_attempts: 3,
            min_participants: 3,
            min_available_seats: 3,
            reschedule_min_seats: 1,
            default_event_seats: 6,
            event_duration_minutes: 60,
            auto_cancel_horizon_minutes: 60,
            min_lead_hours: 24,
            max_lead_days: 7,
            earliest_start_hour: 12,
            latest_start_hour: 21,
            currency: "eur".to_string(),
            gateway_timeout_secs: 10,
        }
    }
}

impl BookingConfig {
    /// Builds a configuration from the defaults, overridden by `EVENTBOOK_*` variables.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            booking_ttl_minutes: var_or("EVENTBOOK_BOOKING_TTL_MINUTES", defaults.booking_ttl_minutes)?,
            cancellation_deadline_hours: var_or(
                "EVENTBOOK_CANCELLATION_DEADLINE_HOURS",
                defaults.cancellation_deadline_hours,
            )?,
            refund_deadline_hours: var_or("EVENTBOOK_REFUND_DEADLINE_HOURS", defaults.refund_deadline_hours)?,
            max_payment_attempts: var_or("EVENTBOOK_MAX_PAYMENT_ATTEMPTS", defaults.max_payment_attempts)?,
            min_participants: var_or("EVENTBOOK_MIN_PARTICIPANTS", defaults.min_participants)?,
            min_available_seats: var_or("EVENTBOOK_MIN_AVAILABLE_SEATS", defaults.min_available_seats)?,
            reschedule_min_seats: var_or("EVENTBOOK_RESCHEDULE_MIN_SEATS", defaults.reschedule_min_seats)?,
            default_event_seats: var_or("EVENTBOOK_DEFAULT_EVENT_SEATS", defaults.default_event_seats)?,
            event_duration_minutes: var_or("EVENTBOOK_EVENT_DURATION_MINUTES", defaults.event_duration_minutes)?,
            auto_cancel_horizon_minutes: var_or(
                "EVENTBOOK_AUTO_CANCEL_HORIZON_MINUTES",
                defaults.auto_cancel_horizon_minutes,
            )?,
            min_lead_hours: var_or("EVENTBOOK_MIN_LEAD_HOURS", defaults.min_lead_hours)?,
            max_lead_days: var_or("EVENTBOOK_MAX_LEAD_DAYS", defaults.max_lead_days)?,
            earliest_start_hour: var_or("EVENTBOOK_EARLIEST_START_HOUR", defaults.earliest_start_hour)?,
            latest_start_hour: var_or("EVENTBOOK_LATEST_START_HOUR", defaults.latest_start_hour)?,
            currency: env::var("EVENTBOOK_CURRENCY").unwrap_or(defaults.currency),
            gateway_timeout_secs: var_or("EVENTBOOK_GATEWAY_TIMEOUT_SECS", defaults.gateway_timeout_secs)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings that would make the state machines inconsistent.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("booking_ttl_minutes", self.booking_ttl_minutes),
            ("event_duration_minutes", self.event_duration_minutes),
            ("max_lead_days", self.max_lead_days),
        ];
        for (name, value) in positive {
            if value <= 0 {
                return Err(invalid(format!("{name} must be positive")));
            }
        }
        if self.cancellation_deadline_hours < 0
            || self.refund_deadline_hours < 0
            || self.auto_cancel_horizon_minutes < 0
            || self.min_lead_hours < 0
        {
            return Err(invalid("deadlines and horizons cannot be negative"));
        }
        if self.max_payment_attempts == 0 {
            return Err(invalid("max_payment_attempts must be at least 1"));
        }
        if self.latest_start_hour > 23 || self.earliest_start_hour > self.latest_start_hour {
            return Err(invalid("start hours must satisfy earliest <= latest <= 23"));
        }
        if self.min_lead_hours > self.max_lead_days * 24 {
            return Err(invalid("minimum lead time exceeds maximum lead time"));
        }
        if self.default_event_seats == 0 {
            return Err(invalid("default_event_seats must be at least 1"));
        }
        if self.currency.trim().is_empty() {
            return Err(invalid("currency cannot be empty"));
        }
        Ok(())
    }

    pub fn booking_ttl(&self) -> Duration {
        Duration::minutes(self.booking_ttl_minutes)
    }

    pub fn cancellation_deadline(&self) -> Duration {
        Duration::hours(self.cancellation_deadline_hours)
    }

    pub fn refund_deadline(&self) -> Duration {
        Duration::hours(self.refund_deadline_hours)
    }

    pub fn event_duration(&self) -> Duration {
        Duration::minutes(self.event_duration_minutes)
    }

    pub fn auto_cancel_horizon(&self) -> Duration {
        Duration::minutes(self.auto_cancel_horizon_minutes)
    }

    pub fn min_lead(&self) -> Duration {
        Duration::hours(self.min_lead_hours)
    }

    pub fn max_lead(&self) -> Duration {
        Duration::days(self.max_lead_days)
    }

    pub fn gateway_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.gateway_timeout_secs)
    }
}

fn var_or<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| invalid(format!("{name} has an invalid value: {raw}"))),
        Err(_) => Ok(default),
    }
}

fn invalid(message: impl Into<String>) -> BookingError {
    BookingError::ValidationError(message.into())
}
