//! Configuration for the ticket lifecycle.
//!
//! Loaded from environment variables with defaults suitable for production.

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::sequence::TicketNumberFormat;
use crate::transitions::TransitionPolicy;
use crate::{HelpdeskError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelpdeskConfig {
    /// Ticket number prefix (`HELPDESK_TICKET_PREFIX`, default `INC`)
    pub ticket_prefix: String,
    /// Zero-padding width of the ticket counter (`HELPDESK_TICKET_WIDTH`, default 6)
    pub ticket_width: usize,
    /// How long after closure a requester may reopen (`HELPDESK_REOPEN_WINDOW_HOURS`, default 48)
    pub reopen_window_hours: i64,
    /// Upper bound for one status transition, store round-trips included
    /// (`HELPDESK_TRANSITION_TIMEOUT_MS`, default 5000)
    pub transition_timeout_ms: u64,
    /// Postgres `lock_timeout` for ticket writes (`HELPDESK_LOCK_TIMEOUT_MS`, default 2000)
    pub lock_timeout_ms: u64,
    /// Offset used to read technicians' wall-clock time (`HELPDESK_UTC_OFFSET_MINUTES`, default 0)
    pub utc_offset_minutes: i32,
    pub audit: AuditConfig,
}

/// Audit delivery settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditConfig {
    /// `HELPDESK_AUDIT_MAX_RETRIES`, default 5
    pub max_retries: usize,
    /// `HELPDESK_AUDIT_INITIAL_DELAY_MS`, default 100
    pub initial_delay_ms: u64,
    /// `HELPDESK_AUDIT_MAX_DELAY_MS`, default 10000
    pub max_delay_ms: u64,
    /// `HELPDESK_AUDIT_QUEUE_CAPACITY`, default 1024
    pub queue_capacity: usize,
}

impl Default for HelpdeskConfig {
    fn default() -> Self {
        Self {
            ticket_prefix: "INC".to_string(),
            ticket_width: 6,
            reopen_window_hours: 48,
            transition_timeout_ms: 5_000,
            lock_timeout_ms: 2_000,
            utc_offset_minutes: 0,
            audit: AuditConfig::default(),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
            queue_capacity: 1_024,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

impl HelpdeskConfig {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable variables fall back to their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ticket_prefix: env::var("HELPDESK_TICKET_PREFIX").unwrap_or(defaults.ticket_prefix),
            ticket_width: env_or("HELPDESK_TICKET_WIDTH", defaults.ticket_width),
            reopen_window_hours: env_or(
                "HELPDESK_REOPEN_WINDOW_HOURS",
                defaults.reopen_window_hours,
            ),
            transition_timeout_ms: env_or(
                "HELPDESK_TRANSITION_TIMEOUT_MS",
                defaults.transition_timeout_ms,
            ),
            lock_timeout_ms: env_or("HELPDESK_LOCK_TIMEOUT_MS", defaults.lock_timeout_ms),
            utc_offset_minutes: env_or("HELPDESK_UTC_OFFSET_MINUTES", defaults.utc_offset_minutes),
            audit: AuditConfig {
                max_retries: env_or("HELPDESK_AUDIT_MAX_RETRIES", defaults.audit.max_retries),
                initial_delay_ms: env_or(
                    "HELPDESK_AUDIT_INITIAL_DELAY_MS",
                    defaults.audit.initial_delay_ms,
                ),
                max_delay_ms: env_or("HELPDESK_AUDIT_MAX_DELAY_MS", defaults.audit.max_delay_ms),
                queue_capacity: env_or(
                    "HELPDESK_AUDIT_QUEUE_CAPACITY",
                    defaults.audit.queue_capacity,
                ),
            },
        }
    }

    pub fn number_format(&self) -> TicketNumberFormat {
        TicketNumberFormat::new(self.ticket_prefix.clone(), self.ticket_width)
    }

    pub fn transition_policy(&self) -> Result<TransitionPolicy> {
        let reopen_window = Some(self.reopen_window_hours)
            .filter(|hours| *hours >= 0)
            .and_then(chrono::Duration::try_hours)
            .ok_or_else(|| {
                HelpdeskError::Validation(format!(
                    "invalid reopen window of {} hours",
                    self.reopen_window_hours
                ))
            })?;
        Ok(TransitionPolicy { reopen_window })
    }

    pub fn transition_timeout(&self) -> Duration {
        Duration::from_millis(self.transition_timeout_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn utc_offset(&self) -> Result<FixedOffset> {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                HelpdeskError::Validation(format!(
                    "invalid UTC offset of {} minutes",
                    self.utc_offset_minutes
                ))
            })
    }

    pub fn audit_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(self.audit.max_retries)
            .initial_delay(Duration::from_millis(self.audit.initial_delay_ms))
            .max_delay(Duration::from_millis(self.audit.max_delay_ms))
            .build()
    }
}
