//! Ticket numbers ("OS").
//!
//! The counter lives in the store and is only ever advanced through an atomic
//! fetch-and-add ([`SequenceGenerator::next_value`]). Application code never
//! reads it and writes it back, so concurrent creators can not observe the
//! same value.

use async_trait::async_trait;
use std::sync::Arc;

use crate::Result;

#[async_trait]
pub trait SequenceGenerator: Send + Sync {
    /// Atomically advances the counter and returns the new value.
    async fn next_value(&self) -> Result<u64>;
}

/// `PREFIX` followed by the counter, left-padded with zeros to `width`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketNumberFormat {
    prefix: String,
    width: usize,
}

impl TicketNumberFormat {
    pub fn new(prefix: impl Into<String>, width: usize) -> Self {
        Self {
            prefix: prefix.into(),
            width,
        }
    }

    /// Values wider than the padding are written in full, never truncated.
    pub fn format(&self, value: u64) -> String {
        format!("{}{:0width$}", self.prefix, value, width = self.width)
    }

    /// Inverse of [`format`](Self::format), `None` for foreign numbers.
    pub fn parse(&self, number: &str) -> Option<u64> {
        let digits = number.strip_prefix(self.prefix.as_str())?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }
}

impl Default for TicketNumberFormat {
    fn default() -> Self {
        Self::new("INC", 6)
    }
}

/// Issues formatted ticket numbers from a [`SequenceGenerator`].
#[derive(Clone)]
pub struct TicketNumbering {
    generator: Arc<dyn SequenceGenerator>,
    format: TicketNumberFormat,
}

impl TicketNumbering {
    pub fn new(generator: Arc<dyn SequenceGenerator>, format: TicketNumberFormat) -> Self {
        Self { generator, format }
    }

    /// Next formatted number. Fails without side effects when the store is unreachable.
    pub async fn next(&self) -> Result<String> {
        let value = self.generator.next_value().await.map_err(|e| {
            tracing::error!("Failed to advance ticket number sequence: {}", e);
            e
        })?;
        Ok(self.format.format(value))
    }
}
