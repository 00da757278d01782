//! In-memory backends.
//!
//! Fast, deterministic implementations of every store trait, used by the
//! test-suite and by services embedding the lifecycle without Postgres. They
//! honour the same contracts as [`HelpdeskRepository`](crate::HelpdeskRepository):
//! compare-and-swap on `version`, unique ticket numbers, idempotent audit
//! appends and an atomic fetch-and-add counter.
//!
//! The failure and latency knobs let tests simulate an unreachable or slow store.

use anyhow::anyhow;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::audit::AuditTrail;
use crate::availability::{ScheduleSource, WorkingHours};
use crate::lifecycle::Collaborators;
use crate::models::{AuditEntry, ServiceRef, Ticket};
use crate::repository::{ServiceCatalog, TicketRepository};
use crate::sequence::SequenceGenerator;
use crate::{HelpdeskError, Result};

#[derive(Debug, Default)]
pub struct InMemoryTicketStore {
    tickets: RwLock<HashMap<Uuid, Ticket>>,
    read_latency: RwLock<Option<Duration>>,
}

impl InMemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every lookup, as a slow or saturated store would.
    pub async fn set_read_latency(&self, latency: Option<Duration>) {
        *self.read_latency.write().await = latency;
    }

    pub async fn len(&self) -> usize {
        self.tickets.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tickets.read().await.is_empty()
    }
}

#[async_trait]
impl TicketRepository for InMemoryTicketStore {
    async fn insert(&self, ticket: &Ticket) -> Result<Ticket> {
        let mut tickets = self.tickets.write().await;
        if tickets.contains_key(&ticket.id) {
            return Err(HelpdeskError::Internal(format!("duplicate ticket id {}", ticket.id)));
        }
        if tickets.values().any(|t| t.number == ticket.number) {
            return Err(HelpdeskError::Internal(format!(
                "duplicate ticket number {}",
                ticket.number
            )));
        }
        tickets.insert(ticket.id, ticket.clone());
        Ok(ticket.clone())
    }

    async fn find_by_id(&self, ticket_id: Uuid) -> Result<Ticket> {
        let latency = *self.read_latency.read().await;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        self.tickets
            .read()
            .await
            .get(&ticket_id)
            .cloned()
            .ok_or(HelpdeskError::TicketNotFound(ticket_id))
    }

    async fn compare_and_swap(&self, ticket: &Ticket, expected_version: i64) -> Result<Ticket> {
        let mut tickets = self.tickets.write().await;
        let stored = tickets
            .get_mut(&ticket.id)
            .ok_or(HelpdeskError::TicketNotFound(ticket.id))?;
        if stored.version != expected_version {
            return Err(HelpdeskError::ConcurrentModification(ticket.id));
        }

        let mut next = ticket.clone();
        next.version = expected_version + 1;
        *stored = next.clone();
        Ok(next)
    }

    async fn delete(&self, ticket_id: Uuid) -> Result<()> {
        self.tickets
            .write()
            .await
            .remove(&ticket_id)
            .map(|_| ())
            .ok_or(HelpdeskError::TicketNotFound(ticket_id))
    }
}

/// Append-only log; `failures` makes the next N appends fail.
#[derive(Debug, Default)]
pub struct InMemoryAuditTrail {
    entries: RwLock<Vec<AuditEntry>>,
    failures: AtomicUsize,
}

impl InMemoryAuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, attempts: usize) {
        self.failures.store(attempts, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl AuditTrail for InMemoryAuditTrail {
    async fn record(&self, entry: &AuditEntry) -> Result<()> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(HelpdeskError::Dependency(anyhow!("audit store unavailable")));
        }

        let mut entries = self.entries.write().await;
        if !entries.iter().any(|e| e.id == entry.id) {
            entries.push(entry.clone());
        }
        Ok(())
    }

    async fn history(&self, ticket_id: Uuid) -> Result<Vec<AuditEntry>> {
        let mut history: Vec<AuditEntry> = self
            .entries
            .read()
            .await
            .iter()
            .filter(|e| e.ticket_id == ticket_id)
            .cloned()
            .collect();
        // stable sort keeps insertion order for equal timestamps
        history.sort_by_key(|e| e.occurred_at);
        Ok(history)
    }

    async fn purge(&self, ticket_id: Uuid) -> Result<u64> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| e.ticket_id != ticket_id);
        Ok((before - entries.len()) as u64)
    }
}

#[derive(Debug, Default)]
pub struct InMemorySequence {
    counter: AtomicU64,
    unavailable: AtomicBool,
}

impl InMemorySequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Last value handed out, 0 if none.
    pub fn current(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SequenceGenerator for InMemorySequence {
    async fn next_value(&self) -> Result<u64> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(HelpdeskError::Dependency(anyhow!("sequence store unavailable")));
        }
        Ok(self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryServiceCatalog {
    services: RwLock<Vec<ServiceRef>>,
}

impl InMemoryServiceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, name: impl Into<String>) -> ServiceRef {
        let service = ServiceRef {
            id: Uuid::new_v4(),
            name: name.into(),
        };
        self.services.write().await.push(service.clone());
        service
    }
}

#[async_trait]
impl ServiceCatalog for InMemoryServiceCatalog {
    async fn resolve(&self, references: &[String]) -> anyhow::Result<Vec<ServiceRef>> {
        let services = self.services.read().await;
        Ok(services
            .iter()
            .filter(|s| {
                references.iter().any(|r| {
                    let r = r.trim();
                    r == s.name || Uuid::parse_str(r).is_ok_and(|id| id == s.id)
                })
            })
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default)]
pub struct InMemorySchedules {
    schedules: RwLock<HashMap<Uuid, WorkingHours>>,
}

impl InMemorySchedules {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, technician_id: Uuid, hours: WorkingHours) {
        self.schedules.write().await.insert(technician_id, hours);
    }
}

#[async_trait]
impl ScheduleSource for InMemorySchedules {
    async fn working_hours(&self, technician_id: Uuid) -> anyhow::Result<Option<WorkingHours>> {
        Ok(self.schedules.read().await.get(&technician_id).copied())
    }
}

/// Every in-memory backend, with typed handles kept for test control.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    pub tickets: Arc<InMemoryTicketStore>,
    pub audit: Arc<InMemoryAuditTrail>,
    pub sequence: Arc<InMemorySequence>,
    pub services: Arc<InMemoryServiceCatalog>,
    pub schedules: Arc<InMemorySchedules>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            tickets: self.tickets.clone(),
            services: self.services.clone(),
            sequence: self.sequence.clone(),
            schedules: self.schedules.clone(),
            audit: self.audit.clone(),
        }
    }
}
