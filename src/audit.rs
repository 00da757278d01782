//! Append-only audit trail.
//!
//! A transition is committed first and its audit entry is handed to an
//! [`AuditDispatcher`] afterwards. The dispatcher owns a single background
//! task that writes entries in the order they were enqueued, retrying with
//! backoff. Entries that still fail are logged and kept as dead letters until
//! [`AuditDispatcher::redeliver_dead_letters`] is called; the transition that
//! produced them is never rolled back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::models::{Actor, AuditEntry, AuditKind, TicketStatus};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::Result;

#[async_trait]
pub trait AuditTrail: Send + Sync {
    /// Appends one entry. Recording the same entry id twice keeps one copy.
    async fn record(&self, entry: &AuditEntry) -> Result<()>;

    /// Entries for a ticket, ascending by `occurred_at`, insertion order on ties.
    async fn history(&self, ticket_id: Uuid) -> Result<Vec<AuditEntry>>;

    /// Removes every entry of a ticket. Only the admin hard delete calls this.
    async fn purge(&self, ticket_id: Uuid) -> Result<u64>;
}

impl AuditEntry {
    pub fn new(
        ticket_id: Uuid,
        kind: AuditKind,
        from_status: Option<TicketStatus>,
        to_status: Option<TicketStatus>,
        note: Option<String>,
        author: &Actor,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            ticket_id,
            kind,
            from_status,
            to_status,
            note: note.filter(|n| !n.trim().is_empty()),
            author_id: author.id,
            author_name: author.name.clone(),
            author_email: author.email.clone(),
            occurred_at,
        }
    }

    pub fn creation(ticket_id: Uuid, author: &Actor, occurred_at: DateTime<Utc>) -> Self {
        Self::new(
            ticket_id,
            AuditKind::Creation,
            None,
            Some(TicketStatus::Open),
            None,
            author,
            occurred_at,
        )
    }
}

enum Command {
    Record(AuditEntry),
    Flush(oneshot::Sender<()>),
}

/// Delivers audit entries off the request path.
///
/// Must be created inside a tokio runtime; the worker stops once every
/// clone of the dispatcher is dropped and the queue is drained.
#[derive(Clone)]
pub struct AuditDispatcher {
    sender: mpsc::Sender<Command>,
    dead_letters: Arc<Mutex<Vec<AuditEntry>>>,
}

impl AuditDispatcher {
    pub fn spawn(trail: Arc<dyn AuditTrail>, policy: RetryPolicy, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let dead_letters = Arc::new(Mutex::new(Vec::new()));
        tokio::spawn(run_worker(trail, policy, receiver, Arc::clone(&dead_letters)));
        Self { sender, dead_letters }
    }

    /// Queues an entry. Waits for queue space but never fails the caller.
    pub async fn enqueue(&self, entry: AuditEntry) {
        let command = Command::Record(entry);
        if let Err(mpsc::error::SendError(command)) = self.sender.send(command).await {
            if let Command::Record(entry) = command {
                tracing::error!(
                    ticket_id = %entry.ticket_id,
                    entry_id = %entry.id,
                    "audit worker is gone, parking entry as dead letter"
                );
                self.park(entry);
            }
        }
    }

    /// Resolves once every entry queued before the call has been handled.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(Command::Flush(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub fn dead_letters(&self) -> Vec<AuditEntry> {
        self.dead_letters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Re-queues every dead letter, returning how many were re-queued.
    pub async fn redeliver_dead_letters(&self) -> usize {
        let parked = std::mem::take(
            &mut *self.dead_letters.lock().unwrap_or_else(PoisonError::into_inner),
        );
        let count = parked.len();
        for entry in parked {
            self.enqueue(entry).await;
        }
        if count > 0 {
            tracing::info!(count, "redelivering parked audit entries");
        }
        count
    }

    fn park(&self, entry: AuditEntry) {
        self.dead_letters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }
}

async fn run_worker(
    trail: Arc<dyn AuditTrail>,
    policy: RetryPolicy,
    mut receiver: mpsc::Receiver<Command>,
    dead_letters: Arc<Mutex<Vec<AuditEntry>>>,
) {
    while let Some(command) = receiver.recv().await {
        match command {
            Command::Record(entry) => {
                let delivered = retry_with_backoff(&policy, || {
                    let trail = Arc::clone(&trail);
                    let entry = entry.clone();
                    async move { trail.record(&entry).await }
                })
                .await;

                if let Err(e) = delivered {
                    tracing::error!(
                        ticket_id = %entry.ticket_id,
                        entry_id = %entry.id,
                        kind = ?entry.kind,
                        "Failed to record audit entry: {}",
                        e
                    );
                    dead_letters
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(entry);
                }
            }
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("audit worker stopped");
}
