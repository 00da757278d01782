use async_trait::async_trait;
use chrono::NaiveTime;
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use crate::audit::AuditTrail;
use crate::availability::{ScheduleSource, WorkingHours};
use crate::models::{AuditEntry, ServiceRef, Ticket};
use crate::sequence::SequenceGenerator;
use crate::{HelpdeskError, Result};

/// Durable ticket storage.
#[async_trait]
pub trait TicketRepository: Send + Sync {
    async fn insert(&self, ticket: &Ticket) -> Result<Ticket>;

    async fn find_by_id(&self, ticket_id: Uuid) -> Result<Ticket>;

    /// Writes `ticket` only if the stored row is still at `expected_version`,
    /// bumping the version by one. Fails with `ConcurrentModification` otherwise.
    async fn compare_and_swap(&self, ticket: &Ticket, expected_version: i64) -> Result<Ticket>;

    async fn delete(&self, ticket_id: Uuid) -> Result<()>;
}

/// Resolves service ids or names, owned by the service CRUD.
#[async_trait]
pub trait ServiceCatalog: Send + Sync {
    /// Unknown references are skipped, not reported.
    async fn resolve(&self, references: &[String]) -> anyhow::Result<Vec<ServiceRef>>;
}

/// Applies the bundled migrations (`migrations/`).
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!().run(pool).await?;
    Ok(())
}

const LOCK_NOT_AVAILABLE: &str = "55P03";

pub struct HelpdeskRepository {
    pool: PgPool,
    lock_timeout: Duration,
}

impl HelpdeskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: Duration::from_secs(2),
        }
    }

    /// Bound on how long a ticket write waits for the row lock.
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    fn map_write_error(e: sqlx::Error, ticket_id: Uuid) -> HelpdeskError {
        if let sqlx::Error::Database(db) = &e {
            if db.code().as_deref() == Some(LOCK_NOT_AVAILABLE) {
                tracing::warn!(%ticket_id, "ticket row lock not acquired in time");
                return HelpdeskError::Busy(ticket_id);
            }
        }
        tracing::error!("Failed to update ticket {}: {}", ticket_id, e);
        HelpdeskError::Database(e)
    }
}

#[async_trait]
impl TicketRepository for HelpdeskRepository {
    async fn insert(&self, ticket: &Ticket) -> Result<Ticket> {
        let ticket = sqlx::query_as::<_, Ticket>(
            r#"
            INSERT INTO tickets (
                id, number, description, status, requester_id, assignee_id,
                related_services, closure_reason, closed_at, version, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(ticket.id)
        .bind(&ticket.number)
        .bind(&ticket.description)
        .bind(ticket.status)
        .bind(ticket.requester_id)
        .bind(ticket.assignee_id)
        .bind(&ticket.related_services)
        .bind(&ticket.closure_reason)
        .bind(ticket.closed_at)
        .bind(ticket.version)
        .bind(ticket.created_at)
        .bind(ticket.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to create ticket: {}", e);
            HelpdeskError::Database(e)
        })?;

        Ok(ticket)
    }

    async fn find_by_id(&self, ticket_id: Uuid) -> Result<Ticket> {
        let ticket = sqlx::query_as::<_, Ticket>("SELECT * FROM tickets WHERE id = $1")
            .bind(ticket_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::RowNotFound => HelpdeskError::TicketNotFound(ticket_id),
                _ => {
                    tracing::error!("Failed to fetch ticket: {}", e);
                    HelpdeskError::Database(e)
                }
            })?;

        Ok(ticket)
    }

    async fn compare_and_swap(&self, ticket: &Ticket, expected_version: i64) -> Result<Ticket> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Self::map_write_error(e, ticket.id))?;

        // SET LOCAL does not take bind parameters; the value is an integer we format ourselves.
        let set_lock_timeout =
            format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout.as_millis());
        sqlx::query(&set_lock_timeout)
            .execute(&mut *tx)
            .await
            .map_err(|e| Self::map_write_error(e, ticket.id))?;

        let updated = sqlx::query_as::<_, Ticket>(
            r#"
            UPDATE tickets SET
                status = $3,
                assignee_id = $4,
                closure_reason = $5,
                closed_at = $6,
                updated_at = $7,
                version = version + 1
            WHERE id = $1 AND version = $2
            RETURNING *
            "#,
        )
        .bind(ticket.id)
        .bind(expected_version)
        .bind(ticket.status)
        .bind(ticket.assignee_id)
        .bind(&ticket.closure_reason)
        .bind(ticket.closed_at)
        .bind(ticket.updated_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| Self::map_write_error(e, ticket.id))?;

        let Some(updated) = updated else {
            let exists: Option<i64> =
                sqlx::query_scalar("SELECT version FROM tickets WHERE id = $1")
                    .bind(ticket.id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|e| Self::map_write_error(e, ticket.id))?;
            tx.rollback().await.map_err(HelpdeskError::Database)?;
            return Err(match exists {
                Some(_) => HelpdeskError::ConcurrentModification(ticket.id),
                None => HelpdeskError::TicketNotFound(ticket.id),
            });
        };

        tx.commit()
            .await
            .map_err(|e| Self::map_write_error(e, ticket.id))?;

        Ok(updated)
    }

    async fn delete(&self, ticket_id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM tickets WHERE id = $1")
            .bind(ticket_id)
            .execute(&self.pool)
            .await
            .map_err(|e| Self::map_write_error(e, ticket_id))?;

        if result.rows_affected() == 0 {
            return Err(HelpdeskError::TicketNotFound(ticket_id));
        }
        Ok(())
    }
}

#[async_trait]
impl SequenceGenerator for HelpdeskRepository {
    async fn next_value(&self) -> Result<u64> {
        let value: i64 = sqlx::query_scalar("SELECT nextval('ticket_number_seq')")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| HelpdeskError::Dependency(e.into()))?;

        u64::try_from(value).map_err(|_| {
            HelpdeskError::Internal(format!("negative ticket sequence value {value}"))
        })
    }
}

#[async_trait]
impl AuditTrail for HelpdeskRepository {
    async fn record(&self, entry: &AuditEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ticket_audit_entries (
                id, ticket_id, kind, from_status, to_status, note,
                author_id, author_name, author_email, occurred_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(entry.id)
        .bind(entry.ticket_id)
        .bind(entry.kind)
        .bind(entry.from_status)
        .bind(entry.to_status)
        .bind(&entry.note)
        .bind(entry.author_id)
        .bind(&entry.author_name)
        .bind(&entry.author_email)
        .bind(entry.occurred_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::warn!(entry_id = %entry.id, "Failed to append audit entry: {}", e);
            HelpdeskError::Database(e)
        })?;

        Ok(())
    }

    async fn history(&self, ticket_id: Uuid) -> Result<Vec<AuditEntry>> {
        let entries = sqlx::query_as::<_, AuditEntry>(
            r#"
            SELECT id, ticket_id, kind, from_status, to_status, note,
                   author_id, author_name, author_email, occurred_at
            FROM ticket_audit_entries
            WHERE ticket_id = $1
            ORDER BY occurred_at ASC, seq ASC
            "#,
        )
        .bind(ticket_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to fetch ticket history: {}", e);
            HelpdeskError::Database(e)
        })?;

        Ok(entries)
    }

    async fn purge(&self, ticket_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM ticket_audit_entries WHERE ticket_id = $1")
            .bind(ticket_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to purge audit entries: {}", e);
                HelpdeskError::Database(e)
            })?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ServiceCatalog for HelpdeskRepository {
    async fn resolve(&self, references: &[String]) -> anyhow::Result<Vec<ServiceRef>> {
        let ids: Vec<Uuid> = references
            .iter()
            .filter_map(|r| Uuid::parse_str(r.trim()).ok())
            .collect();
        let names: Vec<String> = references.iter().map(|r| r.trim().to_string()).collect();

        let services = sqlx::query_as::<_, ServiceRef>(
            "SELECT id, name FROM services WHERE id = ANY($1) OR name = ANY($2) ORDER BY name",
        )
        .bind(&ids)
        .bind(&names)
        .fetch_all(&self.pool)
        .await?;

        Ok(services)
    }
}

#[async_trait]
impl ScheduleSource for HelpdeskRepository {
    async fn working_hours(&self, technician_id: Uuid) -> anyhow::Result<Option<WorkingHours>> {
        let row = sqlx::query_as::<_, (NaiveTime, NaiveTime)>(
            "SELECT entry_time, exit_time FROM technicians WHERE id = $1",
        )
        .bind(technician_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(entry, exit)| WorkingHours::new(entry, exit).map_err(anyhow::Error::from))
            .transpose()
    }
}
