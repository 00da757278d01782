//! Ticket lifecycle operations.
//!
//! Every operation follows the same path: read the ticket, evaluate the guard
//! table, check working hours when the plan asks for it, commit with a single
//! compare-and-swap, then hand the audit entry to the dispatcher. Nothing is
//! written before all guards pass.
//!
//! The read-and-check phase runs under `transition_timeout` so a slow store
//! fails fast with `Busy`. The write itself is never abandoned once started;
//! Postgres bounds it with `lock_timeout` instead.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::audit::{AuditDispatcher, AuditTrail};
use crate::availability::{AvailabilityChecker, ScheduleSource};
use crate::clock::{Clock, SystemClock};
use crate::config::HelpdeskConfig;
use crate::models::{
    Actor, AuditEntry, CancelTicketInput, ChangeStatusInput, CreateTicketInput, ReopenTicketInput,
    Ticket, TicketStatus,
};
use crate::repository::{HelpdeskRepository, ServiceCatalog, TicketRepository};
use crate::sequence::{SequenceGenerator, TicketNumbering};
use crate::transitions::{
    plan_transition, BusinessRule, TransitionPlan, TransitionPolicy, TransitionRequest,
};
use crate::{HelpdeskError, Result};

/// The stores the state machine talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub tickets: Arc<dyn TicketRepository>,
    pub services: Arc<dyn ServiceCatalog>,
    pub sequence: Arc<dyn SequenceGenerator>,
    pub schedules: Arc<dyn ScheduleSource>,
    pub audit: Arc<dyn AuditTrail>,
}

pub struct TicketStateMachine {
    tickets: Arc<dyn TicketRepository>,
    services: Arc<dyn ServiceCatalog>,
    numbering: TicketNumbering,
    availability: AvailabilityChecker,
    audit: Arc<dyn AuditTrail>,
    dispatcher: AuditDispatcher,
    clock: Arc<dyn Clock>,
    policy: TransitionPolicy,
    transition_timeout: Duration,
    /// Held shared from a compare-and-swap until its audit entry is queued,
    /// exclusively by hard delete.
    commit_gate: Arc<RwLock<()>>,
}

/// A transition that passed every guard and is ready to be written.
struct Prepared {
    current: Ticket,
    plan: TransitionPlan,
    now: DateTime<Utc>,
}

impl TicketStateMachine {
    /// Builds the machine and spawns its audit worker; call inside a tokio runtime.
    pub fn new(
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
        config: &HelpdeskConfig,
    ) -> Result<Self> {
        let policy = config.transition_policy()?;
        let offset = config.utc_offset()?;
        let dispatcher = AuditDispatcher::spawn(
            Arc::clone(&collaborators.audit),
            config.audit_retry_policy(),
            config.audit.queue_capacity,
        );

        Ok(Self {
            tickets: collaborators.tickets,
            services: collaborators.services,
            numbering: TicketNumbering::new(collaborators.sequence, config.number_format()),
            availability: AvailabilityChecker::new(collaborators.schedules, offset),
            audit: collaborators.audit,
            dispatcher,
            clock,
            policy,
            transition_timeout: config.transition_timeout(),
            commit_gate: Arc::new(RwLock::new(())),
        })
    }

    /// Postgres-backed machine on the system clock.
    pub fn postgres(pool: PgPool, config: &HelpdeskConfig) -> Result<Self> {
        let repository =
            Arc::new(HelpdeskRepository::new(pool).with_lock_timeout(config.lock_timeout()));
        let collaborators = Collaborators {
            tickets: repository.clone(),
            services: repository.clone(),
            sequence: repository.clone(),
            schedules: repository.clone(),
            audit: repository,
        };
        Self::new(collaborators, Arc::new(SystemClock), config)
    }

    pub fn audit_dispatcher(&self) -> &AuditDispatcher {
        &self.dispatcher
    }

    /// Opens a ticket. Services are resolved before a number is drawn so
    /// rejected requests never consume one.
    #[tracing::instrument(skip(self, requester, input), fields(requester_id = %requester.id))]
    pub async fn create_ticket(
        &self,
        requester: &Actor,
        input: &CreateTicketInput,
    ) -> Result<Ticket> {
        let description = input.description.trim();
        if description.is_empty() {
            return Err(HelpdeskError::Validation("description must not be empty".to_string()));
        }

        let references: Vec<String> = input
            .services
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if references.is_empty() {
            return Err(HelpdeskError::ServicesNotFound("no services given".to_string()));
        }

        let services = self
            .services
            .resolve(&references)
            .await
            .map_err(HelpdeskError::Dependency)?;
        if services.is_empty() {
            return Err(HelpdeskError::ServicesNotFound(references.join(", ")));
        }

        let number = self.numbering.next().await?;
        let now = self.clock.now();
        let ticket = Ticket::open(
            number,
            description.to_string(),
            requester.id,
            services.iter().map(|s| s.id).collect(),
            now,
        );
        let ticket = self.tickets.insert(&ticket).await?;

        tracing::info!(ticket_id = %ticket.id, number = %ticket.number, "ticket opened");
        self.dispatcher
            .enqueue(AuditEntry::creation(ticket.id, requester, now))
            .await;

        Ok(ticket)
    }

    /// Moves a ticket to `target_status`, enforcing the guard table.
    #[tracing::instrument(
        skip(self, actor, input),
        fields(actor_id = %actor.id, ticket_id = %input.ticket_id)
    )]
    pub async fn change_status(&self, actor: &Actor, input: &ChangeStatusInput) -> Result<Ticket> {
        let target: TicketStatus = input.target_status.parse()?;
        let request = TransitionRequest {
            target,
            closure_reason: input.closure_reason.clone(),
            assignee_id: input.assignee_id,
        };
        self.transition(actor, input.ticket_id, request, input.note.clone())
            .await
    }

    /// Requester reopens their CLOSED ticket within the reopen window.
    #[tracing::instrument(
        skip(self, actor, input),
        fields(actor_id = %actor.id, ticket_id = %input.ticket_id)
    )]
    pub async fn reopen_ticket(&self, actor: &Actor, input: &ReopenTicketInput) -> Result<Ticket> {
        self.transition(
            actor,
            input.ticket_id,
            TransitionRequest::to(TicketStatus::Reopened),
            input.note.clone(),
        )
        .await
    }

    #[tracing::instrument(
        skip(self, actor, input),
        fields(actor_id = %actor.id, ticket_id = %input.ticket_id)
    )]
    pub async fn cancel_ticket(&self, actor: &Actor, input: &CancelTicketInput) -> Result<Ticket> {
        self.transition(
            actor,
            input.ticket_id,
            TransitionRequest::to(TicketStatus::Canceled).with_reason(input.reason.clone()),
            None,
        )
        .await
    }

    pub async fn get_ticket(&self, ticket_id: Uuid) -> Result<Ticket> {
        self.tickets.find_by_id(ticket_id).await
    }

    /// Audit entries of a ticket in chronological order.
    pub async fn get_history(&self, ticket_id: Uuid) -> Result<Vec<AuditEntry>> {
        self.tickets.find_by_id(ticket_id).await?;
        self.audit.history(ticket_id).await
    }

    /// Removes a ticket and its audit trail. Admin only.
    #[tracing::instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn hard_delete(&self, actor: &Actor, ticket_id: Uuid) -> Result<()> {
        if !actor.is_admin() {
            return Err(HelpdeskError::PermissionDenied(
                "only administrators can delete tickets".to_string(),
            ));
        }

        // no transition of this ticket can be between its write and its enqueue
        // while the gate is held, and none can commit once the row is gone
        {
            let _gate = self.commit_gate.write().await;
            self.tickets.delete(ticket_id).await?;
        }
        self.dispatcher.flush().await;
        let purged = self.audit.purge(ticket_id).await?;

        tracing::warn!(%ticket_id, purged, "ticket hard-deleted");
        Ok(())
    }

    async fn transition(
        &self,
        actor: &Actor,
        ticket_id: Uuid,
        request: TransitionRequest,
        note: Option<String>,
    ) -> Result<Ticket> {
        let Prepared { current, plan, now } =
            tokio::time::timeout(self.transition_timeout, self.prepare(actor, ticket_id, &request))
                .await
                .map_err(|_| {
                    tracing::warn!(%ticket_id, "transition timed out before commit");
                    HelpdeskError::Busy(ticket_id)
                })??;

        let next = plan.apply(&current, now);
        let entry = AuditEntry::new(
            ticket_id,
            plan.kind,
            Some(plan.from),
            Some(plan.to),
            note,
            actor,
            now,
        );

        let gate = Arc::clone(&self.commit_gate).read_owned().await;
        let tickets = Arc::clone(&self.tickets);
        let dispatcher = self.dispatcher.clone();
        let expected_version = current.version;

        // a started write runs to completion even if the caller goes away
        let write = tokio::spawn(async move {
            let _gate = gate;
            let saved = tickets.compare_and_swap(&next, expected_version).await?;
            dispatcher.enqueue(entry).await;
            Ok::<_, HelpdeskError>(saved)
        });
        let saved = write
            .await
            .map_err(|e| HelpdeskError::Internal(format!("ticket write task failed: {e}")))??;

        tracing::info!(
            %ticket_id,
            from = %plan.from,
            to = %plan.to,
            version = saved.version,
            "ticket transitioned"
        );
        Ok(saved)
    }

    /// Reads the ticket and runs every guard. Writes nothing.
    async fn prepare(
        &self,
        actor: &Actor,
        ticket_id: Uuid,
        request: &TransitionRequest,
    ) -> Result<Prepared> {
        let current = self.tickets.find_by_id(ticket_id).await?;
        // never stamp a transition earlier than the state it follows
        let now = self.clock.now().max(current.updated_at);

        let plan = plan_transition(&current, request, actor, now, &self.policy).map_err(|e| {
            tracing::info!(
                %ticket_id,
                from = %current.status,
                to = %request.target,
                "transition rejected: {}",
                e
            );
            e
        })?;

        if let Some(technician_id) = plan.requires_availability {
            if !self.availability.is_within_working_hours(technician_id, now).await? {
                tracing::info!(%ticket_id, %technician_id, "claim rejected outside working hours");
                return Err(HelpdeskError::BusinessRule(BusinessRule::OutOfWorkingHours));
            }
        }

        Ok(Prepared { current, plan, now })
    }
}
