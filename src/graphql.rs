//! GraphQL API for the ticket lifecycle
//!
//! Provides TicketQueries and TicketMutations that can be integrated
//! into any service's GraphQL schema.
//!
//! ## Usage in Services
//!
//! Services put an `Arc<TicketStateMachine>` in the schema data and the
//! authenticated [`Actor`] in each request's data. Authentication stays in the
//! service; role and ownership rules are enforced by the state machine.
//!
//! Errors carry a `code` extension (`VALIDATION`, `PERMISSION_DENIED`,
//! `NOT_FOUND`, `CONFLICT`, `BUSINESS_RULE_VIOLATION`, `DEPENDENCY_FAILURE`)
//! and `retryable`; business-rule errors also carry `rule`.

use async_graphql::{Context, ErrorExtensions, Object, Result as GraphQLResult};
use std::sync::Arc;
use uuid::Uuid;

use crate::lifecycle::TicketStateMachine;
use crate::models::{
    Actor, AuditEntry, CancelTicketInput, ChangeStatusInput, CreateTicketInput, ReopenTicketInput,
    Ticket,
};
use crate::HelpdeskError;

impl ErrorExtensions for HelpdeskError {
    fn extend(&self) -> async_graphql::Error {
        async_graphql::Error::new(self.to_string()).extend_with(|_, e| {
            e.set("code", self.kind().as_str());
            e.set("retryable", self.is_retryable());
            if let HelpdeskError::BusinessRule(rule) = self {
                e.set("rule", rule.code());
            }
        })
    }
}

pub struct TicketQueries;

#[Object(name = "Query", extends)]
impl TicketQueries {
    /// Get a single ticket by ID
    async fn ticket(&self, ctx: &Context<'_>, id: Uuid) -> GraphQLResult<Ticket> {
        let machine = ctx.data::<Arc<TicketStateMachine>>()?;

        let ticket = machine.get_ticket(id).await.map_err(|e| e.extend())?;
        Ok(ticket)
    }

    /// Audit trail of a ticket, oldest first
    async fn ticket_history(
        &self,
        ctx: &Context<'_>,
        ticket_id: Uuid,
    ) -> GraphQLResult<Vec<AuditEntry>> {
        let machine = ctx.data::<Arc<TicketStateMachine>>()?;

        let entries = machine.get_history(ticket_id).await.map_err(|e| e.extend())?;
        Ok(entries)
    }
}

pub struct TicketMutations;

#[Object(name = "Mutation", extends)]
impl TicketMutations {
    /// Open a new ticket for the authenticated user
    async fn create_ticket(
        &self,
        ctx: &Context<'_>,
        input: CreateTicketInput,
    ) -> GraphQLResult<Ticket> {
        let machine = ctx.data::<Arc<TicketStateMachine>>()?;
        let actor = ctx.data::<Actor>()?;

        let ticket = machine.create_ticket(actor, &input).await.map_err(|e| e.extend())?;
        Ok(ticket)
    }

    /// Move a ticket to another status
    async fn change_ticket_status(
        &self,
        ctx: &Context<'_>,
        input: ChangeStatusInput,
    ) -> GraphQLResult<Ticket> {
        let machine = ctx.data::<Arc<TicketStateMachine>>()?;
        let actor = ctx.data::<Actor>()?;

        let ticket = machine.change_status(actor, &input).await.map_err(|e| e.extend())?;
        Ok(ticket)
    }

    /// Reopen a closed ticket (requester only, within the reopen window)
    async fn reopen_ticket(
        &self,
        ctx: &Context<'_>,
        input: ReopenTicketInput,
    ) -> GraphQLResult<Ticket> {
        let machine = ctx.data::<Arc<TicketStateMachine>>()?;
        let actor = ctx.data::<Actor>()?;

        let ticket = machine.reopen_ticket(actor, &input).await.map_err(|e| e.extend())?;
        Ok(ticket)
    }

    /// Cancel a ticket with a reason (its requester or an admin)
    async fn cancel_ticket(
        &self,
        ctx: &Context<'_>,
        input: CancelTicketInput,
    ) -> GraphQLResult<Ticket> {
        let machine = ctx.data::<Arc<TicketStateMachine>>()?;
        let actor = ctx.data::<Actor>()?;

        let ticket = machine.cancel_ticket(actor, &input).await.map_err(|e| e.extend())?;
        Ok(ticket)
    }

    /// Permanently delete a ticket and its audit trail (admin only)
    async fn hard_delete_ticket(&self, ctx: &Context<'_>, id: Uuid) -> GraphQLResult<bool> {
        let machine = ctx.data::<Arc<TicketStateMachine>>()?;
        let actor = ctx.data::<Actor>()?;

        machine.hard_delete(actor, id).await.map_err(|e| e.extend())?;
        Ok(true)
    }
}
