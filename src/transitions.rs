//! Status guard table.
//!
//! [`plan_transition`] is a pure function from (current ticket, requested
//! status, actor, now) to either a rejection or a [`TransitionPlan`]
//! describing every side effect of the move. The only guard it can not decide
//! alone is the technician working-hours check, which needs the schedule
//! store; the plan names the technician to check instead.
//!
//! | From                  | To          | Actor              | Guard                    |
//! |-----------------------|-------------|--------------------|--------------------------|
//! | OPEN, REOPENED        | IN_PROGRESS | technician, admin  | technician on shift      |
//! | OPEN, IN_PROG, REOPEN | CLOSED      | technician, admin  | closure reason           |
//! | OPEN, IN_PROG, REOPEN | CANCELED    | owner, admin       | closure reason           |
//! | CLOSED                | REOPENED    | owner              | within the reopen window |
//! | CLOSED                | CLOSED      | admin              | closure reason (re-close)|
//! | CANCELED              | any         | nobody             |                          |

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::models::{Actor, ActorRole, AuditKind, Ticket, TicketStatus};
use crate::{HelpdeskError, Result};

/// Rules that gate a transition on time or on the closed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BusinessRule {
    OutOfWorkingHours,
    ReopenWindowExpired,
    ClosedTicketImmutable,
}

impl BusinessRule {
    pub fn code(&self) -> &'static str {
        match self {
            BusinessRule::OutOfWorkingHours => "OUT_OF_WORKING_HOURS",
            BusinessRule::ReopenWindowExpired => "REOPEN_WINDOW_EXPIRED",
            BusinessRule::ClosedTicketImmutable => "CLOSED_TICKET_IMMUTABLE",
        }
    }
}

impl fmt::Display for BusinessRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            BusinessRule::OutOfWorkingHours => "technician is outside their working hours",
            BusinessRule::ReopenWindowExpired => "the reopen window for this ticket has expired",
            BusinessRule::ClosedTicketImmutable => "closed tickets cannot be altered",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionPolicy {
    pub reopen_window: Duration,
}

impl Default for TransitionPolicy {
    fn default() -> Self {
        Self {
            reopen_window: Duration::hours(48),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRequest {
    pub target: TicketStatus,
    pub closure_reason: Option<String>,
    pub assignee_id: Option<Uuid>,
}

impl TransitionRequest {
    pub fn to(target: TicketStatus) -> Self {
        Self {
            target,
            closure_reason: None,
            assignee_id: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.closure_reason = Some(reason.into());
        self
    }

    pub fn with_assignee(mut self, assignee_id: Uuid) -> Self {
        self.assignee_id = Some(assignee_id);
        self
    }
}

/// What happens to `closed_at` / `closure_reason`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Closure {
    Keep,
    Close(String),
    /// Admin re-close: new reason, original `closed_at`.
    ReplaceReason(String),
    Clear,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionPlan {
    pub from: TicketStatus,
    pub to: TicketStatus,
    pub kind: AuditKind,
    pub assignee_id: Option<Uuid>,
    /// Technician whose working hours must contain "now" before committing.
    pub requires_availability: Option<Uuid>,
    pub closure: Closure,
}

impl TransitionPlan {
    /// The ticket as it looks once the plan is committed. `version` is left to the store.
    pub fn apply(&self, ticket: &Ticket, now: DateTime<Utc>) -> Ticket {
        let mut next = ticket.clone();
        next.status = self.to;
        next.updated_at = now;
        if let Some(assignee_id) = self.assignee_id {
            next.assignee_id = Some(assignee_id);
        }
        match &self.closure {
            Closure::Keep => {}
            Closure::Close(reason) => {
                next.closed_at = Some(now);
                next.closure_reason = Some(reason.clone());
            }
            Closure::ReplaceReason(reason) => {
                next.closure_reason = Some(reason.clone());
            }
            Closure::Clear => {
                next.closed_at = None;
                next.closure_reason = None;
            }
        }
        next
    }
}

/// Evaluates the guard table. Every rejection happens here, before any write.
pub fn plan_transition(
    ticket: &Ticket,
    request: &TransitionRequest,
    actor: &Actor,
    now: DateTime<Utc>,
    policy: &TransitionPolicy,
) -> Result<TransitionPlan> {
    use TicketStatus::*;

    let from = ticket.status;
    let to = request.target;

    if from.is_terminal() {
        return Err(HelpdeskError::TerminalState(from));
    }

    let plan = |kind: AuditKind,
                assignee_id: Option<Uuid>,
                requires_availability: Option<Uuid>,
                closure: Closure| TransitionPlan {
        from,
        to,
        kind,
        assignee_id,
        requires_availability,
        closure,
    };

    match (from, to) {
        (_, Open) => Err(HelpdeskError::InvalidTransition { from, to }),

        (Closed, Canceled) => Err(HelpdeskError::TerminalState(from)),
        (_, Canceled) => {
            match actor.role {
                ActorRole::Technician => return Err(denied("technicians cannot cancel tickets")),
                ActorRole::Requester if actor.id != ticket.requester_id => {
                    return Err(denied("only the requester can cancel their ticket"))
                }
                _ => {}
            }
            let reason = required_reason(request)?;
            Ok(plan(AuditKind::Cancel, None, None, Closure::Close(reason)))
        }

        (_, Reopened) => {
            if actor.role != ActorRole::Requester || actor.id != ticket.requester_id {
                return Err(denied("only the requester can reopen their ticket"));
            }
            if from != Closed {
                return Err(HelpdeskError::NotClosed(from));
            }
            let closed_at = ticket.closed_at.ok_or_else(|| {
                HelpdeskError::Internal(format!("closed ticket {} has no closed_at", ticket.id))
            })?;
            if now - closed_at > policy.reopen_window {
                return Err(HelpdeskError::BusinessRule(BusinessRule::ReopenWindowExpired));
            }
            Ok(plan(AuditKind::Reopen, None, None, Closure::Clear))
        }

        (Closed, Closed) if actor.is_admin() => {
            let reason = required_reason(request)?;
            Ok(plan(AuditKind::StatusChange, None, None, Closure::ReplaceReason(reason)))
        }
        (Closed, _) => Err(HelpdeskError::BusinessRule(BusinessRule::ClosedTicketImmutable)),

        (_, InProgress) => {
            let (assignee_id, requires_availability) = match actor.role {
                ActorRole::Requester => return Err(denied("requesters cannot work on tickets")),
                ActorRole::Technician => {
                    if request.assignee_id.is_some_and(|id| id != actor.id) {
                        return Err(denied("technicians can only assign tickets to themselves"));
                    }
                    (actor.id, Some(actor.id))
                }
                ActorRole::Admin => (request.assignee_id.unwrap_or(actor.id), None),
            };
            if from == InProgress {
                return Err(HelpdeskError::AlreadyClaimed(ticket.id));
            }
            Ok(plan(
                AuditKind::StatusChange,
                Some(assignee_id),
                requires_availability,
                Closure::Keep,
            ))
        }

        (_, Closed) => {
            if actor.role == ActorRole::Requester {
                return Err(denied("requesters cannot close tickets"));
            }
            let reason = required_reason(request)?;
            Ok(plan(AuditKind::StatusChange, None, None, Closure::Close(reason)))
        }
    }
}

fn denied(reason: &str) -> HelpdeskError {
    HelpdeskError::PermissionDenied(reason.to_string())
}

fn required_reason(request: &TransitionRequest) -> Result<String> {
    request
        .closure_reason
        .as_deref()
        .map(str::trim)
        .filter(|reason| !reason.is_empty())
        .map(str::to_string)
        .ok_or(HelpdeskError::MissingReason)
}
