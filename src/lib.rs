//! # pleme-helpdesk
//!
//! Ticket lifecycle core for the Pleme helpdesk ("chamados").
//!
//! ## Features
//!
//! - **State Machine** - Guard table over status, target and role, with working-hours
//!   and reopen-window rules
//! - **Ticket Numbers** - Store-owned atomic counter formatted as `INC000001`
//! - **Audit Trail** - Append-only per-ticket history, written off the critical path with retries
//! - **Optimistic Concurrency** - Compare-and-swap on a row version, fail fast under contention
//! - **GraphQL API** - Queries and mutations for the ticket lifecycle
//! - **Repository Pattern** - PostgreSQL data access layer plus in-memory backends
//!
//! ## Usage
//!
//! ### In a Service
//!
//! ```rust,no_run
//! use pleme_helpdesk::{HelpdeskConfig, TicketStateMachine, TicketQueries, TicketMutations};
//! use sqlx::PgPool;
//! use std::sync::Arc;
//!
//! # async fn example(db_pool: PgPool) -> pleme_helpdesk::Result<()> {
//! pleme_helpdesk::run_migrations(&db_pool).await?;
//!
//! let config = HelpdeskConfig::from_env();
//! let machine = Arc::new(TicketStateMachine::postgres(db_pool, &config)?);
//!
//! // Schema::build(TicketQueries, TicketMutations, EmptySubscription)
//! //     .data(machine)
//! //     .finish()
//! // The authenticated `Actor` goes into per-request data.
//! # Ok(())
//! # }
//! ```
//!
//! ### Transitions
//!
//! ```rust
//! use pleme_helpdesk::{Actor, ChangeStatusInput};
//! use uuid::Uuid;
//!
//! let technician = Actor::technician(Uuid::new_v4(), "Ana", "ana@pleme.io");
//! let input = ChangeStatusInput {
//!     ticket_id: Uuid::new_v4(),
//!     target_status: "IN_PROGRESS".to_string(),
//!     closure_reason: None,
//!     note: Some("on my way".to_string()),
//!     assignee_id: None,
//! };
//! ```

pub mod audit;
pub mod availability;
pub mod clock;
pub mod config;
pub mod graphql;
pub mod lifecycle;
pub mod memory;
pub mod models;
pub mod repository;
pub mod retry;
pub mod sequence;
pub mod transitions;

// Re-export commonly used types
pub use audit::{AuditDispatcher, AuditTrail};
pub use availability::{AvailabilityChecker, ScheduleSource, WorkingHours};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::HelpdeskConfig;
pub use graphql::{TicketMutations, TicketQueries};
pub use lifecycle::{Collaborators, TicketStateMachine};
pub use models::*;
pub use repository::{run_migrations, HelpdeskRepository, ServiceCatalog, TicketRepository};
pub use sequence::{SequenceGenerator, TicketNumberFormat, TicketNumbering};
pub use transitions::{
    plan_transition, BusinessRule, TransitionPlan, TransitionPolicy, TransitionRequest,
};

use thiserror::Error;
use uuid::Uuid;

/// Helpdesk errors
#[derive(Error, Debug)]
pub enum HelpdeskError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Ticket not found: {0}")]
    TicketNotFound(Uuid),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("A closure reason is required")]
    MissingReason,

    #[error("Services not found: {0}")]
    ServicesNotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Ticket {0} was modified concurrently")]
    ConcurrentModification(Uuid),

    #[error("Ticket {0} is already claimed")]
    AlreadyClaimed(Uuid),

    #[error("Ticket is {0}, a terminal state")]
    TerminalState(TicketStatus),

    #[error("Ticket is {0}, not CLOSED")]
    NotClosed(TicketStatus),

    #[error("Transition from {from} to {to} is not allowed")]
    InvalidTransition { from: TicketStatus, to: TicketStatus },

    #[error("{0}")]
    BusinessRule(BusinessRule),

    #[error("Dependency unavailable: {0}")]
    Dependency(#[source] anyhow::Error),

    #[error("Ticket {0} is busy, retry later")]
    Busy(Uuid),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification callers map onto their transport (HTTP status, GraphQL code).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    PermissionDenied,
    NotFound,
    Conflict,
    BusinessRuleViolation,
    DependencyFailure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::PermissionDenied => "PERMISSION_DENIED",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::BusinessRuleViolation => "BUSINESS_RULE_VIOLATION",
            ErrorKind::DependencyFailure => "DEPENDENCY_FAILURE",
        }
    }
}

impl HelpdeskError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HelpdeskError::Validation(_)
            | HelpdeskError::InvalidStatus(_)
            | HelpdeskError::MissingReason
            | HelpdeskError::ServicesNotFound(_) => ErrorKind::Validation,
            HelpdeskError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            HelpdeskError::TicketNotFound(_) => ErrorKind::NotFound,
            HelpdeskError::ConcurrentModification(_)
            | HelpdeskError::AlreadyClaimed(_)
            | HelpdeskError::TerminalState(_)
            | HelpdeskError::NotClosed(_)
            | HelpdeskError::InvalidTransition { .. } => ErrorKind::Conflict,
            HelpdeskError::BusinessRule(_) => ErrorKind::BusinessRuleViolation,
            HelpdeskError::Database(_)
            | HelpdeskError::Migration(_)
            | HelpdeskError::Dependency(_)
            | HelpdeskError::Busy(_)
            | HelpdeskError::Internal(_) => ErrorKind::DependencyFailure,
        }
    }

    /// Whether the same request may succeed if sent again after re-reading state.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HelpdeskError::Database(_)
                | HelpdeskError::Dependency(_)
                | HelpdeskError::Busy(_)
                | HelpdeskError::ConcurrentModification(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, HelpdeskError>;
