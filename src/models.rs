use async_graphql::{Enum, InputObject, SimpleObject};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::HelpdeskError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, SimpleObject)]
pub struct Ticket {
    pub id: Uuid,
    pub number: String,
    pub description: String,
    pub status: TicketStatus,
    pub requester_id: Uuid,
    pub assignee_id: Option<Uuid>,
    pub related_services: Vec<Uuid>,
    pub closure_reason: Option<String>,
    pub closed_at: Option<DateTime<Utc>>,
    /// Compare-and-swap token, bumped by every write.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    /// A fresh OPEN ticket at version 1.
    pub fn open(
        number: String,
        description: String,
        requester_id: Uuid,
        related_services: Vec<Uuid>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            number,
            description,
            status: TicketStatus::Open,
            requester_id,
            assignee_id: None,
            related_services,
            closure_reason: None,
            closed_at: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// `closed_at` is set exactly when the status is CLOSED or CANCELED.
    pub fn closure_is_consistent(&self) -> bool {
        self.closed_at.is_some() == self.status.is_closed()
    }
}

#[derive(Debug, Clone, Copy, Enum, Eq, PartialEq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "ticket_status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Open,
    InProgress,
    Closed,
    Canceled,
    Reopened,
}

impl TicketStatus {
    pub const ALL: [TicketStatus; 5] = [
        TicketStatus::Open,
        TicketStatus::InProgress,
        TicketStatus::Closed,
        TicketStatus::Canceled,
        TicketStatus::Reopened,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Open => "OPEN",
            TicketStatus::InProgress => "IN_PROGRESS",
            TicketStatus::Closed => "CLOSED",
            TicketStatus::Canceled => "CANCELED",
            TicketStatus::Reopened => "REOPENED",
        }
    }

    /// Statuses that carry a `closed_at` timestamp and a closure reason.
    pub fn is_closed(&self) -> bool {
        matches!(self, TicketStatus::Closed | TicketStatus::Canceled)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TicketStatus::Canceled)
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = HelpdeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        TicketStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| HelpdeskError::InvalidStatus(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorRole {
    Requester,
    Technician,
    Admin,
}

/// The authenticated caller, as resolved by the host service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Uuid,
    pub role: ActorRole,
    pub name: String,
    pub email: String,
}

impl Actor {
    pub fn new(
        id: Uuid,
        role: ActorRole,
        name: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            id,
            role,
            name: name.into(),
            email: email.into(),
        }
    }

    pub fn requester(id: Uuid, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self::new(id, ActorRole::Requester, name, email)
    }

    pub fn technician(id: Uuid, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self::new(id, ActorRole::Technician, name, email)
    }

    pub fn admin(id: Uuid, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self::new(id, ActorRole::Admin, name, email)
    }

    pub fn is_admin(&self) -> bool {
        self.role == ActorRole::Admin
    }
}

#[derive(Debug, Clone, Copy, Enum, Eq, PartialEq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "audit_kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditKind {
    Creation,
    StatusChange,
    Reopen,
    Cancel,
}

/// One immutable lifecycle event. Never updated once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, SimpleObject)]
pub struct AuditEntry {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub kind: AuditKind,
    pub from_status: Option<TicketStatus>,
    pub to_status: Option<TicketStatus>,
    pub note: Option<String>,
    pub author_id: Uuid,
    pub author_name: String,
    pub author_email: String,
    pub occurred_at: DateTime<Utc>,
}

/// A resolved reference to a service from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, SimpleObject)]
pub struct ServiceRef {
    pub id: Uuid,
    pub name: String,
}

// Input types
#[derive(Debug, Clone, Default, InputObject)]
pub struct CreateTicketInput {
    pub description: String,
    /// Service ids or names.
    pub services: Vec<String>,
}

#[derive(Debug, Clone, InputObject)]
pub struct ChangeStatusInput {
    pub ticket_id: Uuid,
    pub target_status: String,
    pub closure_reason: Option<String>,
    pub note: Option<String>,
    /// Only admins may assign someone other than themselves.
    pub assignee_id: Option<Uuid>,
}

#[derive(Debug, Clone, InputObject)]
pub struct ReopenTicketInput {
    pub ticket_id: Uuid,
    pub note: Option<String>,
}

#[derive(Debug, Clone, InputObject)]
pub struct CancelTicketInput {
    pub ticket_id: Uuid,
    pub reason: String,
}
