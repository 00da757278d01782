mod common;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use common::{closing, hm, status_change, Harness};
use pleme_helpdesk::memory::{InMemoryBackend, InMemoryTicketStore};
use pleme_helpdesk::{
    Actor, AuditKind, BusinessRule, CancelTicketInput, Collaborators, CreateTicketInput, ErrorKind,
    FixedClock, HelpdeskError, ReopenTicketInput, Ticket, TicketRepository, TicketStateMachine,
    TicketStatus, WorkingHours,
};
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

#[tokio::test]
async fn printer_jam_scenario() {
    let h = Harness::new().await;

    let ticket = h
        .machine
        .create_ticket(
            &h.requester,
            &CreateTicketInput {
                description: "Printer jam".to_string(),
                services: vec!["Support".to_string()],
            },
        )
        .await
        .unwrap();
    assert_eq!(ticket.status, TicketStatus::Open);
    let digits = ticket.number.strip_prefix("INC").unwrap();
    assert!(!digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()));

    let claimed = h
        .machine
        .change_status(&h.technician, &status_change(ticket.id, "IN_PROGRESS"))
        .await
        .unwrap();
    assert_eq!(claimed.status, TicketStatus::InProgress);
    assert_eq!(claimed.assignee_id, Some(h.technician.id));

    let closed = h
        .machine
        .change_status(&h.technician, &closing(ticket.id, "CLOSED", "Fixed"))
        .await
        .unwrap();
    assert_eq!(closed.status, TicketStatus::Closed);
    assert_eq!(closed.closed_at, Some(h.clock_now()));
    assert_eq!(closed.closure_reason.as_deref(), Some("Fixed"));

    h.clock.advance(Duration::minutes(10));
    let reopened = h
        .machine
        .reopen_ticket(
            &h.requester,
            &ReopenTicketInput {
                ticket_id: ticket.id,
                note: Some("jammed again".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(reopened.status, TicketStatus::Reopened);
    assert_eq!(reopened.closed_at, None);
    assert_eq!(reopened.closure_reason, None);

    let err = h
        .machine
        .cancel_ticket(
            &h.technician,
            &CancelTicketInput {
                ticket_id: ticket.id,
                reason: "giving up".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);

    h.machine.audit_dispatcher().flush().await;
    let history = h.machine.get_history(ticket.id).await.unwrap();
    let kinds: Vec<AuditKind> = history.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            AuditKind::Creation,
            AuditKind::StatusChange,
            AuditKind::StatusChange,
            AuditKind::Reopen
        ]
    );
    assert_eq!(history[3].note.as_deref(), Some("jammed again"));
    assert_eq!(history[3].author_email, "rita@example.com");
}

impl Harness {
    fn clock_now(&self) -> chrono::DateTime<Utc> {
        use pleme_helpdesk::Clock;
        self.clock.now()
    }

    async fn closed_ticket(&self) -> Ticket {
        let ticket = self.open_ticket("VPN down").await;
        self.machine
            .change_status(&self.technician, &status_change(ticket.id, "IN_PROGRESS"))
            .await
            .unwrap();
        self.machine
            .change_status(&self.technician, &closing(ticket.id, "CLOSED", "Restarted gateway"))
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn reopen_window_boundaries() {
    let h = Harness::new().await;

    let within = h.closed_ticket().await;
    let late = h.closed_ticket().await;
    let closed_at = within.closed_at.unwrap();

    h.clock.set(closed_at + Duration::hours(47) + Duration::minutes(59));
    let reopened = h
        .machine
        .reopen_ticket(&h.requester, &ReopenTicketInput { ticket_id: within.id, note: None })
        .await;
    assert_eq!(assert_ok!(reopened).status, TicketStatus::Reopened);

    h.clock.set(closed_at + Duration::hours(48) + Duration::minutes(1));
    let err = h
        .machine
        .reopen_ticket(&h.requester, &ReopenTicketInput { ticket_id: late.id, note: None })
        .await
        .unwrap_err();
    assert!(matches!(err, HelpdeskError::BusinessRule(BusinessRule::ReopenWindowExpired)));
    assert_eq!(h.machine.get_ticket(late.id).await.unwrap().status, TicketStatus::Closed);
}

#[tokio::test]
async fn unrepresentable_reopen_window_is_rejected_at_startup() {
    let backend = InMemoryBackend::new();
    let clock = Arc::new(FixedClock::new(common::office_hours()));
    let mut config = common::test_config();
    config.reopen_window_hours = i64::MAX;

    let err = TicketStateMachine::new(backend.collaborators(), clock, &config)
        .err()
        .unwrap();
    assert!(matches!(err, HelpdeskError::Validation(_)));
}

#[tokio::test]
async fn reopen_is_reserved_to_the_requester_of_a_closed_ticket() {
    let h = Harness::new().await;
    let closed = h.closed_ticket().await;
    let stranger = Actor::requester(Uuid::new_v4(), "Sam", "sam@example.com");

    let err = h
        .machine
        .reopen_ticket(&stranger, &ReopenTicketInput { ticket_id: closed.id, note: None })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);

    let open = h.open_ticket("Mouse broken").await;
    let err = h
        .machine
        .reopen_ticket(&h.requester, &ReopenTicketInput { ticket_id: open.id, note: None })
        .await
        .unwrap_err();
    assert!(matches!(err, HelpdeskError::NotClosed(TicketStatus::Open)));
}

#[tokio::test]
async fn out_of_hours_claim_is_rejected_for_technicians_but_not_admins() {
    let h = Harness::new().await;
    let ticket = h.open_ticket("Screen flickers").await;

    h.clock.set(Utc.with_ymd_and_hms(2025, 1, 6, 20, 30, 0).unwrap());

    let err = h
        .machine
        .change_status(&h.technician, &status_change(ticket.id, "IN_PROGRESS"))
        .await
        .unwrap_err();
    assert!(matches!(err, HelpdeskError::BusinessRule(BusinessRule::OutOfWorkingHours)));
    assert_eq!(err.kind(), ErrorKind::BusinessRuleViolation);
    assert_eq!(h.machine.get_ticket(ticket.id).await.unwrap().status, TicketStatus::Open);

    let mut by_admin = status_change(ticket.id, "IN_PROGRESS");
    by_admin.assignee_id = Some(h.technician.id);
    let claimed = h.machine.change_status(&h.admin, &by_admin).await.unwrap();
    assert_eq!(claimed.status, TicketStatus::InProgress);
    assert_eq!(claimed.assignee_id, Some(h.technician.id));
}

#[tokio::test]
async fn technician_without_schedule_cannot_claim() {
    let h = Harness::new().await;
    let ticket = h.open_ticket("Keyboard").await;
    let newcomer = Actor::technician(Uuid::new_v4(), "Nia", "nia@pleme.io");

    let err = h
        .machine
        .change_status(&newcomer, &status_change(ticket.id, "IN_PROGRESS"))
        .await
        .unwrap_err();
    assert!(matches!(err, HelpdeskError::BusinessRule(BusinessRule::OutOfWorkingHours)));
}

#[tokio::test]
async fn working_hours_are_read_at_configured_offset() {
    let mut config = common::test_config();
    config.utc_offset_minutes = -180;
    let h = Harness::with_config(config).await;
    let ticket = h.open_ticket("Slow laptop").await;

    // 11:00Z is 08:00 at UTC-3, before the 09:00 entry
    h.clock.set(Utc.with_ymd_and_hms(2025, 1, 6, 11, 0, 0).unwrap());
    let err = h
        .machine
        .change_status(&h.technician, &status_change(ticket.id, "IN_PROGRESS"))
        .await
        .unwrap_err();
    assert!(matches!(err, HelpdeskError::BusinessRule(BusinessRule::OutOfWorkingHours)));

    h.clock.set(Utc.with_ymd_and_hms(2025, 1, 6, 12, 0, 0).unwrap());
    assert_ok!(
        h.machine
            .change_status(&h.technician, &status_change(ticket.id, "IN_PROGRESS"))
            .await
    );
}

#[tokio::test]
async fn canceled_ticket_is_terminal() {
    let h = Harness::new().await;
    let ticket = h.open_ticket("Wrong department").await;

    let canceled = h
        .machine
        .cancel_ticket(
            &h.requester,
            &CancelTicketInput {
                ticket_id: ticket.id,
                reason: "opened by mistake".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(canceled.status, TicketStatus::Canceled);
    assert!(canceled.closed_at.is_some());
    assert_eq!(canceled.closure_reason.as_deref(), Some("opened by mistake"));

    for target in ["OPEN", "IN_PROGRESS", "CLOSED", "CANCELED", "REOPENED"] {
        for actor in [&h.requester, &h.technician, &h.admin] {
            let err = h
                .machine
                .change_status(actor, &closing(ticket.id, target, "retry"))
                .await
                .unwrap_err();
            assert!(matches!(err, HelpdeskError::TerminalState(TicketStatus::Canceled)));
            assert_eq!(err.kind(), ErrorKind::Conflict);
        }
    }

    let after = h.machine.get_ticket(ticket.id).await.unwrap();
    assert_eq!(after, canceled);
}

#[tokio::test]
async fn cancel_requires_reason_and_ownership() {
    let h = Harness::new().await;
    let ticket = h.open_ticket("Phone").await;
    let stranger = Actor::requester(Uuid::new_v4(), "Sam", "sam@example.com");

    let cancel = |reason: &str| CancelTicketInput {
        ticket_id: ticket.id,
        reason: reason.to_string(),
    };

    let err = h
        .machine
        .cancel_ticket(&h.requester, &cancel("  "))
        .await
        .unwrap_err();
    assert!(matches!(err, HelpdeskError::MissingReason));

    let err = h
        .machine
        .cancel_ticket(&stranger, &cancel("mine"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);

    assert_ok!(h.machine.cancel_ticket(&h.admin, &cancel("duplicate")).await);
}

#[tokio::test]
async fn cancel_of_closed_ticket_is_already_terminal() {
    let h = Harness::new().await;
    let closed = h.closed_ticket().await;

    let err = h
        .machine
        .cancel_ticket(
            &h.admin,
            &CancelTicketInput {
                ticket_id: closed.id,
                reason: "late".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, HelpdeskError::TerminalState(TicketStatus::Closed)));
}

#[tokio::test]
async fn closed_ticket_is_immutable_to_technicians() {
    let h = Harness::new().await;
    let closed = h.closed_ticket().await;

    let err = h
        .machine
        .change_status(&h.technician, &status_change(closed.id, "IN_PROGRESS"))
        .await
        .unwrap_err();
    assert!(matches!(err, HelpdeskError::BusinessRule(BusinessRule::ClosedTicketImmutable)));

    let err = h
        .machine
        .change_status(&h.technician, &closing(closed.id, "CLOSED", "better reason"))
        .await
        .unwrap_err();
    assert!(matches!(err, HelpdeskError::BusinessRule(BusinessRule::ClosedTicketImmutable)));
}

#[tokio::test]
async fn admin_can_reclose_with_new_reason() {
    let h = Harness::new().await;
    let closed = h.closed_ticket().await;
    h.clock.advance(Duration::hours(2));

    let reclosed = h
        .machine
        .change_status(&h.admin, &closing(closed.id, "CLOSED", "Replaced gateway hardware"))
        .await
        .unwrap();
    assert_eq!(reclosed.status, TicketStatus::Closed);
    assert_eq!(reclosed.closure_reason.as_deref(), Some("Replaced gateway hardware"));
    assert_eq!(reclosed.closed_at, closed.closed_at);
    assert_eq!(reclosed.version, closed.version + 1);
}

#[tokio::test]
async fn admin_closes_ticket_that_was_never_claimed() {
    let h = Harness::new().await;
    let ticket = h.open_ticket("Spam").await;

    let closed = h
        .machine
        .change_status(&h.admin, &closing(ticket.id, "CLOSED", "not an incident"))
        .await
        .unwrap();
    assert_eq!(closed.status, TicketStatus::Closed);
    assert_eq!(closed.assignee_id, None);
    assert!(closed.closure_is_consistent());
}

#[tokio::test]
async fn closing_without_reason_is_a_validation_error() {
    let h = Harness::new().await;
    let ticket = h.open_ticket("Cable").await;

    let err = h
        .machine
        .change_status(&h.technician, &status_change(ticket.id, "CLOSED"))
        .await
        .unwrap_err();
    assert!(matches!(err, HelpdeskError::MissingReason));
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn unknown_status_is_rejected_before_lookup() {
    let h = Harness::new().await;

    let err = h
        .machine
        .change_status(&h.admin, &status_change(Uuid::new_v4(), "RESOLVED"))
        .await
        .unwrap_err();
    assert!(matches!(err, HelpdeskError::InvalidStatus(ref s) if s == "RESOLVED"));
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn missing_ticket_is_not_found() {
    let h = Harness::new().await;
    let err = h
        .machine
        .change_status(&h.admin, &status_change(Uuid::new_v4(), "IN_PROGRESS"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_err!(h.machine.get_history(Uuid::new_v4()).await);
}

#[tokio::test]
async fn creation_validates_before_consuming_a_number() {
    let h = Harness::new().await;

    let err = h
        .machine
        .create_ticket(
            &h.requester,
            &CreateTicketInput {
                description: "   ".to_string(),
                services: vec!["Support".to_string()],
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, HelpdeskError::Validation(_)));

    let err = h
        .machine
        .create_ticket(
            &h.requester,
            &CreateTicketInput {
                description: "Printer jam".to_string(),
                services: vec!["Catering".to_string()],
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, HelpdeskError::ServicesNotFound(_)));
    assert_eq!(h.backend.sequence.current(), 0);

    let ticket = h.open_ticket("Printer jam").await;
    assert_eq!(ticket.number, "INC000001");
}

#[tokio::test]
async fn services_resolve_by_id_or_name() {
    let h = Harness::new().await;
    let vpn = h.backend.services.add("VPN").await;

    let ticket = h
        .machine
        .create_ticket(
            &h.requester,
            &CreateTicketInput {
                description: "Cannot connect".to_string(),
                services: vec![vpn.id.to_string(), "Network".to_string(), "Unknown".to_string()],
            },
        )
        .await
        .unwrap();
    assert_eq!(ticket.related_services.len(), 2);
    assert!(ticket.related_services.contains(&vpn.id));
}

#[tokio::test]
async fn unavailable_sequence_aborts_creation() {
    let h = Harness::new().await;
    h.backend.sequence.set_unavailable(true);

    let err = h
        .machine
        .create_ticket(
            &h.requester,
            &CreateTicketInput {
                description: "Printer jam".to_string(),
                services: vec!["Support".to_string()],
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DependencyFailure);
    assert!(err.is_retryable());
    assert!(h.backend.tickets.is_empty().await);
    h.machine.audit_dispatcher().flush().await;
    assert!(h.backend.audit.is_empty().await);
}

#[tokio::test]
async fn slow_store_fails_fast_as_busy() {
    let mut config = common::test_config();
    config.transition_timeout_ms = 50;
    let h = Harness::with_config(config).await;
    let ticket = h.open_ticket("Slow store").await;

    h.backend
        .tickets
        .set_read_latency(Some(std::time::Duration::from_millis(500)))
        .await;
    let err = h
        .machine
        .change_status(&h.technician, &status_change(ticket.id, "IN_PROGRESS"))
        .await
        .unwrap_err();
    assert!(matches!(err, HelpdeskError::Busy(id) if id == ticket.id));
    assert!(err.is_retryable());

    h.backend.tickets.set_read_latency(None).await;
    let untouched = h.machine.get_ticket(ticket.id).await.unwrap();
    assert_eq!(untouched.status, TicketStatus::Open);
    assert_eq!(untouched.version, ticket.version);
}

/// Commits the write, then stalls before answering.
struct SlowAcknowledgement {
    inner: Arc<InMemoryTicketStore>,
    stall: std::time::Duration,
}

#[async_trait]
impl TicketRepository for SlowAcknowledgement {
    async fn insert(&self, ticket: &Ticket) -> pleme_helpdesk::Result<Ticket> {
        self.inner.insert(ticket).await
    }

    async fn find_by_id(&self, ticket_id: Uuid) -> pleme_helpdesk::Result<Ticket> {
        self.inner.find_by_id(ticket_id).await
    }

    async fn compare_and_swap(
        &self,
        ticket: &Ticket,
        expected_version: i64,
    ) -> pleme_helpdesk::Result<Ticket> {
        let saved = self.inner.compare_and_swap(ticket, expected_version).await?;
        tokio::time::sleep(self.stall).await;
        Ok(saved)
    }

    async fn delete(&self, ticket_id: Uuid) -> pleme_helpdesk::Result<()> {
        self.inner.delete(ticket_id).await
    }
}

#[tokio::test]
async fn slow_write_acknowledgement_is_not_reported_as_failure() {
    let mut config = common::test_config();
    config.transition_timeout_ms = 100;
    let h = Harness::with_collaborators(config, |backend| Collaborators {
        tickets: Arc::new(SlowAcknowledgement {
            inner: backend.tickets.clone(),
            stall: std::time::Duration::from_millis(300),
        }),
        ..backend.collaborators()
    })
    .await;
    let ticket = h.open_ticket("Slow commit").await;

    let claimed = h
        .machine
        .change_status(&h.admin, &status_change(ticket.id, "IN_PROGRESS"))
        .await;
    let claimed = assert_ok!(claimed);
    assert_eq!(claimed.status, TicketStatus::InProgress);

    h.machine.audit_dispatcher().flush().await;
    let history = h.machine.get_history(ticket.id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].to_status, Some(TicketStatus::InProgress));
    assert!(h.machine.audit_dispatcher().dead_letters().is_empty());
}

#[tokio::test]
async fn transition_is_never_stamped_before_the_state_it_follows() {
    let h = Harness::new().await;
    let ticket = h.open_ticket("Clock skew").await;

    h.clock.advance(Duration::minutes(5));
    let claimed = h
        .machine
        .change_status(&h.technician, &status_change(ticket.id, "IN_PROGRESS"))
        .await
        .unwrap();

    // a request whose clock reading lags behind the committed claim
    h.clock.advance(Duration::minutes(-5));
    let closed = h
        .machine
        .change_status(&h.technician, &closing(ticket.id, "CLOSED", "Fixed"))
        .await
        .unwrap();
    assert_eq!(closed.updated_at, claimed.updated_at);
    assert_eq!(closed.closed_at, Some(claimed.updated_at));

    h.machine.audit_dispatcher().flush().await;
    let history = h.machine.get_history(ticket.id).await.unwrap();
    let targets: Vec<_> = history.iter().map(|e| e.to_status).collect();
    assert_eq!(
        targets,
        vec![
            Some(TicketStatus::Open),
            Some(TicketStatus::InProgress),
            Some(TicketStatus::Closed)
        ]
    );
}

#[tokio::test]
async fn reclaim_after_reopen_switches_assignee() {
    let h = Harness::new().await;
    let closed = h.closed_ticket().await;
    h.machine
        .reopen_ticket(&h.requester, &ReopenTicketInput { ticket_id: closed.id, note: None })
        .await
        .unwrap();

    let other = h.technician_on_shift("Olga").await;
    let claimed = h
        .machine
        .change_status(&other, &status_change(closed.id, "IN_PROGRESS"))
        .await
        .unwrap();
    assert_eq!(claimed.assignee_id, Some(other.id));
}

#[tokio::test]
async fn night_shift_window_is_honoured() {
    let h = Harness::new().await;
    let ticket = h.open_ticket("Server room alarm").await;
    let night = Actor::technician(Uuid::new_v4(), "Nico", "nico@pleme.io");
    h.backend
        .schedules
        .set(night.id, WorkingHours::new(hm(0, 0), hm(6, 0)).unwrap())
        .await;

    assert_err!(
        h.machine
            .change_status(&night, &status_change(ticket.id, "IN_PROGRESS"))
            .await
    );

    h.clock.set(Utc.with_ymd_and_hms(2025, 1, 7, 3, 0, 0).unwrap());
    assert_ok!(
        h.machine
            .change_status(&night, &status_change(ticket.id, "IN_PROGRESS"))
            .await
    );
}

#[tokio::test]
async fn hard_delete_removes_ticket_and_history() {
    let h = Harness::new().await;
    let ticket = h.open_ticket("Obsolete").await;
    h.machine
        .change_status(&h.technician, &status_change(ticket.id, "IN_PROGRESS"))
        .await
        .unwrap();

    let err = h.machine.hard_delete(&h.technician, ticket.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);

    h.machine.hard_delete(&h.admin, ticket.id).await.unwrap();
    assert_eq!(h.machine.get_ticket(ticket.id).await.unwrap_err().kind(), ErrorKind::NotFound);
    assert!(h.backend.audit.is_empty().await);

    let err = h.machine.hard_delete(&h.admin, ticket.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
