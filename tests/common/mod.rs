#![allow(dead_code)]

use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use pleme_helpdesk::memory::InMemoryBackend;
use pleme_helpdesk::{
    Actor, ChangeStatusInput, Collaborators, CreateTicketInput, FixedClock, HelpdeskConfig, Ticket,
    TicketStateMachine, WorkingHours,
};
use std::sync::Arc;
use uuid::Uuid;

pub struct Harness {
    pub machine: Arc<TicketStateMachine>,
    pub backend: InMemoryBackend,
    pub clock: Arc<FixedClock>,
    pub requester: Actor,
    pub technician: Actor,
    pub admin: Actor,
}

/// Monday 2025-01-06 10:00 UTC, inside the default 09:00-17:00 window.
pub fn office_hours() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 6, 10, 0, 0).unwrap()
}

pub fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn test_config() -> HelpdeskConfig {
    let mut config = HelpdeskConfig::default();
    config.audit.initial_delay_ms = 1;
    config.audit.max_delay_ms = 5;
    config.audit.max_retries = 3;
    config
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: HelpdeskConfig) -> Self {
        Self::with_collaborators(config, InMemoryBackend::collaborators).await
    }

    /// Lets a test swap one of the in-memory stores for a wrapper.
    pub async fn with_collaborators(
        config: HelpdeskConfig,
        collaborators: impl FnOnce(&InMemoryBackend) -> Collaborators,
    ) -> Self {
        init_tracing();
        let backend = InMemoryBackend::new();
        let clock = Arc::new(FixedClock::new(office_hours()));
        let machine =
            TicketStateMachine::new(collaborators(&backend), clock.clone(), &config).unwrap();

        let technician = Actor::technician(Uuid::new_v4(), "Tomas Tech", "tomas@pleme.io");
        backend
            .schedules
            .set(technician.id, WorkingHours::new(hm(9, 0), hm(17, 0)).unwrap())
            .await;
        backend.services.add("Support").await;
        backend.services.add("Network").await;

        Self {
            machine: Arc::new(machine),
            backend,
            clock,
            requester: Actor::requester(Uuid::new_v4(), "Rita Requester", "rita@example.com"),
            technician,
            admin: Actor::admin(Uuid::new_v4(), "Ada Admin", "ada@pleme.io"),
        }
    }

    pub async fn open_ticket(&self, description: &str) -> Ticket {
        self.machine
            .create_ticket(
                &self.requester,
                &CreateTicketInput {
                    description: description.to_string(),
                    services: vec!["Support".to_string()],
                },
            )
            .await
            .unwrap()
    }

    pub async fn technician_on_shift(&self, name: &str) -> Actor {
        let email = format!("{}@pleme.io", name.to_lowercase());
        let technician = Actor::technician(Uuid::new_v4(), name, email);
        self.backend
            .schedules
            .set(technician.id, WorkingHours::new(hm(9, 0), hm(17, 0)).unwrap())
            .await;
        technician
    }
}

pub fn status_change(ticket_id: Uuid, target: &str) -> ChangeStatusInput {
    ChangeStatusInput {
        ticket_id,
        target_status: target.to_string(),
        closure_reason: None,
        note: None,
        assignee_id: None,
    }
}

pub fn closing(ticket_id: Uuid, target: &str, reason: &str) -> ChangeStatusInput {
    ChangeStatusInput {
        closure_reason: Some(reason.to_string()),
        ..status_change(ticket_id, target)
    }
}
