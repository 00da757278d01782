//! Technician working-hours windows.
//!
//! The comparison is a pure function of a [`WorkingHours`] window and an
//! instant; [`AvailabilityChecker`] only adds the schedule lookup around it.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::{HelpdeskError, Result};

/// A same-day window of entry and exit time, inclusive at both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingHours {
    entry: NaiveTime,
    exit: NaiveTime,
}

impl WorkingHours {
    /// Rejects windows whose exit is earlier than entry.
    pub fn new(entry: NaiveTime, exit: NaiveTime) -> Result<Self> {
        if exit < entry {
            return Err(HelpdeskError::Validation(format!(
                "exit time {exit} is earlier than entry time {entry}"
            )));
        }
        Ok(Self { entry, exit })
    }

    pub fn contains(&self, time_of_day: NaiveTime) -> bool {
        self.entry <= time_of_day && time_of_day <= self.exit
    }
}

/// Whether the wall-clock time of `instant`, read at `offset`, falls inside `window`.
pub fn is_within_working_hours(
    window: &WorkingHours,
    instant: DateTime<Utc>,
    offset: FixedOffset,
) -> bool {
    window.contains(instant.with_timezone(&offset).time())
}

/// Technician schedule records, owned by the technician CRUD.
#[async_trait]
pub trait ScheduleSource: Send + Sync {
    /// `None` when the technician has no schedule configured.
    async fn working_hours(&self, technician_id: Uuid) -> anyhow::Result<Option<WorkingHours>>;
}

#[derive(Clone)]
pub struct AvailabilityChecker {
    schedules: Arc<dyn ScheduleSource>,
    offset: FixedOffset,
}

impl AvailabilityChecker {
    pub fn new(schedules: Arc<dyn ScheduleSource>, offset: FixedOffset) -> Self {
        Self { schedules, offset }
    }

    /// A technician without a configured schedule is never available.
    pub async fn is_within_working_hours(
        &self,
        technician_id: Uuid,
        instant: DateTime<Utc>,
    ) -> Result<bool> {
        let window = self
            .schedules
            .working_hours(technician_id)
            .await
            .map_err(HelpdeskError::Dependency)?;

        match window {
            Some(window) => Ok(is_within_working_hours(&window, instant, self.offset)),
            None => {
                tracing::warn!(%technician_id, "technician has no working hours configured");
                Ok(false)
            }
        }
    }
}
