//! Scheduled action domain model.
//!
//! A scheduled action is a rule that materializes background tasks on a
//! cron, interval, one-shot, or event-driven schedule. Each dispatch is
//! recorded as a run row linking back to the spawned task.

use std::str::FromStr;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::error::ScheduleError;

/// Enforced floor for interval schedules.
pub const MIN_INTERVAL_SECONDS: u64 = 60;

/// Base delay for failure retries.
pub const RETRY_BACKOFF_BASE_SECONDS: u64 = 60;

/// Ceiling for failure retry backoff.
pub const RETRY_BACKOFF_CAP_SECONDS: u64 = 3600;

/// When and how an action fires. Exactly one specifier exists by
/// construction of the sum type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleSpec {
    /// Fire on a 5-field cron expression (min hour dom month dow).
    Cron { expression: String },
    /// Fire at a fixed interval.
    Interval { interval_seconds: u64 },
    /// Fire once at a specific time.
    Once { fire_at: DateTime<Utc> },
    /// Fire whenever a matching event is published.
    Event { event_name: String },
}

impl ScheduleSpec {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cron { .. } => "cron",
            Self::Interval { .. } => "interval",
            Self::Once { .. } => "once",
            Self::Event { .. } => "event",
        }
    }

    /// Validate the specifier at creation time.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), ScheduleError> {
        match self {
            Self::Cron { expression } => {
                cron::Schedule::from_str(expression)
                    .map_err(|_| ScheduleError::InvalidCron(expression.clone()))?;
                Ok(())
            }
            Self::Interval { interval_seconds } => {
                if *interval_seconds < MIN_INTERVAL_SECONDS {
                    return Err(ScheduleError::IntervalTooShort(*interval_seconds));
                }
                Ok(())
            }
            Self::Once { fire_at } => {
                if *fire_at <= now {
                    return Err(ScheduleError::FireTimeInPast(fire_at.to_rfc3339()));
                }
                Ok(())
            }
            Self::Event { .. } => Ok(()),
        }
    }
}

/// Status of a scheduled action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Active,
    Paused,
    Disabled,
    Expired,
}

impl Default for ScheduleStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Disabled => "disabled",
            Self::Expired => "expired",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "disabled" => Some(Self::Disabled),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

/// Who initiated a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggeredBy {
    Scheduler,
    Manual,
    Event,
}

impl TriggeredBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduler => "scheduler",
            Self::Manual => "manual",
            Self::Event => "event",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "scheduler" => Some(Self::Scheduler),
            "manual" => Some(Self::Manual),
            "event" => Some(Self::Event),
            _ => None,
        }
    }
}

/// A rule that produces background tasks on a schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledAction {
    pub id: Uuid,
    pub agent_id: Uuid,
    /// Human-readable name, unique per deployment.
    pub name: String,
    /// Goal text copied into every spawned task.
    pub goal: String,
    pub spec: ScheduleSpec,
    pub status: ScheduleStatus,

    // -- Windowing --
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub max_executions: Option<u64>,
    pub execution_count: u64,

    // -- Failure handling --
    pub retry_on_failure: bool,
    pub max_retries: u32,
    /// Consecutive failure retries consumed; reset on success. Separate
    /// from execution_count.
    pub retry_count: u32,

    /// When false, a dispatch is skipped while a prior run is non-terminal.
    pub allow_concurrent: bool,

    // -- Task template bounds --
    pub task_max_steps: Option<u32>,
    pub task_timeout_seconds: Option<u64>,

    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub tags: Vec<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledAction {
    /// Create and validate a new action. `next_run_at` is seeded from the
    /// spec so the first tick can pick it up.
    pub fn new(
        agent_id: Uuid,
        name: impl Into<String>,
        goal: impl Into<String>,
        spec: ScheduleSpec,
    ) -> Result<Self, ScheduleError> {
        let now = Utc::now();
        spec.validate(now)?;
        let next_run_at = Self::first_fire(&spec, now);
        Ok(Self {
            id: Uuid::new_v4(),
            agent_id,
            name: name.into(),
            goal: goal.into(),
            spec,
            status: ScheduleStatus::Active,
            start_date: None,
            end_date: None,
            max_executions: None,
            execution_count: 0,
            retry_on_failure: false,
            max_retries: 3,
            retry_count: 0,
            allow_concurrent: false,
            task_max_steps: None,
            task_timeout_seconds: None,
            last_run_at: None,
            next_run_at,
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn with_window(
        mut self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Self {
        self.start_date = start;
        self.end_date = end;
        self
    }

    pub fn with_max_executions(mut self, max: u64) -> Self {
        self.max_executions = Some(max);
        self
    }

    pub fn with_retry(mut self, retry: bool, max_retries: u32) -> Self {
        self.retry_on_failure = retry;
        self.max_retries = max_retries;
        self
    }

    pub fn with_concurrency(mut self, allow: bool) -> Self {
        self.allow_concurrent = allow;
        self
    }

    pub fn with_task_bounds(mut self, max_steps: u32, timeout_seconds: u64) -> Self {
        self.task_max_steps = Some(max_steps);
        self.task_timeout_seconds = Some(timeout_seconds);
        self
    }

    fn first_fire(spec: &ScheduleSpec, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match spec {
            ScheduleSpec::Cron { expression } => cron::Schedule::from_str(expression)
                .ok()
                .and_then(|s| s.after(&now).next()),
            ScheduleSpec::Interval { interval_seconds } => {
                Some(now + ChronoDuration::seconds(*interval_seconds as i64))
            }
            ScheduleSpec::Once { fire_at } => Some(*fire_at),
            ScheduleSpec::Event { .. } => None,
        }
    }

    /// Recompute the next fire time after a dispatch. `Once` and `Event`
    /// yield None (the former expires, the latter is event-driven).
    pub fn next_fire_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let reference = match self.last_run_at {
            Some(last) if last > now => last,
            _ => now,
        };
        match &self.spec {
            ScheduleSpec::Cron { expression } => cron::Schedule::from_str(expression)
                .ok()
                .and_then(|s| s.after(&reference).next()),
            ScheduleSpec::Interval { interval_seconds } => {
                Some(reference + ChronoDuration::seconds(*interval_seconds as i64))
            }
            ScheduleSpec::Once { .. } | ScheduleSpec::Event { .. } => None,
        }
    }

    /// Backoff delay for the given retry attempt: base 60s doubling per
    /// attempt, capped at one hour.
    pub fn retry_delay_seconds(attempt: u32) -> u64 {
        let shift = attempt.min(6); // 60 << 6 already exceeds the cap
        (RETRY_BACKOFF_BASE_SECONDS << shift).min(RETRY_BACKOFF_CAP_SECONDS)
    }

    /// Whether the action is exhausted by count or calendar at `now`.
    pub fn is_exhausted(&self, now: DateTime<Utc>) -> bool {
        if let Some(end) = self.end_date {
            if now > end {
                return true;
            }
        }
        if let Some(max) = self.max_executions {
            if self.execution_count >= max {
                return true;
            }
        }
        false
    }

    /// Whether `now` falls before the start window.
    pub fn before_window(&self, now: DateTime<Utc>) -> bool {
        self.start_date.is_some_and(|start| now < start)
    }

    /// The event name this action listens on, when event-triggered.
    pub fn event_trigger(&self) -> Option<&str> {
        match &self.spec {
            ScheduleSpec::Event { event_name } => Some(event_name),
            _ => None,
        }
    }
}

/// History row for one dispatch of a scheduled action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledRun {
    pub id: Uuid,
    pub action_id: Uuid,
    /// Monotonic per action.
    pub run_number: u64,
    pub task_id: Uuid,
    pub triggered_at: DateTime<Utc>,
    pub triggered_by: TriggeredBy,
    /// Mirror of the spawned task's terminal status; None while in flight.
    pub terminal_status: Option<String>,
    pub duration_ms: Option<u64>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ScheduledRun {
    pub fn new(action_id: Uuid, run_number: u64, task_id: Uuid, triggered_by: TriggeredBy) -> Self {
        Self {
            id: Uuid::new_v4(),
            action_id,
            run_number,
            task_id,
            triggered_at: Utc::now(),
            triggered_by,
            terminal_status: None,
            duration_ms: None,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal_status.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interval_spec(secs: u64) -> ScheduleSpec {
        ScheduleSpec::Interval {
            interval_seconds: secs,
        }
    }

    #[test]
    fn test_interval_floor_enforced() {
        let err = ScheduledAction::new(Uuid::new_v4(), "fast", "g", interval_spec(59));
        assert_eq!(err.unwrap_err(), ScheduleError::IntervalTooShort(59));

        assert!(ScheduledAction::new(Uuid::new_v4(), "ok", "g", interval_spec(60)).is_ok());
    }

    #[test]
    fn test_bad_cron_rejected() {
        let spec = ScheduleSpec::Cron {
            expression: "not a cron".into(),
        };
        let err = ScheduledAction::new(Uuid::new_v4(), "cron", "g", spec);
        assert!(matches!(err, Err(ScheduleError::InvalidCron(_))));
    }

    #[test]
    fn test_once_in_past_rejected() {
        let spec = ScheduleSpec::Once {
            fire_at: Utc::now() - ChronoDuration::hours(1),
        };
        let err = ScheduledAction::new(Uuid::new_v4(), "late", "g", spec);
        assert!(matches!(err, Err(ScheduleError::FireTimeInPast(_))));
    }

    #[test]
    fn test_interval_next_fire() {
        let action =
            ScheduledAction::new(Uuid::new_v4(), "every-minute", "g", interval_spec(60)).unwrap();
        let now = Utc::now();
        let next = action.next_fire_after(now).unwrap();
        assert_eq!((next - now).num_seconds(), 60);
    }

    #[test]
    fn test_once_and_event_have_no_next_fire() {
        let mut action = ScheduledAction::new(
            Uuid::new_v4(),
            "once",
            "g",
            ScheduleSpec::Once {
                fire_at: Utc::now() + ChronoDuration::hours(1),
            },
        )
        .unwrap();
        assert!(action.next_run_at.is_some());
        assert!(action.next_fire_after(Utc::now()).is_none());

        action.spec = ScheduleSpec::Event {
            event_name: "memory.created".into(),
        };
        assert!(action.next_fire_after(Utc::now()).is_none());
    }

    #[test]
    fn test_retry_backoff_doubles_and_caps() {
        assert_eq!(ScheduledAction::retry_delay_seconds(0), 60);
        assert_eq!(ScheduledAction::retry_delay_seconds(1), 120);
        assert_eq!(ScheduledAction::retry_delay_seconds(2), 240);
        assert_eq!(ScheduledAction::retry_delay_seconds(5), 1920);
        assert_eq!(ScheduledAction::retry_delay_seconds(6), 3600);
        assert_eq!(ScheduledAction::retry_delay_seconds(30), 3600);
    }

    #[test]
    fn test_exhaustion_by_count_and_calendar() {
        let now = Utc::now();
        let mut action =
            ScheduledAction::new(Uuid::new_v4(), "counted", "g", interval_spec(60))
                .unwrap()
                .with_max_executions(2);
        assert!(!action.is_exhausted(now));
        action.execution_count = 2;
        assert!(action.is_exhausted(now));

        let action = ScheduledAction::new(Uuid::new_v4(), "dated", "g", interval_spec(60))
            .unwrap()
            .with_window(None, Some(now - ChronoDuration::minutes(1)));
        assert!(action.is_exhausted(now));
    }

    #[test]
    fn test_event_trigger_name() {
        let action = ScheduledAction::new(
            Uuid::new_v4(),
            "on-memory",
            "g",
            ScheduleSpec::Event {
                event_name: "memory.created".into(),
            },
        )
        .unwrap();
        assert_eq!(action.event_trigger(), Some("memory.created"));
        assert!(action.next_run_at.is_none());
    }
}
