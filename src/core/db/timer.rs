//! The per-user active timer.
//!
//! A user has at most one timer row. It moves between three states:
//!
//! ```text
//!   Idle --select--> Selected --start--> Running
//!                       ^                   |
//!                       +-------stop--------+
//! ```
//!
//! `stop` turns the running interval into an [`Accrual`] which the store adds
//! to the project total and, when a program was selected, to the
//! project/program split. Archiving the selected project forces the timer back
//! to `Idle` from any state.
//!
//! The transition checks live here as pure functions over [`ActiveTimer`]; the
//! store applies their result with a compare-and-swap on [`ActiveTimer::version`].

use std::future::Future;

use time::{Duration, OffsetDateTime};

use crate::core::{Error, Result, db::user::User};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveTimer {
    pub user_id: i64,
    pub project_id: Option<i64>,
    pub current_program_id: Option<i64>,
    pub in_work: bool,
    pub last_started_at: Option<OffsetDateTime>,
    /// Bumped on every write; used to detect concurrent modification.
    pub version: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Idle,
    Selected {
        project_id: i64,
    },
    Running {
        project_id: i64,
        program_id: Option<i64>,
        started_at: OffsetDateTime,
    },
}

/// Elapsed time to credit after a successful stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accrual {
    pub project_id: i64,
    pub program_id: Option<i64>,
    pub elapsed: Duration,
}

/// Snapshot returned by [`TimerRepository::get_timer_status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerStatus {
    pub state: TimerState,
    /// Time accrued so far by the running interval; zero unless running.
    pub running_for: Duration,
}

impl ActiveTimer {
    /// The timer of a user who has never selected a project.
    pub fn idle(user_id: i64) -> Self {
        Self {
            user_id,
            project_id: None,
            current_program_id: None,
            in_work: false,
            last_started_at: None,
            version: 0,
        }
    }

    pub fn state(&self) -> TimerState {
        match (self.project_id, self.in_work, self.last_started_at) {
            (None, _, _) => TimerState::Idle,
            (Some(project_id), true, Some(started_at)) => TimerState::Running {
                project_id,
                program_id: self.current_program_id,
                started_at,
            },
            (Some(project_id), _, _) => TimerState::Selected { project_id },
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state(), TimerState::Running { .. })
    }

    /// A different project may only be selected while the timer is not running;
    /// otherwise the running interval would be credited to the new project.
    pub fn check_select(&self) -> Result<()> {
        match self.state() {
            TimerState::Running { .. } => Err(Error::invalid_state(
                "timer is running; stop it before selecting another project",
            )),
            TimerState::Idle | TimerState::Selected { .. } => Ok(()),
        }
    }

    /// Returns the project the timer would start on.
    pub fn check_start(&self) -> Result<i64> {
        match self.state() {
            TimerState::Idle => Err(Error::invalid_state("no active project")),
            TimerState::Running { .. } => Err(Error::invalid_state("project is already started")),
            TimerState::Selected { project_id } => Ok(project_id),
        }
    }

    pub fn plan_stop(&self, now: OffsetDateTime) -> Result<Accrual> {
        match self.state() {
            TimerState::Idle => Err(Error::invalid_state("no active project")),
            TimerState::Selected { .. } => Err(Error::invalid_state("project is already stopped")),
            TimerState::Running {
                project_id,
                program_id,
                started_at,
            } => Ok(Accrual {
                project_id,
                program_id,
                elapsed: elapsed_between(started_at, now),
            }),
        }
    }

    pub fn status(&self, now: OffsetDateTime) -> TimerStatus {
        let state = self.state();
        let running_for = match state {
            TimerState::Running { started_at, .. } => elapsed_between(started_at, now),
            TimerState::Idle | TimerState::Selected { .. } => Duration::ZERO,
        };
        TimerStatus { state, running_for }
    }
}

/// `now - started_at`, clamped at zero when the clock went backwards.
pub fn elapsed_between(started_at: OffsetDateTime, now: OffsetDateTime) -> Duration {
    (now - started_at).max(Duration::ZERO)
}

pub trait TimerRepository {
    fn get_timer(&self, user: &User) -> impl Future<Output = Result<ActiveTimer>>;
    fn get_timer_status(&self, user: &User) -> impl Future<Output = Result<TimerStatus>>;
    fn select_project(&self, user: &User, project_id: i64) -> impl Future<Output = Result<ActiveTimer>>;
    fn start_timer(
        &self,
        user: &User,
        program_id: Option<i64>,
    ) -> impl Future<Output = Result<ActiveTimer>>;
    fn stop_timer(&self, user: &User) -> impl Future<Output = Result<Accrual>>;
}

#[cfg(test)]
mod tests {
    use time::{Duration, macros::datetime};

    use super::{ActiveTimer, TimerState, elapsed_between};

    fn running(started_at: time::OffsetDateTime, program: Option<i64>) -> ActiveTimer {
        ActiveTimer {
            project_id: Some(7),
            current_program_id: program,
            in_work: true,
            last_started_at: Some(started_at),
            ..ActiveTimer::idle(1)
        }
    }

    #[test]
    fn idle_timer_rejects_start_and_stop() {
        let timer = ActiveTimer::idle(1);
        assert_eq!(timer.state(), TimerState::Idle);
        assert!(timer.check_select().is_ok());
        assert!(timer.check_start().unwrap_err().is_invalid_state());
        assert!(
            timer
                .plan_stop(datetime!(2026-01-01 00:00 UTC))
                .unwrap_err()
                .is_invalid_state()
        );
    }

    #[test]
    fn selected_timer_starts_but_does_not_stop() {
        let timer = ActiveTimer {
            project_id: Some(7),
            ..ActiveTimer::idle(1)
        };
        assert_eq!(timer.check_start().unwrap(), 7);
        let err = timer.plan_stop(datetime!(2026-01-01 00:00 UTC)).unwrap_err();
        assert_eq!(err.to_string(), "invalid state: project is already stopped");
    }

    #[test]
    fn running_timer_plans_accrual() {
        let timer = running(datetime!(2026-01-01 09:00 UTC), Some(3));
        assert!(timer.check_start().unwrap_err().is_invalid_state());
        assert!(timer.check_select().unwrap_err().is_invalid_state());

        let accrual = timer.plan_stop(datetime!(2026-01-01 09:02:05 UTC)).unwrap();
        assert_eq!(accrual.project_id, 7);
        assert_eq!(accrual.program_id, Some(3));
        assert_eq!(accrual.elapsed, Duration::seconds(125));
    }

    #[test]
    fn clock_skew_accrues_nothing() {
        let started = datetime!(2026-01-01 09:00 UTC);
        let timer = running(started, None);
        let accrual = timer.plan_stop(started - Duration::minutes(5)).unwrap();
        assert_eq!(accrual.elapsed, Duration::ZERO);
        assert_eq!(elapsed_between(started, started), Duration::ZERO);
    }

    #[test]
    fn running_flag_without_project_counts_as_idle() {
        let timer = ActiveTimer {
            in_work: true,
            last_started_at: Some(datetime!(2026-01-01 09:00 UTC)),
            ..ActiveTimer::idle(1)
        };
        assert_eq!(timer.state(), TimerState::Idle);
        let err = timer.plan_stop(datetime!(2026-01-01 10:00 UTC)).unwrap_err();
        assert_eq!(err.to_string(), "invalid state: no active project");
    }

    #[test]
    fn status_reports_running_time() {
        let timer = running(datetime!(2026-01-01 09:00 UTC), None);
        let status = timer.status(datetime!(2026-01-01 09:30 UTC));
        assert_eq!(status.running_for, Duration::minutes(30));
        assert_eq!(ActiveTimer::idle(1).status(datetime!(2026-01-01 09:30 UTC)).running_for, Duration::ZERO);
    }
}
