pub mod core;

pub use crate::core::db::{
    Accrual, ActiveTimer, ProjectRepository, ReportRepository, TaskRepository, TeamRepository,
    TimerRepository, TimerState, TrackerDb, UserRepository, WorkProgramRepository,
};
pub use crate::core::{Clock, Error, ManualClock, Result, SystemClock};
