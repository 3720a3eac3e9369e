mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from usemytime for tests
#[allow(unused_imports)]
pub use usemytime::core::db::{
    Accrual, ActiveTimer, DepartmentReport, EmployeeReport, Hms, NewProject, NewUser,
    NewWorkProgram, ProfileUpdate, Project, ProjectProgram, ProjectRepository, ProjectUpdate,
    ReportRepository, Role, Task, TaskRepository, TeamRepository, TimerRepository, TimerState,
    TrackerDb, User, UserRepository, WorkProgram, WorkProgramRepository,
};
#[allow(unused_imports)]
pub use usemytime::{Error, ManualClock};
