#![allow(dead_code)]

use std::sync::Arc;

use time::{OffsetDateTime, macros::datetime};
use usemytime::core::db::{
    NewProject, NewUser, NewWorkProgram, Project, ProjectRepository, Role, TrackerDb, User,
    UserRepository, WorkProgram, WorkProgramRepository,
};
use usemytime::ManualClock;

/// Moment every test clock starts at.
pub const T0: OffsetDateTime = datetime!(2026-01-05 09:00 UTC);

/// Creates a TrackerDb in a temporary directory, driven by a manual clock set to `T0`.
/// Returns the db, the clock and the temp directory (which must be kept alive).
pub async fn create_test_db() -> (TrackerDb, Arc<ManualClock>, tempfile::TempDir) {
    let dir = tempfile::TempDir::new().expect("Failed to create temp directory");
    let path = dir.path().join("test.db");
    let clock = Arc::new(ManualClock::new(T0));
    let db = TrackerDb::open_with_clock(&path, clock.clone())
        .await
        .expect("Failed to create test database");
    (db, clock, dir)
}

pub async fn add_test_user(db: &TrackerDb, username: &str, role: Role) -> User {
    db.add_user(&NewUser {
        username: username.to_string(),
        first_name: format!("{username}-first"),
        last_name: format!("{username}-last"),
        position: "Engineer".to_string(),
        role,
        is_staff: false,
    })
    .await
    .expect("Failed to add test user")
}

pub async fn add_test_project(db: &TrackerDb, owner: &User, title: &str, tasks: &[&str]) -> Project {
    db.add_project(
        owner,
        &NewProject {
            title: title.to_string(),
            description: format!("{title} description"),
            tasks: tasks.iter().map(|task| task.to_string()).collect(),
        },
    )
    .await
    .expect("Failed to add test project")
}

pub async fn add_test_program(db: &TrackerDb, name: &str) -> WorkProgram {
    db.add_work_program(&NewWorkProgram {
        name: name.to_string(),
        description: None,
    })
    .await
    .expect("Failed to add test work program")
}
