use std::future::Future;

use time::{Duration, OffsetDateTime};

use crate::core::{
    Result,
    db::{task::Task, user::User},
};

#[derive(Debug, Clone)]
pub struct Project {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub description: String,
    pub total_time: Duration,
    pub is_archived: bool,
    pub created_at: OffsetDateTime,
    pub(super) _guard: (),
}

#[derive(Debug, Clone, Default)]
pub struct NewProject {
    pub title: String,
    pub description: String,
    /// Task texts; blanks are dropped and exact duplicates collapsed.
    pub tasks: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ProjectUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    /// Full desired task list. `None` leaves tasks untouched.
    pub tasks: Option<Vec<String>>,
}

/// Time accrued on a project while a given work program was selected.
#[derive(Debug, Clone)]
pub struct ProjectProgram {
    pub project_id: i64,
    pub program_id: i64,
    pub program_name: String,
    pub total_time: Duration,
    pub(super) _guard: (),
}

/// Project ledger operations. Every method is scoped to projects owned by `owner`;
/// a project owned by someone else is reported as not found.
pub trait ProjectRepository {
    fn add_project(&self, owner: &User, project: &NewProject) -> impl Future<Output = Result<Project>>;
    fn get_project(&self, owner: &User, id: i64) -> impl Future<Output = Result<Option<Project>>>;
    fn get_projects(&self, owner: &User) -> impl Future<Output = Result<Vec<Project>>>;
    fn get_archived_projects(&self, owner: &User) -> impl Future<Output = Result<Vec<Project>>>;
    fn update_project(
        &self,
        owner: &User,
        id: i64,
        update: &ProjectUpdate,
    ) -> impl Future<Output = Result<Project>>;
    fn delete_project(&self, owner: &User, id: i64) -> impl Future<Output = Result<()>>;
    /// Marks the project archived, first detaching any timer that points at it.
    /// Archiving an already archived project succeeds without changes.
    fn archive_project(&self, owner: &User, id: i64) -> impl Future<Output = Result<Project>>;
    fn get_project_programs(
        &self,
        owner: &User,
        id: i64,
    ) -> impl Future<Output = Result<Vec<ProjectProgram>>>;
    fn get_tasks(&self, owner: &User, project_id: i64) -> impl Future<Output = Result<Vec<Task>>>;
}
