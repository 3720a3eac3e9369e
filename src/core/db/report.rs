//! Read-only time reports for managers.
//!
//! Only non-archived projects count. A project appears in a report only when
//! it has at least one completed task; its accrued time then counts towards
//! the employee and department totals.

use std::future::Future;

use serde::Serialize;
use time::OffsetDateTime;

use crate::core::{
    Result,
    db::{model::Hms, project::Project, task::Task, user::User},
};

#[derive(Debug, Clone, Serialize)]
pub struct ProjectSummary {
    pub project_id: i64,
    pub title: String,
    pub completed_tasks: Vec<Task>,
    pub time: Hms,
    pub total_seconds: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Creation time of the most recent completed task.
    #[serde(with = "time::serde::rfc3339")]
    pub completed_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmployeeReport {
    pub employee: User,
    pub projects: Vec<ProjectSummary>,
    pub total_tasks: usize,
    pub total_seconds: i64,
    pub total: Hms,
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct DepartmentReport {
    pub manager: User,
    pub employees: Vec<EmployeeReport>,
    pub total_tasks: usize,
    pub total_seconds: i64,
    pub total: Hms,
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
}

pub trait ReportRepository {
    /// Report over every subordinate of `manager`. Requires a manager or director.
    /// Only managers take team members, so a director's report is always empty;
    /// directors read individual staff through `employee_report`.
    fn team_report(&self, manager: &User) -> impl Future<Output = Result<DepartmentReport>>;
    /// Report for one employee, visible to the employee, their manager and directors.
    fn employee_report(
        &self,
        viewer: &User,
        employee_id: i64,
    ) -> impl Future<Output = Result<EmployeeReport>>;
}

/// Builds an employee report from their projects and the completed tasks of
/// those projects. Archived projects and tasks not marked done are ignored.
pub fn build_employee_report(
    employee: User,
    projects: &[Project],
    tasks: &[Task],
    generated_at: OffsetDateTime,
) -> EmployeeReport {
    let summaries: Vec<ProjectSummary> = projects
        .iter()
        .filter(|project| !project.is_archived)
        .filter_map(|project| summarize_project(project, tasks))
        .collect();

    let total_tasks = summaries
        .iter()
        .map(|summary| summary.completed_tasks.len())
        .sum();
    let total_seconds = summaries.iter().map(|summary| summary.total_seconds).sum();

    EmployeeReport {
        employee,
        projects: summaries,
        total_tasks,
        total_seconds,
        total: Hms::from_seconds(total_seconds),
        generated_at,
    }
}

pub fn build_department_report(
    manager: User,
    employees: Vec<EmployeeReport>,
    generated_at: OffsetDateTime,
) -> DepartmentReport {
    let total_tasks = employees.iter().map(|report| report.total_tasks).sum();
    let total_seconds = employees.iter().map(|report| report.total_seconds).sum();
    DepartmentReport {
        manager,
        employees,
        total_tasks,
        total_seconds,
        total: Hms::from_seconds(total_seconds),
        generated_at,
    }
}

fn summarize_project(project: &Project, tasks: &[Task]) -> Option<ProjectSummary> {
    let completed_tasks: Vec<Task> = tasks
        .iter()
        .filter(|task| task.project_id == project.id && task.is_done)
        .cloned()
        .collect();
    let completed_at = completed_tasks.iter().map(|task| task.created_at).max()?;
    let total_seconds = project.total_time.whole_seconds();

    Some(ProjectSummary {
        project_id: project.id,
        title: project.title.clone(),
        completed_tasks,
        time: Hms::from_seconds(total_seconds),
        total_seconds,
        created_at: project.created_at,
        completed_at,
    })
}
