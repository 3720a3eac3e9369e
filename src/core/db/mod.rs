mod model;
mod project;
mod report;
mod state;
mod task;
mod timer;
mod user;
mod work_program;

use std::{path::Path, sync::Arc};

use sqlx::SqliteConnection;
use state::DbState;

use crate::core::{Clock, Error, Result, SystemClock};

pub use model::Hms;
pub use project::{NewProject, Project, ProjectProgram, ProjectRepository, ProjectUpdate};
pub use report::{
    DepartmentReport, EmployeeReport, ProjectSummary, ReportRepository, build_department_report,
    build_employee_report,
};
pub use task::{Task, TaskDiff, TaskRepository, normalize_task_texts, reconcile_tasks};
pub use timer::{
    Accrual, ActiveTimer, TimerRepository, TimerState, TimerStatus, elapsed_between,
};
pub use user::{NewUser, ProfileUpdate, Role, TeamRepository, User, UserRepository};
pub use work_program::{NewWorkProgram, WorkProgram, WorkProgramRepository};

/// Attempts at a timer compare-and-swap before giving up with `Conflict`.
const MAX_TIMER_ATTEMPTS: usize = 8;

/// Handle to the time-tracking database.
///
/// Cloning is cheap; clones share the connection pool and clock.
#[derive(Debug, Clone)]
pub struct TrackerDb {
    state: Arc<DbState>,
}

impl TrackerDb {
    /// Opens (creating if needed) the database file and applies migrations.
    pub async fn open<P: AsRef<Path>>(db_file: P) -> Result<Self> {
        Self::open_with_clock(db_file, Arc::new(SystemClock)).await
    }

    pub async fn open_with_clock<P: AsRef<Path>>(db_file: P, clock: Arc<dyn Clock>) -> Result<Self> {
        Ok(Self {
            state: Arc::new(DbState::open(db_file, clock).await?),
        })
    }

    /// Checkpoints the WAL and closes the pool. Further calls fail.
    pub async fn close(&self) -> Result<()> {
        self.state.close().await
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    username: String,
    first_name: String,
    last_name: String,
    patronymic: Option<String>,
    position: String,
    phone_internal: Option<String>,
    role: i64,
    is_staff: bool,
    manager_id: Option<i64>,
}

impl TryFrom<UserRow> for User {
    type Error = Error;

    fn try_from(row: UserRow) -> Result<Self> {
        Ok(User {
            id: row.id,
            username: row.username,
            first_name: row.first_name,
            last_name: row.last_name,
            patronymic: row.patronymic,
            position: row.position,
            phone_internal: row.phone_internal,
            role: Role::try_from(row.role)?,
            is_staff: row.is_staff,
            manager_id: row.manager_id,
            _guard: (),
        })
    }
}

#[derive(sqlx::FromRow)]
struct ProjectRow {
    id: i64,
    user_id: i64,
    title: String,
    description: String,
    total_time_ms: i64,
    is_archived: bool,
    created_at: String,
}

impl TryFrom<ProjectRow> for Project {
    type Error = Error;

    fn try_from(row: ProjectRow) -> Result<Self> {
        Ok(Project {
            id: row.id,
            user_id: row.user_id,
            title: row.title,
            description: row.description,
            total_time: model::duration_from_ms(row.total_time_ms),
            is_archived: row.is_archived,
            created_at: model::parse_timestamp(&row.created_at)?,
            _guard: (),
        })
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: i64,
    project_id: i64,
    text: String,
    is_done: bool,
    created_at: String,
}

impl TryFrom<TaskRow> for Task {
    type Error = Error;

    fn try_from(row: TaskRow) -> Result<Self> {
        Ok(Task {
            id: row.id,
            project_id: row.project_id,
            text: row.text,
            is_done: row.is_done,
            created_at: model::parse_timestamp(&row.created_at)?,
            _guard: (),
        })
    }
}

#[derive(sqlx::FromRow)]
struct TimerRow {
    user_id: i64,
    project_id: Option<i64>,
    current_program_id: Option<i64>,
    in_work: bool,
    last_started_at: Option<String>,
    version: i64,
}

impl TryFrom<TimerRow> for ActiveTimer {
    type Error = Error;

    fn try_from(row: TimerRow) -> Result<Self> {
        Ok(ActiveTimer {
            user_id: row.user_id,
            project_id: row.project_id,
            current_program_id: row.current_program_id,
            in_work: row.in_work,
            last_started_at: row
                .last_started_at
                .as_deref()
                .map(model::parse_timestamp)
                .transpose()?,
            version: row.version,
        })
    }
}

#[derive(sqlx::FromRow)]
struct WorkProgramRow {
    id: i64,
    name: String,
    description: Option<String>,
}

impl From<WorkProgramRow> for WorkProgram {
    fn from(row: WorkProgramRow) -> Self {
        WorkProgram {
            id: row.id,
            name: row.name,
            description: row.description,
            _guard: (),
        }
    }
}

#[derive(sqlx::FromRow)]
struct ProjectProgramRow {
    project_id: i64,
    program_id: i64,
    program_name: String,
    total_time_ms: i64,
}

impl From<ProjectProgramRow> for ProjectProgram {
    fn from(row: ProjectProgramRow) -> Self {
        ProjectProgram {
            project_id: row.project_id,
            program_id: row.program_id,
            program_name: row.program_name,
            total_time: model::duration_from_ms(row.total_time_ms),
            _guard: (),
        }
    }
}

async fn fetch_user(conn: &mut SqliteConnection, id: i64) -> Result<Option<User>> {
    sqlx::query_as::<_, UserRow>(
        r#"SELECT id, username, first_name, last_name, patronymic, position,
            phone_internal, role, is_staff, manager_id
        FROM app_user WHERE id = $1"#,
    )
    .bind(id)
    .fetch_optional(conn)
    .await?
    .map(User::try_from)
    .transpose()
}

async fn fetch_project(conn: &mut SqliteConnection, owner_id: i64, id: i64) -> Result<Option<Project>> {
    sqlx::query_as::<_, ProjectRow>(
        r#"SELECT id, user_id, title, description, total_time_ms, is_archived, created_at
        FROM project WHERE id = $1 AND user_id = $2"#,
    )
    .bind(id)
    .bind(owner_id)
    .fetch_optional(conn)
    .await?
    .map(Project::try_from)
    .transpose()
}

async fn require_project(conn: &mut SqliteConnection, owner_id: i64, id: i64) -> Result<Project> {
    fetch_project(conn, owner_id, id)
        .await?
        .ok_or_else(|| Error::not_found(format!("project {id}")))
}

async fn fetch_projects(
    conn: &mut SqliteConnection,
    owner_id: i64,
    archived: bool,
) -> Result<Vec<Project>> {
    sqlx::query_as::<_, ProjectRow>(
        r#"SELECT id, user_id, title, description, total_time_ms, is_archived, created_at
        FROM project WHERE user_id = $1 AND is_archived = $2
        ORDER BY id ASC"#,
    )
    .bind(owner_id)
    .bind(archived)
    .fetch_all(conn)
    .await?
    .into_iter()
    .map(Project::try_from)
    .collect()
}

async fn fetch_tasks(conn: &mut SqliteConnection, project_id: i64) -> Result<Vec<Task>> {
    sqlx::query_as::<_, TaskRow>(
        r#"SELECT id, project_id, text, is_done, created_at
        FROM task WHERE project_id = $1
        ORDER BY id ASC"#,
    )
    .bind(project_id)
    .fetch_all(conn)
    .await?
    .into_iter()
    .map(Task::try_from)
    .collect()
}

async fn insert_tasks(
    conn: &mut SqliteConnection,
    project_id: i64,
    texts: &[String],
    created_at: &str,
) -> Result<()> {
    for text in texts {
        sqlx::query(r#"INSERT INTO task (project_id, text, created_at) VALUES ($1, $2, $3)"#)
            .bind(project_id)
            .bind(text)
            .bind(created_at)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

async fn fetch_timer(conn: &mut SqliteConnection, user_id: i64) -> Result<ActiveTimer> {
    let row = sqlx::query_as::<_, TimerRow>(
        r#"SELECT user_id, project_id, current_program_id, in_work, last_started_at, version
        FROM active_timer WHERE user_id = $1"#,
    )
    .bind(user_id)
    .fetch_optional(conn)
    .await?;
    match row {
        Some(row) => ActiveTimer::try_from(row),
        None => Ok(ActiveTimer::idle(user_id)),
    }
}

async fn fetch_work_program(conn: &mut SqliteConnection, id: i64) -> Result<Option<WorkProgram>> {
    Ok(sqlx::query_as::<_, WorkProgramRow>(
        r#"SELECT id, name, description FROM work_program WHERE id = $1"#,
    )
    .bind(id)
    .fetch_optional(conn)
    .await?
    .map(WorkProgram::from))
}

/// Clears every timer pointing at `project_id`. Returns how many were detached.
async fn detach_timers(conn: &mut SqliteConnection, project_id: i64) -> Result<u64> {
    Ok(sqlx::query(
        r#"UPDATE active_timer SET
            project_id = NULL,
            current_program_id = NULL,
            in_work = 0,
            last_started_at = NULL,
            version = version + 1
        WHERE project_id = $1"#,
    )
    .bind(project_id)
    .execute(conn)
    .await?
    .rows_affected())
}

async fn load_employee_report(
    conn: &mut SqliteConnection,
    employee: User,
    generated_at: time::OffsetDateTime,
) -> Result<EmployeeReport> {
    let projects = fetch_projects(&mut *conn, employee.id, false).await?;
    let completed = sqlx::query_as::<_, TaskRow>(
        r#"SELECT t.id, t.project_id, t.text, t.is_done, t.created_at
        FROM task t
        JOIN project p ON p.id = t.project_id
        WHERE p.user_id = $1 AND p.is_archived = 0 AND t.is_done = 1
        ORDER BY t.id ASC"#,
    )
    .bind(employee.id)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(Task::try_from)
    .collect::<Result<Vec<_>>>()?;
    Ok(build_employee_report(employee, &projects, &completed, generated_at))
}

impl UserRepository for TrackerDb {
    async fn add_user(&self, user: &NewUser) -> Result<User> {
        let mut conn = self.state.conn().await?;
        let role = i64::from(user.role);
        let row = sqlx::query_as::<_, UserRow>(
            r#"INSERT INTO app_user (username, first_name, last_name, position, role, is_staff)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, username, first_name, last_name, patronymic, position,
                phone_internal, role, is_staff, manager_id"#,
        )
        .bind(&user.username)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.position)
        .bind(role)
        .bind(user.is_staff)
        .fetch_one(&mut **conn)
        .await?;
        tracing::info!(user_id = row.id, username = %row.username, "user added");
        User::try_from(row)
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>> {
        let mut conn = self.state.conn().await?;
        fetch_user(&mut conn, id).await
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let mut conn = self.state.conn().await?;
        sqlx::query_as::<_, UserRow>(
            r#"SELECT id, username, first_name, last_name, patronymic, position,
                phone_internal, role, is_staff, manager_id
            FROM app_user WHERE username = $1"#,
        )
        .bind(username)
        .fetch_optional(&mut **conn)
        .await?
        .map(User::try_from)
        .transpose()
    }

    async fn update_profile(
        &self,
        caller: &User,
        user_id: i64,
        update: &ProfileUpdate,
    ) -> Result<User> {
        let mut conn = self.state.conn().await?;
        let user = fetch_user(&mut conn, user_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("user {user_id}")))?;
        if !caller.supervises(&user) {
            return Err(Error::unauthorized(format!(
                "{} may not edit the profile of {}",
                caller.username, user.username
            )));
        }

        let patronymic = match &update.patronymic {
            Some(value) => value.clone(),
            None => user.patronymic.clone(),
        };
        let phone_internal = match &update.phone_internal {
            Some(value) => value.clone(),
            None => user.phone_internal.clone(),
        };
        let row = sqlx::query_as::<_, UserRow>(
            r#"UPDATE app_user SET
                first_name = COALESCE($1, first_name),
                last_name = COALESCE($2, last_name),
                position = COALESCE($3, position),
                patronymic = $4,
                phone_internal = $5
            WHERE id = $6
            RETURNING id, username, first_name, last_name, patronymic, position,
                phone_internal, role, is_staff, manager_id"#,
        )
        .bind(&update.first_name)
        .bind(&update.last_name)
        .bind(&update.position)
        .bind(patronymic)
        .bind(phone_internal)
        .bind(user.id)
        .fetch_one(&mut **conn)
        .await?;
        User::try_from(row)
    }
}

impl TeamRepository for TrackerDb {
    async fn get_team(&self, manager: &User) -> Result<Vec<User>> {
        let mut conn = self.state.conn().await?;
        sqlx::query_as::<_, UserRow>(
            r#"SELECT id, username, first_name, last_name, patronymic, position,
                phone_internal, role, is_staff, manager_id
            FROM app_user WHERE manager_id = $1
            ORDER BY last_name ASC, first_name ASC, id ASC"#,
        )
        .bind(manager.id)
        .fetch_all(&mut **conn)
        .await?
        .into_iter()
        .map(User::try_from)
        .collect()
    }

    async fn get_available_employees(&self) -> Result<Vec<User>> {
        let mut conn = self.state.conn().await?;
        let employee = i64::from(Role::Employee);
        sqlx::query_as::<_, UserRow>(
            r#"SELECT id, username, first_name, last_name, patronymic, position,
                phone_internal, role, is_staff, manager_id
            FROM app_user
            WHERE manager_id IS NULL AND role = $1 AND is_staff = 0
            ORDER BY last_name ASC, first_name ASC, id ASC"#,
        )
        .bind(employee)
        .fetch_all(&mut **conn)
        .await?
        .into_iter()
        .map(User::try_from)
        .collect()
    }

    async fn add_to_team(&self, manager: &User, employee_id: i64) -> Result<User> {
        if !manager.is_manager() {
            return Err(Error::unauthorized("only managers can add team members"));
        }
        let mut conn = self.state.conn().await?;
        let employee = fetch_user(&mut conn, employee_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("employee {employee_id}")))?;
        if employee.is_staff {
            return Err(Error::unauthorized("administrators cannot be added to a team"));
        }
        if employee.role != Role::Employee {
            return Err(Error::invalid_state(format!(
                "{} is a {} and cannot join a team",
                employee.username, employee.role
            )));
        }
        match employee.manager_id {
            Some(current) if current == manager.id => return Ok(employee),
            Some(_) => {
                return Err(Error::invalid_state(format!(
                    "{} already belongs to another team",
                    employee.username
                )));
            }
            None => {}
        }

        let assigned = sqlx::query(
            r#"UPDATE app_user SET manager_id = $1 WHERE id = $2 AND manager_id IS NULL"#,
        )
        .bind(manager.id)
        .bind(employee.id)
        .execute(&mut **conn)
        .await?
        .rows_affected();
        if assigned == 0 {
            return Err(Error::invalid_state(format!(
                "{} already belongs to another team",
                employee.username
            )));
        }
        tracing::info!(manager_id = manager.id, employee_id, "employee added to team");
        fetch_user(&mut conn, employee_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("employee {employee_id}")))
    }

    async fn remove_from_team(&self, manager: &User, employee_id: i64) -> Result<User> {
        if !manager.is_manager() {
            return Err(Error::unauthorized("only managers can remove team members"));
        }
        let mut conn = self.state.conn().await?;
        let employee = fetch_user(&mut conn, employee_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("employee {employee_id}")))?;
        if employee.manager_id != Some(manager.id) {
            return Err(Error::unauthorized(format!(
                "{} is not in your team",
                employee.username
            )));
        }

        sqlx::query(r#"UPDATE app_user SET manager_id = NULL WHERE id = $1 AND manager_id = $2"#)
            .bind(employee.id)
            .bind(manager.id)
            .execute(&mut **conn)
            .await?;
        tracing::info!(manager_id = manager.id, employee_id, "employee removed from team");
        fetch_user(&mut conn, employee_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("employee {employee_id}")))
    }
}

impl WorkProgramRepository for TrackerDb {
    async fn add_work_program(&self, program: &NewWorkProgram) -> Result<WorkProgram> {
        let mut conn = self.state.conn().await?;
        let row = sqlx::query_as::<_, WorkProgramRow>(
            r#"INSERT INTO work_program (name, description) VALUES ($1, $2)
            RETURNING id, name, description"#,
        )
        .bind(&program.name)
        .bind(&program.description)
        .fetch_one(&mut **conn)
        .await?;
        Ok(WorkProgram::from(row))
    }

    async fn get_work_programs(&self) -> Result<Vec<WorkProgram>> {
        let mut conn = self.state.conn().await?;
        Ok(sqlx::query_as::<_, WorkProgramRow>(
            r#"SELECT id, name, description FROM work_program ORDER BY id ASC"#,
        )
        .fetch_all(&mut **conn)
        .await?
        .into_iter()
        .map(WorkProgram::from)
        .collect())
    }

    async fn get_work_program(&self, id: i64) -> Result<Option<WorkProgram>> {
        let mut conn = self.state.conn().await?;
        fetch_work_program(&mut conn, id).await
    }
}

impl ProjectRepository for TrackerDb {
    async fn add_project(&self, owner: &User, project: &NewProject) -> Result<Project> {
        let mut conn = self.state.conn().await?;
        let created_at = model::format_timestamp(self.state.clock().now())?;
        let texts = normalize_task_texts(&project.tasks);

        let mut tx = conn.begin_transaction().await?;
        let row = sqlx::query_as::<_, ProjectRow>(
            r#"INSERT INTO project (user_id, title, description, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, user_id, title, description, total_time_ms, is_archived, created_at"#,
        )
        .bind(owner.id)
        .bind(&project.title)
        .bind(&project.description)
        .bind(&created_at)
        .fetch_one(&mut *tx)
        .await?;
        insert_tasks(&mut tx, row.id, &texts, &created_at).await?;
        tx.commit().await?;

        tracing::info!(user_id = owner.id, project_id = row.id, tasks = texts.len(), "project created");
        Project::try_from(row)
    }

    async fn get_project(&self, owner: &User, id: i64) -> Result<Option<Project>> {
        let mut conn = self.state.conn().await?;
        fetch_project(&mut conn, owner.id, id).await
    }

    async fn get_projects(&self, owner: &User) -> Result<Vec<Project>> {
        let mut conn = self.state.conn().await?;
        fetch_projects(&mut conn, owner.id, false).await
    }

    async fn get_archived_projects(&self, owner: &User) -> Result<Vec<Project>> {
        let mut conn = self.state.conn().await?;
        fetch_projects(&mut conn, owner.id, true).await
    }

    async fn update_project(&self, owner: &User, id: i64, update: &ProjectUpdate) -> Result<Project> {
        let mut conn = self.state.conn().await?;
        let created_at = model::format_timestamp(self.state.clock().now())?;

        let mut tx = conn.begin_transaction().await?;
        let row = sqlx::query_as::<_, ProjectRow>(
            r#"UPDATE project SET
                title = COALESCE($1, title),
                description = COALESCE($2, description)
            WHERE id = $3 AND user_id = $4
            RETURNING id, user_id, title, description, total_time_ms, is_archived, created_at"#,
        )
        .bind(&update.title)
        .bind(&update.description)
        .bind(id)
        .bind(owner.id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::not_found(format!("project {id}")))?;

        if let Some(desired) = &update.tasks {
            let existing = fetch_tasks(&mut tx, id).await?;
            let diff = reconcile_tasks(&existing, desired);
            for task_id in &diff.delete {
                sqlx::query(r#"DELETE FROM task WHERE id = $1 AND project_id = $2"#)
                    .bind(task_id)
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
            }
            insert_tasks(&mut tx, id, &diff.create, &created_at).await?;
            tracing::debug!(
                project_id = id,
                deleted = diff.delete.len(),
                created = diff.create.len(),
                "tasks reconciled"
            );
        }
        tx.commit().await?;

        Project::try_from(row)
    }

    async fn delete_project(&self, owner: &User, id: i64) -> Result<()> {
        let mut conn = self.state.conn().await?;
        require_project(&mut conn, owner.id, id).await?;

        let mut tx = conn.begin_transaction().await?;
        let detached = detach_timers(&mut tx, id).await?;
        let deleted = sqlx::query(r#"DELETE FROM project WHERE id = $1 AND user_id = $2"#)
            .bind(id)
            .bind(owner.id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if deleted == 0 {
            tx.rollback().await?;
            return Err(Error::not_found(format!("project {id}")));
        }
        tx.commit().await?;

        tracing::info!(user_id = owner.id, project_id = id, detached, "project deleted");
        Ok(())
    }

    async fn archive_project(&self, owner: &User, id: i64) -> Result<Project> {
        let mut conn = self.state.conn().await?;
        let project = require_project(&mut conn, owner.id, id).await?;
        if project.is_archived {
            return Ok(project);
        }

        // Read only to report discarded time; the detach below does not depend on it.
        let timer = fetch_timer(&mut conn, owner.id).await?;

        let mut tx = conn.begin_transaction().await?;
        let detached = detach_timers(&mut tx, id).await?;
        let row = sqlx::query_as::<_, ProjectRow>(
            r#"UPDATE project SET is_archived = 1
            WHERE id = $1 AND user_id = $2
            RETURNING id, user_id, title, description, total_time_ms, is_archived, created_at"#,
        )
        .bind(id)
        .bind(owner.id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::not_found(format!("project {id}")))?;
        tx.commit().await?;

        if let TimerState::Running {
            project_id,
            started_at,
            ..
        } = timer.state()
        {
            if project_id == id {
                let discarded = elapsed_between(started_at, self.state.clock().now());
                let discarded_ms = model::duration_to_ms(discarded).unwrap_or(i64::MAX);
                tracing::warn!(
                    user_id = owner.id,
                    project_id = id,
                    discarded_ms,
                    "archived a running project; in-flight time was not credited"
                );
            }
        }
        tracing::info!(user_id = owner.id, project_id = id, detached, "project archived");
        Project::try_from(row)
    }

    async fn get_project_programs(&self, owner: &User, id: i64) -> Result<Vec<ProjectProgram>> {
        let mut conn = self.state.conn().await?;
        require_project(&mut conn, owner.id, id).await?;
        Ok(sqlx::query_as::<_, ProjectProgramRow>(
            r#"SELECT pp.project_id, pp.program_id, wp.name AS program_name, pp.total_time_ms
            FROM project_program pp
            JOIN work_program wp ON wp.id = pp.program_id
            WHERE pp.project_id = $1
            ORDER BY wp.name ASC, pp.program_id ASC"#,
        )
        .bind(id)
        .fetch_all(&mut **conn)
        .await?
        .into_iter()
        .map(ProjectProgram::from)
        .collect())
    }

    async fn get_tasks(&self, owner: &User, project_id: i64) -> Result<Vec<Task>> {
        let mut conn = self.state.conn().await?;
        require_project(&mut conn, owner.id, project_id).await?;
        fetch_tasks(&mut conn, project_id).await
    }
}

impl TaskRepository for TrackerDb {
    async fn toggle_task(&self, owner: &User, task_id: i64) -> Result<Task> {
        let mut conn = self.state.conn().await?;
        let row = sqlx::query_as::<_, TaskRow>(
            r#"UPDATE task SET is_done = 1 - is_done
            WHERE id = $1 AND project_id IN (SELECT id FROM project WHERE user_id = $2)
            RETURNING id, project_id, text, is_done, created_at"#,
        )
        .bind(task_id)
        .bind(owner.id)
        .fetch_optional(&mut **conn)
        .await?
        .ok_or_else(|| Error::not_found(format!("task {task_id}")))?;
        Task::try_from(row)
    }
}

impl TimerRepository for TrackerDb {
    async fn get_timer(&self, user: &User) -> Result<ActiveTimer> {
        let mut conn = self.state.conn().await?;
        fetch_timer(&mut conn, user.id).await
    }

    async fn get_timer_status(&self, user: &User) -> Result<TimerStatus> {
        let timer = self.get_timer(user).await?;
        Ok(timer.status(self.state.clock().now()))
    }

    async fn select_project(&self, user: &User, project_id: i64) -> Result<ActiveTimer> {
        let mut conn = self.state.conn().await?;
        for _ in 0..MAX_TIMER_ATTEMPTS {
            let project = require_project(&mut conn, user.id, project_id).await?;
            if project.is_archived {
                return Err(Error::invalid_state(format!("project {project_id} is archived")));
            }
            let timer = fetch_timer(&mut conn, user.id).await?;
            timer.check_select()?;

            // Creates the timer on first use; otherwise swaps the project only if
            // nobody touched the timer since it was read.
            let swapped = sqlx::query(
                r#"INSERT INTO active_timer (user_id, project_id, version)
                SELECT $1, $2, 1
                WHERE EXISTS (SELECT 1 FROM project WHERE id = $2 AND is_archived = 0)
                ON CONFLICT (user_id) DO UPDATE SET
                    project_id = excluded.project_id,
                    version = active_timer.version + 1
                WHERE active_timer.version = $3 AND active_timer.in_work = 0"#,
            )
            .bind(user.id)
            .bind(project_id)
            .bind(timer.version)
            .execute(&mut **conn)
            .await?
            .rows_affected();

            if swapped == 1 {
                tracing::info!(user_id = user.id, project_id, "project selected");
                return fetch_timer(&mut conn, user.id).await;
            }
            tracing::debug!(user_id = user.id, "timer changed concurrently, retrying select");
        }
        Err(Error::Conflict(format!("timer of user {} kept changing", user.id)))
    }

    async fn start_timer(&self, user: &User, program_id: Option<i64>) -> Result<ActiveTimer> {
        let mut conn = self.state.conn().await?;
        for _ in 0..MAX_TIMER_ATTEMPTS {
            let timer = fetch_timer(&mut conn, user.id).await?;
            let project_id = timer.check_start()?;
            let project = require_project(&mut conn, user.id, project_id).await?;
            if project.is_archived {
                return Err(Error::invalid_state(format!("project {project_id} is archived")));
            }
            if let Some(program_id) = program_id {
                if fetch_work_program(&mut conn, program_id).await?.is_none() {
                    return Err(Error::not_found(format!("work program {program_id}")));
                }
            }

            let started_at = model::format_timestamp(self.state.clock().now())?;
            let swapped = sqlx::query(
                r#"UPDATE active_timer SET
                    in_work = 1,
                    current_program_id = $2,
                    last_started_at = $3,
                    version = version + 1
                WHERE user_id = $1 AND version = $4 AND in_work = 0 AND project_id = $5
                AND EXISTS (SELECT 1 FROM project WHERE id = $5 AND is_archived = 0)"#,
            )
            .bind(user.id)
            .bind(program_id)
            .bind(&started_at)
            .bind(timer.version)
            .bind(project_id)
            .execute(&mut **conn)
            .await?
            .rows_affected();

            if swapped == 1 {
                tracing::info!(user_id = user.id, project_id, program_id, "timer started");
                return fetch_timer(&mut conn, user.id).await;
            }
            tracing::debug!(user_id = user.id, "timer changed concurrently, retrying start");
        }
        Err(Error::Conflict(format!("timer of user {} kept changing", user.id)))
    }

    async fn stop_timer(&self, user: &User) -> Result<Accrual> {
        let mut conn = self.state.conn().await?;
        for _ in 0..MAX_TIMER_ATTEMPTS {
            let timer = fetch_timer(&mut conn, user.id).await?;
            let accrual = timer.plan_stop(self.state.clock().now())?;
            let elapsed_ms = model::duration_to_ms(accrual.elapsed)?;

            // The flip is the first write so the transaction holds the write lock
            // before anything is credited.
            let mut tx = conn.begin_transaction().await?;
            let flipped = sqlx::query(
                r#"UPDATE active_timer SET
                    in_work = 0,
                    last_started_at = NULL,
                    version = version + 1
                WHERE user_id = $1 AND version = $2 AND in_work = 1"#,
            )
            .bind(user.id)
            .bind(timer.version)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            if flipped == 0 {
                tx.rollback().await?;
                tracing::debug!(user_id = user.id, "timer changed concurrently, retrying stop");
                continue;
            }

            let credited = sqlx::query(
                r#"UPDATE project SET total_time_ms = total_time_ms + $2 WHERE id = $1"#,
            )
            .bind(accrual.project_id)
            .bind(elapsed_ms)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            if credited == 0 {
                tx.rollback().await?;
                return Err(Error::Corrupt(format!(
                    "running timer points at missing project {}",
                    accrual.project_id
                )));
            }

            if let Some(program_id) = accrual.program_id {
                sqlx::query(
                    r#"INSERT INTO project_program (project_id, program_id, total_time_ms)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (project_id, program_id) DO UPDATE SET
                        total_time_ms = project_program.total_time_ms + excluded.total_time_ms"#,
                )
                .bind(accrual.project_id)
                .bind(program_id)
                .bind(elapsed_ms)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await?;

            tracing::info!(
                user_id = user.id,
                project_id = accrual.project_id,
                program_id = accrual.program_id,
                elapsed_ms,
                "timer stopped"
            );
            return Ok(accrual);
        }
        Err(Error::Conflict(format!("timer of user {} kept changing", user.id)))
    }
}

impl ReportRepository for TrackerDb {
    async fn team_report(&self, manager: &User) -> Result<DepartmentReport> {
        if !(manager.is_manager() || manager.is_director()) {
            return Err(Error::unauthorized("team reports are available to managers only"));
        }
        let team = self.get_team(manager).await?;
        let generated_at = self.state.clock().now();

        let mut conn = self.state.conn().await?;
        let mut tx = conn.begin_transaction().await?;
        let mut employees = Vec::with_capacity(team.len());
        for employee in team {
            employees.push(load_employee_report(&mut tx, employee, generated_at).await?);
        }
        tx.commit().await?;

        Ok(build_department_report(manager.clone(), employees, generated_at))
    }

    async fn employee_report(&self, viewer: &User, employee_id: i64) -> Result<EmployeeReport> {
        let mut conn = self.state.conn().await?;
        let employee = fetch_user(&mut conn, employee_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("employee {employee_id}")))?;
        if !viewer.supervises(&employee) {
            return Err(Error::unauthorized(format!(
                "{} may not view the report of {}",
                viewer.username, employee.username
            )));
        }
        load_employee_report(&mut conn, employee, self.state.clock().now()).await
    }
}
