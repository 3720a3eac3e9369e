use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use usemytime::core::db::{
    DepartmentReport, EmployeeReport, Hms, NewProject, NewUser, NewWorkProgram, ProfileUpdate,
    ProjectUpdate, Role, User,
};
use usemytime::{
    ProjectRepository, ReportRepository, TaskRepository, TeamRepository, TimerRepository,
    TimerState, TrackerDb, UserRepository, WorkProgramRepository,
};

#[derive(Parser)]
#[command(name = "usemytime")]
#[command(about = "Track time on projects and build team reports")]
struct Cli {
    /// Path to the SQLite database file
    #[arg(long, env = "USEMYTIME_DB", default_value = "usemytime.db")]
    db: PathBuf,

    /// Username the command runs as
    #[arg(long, env = "USEMYTIME_USER")]
    user: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage user accounts
    User {
        #[command(subcommand)]
        action: UserAction,
    },
    /// Manage work programs
    Program {
        #[command(subcommand)]
        action: ProgramAction,
    },
    /// Manage projects and their tasks
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },
    /// Toggle task completion
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },
    /// Select, start and stop the active project timer
    Timer {
        #[command(subcommand)]
        action: TimerAction,
    },
    /// Manage the current manager's team
    Team {
        #[command(subcommand)]
        action: TeamAction,
    },
    /// Time reports
    Report {
        #[command(subcommand)]
        action: ReportAction,
    },
}

#[derive(Subcommand)]
enum UserAction {
    Add {
        #[arg(long)]
        username: String,
        #[arg(long, default_value = "")]
        first_name: String,
        #[arg(long, default_value = "")]
        last_name: String,
        #[arg(long, default_value = "")]
        position: String,
        /// employee, manager or director
        #[arg(long, default_value = "employee")]
        role: Role,
        /// Mark the account as an administrator
        #[arg(long)]
        staff: bool,
    },
    /// Show a profile (defaults to the current user)
    Show { username: Option<String> },
    /// Edit a profile (defaults to the current user)
    Edit {
        #[arg(long)]
        target: Option<String>,
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
        #[arg(long)]
        patronymic: Option<String>,
        #[arg(long)]
        position: Option<String>,
        #[arg(long)]
        phone_internal: Option<String>,
    },
}

#[derive(Subcommand)]
enum ProgramAction {
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    List,
}

#[derive(Subcommand)]
enum ProjectAction {
    Create {
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Task text; repeat for several tasks
        #[arg(long = "task")]
        tasks: Vec<String>,
    },
    List {
        #[arg(long)]
        archived: bool,
    },
    Show { id: i64 },
    Update {
        id: i64,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Desired task list; repeat for several tasks
        #[arg(long = "task")]
        tasks: Vec<String>,
        /// Remove every task
        #[arg(long, conflicts_with = "tasks")]
        clear_tasks: bool,
    },
    Delete { id: i64 },
    Archive { id: i64 },
}

#[derive(Subcommand)]
enum TaskAction {
    Toggle { id: i64 },
}

#[derive(Subcommand)]
enum TimerAction {
    Select { project: i64 },
    Start {
        #[arg(long)]
        program: Option<i64>,
    },
    Stop,
    Status,
}

#[derive(Subcommand)]
enum TeamAction {
    List,
    Available,
    Add { employee: i64 },
    Remove { employee: i64 },
}

#[derive(Subcommand)]
enum ReportAction {
    Team {
        #[arg(long)]
        json: bool,
    },
    Employee {
        id: i64,
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing() {
    // LOG_FORMAT=json for machine-readable logs, human-readable otherwise.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    if std::env::var("LOG_FORMAT").unwrap_or_default() == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();
    let cli = Cli::parse();

    let db = TrackerDb::open(&cli.db)
        .await
        .with_context(|| format!("Failed to open database {:?}", cli.db))?;
    let result = run(&db, cli.user.as_deref(), cli.command).await;
    db.close().await?;
    result
}

async fn current_user(db: &TrackerDb, username: Option<&str>) -> anyhow::Result<User> {
    let username = username.context("no user given: pass --user <name> or set USEMYTIME_USER")?;
    db.get_user_by_username(username)
        .await?
        .with_context(|| format!("unknown user: {username}"))
}

async fn user_by_name(db: &TrackerDb, username: &str) -> anyhow::Result<User> {
    db.get_user_by_username(username)
        .await?
        .with_context(|| format!("unknown user: {username}"))
}

async fn run(db: &TrackerDb, username: Option<&str>, command: Command) -> anyhow::Result<()> {
    match command {
        Command::User { action } => match action {
            UserAction::Add {
                username,
                first_name,
                last_name,
                position,
                role,
                staff,
            } => {
                let user = db
                    .add_user(&NewUser {
                        username,
                        first_name,
                        last_name,
                        position,
                        role,
                        is_staff: staff,
                    })
                    .await?;
                println!("created user {} ({})", user.id, user.username);
            }
            UserAction::Show { username: target } => {
                let user = match target {
                    Some(target) => user_by_name(db, &target).await?,
                    None => current_user(db, username).await?,
                };
                print_user(&user);
            }
            UserAction::Edit {
                target,
                first_name,
                last_name,
                patronymic,
                position,
                phone_internal,
            } => {
                let caller = current_user(db, username).await?;
                let target = match target {
                    Some(target) => user_by_name(db, &target).await?,
                    None => caller.clone(),
                };
                let update = ProfileUpdate {
                    first_name,
                    last_name,
                    patronymic: patronymic.map(Some),
                    position,
                    phone_internal: phone_internal.map(Some),
                };
                let user = db.update_profile(&caller, target.id, &update).await?;
                print_user(&user);
            }
        },
        Command::Program { action } => match action {
            ProgramAction::Add { name, description } => {
                let program = db
                    .add_work_program(&NewWorkProgram { name, description })
                    .await?;
                println!("created work program {} ({})", program.id, program.name);
            }
            ProgramAction::List => {
                let programs = db.get_work_programs().await?;
                if programs.is_empty() {
                    println!("no work programs");
                }
                for program in programs {
                    println!(
                        "{:>4} | {} | {}",
                        program.id,
                        program.name,
                        program.description.as_deref().unwrap_or("")
                    );
                }
            }
        },
        Command::Project { action } => {
            let owner = current_user(db, username).await?;
            run_project(db, &owner, action).await?;
        }
        Command::Task { action } => {
            let owner = current_user(db, username).await?;
            match action {
                TaskAction::Toggle { id } => {
                    let task = db.toggle_task(&owner, id).await?;
                    let mark = if task.is_done { "done" } else { "open" };
                    println!("task {} is now {mark}: {}", task.id, task.text);
                }
            }
        }
        Command::Timer { action } => {
            let user = current_user(db, username).await?;
            run_timer(db, &user, action).await?;
        }
        Command::Team { action } => {
            let manager = current_user(db, username).await?;
            match action {
                TeamAction::List => print_users(&db.get_team(&manager).await?),
                TeamAction::Available => print_users(&db.get_available_employees().await?),
                TeamAction::Add { employee } => {
                    let employee = db.add_to_team(&manager, employee).await?;
                    println!("{} added to your team", employee.display_name());
                }
                TeamAction::Remove { employee } => {
                    let employee = db.remove_from_team(&manager, employee).await?;
                    println!("{} removed from your team", employee.display_name());
                }
            }
        }
        Command::Report { action } => {
            let viewer = current_user(db, username).await?;
            match action {
                ReportAction::Team { json } => {
                    let report = db.team_report(&viewer).await?;
                    if json {
                        println!("{}", serde_json::to_string_pretty(&report)?);
                    } else {
                        print_department_report(&report);
                    }
                }
                ReportAction::Employee { id, json } => {
                    let report = db.employee_report(&viewer, id).await?;
                    if json {
                        println!("{}", serde_json::to_string_pretty(&report)?);
                    } else {
                        print_employee_report(&report);
                    }
                }
            }
        }
    }
    Ok(())
}

async fn run_project(db: &TrackerDb, owner: &User, action: ProjectAction) -> anyhow::Result<()> {
    match action {
        ProjectAction::Create {
            title,
            description,
            tasks,
        } => {
            let project = db
                .add_project(
                    owner,
                    &NewProject {
                        title,
                        description,
                        tasks,
                    },
                )
                .await?;
            println!("created project {} ({})", project.id, project.title);
        }
        ProjectAction::List { archived } => {
            let projects = if archived {
                db.get_archived_projects(owner).await?
            } else {
                db.get_projects(owner).await?
            };
            if projects.is_empty() {
                println!("no projects");
            }
            for project in projects {
                println!(
                    "{:>4} | {} | {}",
                    project.id,
                    Hms::from_duration(project.total_time),
                    project.title
                );
            }
        }
        ProjectAction::Show { id } => {
            let project = db
                .get_project(owner, id)
                .await?
                .with_context(|| format!("project {id} not found"))?;
            println!("{} | {}", project.id, project.title);
            if !project.description.is_empty() {
                println!("{}", project.description);
            }
            println!("total time: {}", Hms::from_duration(project.total_time));
            if project.is_archived {
                println!("archived");
            }
            println!("\ntasks:");
            for task in db.get_tasks(owner, id).await? {
                let mark = if task.is_done { 'x' } else { ' ' };
                println!("  [{mark}] {:>4} {}", task.id, task.text);
            }
            let splits = db.get_project_programs(owner, id).await?;
            if !splits.is_empty() {
                println!("\nby work program:");
                for split in splits {
                    println!(
                        "  {} | {}",
                        Hms::from_duration(split.total_time),
                        split.program_name
                    );
                }
            }
        }
        ProjectAction::Update {
            id,
            title,
            description,
            tasks,
            clear_tasks,
        } => {
            let tasks = if clear_tasks {
                Some(Vec::new())
            } else if tasks.is_empty() {
                None
            } else {
                Some(tasks)
            };
            let project = db
                .update_project(
                    owner,
                    id,
                    &ProjectUpdate {
                        title,
                        description,
                        tasks,
                    },
                )
                .await?;
            println!("updated project {} ({})", project.id, project.title);
        }
        ProjectAction::Delete { id } => {
            db.delete_project(owner, id).await?;
            println!("deleted project {id}");
        }
        ProjectAction::Archive { id } => {
            let project = db.archive_project(owner, id).await?;
            println!("archived project {} ({})", project.id, project.title);
        }
    }
    Ok(())
}

async fn run_timer(db: &TrackerDb, user: &User, action: TimerAction) -> anyhow::Result<()> {
    match action {
        TimerAction::Select { project } => {
            db.select_project(user, project).await?;
            println!("selected project {project}");
        }
        TimerAction::Start { program } => {
            db.start_timer(user, program).await?;
            match program {
                Some(program) => println!("timer started (work program {program})"),
                None => println!("timer started"),
            }
        }
        TimerAction::Stop => {
            let accrual = db.stop_timer(user).await?;
            println!(
                "timer stopped: {} credited to project {}",
                Hms::from_duration(accrual.elapsed),
                accrual.project_id
            );
        }
        TimerAction::Status => {
            let status = db.get_timer_status(user).await?;
            match status.state {
                TimerState::Idle => println!("idle: no project selected"),
                TimerState::Selected { project_id } => {
                    println!("project {project_id} selected, not running")
                }
                TimerState::Running {
                    project_id,
                    program_id,
                    ..
                } => {
                    let program = program_id
                        .map(|id| format!(" (work program {id})"))
                        .unwrap_or_default();
                    println!(
                        "running on project {project_id}{program} for {}",
                        Hms::from_duration(status.running_for)
                    );
                }
            }
        }
    }
    Ok(())
}

fn print_user(user: &User) {
    println!("{} | {} | {}", user.id, user.username, user.display_name());
    println!("role: {}{}", user.role, if user.is_staff { " (staff)" } else { "" });
    if !user.position.is_empty() {
        println!("position: {}", user.position);
    }
    if let Some(phone) = &user.phone_internal {
        println!("internal phone: {phone}");
    }
    if let Some(manager_id) = user.manager_id {
        println!("manager: {manager_id}");
    }
}

fn print_users(users: &[User]) {
    if users.is_empty() {
        println!("nobody");
    }
    for user in users {
        println!("{:>4} | {} | {}", user.id, user.display_name(), user.position);
    }
}

fn print_employee_report(report: &EmployeeReport) {
    println!(
        "{} ({}): {} completed tasks, {}",
        report.employee.display_name(),
        report.employee.position,
        report.total_tasks,
        report.total
    );
    for project in &report.projects {
        println!(
            "  {} | {} | {} tasks | started {} | last completed {}",
            project.time,
            project.title,
            project.completed_tasks.len(),
            project.created_at.date(),
            project.completed_at.date()
        );
        for task in &project.completed_tasks {
            println!("      - {}", task.text);
        }
    }
}

fn print_department_report(report: &DepartmentReport) {
    println!("department of {}", report.manager.display_name());
    for employee in &report.employees {
        print_employee_report(employee);
    }
    println!(
        "\ntotal: {} completed tasks, {}",
        report.total_tasks, report.total
    );
}
