use std::future::Future;

use serde::Serialize;

use crate::core::Result;

#[derive(Debug, Clone, Serialize)]
pub struct WorkProgram {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    #[serde(skip)]
    pub(super) _guard: (),
}

#[derive(Debug, Clone)]
pub struct NewWorkProgram {
    pub name: String,
    pub description: Option<String>,
}

pub trait WorkProgramRepository {
    fn add_work_program(&self, program: &NewWorkProgram) -> impl Future<Output = Result<WorkProgram>>;
    fn get_work_programs(&self) -> impl Future<Output = Result<Vec<WorkProgram>>>;
    fn get_work_program(&self, id: i64) -> impl Future<Output = Result<Option<WorkProgram>>>;
}
