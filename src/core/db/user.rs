use std::future::Future;

use serde::Serialize;

use crate::core::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Employee,
    Manager,
    Director,
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub patronymic: Option<String>,
    pub position: String,
    pub phone_internal: Option<String>,
    pub role: Role,
    pub is_staff: bool,
    pub manager_id: Option<i64>,
    #[serde(skip)]
    pub(super) _guard: (),
}

impl User {
    pub fn display_name(&self) -> String {
        let name = format!("{} {}", self.last_name, self.first_name);
        let name = name.trim();
        if name.is_empty() {
            self.username.clone()
        } else {
            name.to_string()
        }
    }

    pub(super) fn is_manager(&self) -> bool {
        self.role == Role::Manager
    }

    pub(super) fn is_director(&self) -> bool {
        self.role == Role::Director
    }

    /// Whether `self` may view or edit `other`'s profile and reports.
    pub(super) fn supervises(&self, other: &User) -> bool {
        self.id == other.id || self.is_director() || other.manager_id == Some(self.id)
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub position: String,
    pub role: Role,
    pub is_staff: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub patronymic: Option<Option<String>>,
    pub position: Option<String>,
    pub phone_internal: Option<Option<String>>,
}

pub trait UserRepository {
    fn add_user(&self, user: &NewUser) -> impl Future<Output = Result<User>>;
    fn get_user(&self, id: i64) -> impl Future<Output = Result<Option<User>>>;
    fn get_user_by_username(&self, username: &str)
    -> impl Future<Output = Result<Option<User>>>;
    fn update_profile(
        &self,
        caller: &User,
        user_id: i64,
        update: &ProfileUpdate,
    ) -> impl Future<Output = Result<User>>;
}

/// Manager-side roster operations.
pub trait TeamRepository {
    fn get_team(&self, manager: &User) -> impl Future<Output = Result<Vec<User>>>;
    fn get_available_employees(&self) -> impl Future<Output = Result<Vec<User>>>;
    fn add_to_team(&self, manager: &User, employee_id: i64)
    -> impl Future<Output = Result<User>>;
    fn remove_from_team(
        &self,
        manager: &User,
        employee_id: i64,
    ) -> impl Future<Output = Result<User>>;
}

impl TryFrom<i64> for Role {
    type Error = Error;

    fn try_from(value: i64) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Role::Employee),
            1 => Ok(Role::Manager),
            2 => Ok(Role::Director),
            _ => Err(Error::Corrupt(format!("invalid role value: {value}"))),
        }
    }
}

impl From<Role> for i64 {
    fn from(role: Role) -> Self {
        match role {
            Role::Employee => 0,
            Role::Manager => 1,
            Role::Director => 2,
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "employee" => Ok(Role::Employee),
            "manager" => Ok(Role::Manager),
            "director" => Ok(Role::Director),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Role::Employee => "employee",
            Role::Manager => "manager",
            Role::Director => "director",
        };
        f.write_str(label)
    }
}
