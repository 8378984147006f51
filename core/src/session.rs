//! Session / Role Gate.
//!
//! Roles are coarse: an administrator (one shared password), an employee
//! (directory credentials), or an anonymous visitor. A `Session` is plain
//! data and is not signed; whoever persists it can forge it.

use crate::{
    config::AppConfig,
    directory::{Directory, Employee, EmployeeId},
    document::DocumentStore,
    error::{FeedbackError, FeedbackResult},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Employee,
    Anonymous,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id:    String,
    pub email: String,
    #[serde(default)]
    pub name:  Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub role: Role,
    pub user: Option<SessionUser>,
}

impl Session {
    pub fn anonymous() -> Self {
        Self { role: Role::Anonymous, user: None }
    }

    fn admin() -> Self {
        Self {
            role: Role::Admin,
            user: Some(SessionUser { id: "admin".into(), email: "admin".into(), name: None }),
        }
    }

    fn employee(employee: &Employee) -> Self {
        Self {
            role: Role::Employee,
            user: Some(SessionUser {
                id:    employee.id.to_string(),
                email: employee.email.clone(),
                name:  Some(employee.name.clone()),
            }),
        }
    }

    pub fn require_admin(&self) -> FeedbackResult<()> {
        match self.role {
            Role::Admin => Ok(()),
            _ => Err(FeedbackError::forbidden("administrator access required")),
        }
    }

    /// The signed-in employee's id, or `Forbidden`.
    pub fn require_employee(&self) -> FeedbackResult<EmployeeId> {
        match (self.role, &self.user) {
            (Role::Employee, Some(user)) => Ok(EmployeeId::from_key(user.id.clone())),
            _ => Err(FeedbackError::forbidden("employee access required")),
        }
    }

    pub fn can_access(&self, route: &Route) -> bool {
        match route.required_role() {
            None => true,
            Some(role) => self.role == role,
        }
    }
}

pub fn admin_login(password: &str, config: &AppConfig) -> FeedbackResult<Session> {
    if config.admin_password.is_empty() || password != config.admin_password {
        log::warn!("session: rejected admin login");
        return Err(FeedbackError::InvalidCredentials);
    }
    log::info!("session: admin signed in");
    Ok(Session::admin())
}

pub fn employee_login(store: &dyn DocumentStore, email: &str, password: &str) -> FeedbackResult<Session> {
    let employee = Directory::new(store).authenticate(email, password)?;
    log::info!("session: {} signed in", employee.id);
    Ok(Session::employee(&employee))
}

// ── Routes ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Dashboard,
    AdminLogin,
    /// `/admin` and everything beneath it; holds the remainder.
    Admin(String),
    EmployeeLogin,
    /// `/employee` and everything beneath it; holds the remainder.
    Employee(String),
    Feedback { code: String },
    NotFound,
}

impl Route {
    pub fn parse(path: &str) -> Self {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let trimmed = path.trim_matches('/');
        let mut parts = trimmed.splitn(2, '/');
        let head = parts.next().unwrap_or_default();
        let rest = parts.next().unwrap_or_default().to_string();

        match (head, rest.as_str()) {
            ("", _)                 => Self::Dashboard,
            ("admin", "login")      => Self::AdminLogin,
            ("admin", _)            => Self::Admin(rest),
            ("employee", "login")   => Self::EmployeeLogin,
            ("employee", _)         => Self::Employee(rest),
            ("feedback", code) if !code.is_empty() && !code.contains('/') => {
                Self::Feedback { code: code.to_string() }
            }
            _                       => Self::NotFound,
        }
    }

    /// Role needed to open this route; `None` for public routes.
    pub fn required_role(&self) -> Option<Role> {
        match self {
            Self::Admin(_)    => Some(Role::Admin),
            Self::Employee(_) => Some(Role::Employee),
            Self::Dashboard
            | Self::AdminLogin
            | Self::EmployeeLogin
            | Self::Feedback { .. }
            | Self::NotFound  => None,
        }
    }
}
