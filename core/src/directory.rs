//! Employee Directory: `employees/{id} = {name, password, points}`.
//!
//! The id is the employee's email address, normalised and with `.`
//! replaced by `,` so it can be used as a store key. The substitution is
//! reversible because `,` is rejected in the input address.
//!
//! Administrators create, edit and delete records (the role check happens
//! in `FeedbackApp`). Employees may edit their own name and password
//! through `update_profile`. Deleting an employee leaves their codes and
//! feedback in place.

use crate::{
    document::{read, read_children, to_value, DocumentStore, Guard, Updates},
    error::{FeedbackError, FeedbackResult},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

pub const EMPLOYEES_ROOT: &str = "employees";

// ── Identifier ─────────────────────────────────────────────────────────────

/// Store key for an employee, derived from their email address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmployeeId(String);

impl EmployeeId {
    /// Wrap a key read back from the store. Keys are trusted: they were
    /// produced by `normalize_email` when the record was created.
    pub fn from_key(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The contact address this id was derived from.
    pub fn email(&self) -> String {
        self.0.replace(',', ".")
    }
}

impl fmt::Display for EmployeeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validate an email address and derive its store key.
pub fn normalize_email(raw: &str) -> FeedbackResult<EmployeeId> {
    let email = raw.trim().to_lowercase();
    let invalid = |reason: &'static str| FeedbackError::InvalidEmail { email: raw.to_string(), reason };

    if email.is_empty() {
        return Err(invalid("empty"));
    }
    if email.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(invalid("contains whitespace"));
    }
    if email.contains([',', '/', '#', '$', '[', ']']) {
        return Err(invalid("contains a reserved character"));
    }
    let Some((local, domain)) = email.split_once('@') else {
        return Err(invalid("missing '@'"));
    };
    if local.is_empty() || domain.contains('@') {
        return Err(invalid("expected exactly one '@' with a local part"));
    }
    if !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') || domain.contains("..") {
        return Err(invalid("domain must contain a dot-separated host"));
    }
    if local.starts_with('.') || local.ends_with('.') || local.contains("..") {
        return Err(invalid("local part has an empty dot segment"));
    }
    Ok(EmployeeId(email.replace('.', ",")))
}

// ── Records ────────────────────────────────────────────────────────────────

/// Stored shape of an employee document.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EmployeeRecord {
    #[serde(default)]
    name: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    points: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Employee {
    pub id:       EmployeeId,
    pub email:    String,
    pub name:     String,
    #[serde(skip_serializing)]
    pub password: String,
    pub points:   u32,
}

impl Employee {
    fn from_record(id: EmployeeId, record: EmployeeRecord) -> Self {
        Self {
            email: id.email(),
            id,
            name: record.name,
            password: record.password,
            points: record.points,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewEmployee {
    pub email:    String,
    pub name:     String,
    pub password: String,
}

/// Admin edit. `None` leaves a field untouched; the id cannot change.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmployeeUpdate {
    pub name:     Option<String>,
    pub password: Option<String>,
    pub points:   Option<u32>,
}

/// Employee self-service edit of their own profile.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    pub name:             String,
    #[serde(default)]
    pub current_password: Option<String>,
    #[serde(default)]
    pub new_password:     Option<String>,
    #[serde(default)]
    pub confirm_password: Option<String>,
}

pub fn employee_path(id: &EmployeeId) -> String {
    format!("{EMPLOYEES_ROOT}/{id}")
}

pub fn points_path(id: &EmployeeId) -> String {
    format!("{EMPLOYEES_ROOT}/{id}/points")
}

fn required(value: &str, field: &'static str) -> FeedbackResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(FeedbackError::MissingField { field });
    }
    Ok(trimmed.to_string())
}

// ── Directory ──────────────────────────────────────────────────────────────

pub struct Directory<'a> {
    store: &'a dyn DocumentStore,
}

impl<'a> Directory<'a> {
    pub fn new(store: &'a dyn DocumentStore) -> Self {
        Self { store }
    }

    pub fn create(&self, new: &NewEmployee) -> FeedbackResult<Employee> {
        let id = normalize_email(&new.email)?;
        let record = EmployeeRecord {
            name:     required(&new.name, "name")?,
            password: required(&new.password, "password")?,
            points:   0,
        };

        // A record without a name is a stray balance, not an employee; the
        // write replaces it.
        let path = employee_path(&id);
        let mut updates = Updates::new();
        updates.insert(path.clone(), to_value(&record)?);
        if !self.store.update_if(&[Guard::absent(format!("{path}/name"))], &updates)? {
            return Err(FeedbackError::DuplicateEmail { email: id.email() });
        }
        log::info!("directory: created employee {id}");
        Ok(Employee::from_record(id, record))
    }

    /// `None` for absent and nameless records alike.
    pub fn get(&self, id: &EmployeeId) -> FeedbackResult<Option<Employee>> {
        let record: Option<EmployeeRecord> = read(self.store, &employee_path(id))?;
        Ok(record
            .filter(|r| !r.name.is_empty())
            .map(|r| Employee::from_record(id.clone(), r)))
    }

    pub fn require(&self, id: &EmployeeId) -> FeedbackResult<Employee> {
        self.get(id)?
            .ok_or_else(|| FeedbackError::not_found("employee", id.as_str()))
    }

    /// Every employee with a display name, in key order.
    /// Nameless records (e.g. a stray `points` leaf left by a concurrent
    /// delete) are not employees.
    pub fn list(&self) -> FeedbackResult<Vec<Employee>> {
        let records: Vec<(String, EmployeeRecord)> = read_children(self.store, EMPLOYEES_ROOT)?;
        Ok(records
            .into_iter()
            .filter(|(_, r)| !r.name.is_empty())
            .map(|(key, r)| Employee::from_record(EmployeeId::from_key(key), r))
            .collect())
    }

    pub fn update(&self, id: &EmployeeId, edit: &EmployeeUpdate) -> FeedbackResult<Employee> {
        let path = employee_path(id);
        let raw = self
            .store
            .get(&path)?
            .ok_or_else(|| FeedbackError::not_found("employee", id.as_str()))?;
        let record: EmployeeRecord = serde_json::from_value(raw.clone())?;
        if record.name.is_empty() {
            return Err(FeedbackError::not_found("employee", id.as_str()));
        }
        let current = Employee::from_record(id.clone(), record);

        let mut updated = current.clone();
        let mut updates = Updates::new();
        if let Some(name) = &edit.name {
            updated.name = required(name, "name")?;
            updates.insert(format!("{path}/name"), json!(updated.name));
        }
        if let Some(password) = &edit.password {
            updated.password = required(password, "password")?;
            updates.insert(format!("{path}/password"), json!(updated.password));
        }
        if let Some(points) = edit.points {
            updated.points = points;
            updates.insert(format!("{path}/points"), json!(points));
        }
        if updates.is_empty() {
            return Ok(current);
        }

        // The record must still be exactly the one we read.
        if !self.store.update_if(&[Guard::equals(path.clone(), raw)], &updates)? {
            return match self.get(id)? {
                None => Err(FeedbackError::not_found("employee", id.as_str())),
                Some(_) => Err(FeedbackError::Conflict { path, attempts: 1 }),
            };
        }
        log::info!("directory: updated employee {id}");
        Ok(updated)
    }

    pub fn delete(&self, id: &EmployeeId) -> FeedbackResult<()> {
        self.require(id)?;
        self.store.remove(&employee_path(id))?;
        log::info!("directory: deleted employee {id} (codes and feedback retained)");
        Ok(())
    }

    pub fn authenticate(&self, email: &str, password: &str) -> FeedbackResult<Employee> {
        let id = normalize_email(email).map_err(|_| FeedbackError::InvalidCredentials)?;
        match self.get(&id)? {
            Some(employee) if !employee.password.is_empty() && employee.password == password => Ok(employee),
            _ => {
                log::debug!("directory: rejected login for {id}");
                Err(FeedbackError::InvalidCredentials)
            }
        }
    }

    pub fn update_profile(&self, id: &EmployeeId, profile: &ProfileUpdate) -> FeedbackResult<Employee> {
        let name = required(&profile.name, "name")?;
        let current = self.require(id)?;

        let new_password = profile.new_password.as_deref().filter(|p| !p.is_empty());
        if let Some(new_password) = new_password {
            if profile.confirm_password.as_deref() != Some(new_password) {
                return Err(FeedbackError::PasswordConfirmationMismatch);
            }
            match profile.current_password.as_deref() {
                None | Some("") => return Err(FeedbackError::MissingField { field: "current_password" }),
                Some(given) if given != current.password => return Err(FeedbackError::InvalidCredentials),
                Some(_) => {}
            }
        }

        self.update(
            id,
            &EmployeeUpdate {
                name:     Some(name),
                password: new_password.map(str::to_string),
                points:   None,
            },
        )
    }
}
