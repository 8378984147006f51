//! Code Registry: `codes/{id}`, single-use feedback codes.
//!
//! A code binds a customer (name + customer number) to the employee who
//! issued it. The customer number doubles as the shared secret checked
//! at redemption.

use crate::{
    directory::EmployeeId,
    document::{read, read_children, DocumentStore},
    error::FeedbackResult,
    types::{RecordId, TimestampMs},
};
use serde::{Deserialize, Serialize};

pub const CODES_ROOT: &str = "codes";

pub fn code_path(id: &str) -> String {
    format!("{CODES_ROOT}/{id}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionCode {
    pub code:            String,
    pub employee_id:     EmployeeId,
    #[serde(default)]
    pub employee_name:   String,
    pub customer_name:   String,
    pub customer_number: String,
    #[serde(default)]
    pub used:            bool,
    pub created_at:      TimestampMs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeState {
    Unused,
    Redeemed,
}

/// A code together with the store key it lives under.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredCode {
    pub id:     RecordId,
    #[serde(flatten)]
    pub record: RedemptionCode,
}

impl StoredCode {
    pub fn state(&self) -> CodeState {
        if self.record.used { CodeState::Redeemed } else { CodeState::Unused }
    }

    pub fn path(&self) -> String {
        code_path(&self.id)
    }
}

/// Customer-facing URL for a code.
pub fn feedback_link(base_url: &str, token: &str) -> String {
    format!("{}/feedback/{token}", base_url.trim_end_matches('/'))
}

/// Text an employee sends to the customer along with the link.
pub fn share_message(base_url: &str, token: &str, customer_name: &str) -> String {
    format!(
        "Hello {customer_name}, please provide your feedback for our service: {}",
        feedback_link(base_url, token)
    )
}

pub struct CodeRegistry<'a> {
    store: &'a dyn DocumentStore,
}

impl<'a> CodeRegistry<'a> {
    pub fn new(store: &'a dyn DocumentStore) -> Self {
        Self { store }
    }

    pub fn get(&self, id: &str) -> FeedbackResult<Option<StoredCode>> {
        let record: Option<RedemptionCode> = read(self.store, &code_path(id))?;
        Ok(record.map(|record| StoredCode { id: id.to_string(), record }))
    }

    pub fn all(&self) -> FeedbackResult<Vec<StoredCode>> {
        Ok(read_children::<RedemptionCode>(self.store, CODES_ROOT)?
            .into_iter()
            .map(|(id, record)| StoredCode { id, record })
            .collect())
    }

    /// Every stored code whose token equals `token`, in key order.
    /// Tokens are not checked for uniqueness at issue time, so more than
    /// one match is possible.
    pub fn find_by_token(&self, token: &str) -> FeedbackResult<Vec<StoredCode>> {
        let matches: Vec<StoredCode> = self
            .all()?
            .into_iter()
            .filter(|c| c.record.code == token)
            .collect();
        log::debug!("codes: {} match(es) for token {token}", matches.len());
        Ok(matches)
    }

    /// Codes issued by `employee`, newest first.
    pub fn codes_for_employee(&self, employee: &EmployeeId) -> FeedbackResult<Vec<StoredCode>> {
        let mut codes: Vec<StoredCode> = self
            .all()?
            .into_iter()
            .filter(|c| &c.record.employee_id == employee)
            .collect();
        codes.sort_by(|a, b| b.record.created_at.cmp(&a.record.created_at));
        Ok(codes)
    }
}
