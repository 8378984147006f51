//! Feedback Ledger: `feedback/{id}`, one entry per redeemed code.
//!
//! Entries are written only by the redemption flow, keyed by the id of
//! the code that produced them, and never modified afterwards.

use crate::{
    directory::EmployeeId,
    document::{read, read_children, DocumentStore},
    error::FeedbackResult,
    types::{Rating, RecordId, TimestampMs},
};
use serde::{Deserialize, Serialize};

pub const FEEDBACK_ROOT: &str = "feedback";

pub fn feedback_path(id: &str) -> String {
    format!("{FEEDBACK_ROOT}/{id}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackEntry {
    pub employee_id:     EmployeeId,
    #[serde(default)]
    pub employee_name:   String,
    pub customer_name:   String,
    pub customer_number: String,
    pub rating:          Rating,
    #[serde(default)]
    pub comment:         String,
    pub created_at:      TimestampMs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StarCount {
    pub star:    Rating,
    pub count:   usize,
    /// Whole-percent share of all entries, rounded half away from zero.
    pub percent: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatingSummary {
    pub total:   usize,
    pub average: f64,
    /// One bucket per star, 5 down to 1.
    pub counts:  Vec<StarCount>,
}

/// Aggregate ratings for display.
pub fn summarize(entries: &[FeedbackEntry]) -> RatingSummary {
    let total = entries.len();
    let average = if total == 0 {
        0.0
    } else {
        entries.iter().map(|e| f64::from(e.rating)).sum::<f64>() / total as f64
    };

    let counts = (1..=5u8)
        .rev()
        .map(|star| {
            let count = entries.iter().filter(|e| e.rating == star).count();
            let percent = if total == 0 {
                0
            } else {
                (count as f64 / total as f64 * 100.0).round() as u32
            };
            StarCount { star, count, percent }
        })
        .collect();

    RatingSummary { total, average, counts }
}

pub struct Ledger<'a> {
    store: &'a dyn DocumentStore,
}

impl<'a> Ledger<'a> {
    pub fn new(store: &'a dyn DocumentStore) -> Self {
        Self { store }
    }

    pub fn get(&self, id: &str) -> FeedbackResult<Option<FeedbackEntry>> {
        read(self.store, &feedback_path(id))
    }

    /// All entries, oldest first.
    pub fn all(&self) -> FeedbackResult<Vec<(RecordId, FeedbackEntry)>> {
        let mut entries: Vec<(RecordId, FeedbackEntry)> = read_children(self.store, FEEDBACK_ROOT)?;
        entries.sort_by_key(|(_, e)| e.created_at);
        Ok(entries)
    }

    /// Entries about one employee, newest first.
    pub fn entries_for_employee(&self, employee: &EmployeeId) -> FeedbackResult<Vec<FeedbackEntry>> {
        let mut entries: Vec<FeedbackEntry> = read_children::<FeedbackEntry>(self.store, FEEDBACK_ROOT)?
            .into_iter()
            .map(|(_, e)| e)
            .filter(|e| &e.employee_id == employee)
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }

    pub fn count(&self) -> FeedbackResult<usize> {
        Ok(match self.store.get(FEEDBACK_ROOT)? {
            Some(serde_json::Value::Object(map)) => map.len(),
            _ => 0,
        })
    }
}
