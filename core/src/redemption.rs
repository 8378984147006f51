//! Code Redemption Flow.
//!
//! STATES: unissued → issued (unused) → redeemed
//!                         └────────→ deleted
//!
//! RULES:
//!   - Only an unused code can be redeemed or deleted.
//!   - Redeeming applies three effects in ONE guarded store write:
//!       1. the code is marked used (or removed, per `RedemptionDisposal`)
//!       2. `feedback/{code id}` is written
//!       3. the rated employee's balance grows by `points_for_rating`
//!   - The write is conditional on the code still being unused and the
//!     balance still holding the value we read. A code consumed by a
//!     concurrent redemption fails the guard and is reported as such;
//!     a balance moved by an unrelated redemption is retried.

use crate::{
    codes::{code_path, CodeRegistry, RedemptionCode, StoredCode},
    directory::{points_path, Directory, EmployeeId},
    document::{to_value, DocumentStore, Guard, Updates},
    error::{FeedbackError, FeedbackResult},
    ledger::{feedback_path, FeedbackEntry},
    rng::CodeGenerator,
    types::{Rating, TimestampMs},
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Attempts at the guarded redemption write before giving up.
pub const MAX_REDEEM_ATTEMPTS: u32 = 3;

/// What happens to a code once it has been redeemed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedemptionDisposal {
    /// Keep the code with `used = true`. A second redemption reports
    /// `AlreadyUsed`.
    #[default]
    Mark,
    /// Remove the code. A second redemption reports `NotFound`.
    Delete,
}

/// Points credited for a rating: 1★ → 1, 2★ → 1, 3★ → 2, 4★ → 3, 5★ → 4.
pub fn points_for_rating(rating: Rating) -> u32 {
    u32::from(rating).saturating_sub(1).max(1)
}

/// Narrow a submitted rating to a star count, or `InvalidRating`.
pub fn parse_rating(raw: f64) -> FeedbackResult<Rating> {
    if raw.fract() != 0.0 || !(1.0..=5.0).contains(&raw) {
        return Err(FeedbackError::InvalidRating { rating: raw });
    }
    Ok(raw as Rating)
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedeemRequest {
    pub customer_number: String,
    /// As submitted. Any JSON number is accepted here and checked by
    /// `parse_rating`, so a bad value surfaces as `InvalidRating`.
    pub rating:          f64,
    #[serde(default)]
    pub comment:         String,
    /// Employee the customer chose to rate; defaults to the issuer.
    #[serde(default)]
    pub employee:        Option<EmployeeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Redemption {
    pub feedback_id:    String,
    pub entry:          FeedbackEntry,
    pub points_awarded: u32,
    pub new_balance:    u32,
}

pub struct RedemptionFlow<'a> {
    store:       &'a dyn DocumentStore,
    disposal:    RedemptionDisposal,
    code_length: usize,
}

impl<'a> RedemptionFlow<'a> {
    pub fn new(store: &'a dyn DocumentStore, disposal: RedemptionDisposal, code_length: usize) -> Self {
        Self { store, disposal, code_length }
    }

    pub fn issue(
        &self,
        generator:       &mut CodeGenerator,
        employee_id:     &EmployeeId,
        customer_name:   &str,
        customer_number: &str,
        now:             TimestampMs,
    ) -> FeedbackResult<StoredCode> {
        let customer_name = customer_name.trim();
        let customer_number = customer_number.trim();
        if customer_name.is_empty() {
            return Err(FeedbackError::MissingField { field: "customer_name" });
        }
        if customer_number.is_empty() {
            return Err(FeedbackError::MissingField { field: "customer_number" });
        }
        let employee = Directory::new(self.store).require(employee_id)?;

        let record = RedemptionCode {
            code:            generator.next_token(self.code_length),
            employee_id:     employee.id,
            employee_name:   employee.name,
            customer_name:   customer_name.to_string(),
            customer_number: customer_number.to_string(),
            used:            false,
            created_at:      now,
        };
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.store.set(&code_path(&id), to_value(&record)?)?;
        log::info!("redemption: {} issued code {} for {}", record.employee_id, record.code, record.customer_name);
        Ok(StoredCode { id, record })
    }

    /// Look up an unused code by token.
    pub fn validate(&self, token: &str) -> FeedbackResult<StoredCode> {
        let matches = CodeRegistry::new(self.store).find_by_token(token)?;
        if let Some(unused) = matches.iter().find(|c| !c.record.used) {
            return Ok(unused.clone());
        }
        if matches.is_empty() {
            Err(FeedbackError::not_found("feedback code", token))
        } else {
            Err(FeedbackError::AlreadyUsed { code: token.to_string() })
        }
    }

    pub fn redeem(&self, token: &str, request: &RedeemRequest, now: TimestampMs) -> FeedbackResult<Redemption> {
        let mut contended = String::new();
        for attempt in 1..=MAX_REDEEM_ATTEMPTS {
            let code = self.code_for_customer(token, &request.customer_number)?;
            let rating = parse_rating(request.rating)?;

            let target_id = request
                .employee
                .clone()
                .unwrap_or_else(|| code.record.employee_id.clone());
            let employee = Directory::new(self.store).require(&target_id)?;
            let balance_path = points_path(&target_id);
            let observed_balance = self.store.get(&balance_path)?;

            let current_balance = observed_balance
                .as_ref()
                .and_then(Value::as_u64)
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(0);
            let awarded = points_for_rating(rating);
            let new_balance = current_balance.saturating_add(awarded);
            let entry = FeedbackEntry {
                employee_id:     target_id.clone(),
                employee_name:   employee.name.clone(),
                customer_name:   code.record.customer_name.clone(),
                customer_number: request.customer_number.clone(),
                rating,
                comment:         request.comment.trim().to_string(),
                created_at:      now,
            };

            let mut guards = vec![Guard { path: balance_path.clone(), expected: observed_balance }];
            let mut updates = Updates::new();
            match self.disposal {
                RedemptionDisposal::Mark => {
                    guards.push(Guard::equals(format!("{}/used", code.path()), json!(false)));
                    updates.insert(format!("{}/used", code.path()), json!(true));
                }
                RedemptionDisposal::Delete => {
                    guards.push(Guard::equals(format!("{}/code", code.path()), json!(token)));
                    updates.insert(code.path(), Value::Null);
                }
            }
            updates.insert(feedback_path(&code.id), to_value(&entry)?);
            updates.insert(balance_path, json!(new_balance));

            if self.store.update_if(&guards, &updates)? {
                log::info!(
                    "redemption: code {token} redeemed, {target_id} rated {rating}★ (+{awarded}, balance {new_balance})"
                );
                return Ok(Redemption { feedback_id: code.id, entry, points_awarded: awarded, new_balance });
            }
            log::warn!("redemption: write contention on code {token} (attempt {attempt}/{MAX_REDEEM_ATTEMPTS})");
            contended = code.path();
        }
        Err(FeedbackError::Conflict { path: contended, attempts: MAX_REDEEM_ATTEMPTS })
    }

    /// The unused code under `token` issued to this customer. Tokens are
    /// not unique, so every unused match is considered before reporting
    /// `NumberMismatch`.
    fn code_for_customer(&self, token: &str, customer_number: &str) -> FeedbackResult<StoredCode> {
        let matches = CodeRegistry::new(self.store).find_by_token(token)?;
        if matches.is_empty() {
            return Err(FeedbackError::not_found("feedback code", token));
        }
        let mut unused = matches.into_iter().filter(|c| !c.record.used).peekable();
        if unused.peek().is_none() {
            return Err(FeedbackError::AlreadyUsed { code: token.to_string() });
        }
        unused
            .find(|c| c.record.customer_number == customer_number)
            .ok_or(FeedbackError::NumberMismatch)
    }

    /// Remove an unused code. Only its issuer may do so.
    pub fn delete(&self, token: &str, requester: &EmployeeId) -> FeedbackResult<()> {
        let matches = CodeRegistry::new(self.store).find_by_token(token)?;
        let code = matches
            .iter()
            .find(|c| &c.record.employee_id == requester && !c.record.used)
            .or_else(|| matches.first())
            .ok_or_else(|| FeedbackError::not_found("feedback code", token))?;

        if code.record.used {
            return Err(FeedbackError::forbidden("cannot delete a used feedback code"));
        }
        if &code.record.employee_id != requester {
            return Err(FeedbackError::NotOwner {
                requester: requester.to_string(),
                code:      token.to_string(),
            });
        }

        let mut updates = Updates::new();
        updates.insert(code.path(), Value::Null);
        let guard = Guard::equals(format!("{}/used", code.path()), json!(false));
        if !self.store.update_if(&[guard], &updates)? {
            // Redeemed or removed between the read and the write.
            return match CodeRegistry::new(self.store).get(&code.id)? {
                Some(_) => Err(FeedbackError::forbidden("cannot delete a used feedback code")),
                None => Err(FeedbackError::not_found("feedback code", token)),
            };
        }
        log::info!("redemption: {requester} deleted unused code {token}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_points_table() {
        let awarded: Vec<u32> = (1..=5).map(points_for_rating).collect();
        assert_eq!(awarded, vec![1, 1, 2, 3, 4]);
    }

    #[test]
    fn ratings_outside_one_to_five_rejected() {
        assert_eq!(parse_rating(5.0).unwrap(), 5);
        for raw in [0.0, 6.0, 300.0, -1.0, 4.5, f64::NAN] {
            assert!(
                matches!(parse_rating(raw), Err(FeedbackError::InvalidRating { .. })),
                "expected {raw} to be rejected"
            );
        }
    }
}
