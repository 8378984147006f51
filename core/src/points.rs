//! Points Distribution Engine.
//!
//! Two halves:
//!   - `calculate_distribution`: a pure projection of how the monthly pool
//!     would be split by rank. It never writes balances.
//!   - The monthly reset: on the first dashboard load of a new month every
//!     balance is zeroed and `points/lastReset` moves to the new month, in
//!     one guarded write.
//!
//! Store layout:
//!   points/lastReset    = "YYYY-MM"
//!   points/monthlyTotal = pool size
//!   points/settings     = {monthlyPoolSize, firstPlacePoints, ...}

use crate::{
    clock::{month_key, next_month_key},
    directory::{employee_path, points_path, Directory, Employee, EmployeeId, EMPLOYEES_ROOT},
    document::{read, to_value, DocumentStore, Guard, Updates},
    error::{FeedbackError, FeedbackResult},
    types::MonthKey,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const LAST_RESET_PATH:    &str = "points/lastReset";
pub const MONTHLY_TOTAL_PATH: &str = "points/monthlyTotal";
pub const SETTINGS_PATH:      &str = "points/settings";

/// Attempts at the guarded reset write before giving up.
pub const MAX_RESET_ATTEMPTS: u32 = 3;

// ── Settings ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PointsSettings {
    pub monthly_pool_size:   u32,
    pub first_place_points:  u32,
    pub second_place_points: u32,
    pub third_place_points:  u32,
}

impl Default for PointsSettings {
    fn default() -> Self {
        Self {
            monthly_pool_size:   100,
            first_place_points:  40,
            second_place_points: 30,
            third_place_points:  15,
        }
    }
}

impl PointsSettings {
    pub fn podium_total(&self) -> u32 {
        self.first_place_points
            .saturating_add(self.second_place_points)
            .saturating_add(self.third_place_points)
    }

    /// What is left of the pool after the top three.
    pub fn remaining_pool(&self) -> u32 {
        self.monthly_pool_size.saturating_sub(self.podium_total())
    }

    pub fn validate(&self) -> FeedbackResult<()> {
        if self.podium_total() > self.monthly_pool_size {
            return Err(FeedbackError::InvalidSettings {
                reason: format!(
                    "top 3 awards total {} but the monthly pool is {}",
                    self.podium_total(),
                    self.monthly_pool_size
                ),
            });
        }
        Ok(())
    }
}

// ── Distribution ───────────────────────────────────────────────────────────

/// Rank-based split of the monthly pool. Absent fields mean "no one
/// occupies that rank".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Distribution {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first:  Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub second: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub third:  Option<u32>,
    /// Award for each employee ranked 4th or lower.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub others: Option<u32>,
}

impl Distribution {
    /// Award for a 1-based rank. `None` when the rank is unoccupied.
    pub fn award_for_rank(&self, rank: usize) -> Option<u32> {
        match rank {
            0 => None,
            1 => self.first,
            2 => self.second,
            3 => self.third,
            _ => self.others,
        }
    }

    /// Total handed out across `employee_count` ranks.
    pub fn total_awarded(&self, employee_count: usize) -> u64 {
        (1..=employee_count)
            .filter_map(|rank| self.award_for_rank(rank))
            .map(u64::from)
            .sum()
    }
}

/// Split the pool across `employee_count` ranks.
///
/// Ranks 4 and below share `remaining_pool` equally, floored; the
/// remainder of that division is not redistributed.
pub fn calculate_distribution(employee_count: usize, settings: &PointsSettings) -> Distribution {
    let mut distribution = Distribution::default();
    if employee_count >= 1 {
        distribution.first = Some(settings.first_place_points);
    }
    if employee_count >= 2 {
        distribution.second = Some(settings.second_place_points);
    }
    if employee_count >= 3 {
        distribution.third = Some(settings.third_place_points);
    }
    if employee_count > 3 {
        let rest = (employee_count - 3) as u64;
        let share = u64::from(settings.remaining_pool()) / rest;
        distribution.others = Some(share as u32);
    }
    distribution
}

/// Order by descending balance. The sort is stable, so ties keep the
/// directory's enumeration order (key order).
pub fn rank_employees(mut employees: Vec<Employee>) -> Vec<Employee> {
    employees.sort_by(|a, b| b.points.cmp(&a.points));
    employees
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardRow {
    pub rank:            usize,
    pub employee:        Employee,
    /// Award this rank would receive from the current distribution.
    pub projected_award: Option<u32>,
}

// ── Reset ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResetOutcome {
    /// No marker existed; seeded it without touching balances.
    Initialized { month: MonthKey },
    /// Month rolled over; balances zeroed.
    Reset { from: MonthKey, to: MonthKey, employees: usize },
    /// Already reset this month.
    Unchanged { month: MonthKey },
}

pub struct PointsEngine<'a> {
    store: &'a dyn DocumentStore,
}

impl<'a> PointsEngine<'a> {
    pub fn new(store: &'a dyn DocumentStore) -> Self {
        Self { store }
    }

    pub fn load_settings(&self) -> FeedbackResult<PointsSettings> {
        Ok(read(self.store, SETTINGS_PATH)?.unwrap_or_default())
    }

    /// Validate and persist settings; the live pool size follows.
    pub fn save_settings(&self, settings: &PointsSettings) -> FeedbackResult<()> {
        settings.validate()?;
        let mut updates = Updates::new();
        updates.insert(SETTINGS_PATH.to_string(), to_value(settings)?);
        updates.insert(MONTHLY_TOTAL_PATH.to_string(), json!(settings.monthly_pool_size));
        self.store.update(&updates)?;
        log::info!(
            "points: settings saved (pool={}, podium={}/{}/{})",
            settings.monthly_pool_size,
            settings.first_place_points,
            settings.second_place_points,
            settings.third_place_points
        );
        Ok(())
    }

    pub fn last_reset(&self) -> FeedbackResult<Option<MonthKey>> {
        read(self.store, LAST_RESET_PATH)
    }

    pub fn monthly_total(&self) -> FeedbackResult<Option<u32>> {
        read(self.store, MONTHLY_TOTAL_PATH)
    }

    pub fn distribution(&self) -> FeedbackResult<Distribution> {
        let employees = Directory::new(self.store).list()?;
        Ok(calculate_distribution(employees.len(), &self.load_settings()?))
    }

    pub fn leaderboard(&self) -> FeedbackResult<Vec<LeaderboardRow>> {
        let ranked = rank_employees(Directory::new(self.store).list()?);
        let distribution = calculate_distribution(ranked.len(), &self.load_settings()?);
        Ok(ranked
            .into_iter()
            .enumerate()
            .map(|(i, employee)| LeaderboardRow {
                rank: i + 1,
                projected_award: distribution.award_for_rank(i + 1),
                employee,
            })
            .collect())
    }

    /// Reset balances if `now` falls in a different month from the marker.
    ///
    /// A lost write is re-evaluated from the marker: if another caller
    /// already reset this month the outcome is `Unchanged`, otherwise the
    /// reset is retried against the current directory.
    pub fn reset_if_month_rolled(&self, now: DateTime<Utc>) -> FeedbackResult<ResetOutcome> {
        let month = month_key(now);
        for attempt in 1..=MAX_RESET_ATTEMPTS {
            match self.last_reset()? {
                None => {
                    let settings = self.load_settings()?;
                    let mut updates = Updates::new();
                    updates.insert(LAST_RESET_PATH.to_string(), json!(month));
                    updates.insert(MONTHLY_TOTAL_PATH.to_string(), json!(settings.monthly_pool_size));
                    if !self.store.update_if(&[Guard::absent(LAST_RESET_PATH)], &updates)? {
                        log::debug!("points: marker seeded concurrently");
                        continue;
                    }
                    log::info!("points: initialised monthly marker at {month}");
                    return Ok(ResetOutcome::Initialized { month });
                }
                Some(last) if last == month => {
                    if attempt > 1 {
                        log::debug!("points: reset for {month} already applied by another caller");
                    }
                    return Ok(ResetOutcome::Unchanged { month });
                }
                Some(last) => {
                    let guard = Guard::equals(LAST_RESET_PATH, json!(last));
                    if let Some(employees) = self.write_reset(&month, Some(guard))? {
                        log::info!("points: monthly reset {last} -> {month} ({employees} balances zeroed)");
                        return Ok(ResetOutcome::Reset { from: last, to: month, employees });
                    }
                    log::warn!("points: reset write contention (attempt {attempt}/{MAX_RESET_ATTEMPTS})");
                }
            }
        }
        Err(FeedbackError::Conflict { path: LAST_RESET_PATH.to_string(), attempts: MAX_RESET_ATTEMPTS })
    }

    /// Opportunistic variant for page loads: failures are logged, never
    /// returned, so rendering is not blocked.
    pub fn check_monthly_reset(&self, now: DateTime<Utc>) -> Option<ResetOutcome> {
        match self.reset_if_month_rolled(now) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                log::error!("points: monthly reset check failed: {e}");
                None
            }
        }
    }

    /// Zero every balance and stamp the marker with the month of `now`.
    /// Unconditional: this is also the administrator's "reset all".
    pub fn reset_monthly_points(&self, now: DateTime<Utc>) -> FeedbackResult<usize> {
        let month = month_key(now);
        for attempt in 1..=MAX_RESET_ATTEMPTS {
            if let Some(count) = self.write_reset(&month, None)? {
                log::info!("points: all balances reset ({count} employees), marker now {month}");
                return Ok(count);
            }
            log::warn!("points: reset write contention (attempt {attempt}/{MAX_RESET_ATTEMPTS})");
        }
        Err(FeedbackError::Conflict { path: EMPLOYEES_ROOT.to_string(), attempts: MAX_RESET_ATTEMPTS })
    }

    pub fn reset_employee_points(&self, id: &EmployeeId) -> FeedbackResult<()> {
        Directory::new(self.store).require(id)?;
        self.store.set(&points_path(id), json!(0))?;
        log::info!("points: balance reset for {id}");
        Ok(())
    }

    pub fn next_reset_month(&self, now: DateTime<Utc>) -> MonthKey {
        next_month_key(now)
    }

    /// One atomic write of all zeroed balances plus marker and pool.
    /// Each zeroed employee must still carry the name we read, so a
    /// concurrent delete fails the write instead of leaving a stray
    /// balance behind. Returns `None` when any guard failed.
    fn write_reset(&self, month: &str, marker: Option<Guard>) -> FeedbackResult<Option<usize>> {
        let employees = Directory::new(self.store).list()?;
        let settings = self.load_settings()?;

        let mut guards: Vec<Guard> = marker.into_iter().collect();
        let mut updates = Updates::new();
        for employee in &employees {
            guards.push(Guard::equals(format!("{}/name", employee_path(&employee.id)), json!(employee.name)));
            updates.insert(points_path(&employee.id), json!(0));
        }
        updates.insert(LAST_RESET_PATH.to_string(), json!(month));
        updates.insert(MONTHLY_TOTAL_PATH.to_string(), json!(settings.monthly_pool_size));

        if !self.store.update_if(&guards, &updates)? {
            return Ok(None);
        }
        Ok(Some(employees.len()))
    }
}
