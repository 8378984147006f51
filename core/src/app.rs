//! The application facade. Wires the store, config, clock and code
//! generator together and puts the role gate in front of every operation.
//!
//! RULES:
//!   - Every admin operation starts with `session.require_admin()`.
//!   - Every employee operation acts on `session.require_employee()`'s id,
//!     never on an id supplied by the caller.
//!   - Public operations (dashboard, code validation, redemption) take no
//!     session.
//!   - The dashboard runs the opportunistic monthly reset before reading.

use crate::{
    clock::{timestamp_ms, Clock, FixedClock, SystemClock},
    codes::{feedback_link, share_message, CodeRegistry, StoredCode},
    config::AppConfig,
    directory::{Directory, Employee, EmployeeId, EmployeeUpdate, NewEmployee, ProfileUpdate},
    document::DocumentStore,
    error::FeedbackResult,
    ledger::{summarize, FeedbackEntry, Ledger, RatingSummary},
    points::{Distribution, LeaderboardRow, PointsEngine, PointsSettings, ResetOutcome},
    redemption::{RedeemRequest, Redemption, RedemptionFlow},
    rng::CodeGenerator,
    session::{self, Session},
    store::MemoryStore,
    types::{MonthKey, TimestampMs},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

pub struct FeedbackApp {
    store:     Box<dyn DocumentStore>,
    config:    AppConfig,
    clock:     Arc<dyn Clock>,
    generator: CodeGenerator,
}

// ── View types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub reset:        Option<ResetOutcome>,
    pub leaderboard:  Vec<LeaderboardRow>,
    pub distribution: Distribution,
    pub last_reset:   Option<MonthKey>,
    pub next_reset:   MonthKey,
}

#[derive(Debug, Clone, Serialize)]
pub struct IssuedCode {
    pub code:          StoredCode,
    pub link:          String,
    pub share_message: String,
}

/// What an anonymous customer sees for a valid code. The customer number
/// is the secret they must re-enter, so it is not echoed back.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodePreview {
    pub code:          String,
    pub employee_id:   EmployeeId,
    pub employee_name: String,
    pub customer_name: String,
    pub created_at:    TimestampMs,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmployeeStats {
    pub employee: Employee,
    pub summary:  RatingSummary,
    pub entries:  Vec<FeedbackEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectableEmployee {
    pub id:   EmployeeId,
    pub name: String,
}

impl FeedbackApp {
    pub fn new(
        store:     Box<dyn DocumentStore>,
        config:    AppConfig,
        clock:     Arc<dyn Clock>,
        generator: CodeGenerator,
    ) -> Self {
        Self { store, config, clock, generator }
    }

    /// Production wiring: system clock, entropy-seeded generator.
    pub fn build(store: Box<dyn DocumentStore>, config: AppConfig) -> Self {
        Self::new(store, config, Arc::new(SystemClock), CodeGenerator::from_entropy())
    }

    /// In-memory store, test config, clock fixed at 2026-10-16,
    /// generator seeded with 42.
    pub fn build_test() -> Self {
        Self::new(
            Box::new(MemoryStore::new()),
            AppConfig::default_test(),
            Arc::new(FixedClock::at_date(2026, 10, 16)),
            CodeGenerator::with_seed(42),
        )
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_store(mut self, store: Box<dyn DocumentStore>) -> Self {
        self.store = store;
        self
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn directory(&self) -> Directory<'_> {
        Directory::new(self.store())
    }

    fn points(&self) -> PointsEngine<'_> {
        PointsEngine::new(self.store())
    }

    fn redemption(&self) -> RedemptionFlow<'_> {
        RedemptionFlow::new(self.store(), self.config.redemption_disposal, self.config.code_length)
    }

    // ── Sessions ───────────────────────────────────────────────────────────

    pub fn login_admin(&self, password: &str) -> FeedbackResult<Session> {
        session::admin_login(password, &self.config)
    }

    pub fn login_employee(&self, email: &str, password: &str) -> FeedbackResult<Session> {
        session::employee_login(self.store(), email, password)
    }

    // ── Public ─────────────────────────────────────────────────────────────

    pub fn dashboard(&self) -> FeedbackResult<Dashboard> {
        let now = self.now();
        let points = self.points();
        let reset = points.check_monthly_reset(now);
        let leaderboard = points.leaderboard()?;
        let distribution = points.distribution()?;
        Ok(Dashboard {
            reset,
            leaderboard,
            distribution,
            last_reset: points.last_reset()?,
            next_reset: points.next_reset_month(now),
        })
    }

    pub fn validate_code(&self, token: &str) -> FeedbackResult<CodePreview> {
        let code = self.redemption().validate(token)?.record;
        Ok(CodePreview {
            code:          code.code,
            employee_id:   code.employee_id,
            employee_name: code.employee_name,
            customer_name: code.customer_name,
            created_at:    code.created_at,
        })
    }

    /// Employees a customer may pick when rating.
    pub fn selectable_employees(&self) -> FeedbackResult<Vec<SelectableEmployee>> {
        Ok(self
            .directory()
            .list()?
            .into_iter()
            .map(|e| SelectableEmployee { id: e.id, name: e.name })
            .collect())
    }

    pub fn redeem(&self, token: &str, request: &RedeemRequest) -> FeedbackResult<Redemption> {
        self.redemption().redeem(token, request, timestamp_ms(self.now()))
    }

    // ── Employee ───────────────────────────────────────────────────────────

    pub fn issue_code(
        &mut self,
        session:         &Session,
        customer_name:   &str,
        customer_number: &str,
    ) -> FeedbackResult<IssuedCode> {
        let employee_id = session.require_employee()?;
        let now = timestamp_ms(self.now());
        let flow = RedemptionFlow::new(self.store.as_ref(), self.config.redemption_disposal, self.config.code_length);
        let code = flow.issue(&mut self.generator, &employee_id, customer_name, customer_number, now)?;
        let base = &self.config.public_base_url;
        Ok(IssuedCode {
            link:          feedback_link(base, &code.record.code),
            share_message: share_message(base, &code.record.code, &code.record.customer_name),
            code,
        })
    }

    pub fn my_codes(&self, session: &Session) -> FeedbackResult<Vec<StoredCode>> {
        let employee_id = session.require_employee()?;
        CodeRegistry::new(self.store()).codes_for_employee(&employee_id)
    }

    pub fn delete_code(&self, session: &Session, token: &str) -> FeedbackResult<()> {
        let employee_id = session.require_employee()?;
        self.redemption().delete(token, &employee_id)
    }

    pub fn my_stats(&self, session: &Session) -> FeedbackResult<EmployeeStats> {
        let employee_id = session.require_employee()?;
        let employee = self.directory().require(&employee_id)?;
        let entries = Ledger::new(self.store()).entries_for_employee(&employee_id)?;
        Ok(EmployeeStats { summary: summarize(&entries), employee, entries })
    }

    pub fn my_profile(&self, session: &Session) -> FeedbackResult<Employee> {
        let employee_id = session.require_employee()?;
        self.directory().require(&employee_id)
    }

    pub fn update_profile(&self, session: &Session, profile: &ProfileUpdate) -> FeedbackResult<Employee> {
        let employee_id = session.require_employee()?;
        self.directory().update_profile(&employee_id, profile)
    }

    // ── Admin ──────────────────────────────────────────────────────────────

    pub fn list_employees(&self, session: &Session) -> FeedbackResult<Vec<Employee>> {
        session.require_admin()?;
        self.directory().list()
    }

    pub fn create_employee(&self, session: &Session, new: &NewEmployee) -> FeedbackResult<Employee> {
        session.require_admin()?;
        self.directory().create(new)
    }

    pub fn update_employee(
        &self,
        session: &Session,
        id:      &EmployeeId,
        edit:    &EmployeeUpdate,
    ) -> FeedbackResult<Employee> {
        session.require_admin()?;
        self.directory().update(id, edit)
    }

    pub fn delete_employee(&self, session: &Session, id: &EmployeeId) -> FeedbackResult<()> {
        session.require_admin()?;
        self.directory().delete(id)
    }

    pub fn reset_all_points(&self, session: &Session) -> FeedbackResult<usize> {
        session.require_admin()?;
        self.points().reset_monthly_points(self.now())
    }

    pub fn reset_employee_points(&self, session: &Session, id: &EmployeeId) -> FeedbackResult<()> {
        session.require_admin()?;
        self.points().reset_employee_points(id)
    }

    pub fn points_settings(&self, session: &Session) -> FeedbackResult<PointsSettings> {
        session.require_admin()?;
        self.points().load_settings()
    }

    pub fn save_points_settings(&self, session: &Session, settings: &PointsSettings) -> FeedbackResult<()> {
        session.require_admin()?;
        self.points().save_settings(settings)
    }
}
