//! Code redemption tests.
//!
//! A code is redeemed at most once. Redemption marks the code, records the
//! feedback and credits the employee in one guarded write, or does none of
//! these.

use serde_json::{json, Value};
use staffrate_core::{
    app::FeedbackApp,
    codes::{CodeRegistry, CodeState},
    config::AppConfig,
    directory::{EmployeeId, NewEmployee},
    document::{DocumentStore, Guard, Updates},
    error::{FeedbackError, FeedbackResult},
    ledger::Ledger,
    redemption::{RedeemRequest, RedemptionDisposal, MAX_REDEEM_ATTEMPTS},
    rng::{is_well_formed, DEFAULT_CODE_LENGTH},
    session::Session,
    store::MemoryStore,
};
use std::cell::Cell;

// ── Test helpers ────────────────────────────────────────────────────────────

struct Shop {
    app:   FeedbackApp,
    admin: Session,
    ana:   Session,
    ben:   Session,
}

fn shop_with(app: FeedbackApp) -> Shop {
    let _ = env_logger::builder().is_test(true).try_init();
    let admin = app.login_admin("admin-test-password").expect("admin login");
    for (email, name, password) in [("ana@shop.com", "Ana", "pw-ana"), ("ben@shop.com", "Ben", "pw-ben")] {
        app.create_employee(
            &admin,
            &NewEmployee { email: email.into(), name: name.into(), password: password.into() },
        )
        .expect("create employee");
    }
    let ana = app.login_employee("ana@shop.com", "pw-ana").expect("ana login");
    let ben = app.login_employee("ben@shop.com", "pw-ben").expect("ben login");
    Shop { app, admin, ana, ben }
}

fn shop() -> Shop {
    shop_with(FeedbackApp::build_test())
}

fn delete_on_redeem() -> AppConfig {
    AppConfig { redemption_disposal: RedemptionDisposal::Delete, ..AppConfig::default_test() }
}

fn request(number: &str, rating: u8) -> RedeemRequest {
    RedeemRequest {
        customer_number: number.into(),
        rating: f64::from(rating),
        comment: "Great service".into(),
        employee: None,
    }
}

fn ana_id() -> EmployeeId {
    EmployeeId::from_key("ana@shop,com")
}

fn ben_id() -> EmployeeId {
    EmployeeId::from_key("ben@shop,com")
}

fn points_of(shop: &Shop, id: &EmployeeId) -> u32 {
    shop.app
        .list_employees(&shop.admin)
        .expect("list employees")
        .into_iter()
        .find(|e| &e.id == id)
        .map(|e| e.points)
        .unwrap_or_else(|| panic!("employee {id} missing"))
}

/// Fails the first `failures` redemption writes as if another writer got
/// there first. Everything else passes through.
struct ContendedStore {
    inner:    MemoryStore,
    failures: Cell<u32>,
}

impl DocumentStore for ContendedStore {
    fn get(&self, path: &str) -> FeedbackResult<Option<Value>> {
        self.inner.get(path)
    }

    fn set(&self, path: &str, value: Value) -> FeedbackResult<()> {
        self.inner.set(path, value)
    }

    fn update(&self, updates: &Updates) -> FeedbackResult<()> {
        self.inner.update(updates)
    }

    fn update_if(&self, guards: &[Guard], updates: &Updates) -> FeedbackResult<bool> {
        let redeeming = updates.keys().any(|k| k.starts_with("feedback/"));
        if redeeming && self.failures.get() > 0 {
            self.failures.set(self.failures.get() - 1);
            return Ok(false);
        }
        self.inner.update_if(guards, updates)
    }
}

/// Marks the code used just before the redemption write lands, as a
/// concurrent redemption of the same code would.
struct StealingStore {
    inner: MemoryStore,
}

impl DocumentStore for StealingStore {
    fn get(&self, path: &str) -> FeedbackResult<Option<Value>> {
        self.inner.get(path)
    }

    fn set(&self, path: &str, value: Value) -> FeedbackResult<()> {
        self.inner.set(path, value)
    }

    fn update(&self, updates: &Updates) -> FeedbackResult<()> {
        self.inner.update(updates)
    }

    fn update_if(&self, guards: &[Guard], updates: &Updates) -> FeedbackResult<bool> {
        if updates.keys().any(|k| k.starts_with("feedback/")) {
            for key in updates.keys().filter(|k| k.starts_with("codes/")) {
                self.inner.set(key, json!(true))?;
            }
        }
        self.inner.update_if(guards, updates)
    }
}

// ── Issue and validate ──────────────────────────────────────────────────────

#[test]
fn issued_code_validates_and_hides_customer_number() {
    let mut shop = shop();
    let issued = shop.app.issue_code(&shop.ana, "Dana", "555-0100").unwrap();

    assert!(is_well_formed(&issued.code.record.code, DEFAULT_CODE_LENGTH));
    assert_eq!(issued.code.record.employee_name, "Ana");
    assert_eq!(issued.code.state(), CodeState::Unused);
    assert_eq!(issued.link, format!("https://feedback.test/feedback/{}", issued.code.record.code));
    assert!(issued.share_message.contains("Hello Dana"));

    let preview = shop.app.validate_code(&issued.code.record.code).unwrap();
    assert_eq!(preview.customer_name, "Dana");
    assert_eq!(preview.employee_id, ana_id());
    let rendered = serde_json::to_string(&preview).unwrap();
    assert!(!rendered.contains("555-0100"), "preview leaked the customer number: {rendered}");
}

#[test]
fn unknown_code_is_not_found() {
    let shop = shop();
    let err = shop.app.validate_code("ZZZZZZ").unwrap_err();
    assert!(matches!(err, FeedbackError::NotFound { .. }), "got {err:?}");
}

#[test]
fn issue_requires_customer_details() {
    let mut shop = shop();
    let err = shop.app.issue_code(&shop.ana, "  ", "555-0100").unwrap_err();
    assert!(matches!(err, FeedbackError::MissingField { field: "customer_name" }), "got {err:?}");
    let err = shop.app.issue_code(&shop.ana, "Dana", "").unwrap_err();
    assert!(matches!(err, FeedbackError::MissingField { field: "customer_number" }), "got {err:?}");
}

/// Two apps with the same generator seed issue the same tokens.
#[test]
fn same_seed_issues_identical_tokens() {
    let mut a = shop();
    let mut b = shop();
    let tokens = |s: &mut Shop| -> Vec<String> {
        (0..5)
            .map(|i| {
                let ana = s.ana.clone();
                s.app.issue_code(&ana, &format!("Customer {i}"), "555").unwrap().code.record.code
            })
            .collect()
    };
    assert_eq!(tokens(&mut a), tokens(&mut b));
}

// ── Redeem ──────────────────────────────────────────────────────────────────

/// 1★ earns 1 point and 5★ earns 4; the feedback lands in the ledger.
#[test]
fn redemption_credits_issuer_and_records_feedback() {
    let mut shop = shop();
    let low = shop.app.issue_code(&shop.ana, "Dana", "555-0100").unwrap();
    let high = shop.app.issue_code(&shop.ana, "Eli", "555-0200").unwrap();

    let first = shop.app.redeem(&low.code.record.code, &request("555-0100", 1)).unwrap();
    assert_eq!(first.points_awarded, 1);
    assert_eq!(first.new_balance, 1);

    let second = shop.app.redeem(&high.code.record.code, &request("555-0200", 5)).unwrap();
    assert_eq!(second.points_awarded, 4);
    assert_eq!(second.new_balance, 5);
    assert_eq!(points_of(&shop, &ana_id()), 5);

    let ledger = Ledger::new(shop.app.store());
    assert_eq!(ledger.count().unwrap(), 2);
    let entry = ledger.get(&second.feedback_id).unwrap().expect("feedback stored");
    assert_eq!(entry.rating, 5);
    assert_eq!(entry.customer_name, "Eli");
    assert_eq!(entry.employee_name, "Ana");

    let stats = shop.app.my_stats(&shop.ana).unwrap();
    assert_eq!(stats.summary.total, 2);
    assert!((stats.summary.average - 3.0).abs() < f64::EPSILON);
    assert_eq!(stats.entries[0].rating, 5, "newest first");
}

#[test]
fn second_redemption_reports_already_used() {
    let mut shop = shop();
    let issued = shop.app.issue_code(&shop.ana, "Dana", "555-0100").unwrap();
    let token = issued.code.record.code.clone();

    shop.app.redeem(&token, &request("555-0100", 4)).unwrap();
    let err = shop.app.redeem(&token, &request("555-0100", 4)).unwrap_err();

    assert!(matches!(err, FeedbackError::AlreadyUsed { .. }), "got {err:?}");
    assert_eq!(points_of(&shop, &ana_id()), 3, "credited once");
    assert_eq!(Ledger::new(shop.app.store()).count().unwrap(), 1);

    let codes = shop.app.my_codes(&shop.ana).unwrap();
    assert_eq!(codes[0].state(), CodeState::Redeemed);
}

/// With the delete disposal a redeemed code disappears entirely.
#[test]
fn delete_disposal_removes_code() {
    let mut shop = shop_with(FeedbackApp::build_test().with_config(delete_on_redeem()));
    let issued = shop.app.issue_code(&shop.ana, "Dana", "555-0100").unwrap();
    let token = issued.code.record.code.clone();

    shop.app.redeem(&token, &request("555-0100", 3)).unwrap();

    assert!(shop.app.store().get(&issued.code.path()).unwrap().is_none());
    let err = shop.app.redeem(&token, &request("555-0100", 3)).unwrap_err();
    assert!(matches!(err, FeedbackError::NotFound { .. }), "got {err:?}");
    assert_eq!(points_of(&shop, &ana_id()), 2);
}

#[test]
fn wrong_customer_number_has_no_side_effects() {
    let mut shop = shop();
    let issued = shop.app.issue_code(&shop.ana, "Dana", "555-0100").unwrap();

    let err = shop.app.redeem(&issued.code.record.code, &request("555-9999", 5)).unwrap_err();

    assert!(matches!(err, FeedbackError::NumberMismatch), "got {err:?}");
    assert_eq!(points_of(&shop, &ana_id()), 0);
    assert_eq!(Ledger::new(shop.app.store()).count().unwrap(), 0);
    assert!(shop.app.validate_code(&issued.code.record.code).is_ok(), "code still redeemable");
}

#[test]
fn out_of_range_rating_rejected() {
    let mut shop = shop();
    let issued = shop.app.issue_code(&shop.ana, "Dana", "555-0100").unwrap();
    for rating in [0u8, 6] {
        let err = shop.app.redeem(&issued.code.record.code, &request("555-0100", rating)).unwrap_err();
        assert!(matches!(err, FeedbackError::InvalidRating { .. }), "rating {rating}: got {err:?}");
    }
    assert_eq!(points_of(&shop, &ana_id()), 0);
}

/// Ratings arrive as raw JSON numbers; anything that is not a whole star
/// count from 1 to 5 is an invalid rating rather than a malformed request.
#[test]
fn submitted_rating_must_be_whole_stars() {
    let mut shop = shop();
    let issued = shop.app.issue_code(&shop.ana, "Dana", "555-0100").unwrap();
    for rating in [json!(300), json!(4.5), json!(-2)] {
        let req: RedeemRequest = serde_json::from_value(json!({
            "customer_number": "555-0100",
            "rating": rating,
        }))
        .expect("any number deserializes");
        let err = shop.app.redeem(&issued.code.record.code, &req).unwrap_err();
        assert!(matches!(err, FeedbackError::InvalidRating { .. }), "rating {rating}: got {err:?}");
    }
    assert_eq!(points_of(&shop, &ana_id()), 0);
    assert!(shop.app.validate_code(&issued.code.record.code).is_ok(), "code still redeemable");
}

/// Two unused codes can share a token. The customer number picks the one
/// that was issued to this customer.
#[test]
fn shared_token_resolved_by_customer_number() {
    let mut shop = shop();
    let first = shop.app.issue_code(&shop.ana, "Dana", "555-0100").unwrap();
    let second = shop.app.issue_code(&shop.ben, "Eli", "555-0200").unwrap();
    let token = first.code.record.code.clone();
    shop.app.store().set(&format!("{}/code", second.code.path()), json!(token)).unwrap();

    let redemption = shop.app.redeem(&token, &request("555-0200", 5)).unwrap();
    assert_eq!(redemption.new_balance, 4);
    assert_eq!(points_of(&shop, &ben_id()), 4);
    assert_eq!(points_of(&shop, &ana_id()), 0);

    let codes = CodeRegistry::new(shop.app.store());
    assert!(codes.get(&second.code.id).unwrap().expect("second code").record.used);
    assert!(!codes.get(&first.code.id).unwrap().expect("first code").record.used);

    let err = shop.app.redeem(&token, &request("555-0999", 5)).unwrap_err();
    assert!(matches!(err, FeedbackError::NumberMismatch), "got {err:?}");
    shop.app.redeem(&token, &request("555-0100", 3)).unwrap();
    assert_eq!(points_of(&shop, &ana_id()), 2);
}

/// The customer may credit a different employee than the issuer.
#[test]
fn customer_can_select_another_employee() {
    let mut shop = shop();
    let issued = shop.app.issue_code(&shop.ana, "Dana", "555-0100").unwrap();
    let selectable = shop.app.selectable_employees().unwrap();
    assert_eq!(selectable.len(), 2);

    let mut req = request("555-0100", 5);
    req.employee = Some(ben_id());
    let redemption = shop.app.redeem(&issued.code.record.code, &req).unwrap();

    assert_eq!(redemption.entry.employee_id, ben_id());
    assert_eq!(points_of(&shop, &ben_id()), 4);
    assert_eq!(points_of(&shop, &ana_id()), 0);
    assert_eq!(shop.app.my_stats(&shop.ben).unwrap().summary.total, 1);
}

#[test]
fn selecting_unknown_employee_fails_cleanly() {
    let mut shop = shop();
    let issued = shop.app.issue_code(&shop.ana, "Dana", "555-0100").unwrap();
    let mut req = request("555-0100", 5);
    req.employee = Some(EmployeeId::from_key("ghost@shop,com"));

    let err = shop.app.redeem(&issued.code.record.code, &req).unwrap_err();
    assert!(matches!(err, FeedbackError::NotFound { .. }), "got {err:?}");
    assert!(shop.app.validate_code(&issued.code.record.code).is_ok());
}

// ── Delete ──────────────────────────────────────────────────────────────────

#[test]
fn issuer_can_delete_unused_code() {
    let mut shop = shop();
    let issued = shop.app.issue_code(&shop.ana, "Dana", "555-0100").unwrap();
    shop.app.delete_code(&shop.ana, &issued.code.record.code).unwrap();
    assert!(shop.app.my_codes(&shop.ana).unwrap().is_empty());
}

#[test]
fn only_issuer_may_delete() {
    let mut shop = shop();
    let issued = shop.app.issue_code(&shop.ana, "Dana", "555-0100").unwrap();
    let err = shop.app.delete_code(&shop.ben, &issued.code.record.code).unwrap_err();
    assert!(matches!(err, FeedbackError::NotOwner { .. }), "got {err:?}");
    assert_eq!(shop.app.my_codes(&shop.ana).unwrap().len(), 1);
}

#[test]
fn used_code_cannot_be_deleted() {
    let mut shop = shop();
    let issued = shop.app.issue_code(&shop.ana, "Dana", "555-0100").unwrap();
    shop.app.redeem(&issued.code.record.code, &request("555-0100", 2)).unwrap();

    let err = shop.app.delete_code(&shop.ana, &issued.code.record.code).unwrap_err();
    assert!(matches!(err, FeedbackError::Forbidden { .. }), "got {err:?}");
}

/// Removing an employee keeps the feedback they received; their
/// outstanding codes can no longer be redeemed.
#[test]
fn deleted_employee_keeps_history() {
    let mut shop = shop();
    let done = shop.app.issue_code(&shop.ana, "Dana", "555-0100").unwrap();
    let pending = shop.app.issue_code(&shop.ana, "Eli", "555-0200").unwrap();
    shop.app.redeem(&done.code.record.code, &request("555-0100", 5)).unwrap();

    shop.app.delete_employee(&shop.admin, &ana_id()).unwrap();

    let kept = CodeRegistry::new(shop.app.store())
        .get(&done.code.id)
        .unwrap()
        .expect("redeemed code retained");
    assert!(kept.record.used);

    let ledger = Ledger::new(shop.app.store());
    let history = ledger.all().unwrap();
    assert_eq!(history.len(), 1, "feedback retained");
    assert_eq!(history[0].1.employee_name, "Ana");
    let err = shop.app.redeem(&pending.code.record.code, &request("555-0200", 5)).unwrap_err();
    assert!(matches!(err, FeedbackError::NotFound { what: "employee", .. }), "got {err:?}");
    assert_eq!(shop.app.list_employees(&shop.admin).unwrap().len(), 1);
}

// ── Contention ──────────────────────────────────────────────────────────────

/// Lost writes below the attempt limit are retried transparently.
#[test]
fn contention_below_limit_is_retried() {
    let store = ContendedStore { inner: MemoryStore::new(), failures: Cell::new(MAX_REDEEM_ATTEMPTS - 1) };
    let mut shop = shop_with(FeedbackApp::build_test().with_store(Box::new(store)));
    let issued = shop.app.issue_code(&shop.ana, "Dana", "555-0100").unwrap();

    let redemption = shop.app.redeem(&issued.code.record.code, &request("555-0100", 5)).unwrap();
    assert_eq!(redemption.new_balance, 4);
    assert_eq!(points_of(&shop, &ana_id()), 4);
}

#[test]
fn persistent_contention_reports_conflict() {
    let store = ContendedStore { inner: MemoryStore::new(), failures: Cell::new(MAX_REDEEM_ATTEMPTS) };
    let mut shop = shop_with(FeedbackApp::build_test().with_store(Box::new(store)));
    let issued = shop.app.issue_code(&shop.ana, "Dana", "555-0100").unwrap();

    let err = shop.app.redeem(&issued.code.record.code, &request("555-0100", 5)).unwrap_err();
    assert!(
        matches!(err, FeedbackError::Conflict { attempts: MAX_REDEEM_ATTEMPTS, .. }),
        "got {err:?}"
    );
    assert_eq!(points_of(&shop, &ana_id()), 0, "nothing applied");
    assert_eq!(Ledger::new(shop.app.store()).count().unwrap(), 0);
}

/// A code consumed between our read and our write is reported as used,
/// and this redemption credits nothing.
#[test]
fn code_consumed_mid_redemption_reports_already_used() {
    let store = StealingStore { inner: MemoryStore::new() };
    let mut shop = shop_with(FeedbackApp::build_test().with_store(Box::new(store)));
    let issued = shop.app.issue_code(&shop.ana, "Dana", "555-0100").unwrap();

    let err = shop.app.redeem(&issued.code.record.code, &request("555-0100", 5)).unwrap_err();
    assert!(matches!(err, FeedbackError::AlreadyUsed { .. }), "got {err:?}");
    assert_eq!(points_of(&shop, &ana_id()), 0);
    assert_eq!(Ledger::new(shop.app.store()).count().unwrap(), 0);
}
