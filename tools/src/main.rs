//! staffrate-runner: headless front end for the feedback service.
//!
//! Usage:
//!   staffrate-runner --db feedback.db --config config.json
//!   staffrate-runner --db feedback.db --config config.json --ipc-mode
//!
//! Without --ipc-mode the dashboard summary is printed once. With it,
//! one JSON command is read per stdin line and one JSON reply written per
//! stdout line. The session lives for the duration of the loop.

use anyhow::Result;
use chrono::SecondsFormat;
use serde_json::{json, Value};
use staffrate_core::{
    app::FeedbackApp,
    config::AppConfig,
    directory::{EmployeeId, EmployeeUpdate, NewEmployee, ProfileUpdate},
    document::DocumentStore,
    error::FeedbackResult,
    points::PointsSettings,
    redemption::RedeemRequest,
    session::{Route, Session},
    store::{MemoryStore, SqliteStore},
};
use std::env;
use std::io::{self, BufRead, Write};

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    // ── Session ───────────────────────────────
    AdminLogin { password: String },
    EmployeeLogin { email: String, password: String },
    Logout,
    WhoAmI,
    CanAccess { path: String },

    // ── Public ────────────────────────────────
    Dashboard,
    ValidateCode { code: String },
    SelectableEmployees,
    Redeem {
        code: String,
        #[serde(flatten)]
        request: RedeemRequest,
    },

    // ── Employee ──────────────────────────────
    IssueCode { customer_name: String, customer_number: String },
    MyCodes,
    DeleteCode { code: String },
    MyStats,
    UpdateProfile {
        #[serde(flatten)]
        profile: ProfileUpdate,
    },

    // ── Admin ─────────────────────────────────
    ListEmployees,
    CreateEmployee {
        #[serde(flatten)]
        employee: NewEmployee,
    },
    UpdateEmployee {
        id: EmployeeId,
        #[serde(flatten)]
        edit: EmployeeUpdate,
    },
    DeleteEmployee { id: EmployeeId },
    ResetAllPoints,
    ResetEmployeePoints { id: EmployeeId },
    GetSettings,
    SaveSettings { settings: PointsSettings },

    Quit,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let db = find_arg(&args, "--db").unwrap_or(":memory:");
    let config_path = find_arg(&args, "--config");

    let config = match config_path {
        Some(path) => AppConfig::load(path)?,
        None => {
            let mut config = AppConfig::default();
            config.admin_password = env::var("STAFFRATE_ADMIN_PASSWORD").unwrap_or_default();
            config.validate()?;
            config
        }
    };

    let store: Box<dyn DocumentStore> = if db == ":memory:" {
        Box::new(MemoryStore::new())
    } else {
        let store = SqliteStore::open(db)?;
        store.migrate()?;
        Box::new(store)
    };

    if !ipc_mode {
        println!("staffrate-runner");
        println!("  db:          {db}");
        println!("  config:      {}", config_path.unwrap_or("(environment)"));
        println!("  disposal:    {:?}", config.redemption_disposal);
        println!();
    }

    let mut app = FeedbackApp::build(store, config);

    if ipc_mode {
        run_ipc_loop(&mut app)?;
    } else {
        print_summary(&app)?;
    }
    Ok(())
}

fn run_ipc_loop(app: &mut FeedbackApp) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();
    let mut session = Session::anonymous();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                writeln!(stdout, "{}", json!({ "error": e.to_string() }))?;
                stdout.flush()?;
                continue;
            }
        };
        if matches!(cmd, IpcCommand::Quit) {
            break;
        }

        let reply = match handle_command(app, &mut session, cmd) {
            Ok(value) => json!({ "ok": value }),
            Err(e) => {
                log::debug!("command failed: {e}");
                json!({ "error": e.to_string() })
            }
        };
        writeln!(stdout, "{reply}")?;
        stdout.flush()?;
    }
    Ok(())
}

fn handle_command(app: &mut FeedbackApp, session: &mut Session, cmd: IpcCommand) -> FeedbackResult<Value> {
    let value = match cmd {
        IpcCommand::AdminLogin { password } => {
            *session = app.login_admin(&password)?;
            to_json(&*session)?
        }
        IpcCommand::EmployeeLogin { email, password } => {
            *session = app.login_employee(&email, &password)?;
            to_json(&*session)?
        }
        IpcCommand::Logout => {
            *session = Session::anonymous();
            to_json(&*session)?
        }
        IpcCommand::WhoAmI => to_json(&*session)?,
        IpcCommand::CanAccess { path } => json!(session.can_access(&Route::parse(&path))),

        IpcCommand::Dashboard => to_json(&app.dashboard()?)?,
        IpcCommand::ValidateCode { code } => to_json(&app.validate_code(&code)?)?,
        IpcCommand::SelectableEmployees => to_json(&app.selectable_employees()?)?,
        IpcCommand::Redeem { code, request } => to_json(&app.redeem(&code, &request)?)?,

        IpcCommand::IssueCode { customer_name, customer_number } => {
            to_json(&app.issue_code(session, &customer_name, &customer_number)?)?
        }
        IpcCommand::MyCodes => to_json(&app.my_codes(session)?)?,
        IpcCommand::DeleteCode { code } => {
            app.delete_code(session, &code)?;
            Value::Null
        }
        IpcCommand::MyStats => to_json(&app.my_stats(session)?)?,
        IpcCommand::UpdateProfile { profile } => to_json(&app.update_profile(session, &profile)?)?,

        IpcCommand::ListEmployees => to_json(&app.list_employees(session)?)?,
        IpcCommand::CreateEmployee { employee } => to_json(&app.create_employee(session, &employee)?)?,
        IpcCommand::UpdateEmployee { id, edit } => to_json(&app.update_employee(session, &id, &edit)?)?,
        IpcCommand::DeleteEmployee { id } => {
            app.delete_employee(session, &id)?;
            Value::Null
        }
        IpcCommand::ResetAllPoints => json!({ "employees_reset": app.reset_all_points(session)? }),
        IpcCommand::ResetEmployeePoints { id } => {
            app.reset_employee_points(session, &id)?;
            Value::Null
        }
        IpcCommand::GetSettings => to_json(&app.points_settings(session)?)?,
        IpcCommand::SaveSettings { settings } => {
            app.save_points_settings(session, &settings)?;
            to_json(&settings)?
        }

        IpcCommand::Quit => Value::Null,
    };
    Ok(value)
}

fn print_summary(app: &FeedbackApp) -> Result<()> {
    let dashboard = app.dashboard()?;

    println!("=== DASHBOARD ===");
    println!("  now:         {}", app.now().to_rfc3339_opts(SecondsFormat::Secs, true));
    println!("  last reset:  {}", dashboard.last_reset.as_deref().unwrap_or("never"));
    println!("  next reset:  {}", dashboard.next_reset);
    if let Some(outcome) = &dashboard.reset {
        println!("  reset check: {}", serde_json::to_string(outcome)?);
    }

    println!();
    println!("=== LEADERBOARD ===");
    if dashboard.leaderboard.is_empty() {
        println!("  (No employees yet)");
    }
    for row in &dashboard.leaderboard {
        let award = row
            .projected_award
            .map(|a| format!("+{a}"))
            .unwrap_or_else(|| "-".into());
        println!(
            "  #{:<3} {:<24} {:>5} pts   award {award}",
            row.rank, row.employee.name, row.employee.points
        );
    }
    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T) -> FeedbackResult<Value> {
    Ok(serde_json::to_value(value)?)
}

fn find_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}
