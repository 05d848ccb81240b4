use std::time::Instant;

use once_cell::sync::OnceCell;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::AppError;

pub const LOG_TARGET: &str = "punchpass";
pub const LOG_FILTER_ENV: &str = "PUNCHPASS_LOG";
pub const LOG_FORMAT_ENV: &str = "PUNCHPASS_LOG_FORMAT";

static LOGGING: OnceCell<()> = OnceCell::new();

/// Install the global subscriber. Safe to call more than once.
///
/// The filter comes from `PUNCHPASS_LOG`, then `RUST_LOG`, then `punchpass=info`.
/// `PUNCHPASS_LOG_FORMAT=json` switches to one JSON object per line.
pub fn init_logging() {
    LOGGING.get_or_init(|| {
        let filter = std::env::var(LOG_FILTER_ENV)
            .ok()
            .and_then(|raw| EnvFilter::try_new(raw).ok())
            .or_else(|| EnvFilter::try_from_default_env().ok())
            .unwrap_or_else(|| EnvFilter::new("punchpass=info"));
        let json = std::env::var(LOG_FORMAT_ENV)
            .map(|value| value.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr);
        let _ = if json {
            builder.json().try_init()
        } else {
            builder.try_init()
        };
    });
}

fn context_to_json(error: &AppError) -> Option<Value> {
    if error.context().is_empty() {
        None
    } else {
        let mut map = Map::with_capacity(error.context().len());
        for (key, value) in error.context() {
            map.insert(key.clone(), Value::String(value.clone()));
        }
        Some(Value::Object(map))
    }
}

/// Collaborator faults are logged at error; expected rejections at warn.
fn is_expected_rejection(code: &str) -> bool {
    code.starts_with("ACTION/NOT_OFFERED")
        || code.starts_with("ACTION/MISSING_FIELD")
        || code.starts_with("CONFIG/")
}

fn wrap_details(value: Value) -> Value {
    if value.is_object() {
        value
    } else {
        json!({ "value": value })
    }
}

/// Timed log scope around one dashboard operation.
pub struct LogScope {
    cmd: &'static str,
    household_id: Option<String>,
    member_id: Option<String>,
    start: Instant,
}

impl LogScope {
    pub fn new(cmd: &'static str, household_id: Option<String>, member_id: Option<String>) -> Self {
        let scope = Self {
            cmd,
            household_id,
            member_id,
            start: Instant::now(),
        };
        let details = json!({ "stage": "enter" });
        debug!(
            target: "punchpass",
            area = "dashboard",
            cmd = scope.cmd,
            household_id = scope.household_id.as_deref(),
            member_id = scope.member_id.as_deref(),
            details = %details
        );
        scope
    }

    fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    pub fn success(&self, details: Value) {
        let details = wrap_details(details);
        info!(
            target: "punchpass",
            area = "dashboard",
            cmd = self.cmd,
            household_id = self.household_id.as_deref(),
            member_id = self.member_id.as_deref(),
            duration_ms = self.elapsed_ms(),
            details = %details
        );
    }

    pub fn warn(&self, details: Value) {
        let details = wrap_details(details);
        warn!(
            target: "punchpass",
            area = "dashboard",
            cmd = self.cmd,
            household_id = self.household_id.as_deref(),
            member_id = self.member_id.as_deref(),
            duration_ms = self.elapsed_ms(),
            details = %details
        );
    }

    pub fn fail(&self, err: &AppError) {
        let mut map = Map::new();
        map.insert("code".into(), Value::String(err.code().to_string()));
        map.insert("message".into(), Value::String(err.message().to_string()));
        if let Some(context) = context_to_json(err) {
            map.insert("context".into(), context);
        }

        if is_expected_rejection(err.code()) {
            self.warn(Value::Object(map));
            return;
        }

        if let Some(cause) = err.cause() {
            map.insert("cause".into(), Value::String(cause.to_string()));
        }
        let details = Value::Object(map);
        error!(
            target: "punchpass",
            area = "dashboard",
            cmd = self.cmd,
            household_id = self.household_id.as_deref(),
            member_id = self.member_id.as_deref(),
            duration_ms = self.elapsed_ms(),
            details = %details
        );
    }
}
