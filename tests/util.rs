#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::subscriber::{self, DefaultGuard};
use tracing_subscriber::{fmt, EnvFilter};

use punchpass_lib::model::{Identity, MemberEnvelope, RawPassEntry};
use punchpass_lib::providers::memory::{MemoryBackend, StaticIdentity};
use punchpass_lib::providers::QueryId;
use punchpass_lib::{Dashboard, DashboardConfig, DashboardSnapshot, Lifecycle, PassRecord};

pub const HOUSEHOLD: &str = "001HH";
pub const SITE_BASE: &str = "https://host/";

pub fn identity() -> Identity {
    Identity {
        contact_id: Some("003MEMBER".into()),
        account_id: HOUSEHOLD.into(),
        account_name: Some("Lee Household".into()),
        site_base_url: SITE_BASE.into(),
    }
}

pub fn pass(id: &str, member_id: &str, transaction_id: Option<&str>) -> RawPassEntry {
    RawPassEntry {
        id: id.into(),
        type_label: Some("Swim 10".into()),
        total_value: Some(2.0),
        remaining_value: Some(8.0),
        stored_value: None,
        end_date: None,
        contact_id: Some(member_id.into()),
        transaction_id: transaction_id.map(str::to_string),
        extra: Map::new(),
    }
}

pub fn pass_with_field(id: &str, member_id: &str, field: &str, value: &str) -> RawPassEntry {
    let mut entry = pass(id, member_id, Some("T1"));
    entry
        .extra
        .insert(field.to_string(), Value::String(value.to_string()));
    entry
}

pub fn member(id: &str, first: &str, last: &str, passes: Option<Vec<RawPassEntry>>) -> MemberEnvelope {
    MemberEnvelope {
        id: id.into(),
        first_name: Some(first.into()),
        last_name: Some(last.into()),
        passes,
    }
}

pub fn backend() -> MemoryBackend {
    MemoryBackend::new(StaticIdentity::resolved(identity()), SITE_BASE)
}

pub fn seed(backend: &MemoryBackend, active: Vec<MemberEnvelope>, completed: Vec<MemberEnvelope>) {
    backend
        .queries
        .set_result(QueryId::ActivePassesByHousehold, HOUSEHOLD, Ok(active));
    backend
        .queries
        .set_result(QueryId::CompletedPassesByHousehold, HOUSEHOLD, Ok(completed));
}

pub fn dashboard(backend: &MemoryBackend, config: DashboardConfig) -> Dashboard {
    Dashboard::new(config, backend.services()).expect("valid config")
}

pub async fn wait_for<F>(dashboard: &Dashboard, predicate: F) -> DashboardSnapshot
where
    F: Fn(&DashboardSnapshot) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), dashboard.wait_until(predicate))
        .await
        .expect("dashboard reached the expected state")
}

pub async fn settle(dashboard: &Dashboard) -> DashboardSnapshot {
    wait_for(dashboard, DashboardSnapshot::settled).await
}

pub fn find_pass(snapshot: &DashboardSnapshot, lifecycle: Lifecycle, pass_id: &str) -> PassRecord {
    snapshot
        .groups(lifecycle)
        .iter()
        .flat_map(|group| group.passes())
        .find(|pass| pass.id == pass_id)
        .cloned()
        .expect("pass present in snapshot")
}

struct BufferWriter(Arc<StdMutex<Vec<u8>>>);

impl std::io::Write for BufferWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Captures JSON log lines on the current thread.
pub fn init_buffer_subscriber() -> (Arc<StdMutex<Vec<u8>>>, DefaultGuard) {
    let buffer: Arc<StdMutex<Vec<u8>>> = Arc::new(StdMutex::new(Vec::new()));
    let writer = buffer.clone();
    let subscriber = fmt()
        .with_env_filter(EnvFilter::new("punchpass=debug"))
        .with_writer(move || BufferWriter(writer.clone()))
        .json()
        .finish();
    let guard = subscriber::set_default(subscriber);
    (buffer, guard)
}

pub fn logs_to_string(buffer: &Arc<StdMutex<Vec<u8>>>) -> String {
    String::from_utf8(buffer.lock().unwrap().clone()).expect("log utf8")
}
