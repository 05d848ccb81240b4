//! Pure reshaping of provider payloads into presentation records.
//!
//! Member order is preserved, members without passes are kept, and counts are
//! always derived from the record sequence they describe.

use crate::config::DashboardConfig;
use crate::model::{Lifecycle, MemberEnvelope, MemberGroup, PassRecord, RawPassEntry};

/// Output of one aggregation pass over a lifecycle payload.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleSummary {
    pub lifecycle: Lifecycle,
    pub groups: Vec<MemberGroup>,
    pub total: usize,
}

pub fn full_name(first: Option<&str>, last: Option<&str>) -> String {
    format!("{} {}", first.unwrap_or("null"), last.unwrap_or("null"))
}

pub fn section_label(
    name: &str,
    count: usize,
    lifecycle: Lifecycle,
    config: &DashboardConfig,
) -> String {
    format!(
        "{} - {} {} {}",
        name,
        count,
        lifecycle.label(),
        config.unit_label(count)
    )
}

fn to_record(
    entry: &RawPassEntry,
    capability: Option<bool>,
    config: &DashboardConfig,
) -> PassRecord {
    let schedule_target = config
        .schedule_target_field
        .as_deref()
        .and_then(|field| entry.field_str(field));
    PassRecord {
        id: entry.id.clone(),
        type_label: entry.type_label.clone(),
        total_used: entry.total_value,
        remaining: entry.remaining_value,
        stored_value: entry.stored_value,
        expiration_date: entry.end_date,
        member_id: entry.contact_id.clone(),
        transaction_id: entry.transaction_id.clone(),
        can_schedule: capability,
        schedule_target,
    }
}

pub fn summarize(
    lifecycle: Lifecycle,
    envelopes: &[MemberEnvelope],
    config: &DashboardConfig,
) -> LifecycleSummary {
    let capability = config.capability_for(lifecycle);
    let mut total = 0usize;
    let groups = envelopes
        .iter()
        .map(|envelope| {
            let name = full_name(envelope.first_name.as_deref(), envelope.last_name.as_deref());
            let passes: Vec<PassRecord> = envelope
                .passes
                .as_deref()
                .unwrap_or_default()
                .iter()
                .map(|entry| to_record(entry, capability, config))
                .collect();
            total += passes.len();
            let label = section_label(&name, passes.len(), lifecycle, config);
            MemberGroup::new(envelope.id.clone(), name, lifecycle, passes, label)
        })
        .collect();

    LifecycleSummary {
        lifecycle,
        groups,
        total,
    }
}

pub fn total_count(groups: &[MemberGroup]) -> usize {
    groups.iter().map(MemberGroup::count).sum()
}
