use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ts_rs::TS;

/// Active vs. completed classification of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "dashboard/")]
pub enum Lifecycle {
    Active,
    Completed,
}

impl Lifecycle {
    pub const ALL: [Lifecycle; 2] = [Lifecycle::Active, Lifecycle::Completed];

    /// Word used inside section labels.
    pub fn label(self) -> &'static str {
        match self {
            Lifecycle::Active => "Active",
            Lifecycle::Completed => "Completed",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Lifecycle::Active => "active",
            Lifecycle::Completed => "completed",
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One pass row as returned by the query provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPassEntry {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "TREX1__Type__c", default)]
    pub type_label: Option<String>,
    #[serde(rename = "TREX1__Total_Value__c", default)]
    pub total_value: Option<f64>,
    #[serde(rename = "TREX1__Remaining_Value__c", default)]
    pub remaining_value: Option<f64>,
    #[serde(rename = "TREX1__Stored_Value__c", default)]
    pub stored_value: Option<f64>,
    #[serde(rename = "TREX1__End_Date__c", default)]
    pub end_date: Option<NaiveDate>,
    #[serde(rename = "TREX1__Contact__c", default)]
    pub contact_id: Option<String>,
    #[serde(rename = "TREX1__Transaction__c", default)]
    pub transaction_id: Option<String>,
    /// Fields not modelled above, kept for target-field lookups.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RawPassEntry {
    /// Reads a string-valued field by name, modelled or not.
    pub fn field_str(&self, name: &str) -> Option<String> {
        match name {
            "Id" => Some(self.id.clone()),
            "TREX1__Type__c" => self.type_label.clone(),
            "TREX1__Contact__c" => self.contact_id.clone(),
            "TREX1__Transaction__c" => self.transaction_id.clone(),
            other => match self.extra.get(other)? {
                Value::String(value) => Some(value.clone()),
                Value::Null => None,
                value => Some(value.to_string()),
            },
        }
    }
}

/// One household member and their nested passes for a single lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberEnvelope {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "FirstName", default)]
    pub first_name: Option<String>,
    #[serde(rename = "LastName", default)]
    pub last_name: Option<String>,
    #[serde(rename = "PunchPasses", alias = "punchPasses", default)]
    pub passes: Option<Vec<RawPassEntry>>,
}

/// A consumable-credit grant ready for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "dashboard/")]
pub struct PassRecord {
    pub id: String,
    #[ts(optional)]
    pub type_label: Option<String>,
    #[ts(optional)]
    pub total_used: Option<f64>,
    #[ts(optional)]
    pub remaining: Option<f64>,
    #[ts(optional)]
    pub stored_value: Option<f64>,
    #[ts(optional, type = "string")]
    pub expiration_date: Option<NaiveDate>,
    #[ts(optional)]
    pub member_id: Option<String>,
    #[ts(optional)]
    pub transaction_id: Option<String>,
    /// Set only on active rows; `Some(true)` offers the schedule action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub can_schedule: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub schedule_target: Option<String>,
}

impl PassRecord {
    pub fn credit_summary(&self) -> String {
        format!(
            "Original Value: {} | Credits Used: {} | Remaining Value: {}",
            display_value(self.stored_value),
            display_value(self.total_used),
            display_value(self.remaining)
        )
    }

    pub fn schedulable(&self) -> bool {
        self.can_schedule == Some(true)
    }
}

fn display_value(value: Option<f64>) -> String {
    match value {
        Some(v) if v.fract() == 0.0 && v.is_finite() => format!("{}", v as i64),
        Some(v) => v.to_string(),
        None => "undefined".to_string(),
    }
}

/// One member's passes for one lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "dashboard/")]
pub struct MemberGroup {
    member_id: String,
    full_name: String,
    lifecycle: Lifecycle,
    passes: Vec<PassRecord>,
    section_label: String,
}

impl MemberGroup {
    pub(crate) fn new(
        member_id: String,
        full_name: String,
        lifecycle: Lifecycle,
        passes: Vec<PassRecord>,
        section_label: String,
    ) -> Self {
        Self {
            member_id,
            full_name,
            lifecycle,
            passes,
            section_label,
        }
    }

    pub fn member_id(&self) -> &str {
        &self.member_id
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn passes(&self) -> &[PassRecord] {
        &self.passes
    }

    pub fn count(&self) -> usize {
        self.passes.len()
    }

    pub fn section_label(&self) -> &str {
        &self.section_label
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }
}

/// Household-wide totals derived from the currently ready lifecycle states.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "dashboard/")]
pub struct HouseholdAggregate {
    #[ts(optional)]
    pub household_id: Option<String>,
    #[ts(optional)]
    pub household_name: Option<String>,
    pub active_total: usize,
    pub completed_total: usize,
    pub has_activity: bool,
}

impl HouseholdAggregate {
    pub fn new(
        household_id: Option<String>,
        household_name: Option<String>,
        active_total: usize,
        completed_total: usize,
    ) -> Self {
        Self {
            household_id,
            household_name,
            active_total,
            completed_total,
            has_activity: active_total > 0 || completed_total > 0,
        }
    }

    pub fn total(&self, lifecycle: Lifecycle) -> usize {
        match lifecycle {
            Lifecycle::Active => self.active_total,
            Lifecycle::Completed => self.completed_total,
        }
    }
}

/// Session identity resolved once per dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    #[serde(default)]
    pub contact_id: Option<String>,
    /// Household identifier.
    pub account_id: String,
    #[serde(default)]
    pub account_name: Option<String>,
    /// Base address used to compose document download links.
    pub site_base_url: String,
}

/// Opaque usage-history entry; formatting belongs to the presentation surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UsageEntry(pub Value);
