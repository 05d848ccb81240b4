//! Static, caller-supplied configuration for one dashboard instance.
//!
//! Every knob that distinguished the historical variants of the punch-pass card
//! (schedule action, external-system button, modal header, unit wording) lives
//! here, so a single implementation covers all of them.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult, CONFIG_INVALID};
use crate::model::Lifecycle;
use crate::providers::NavTarget;

pub const CATEGORY_FILTER_ENV: &str = "PUNCHPASS_CATEGORY_FILTER";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DashboardConfig {
    /// Comma-delimited category names forwarded verbatim to both queries.
    pub category_filter: String,
    pub unit_label_singular: String,
    pub unit_label_plural: String,
    /// Stamped onto every active row; gates the schedule action.
    pub schedule_enabled: bool,
    /// Row field holding the scheduling page target.
    pub schedule_target_field: Option<String>,
    pub external_button_label: Option<String>,
    pub external_url: Option<String>,
    pub open_in_new_tab: bool,
    pub modal_header: String,
    pub card_title_prefix: String,
    pub active_section_label: String,
    pub completed_section_label: String,
    pub no_active_description: String,
    pub no_completed_description: String,
    pub no_active_description_contact: String,
    pub no_completed_description_contact: String,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            category_filter: String::new(),
            unit_label_singular: "Pass".into(),
            unit_label_plural: "Passes".into(),
            schedule_enabled: false,
            schedule_target_field: None,
            external_button_label: None,
            external_url: None,
            open_in_new_tab: false,
            modal_header: "Punch Pass Usage".into(),
            card_title_prefix: "Punch Passes for".into(),
            active_section_label: "Active Punch Passes".into(),
            completed_section_label: "Completed Punch Passes".into(),
            no_active_description: "No Active Punch Passes".into(),
            no_completed_description: "No Completed Punch Passes".into(),
            no_active_description_contact:
                "This contact does not have any active punch pass memberships".into(),
            no_completed_description_contact:
                "This contact does not have any completed punch pass memberships".into(),
        }
    }
}

impl DashboardConfig {
    pub fn from_json_str(raw: &str) -> AppResult<Self> {
        let config: DashboardConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read dashboard config {}", path.display()))?;
        let config = Self::from_json_str(&raw)
            .with_context(|| format!("parse dashboard config {}", path.display()))?;
        Ok(config)
    }

    /// Applies `PUNCHPASS_CATEGORY_FILTER` when it is set and non-empty.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(filter) = std::env::var(CATEGORY_FILTER_ENV) {
            if !filter.trim().is_empty() {
                self.category_filter = filter;
            }
        }
        self
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.unit_label_singular.trim().is_empty() || self.unit_label_plural.trim().is_empty()
        {
            return Err(AppError::new(CONFIG_INVALID, "Unit labels must not be empty")
                .with_context("field", "unitLabelSingular/unitLabelPlural"));
        }
        if self.schedule_enabled
            && self
                .schedule_target_field
                .as_deref()
                .map_or(true, |field| field.trim().is_empty())
        {
            return Err(AppError::new(
                CONFIG_INVALID,
                "Scheduling requires a target field name",
            )
            .with_context("field", "scheduleTargetField"));
        }
        if let Some(url) = &self.external_url {
            url::Url::parse(url).map_err(|err| {
                AppError::from(err)
                    .reframe(CONFIG_INVALID, "External URL is not a valid absolute URL")
                    .with_context("field", "externalUrl")
            })?;
        }
        Ok(())
    }

    pub fn nav_target(&self) -> NavTarget {
        if self.open_in_new_tab {
            NavTarget::NewTab
        } else {
            NavTarget::SameTab
        }
    }

    /// Unit label chosen by count: singular only for exactly one.
    pub fn unit_label(&self, count: usize) -> &str {
        if count == 1 {
            &self.unit_label_singular
        } else {
            &self.unit_label_plural
        }
    }

    /// Capability flag stamped onto rows of `lifecycle`.
    pub fn capability_for(&self, lifecycle: Lifecycle) -> Option<bool> {
        match lifecycle {
            Lifecycle::Active => Some(self.schedule_enabled),
            Lifecycle::Completed => None,
        }
    }

    pub fn card_title(&self, account_name: Option<&str>) -> String {
        format!(
            "{} {}",
            self.card_title_prefix,
            account_name.unwrap_or("null")
        )
    }

    pub fn section_header(&self, lifecycle: Lifecycle) -> &str {
        match lifecycle {
            Lifecycle::Active => &self.active_section_label,
            Lifecycle::Completed => &self.completed_section_label,
        }
    }

    pub fn empty_description(&self, lifecycle: Lifecycle) -> &str {
        match lifecycle {
            Lifecycle::Active => &self.no_active_description,
            Lifecycle::Completed => &self.no_completed_description,
        }
    }

    pub fn empty_member_description(&self, lifecycle: Lifecycle) -> &str {
        match lifecycle {
            Lifecycle::Active => &self.no_active_description_contact,
            Lifecycle::Completed => &self.no_completed_description_contact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_fill_missing_keys() {
        let config = DashboardConfig::from_json_str(r#"{ "categoryFilter": "Gym,Swim" }"#)
            .expect("parse config");
        assert_eq!(config.category_filter, "Gym,Swim");
        assert_eq!(config.unit_label(1), "Pass");
        assert_eq!(config.unit_label(0), "Passes");
        assert_eq!(config.nav_target(), NavTarget::SameTab);
    }

    #[test]
    fn schedule_without_target_field_is_rejected() {
        let err = DashboardConfig::from_json_str(r#"{ "scheduleEnabled": true }"#)
            .expect_err("missing target field");
        assert_eq!(err.code(), CONFIG_INVALID);
        assert_eq!(
            err.context().get("field").map(String::as_str),
            Some("scheduleTargetField")
        );
    }

    #[test]
    fn relative_external_url_is_rejected() {
        let err = DashboardConfig::from_json_str(r#"{ "externalUrl": "/scheduler" }"#)
            .expect_err("relative url");
        assert_eq!(err.code(), CONFIG_INVALID);
        assert!(err.cause().is_some());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"{{ "unitLabelSingular": "Visit", "unitLabelPlural": "Visits", "openInNewTab": true }}"#
        )
        .expect("write config");

        let config = DashboardConfig::from_path(file.path()).expect("load config");
        assert_eq!(config.unit_label(3), "Visits");
        assert_eq!(config.nav_target(), NavTarget::NewTab);
    }

    #[test]
    fn capability_is_stamped_on_active_only() {
        let config = DashboardConfig {
            schedule_enabled: true,
            schedule_target_field: Some("Scheduler_Page__c".into()),
            ..DashboardConfig::default()
        };
        assert_eq!(config.capability_for(Lifecycle::Active), Some(true));
        assert_eq!(config.capability_for(Lifecycle::Completed), None);
        assert_eq!(config.card_title(Some("Rivera")), "Punch Passes for Rivera");
    }
}
