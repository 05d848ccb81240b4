//! Row-level commands and the transient context they produce.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{
    AppError, AppResult, ACTION_MISSING_FIELD, ACTION_NOT_OFFERED, ACTION_UNKNOWN_COMMAND,
};
use crate::model::{PassRecord, UsageEntry};
use crate::providers::PageReference;

pub const DOWNLOAD_PATH: &str = "servlet/servlet.FileDownload";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowCommand {
    DownloadReceipt,
    ViewUsageHistory,
    ScheduleAppointment,
}

impl RowCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            RowCommand::DownloadReceipt => "download_receipt",
            RowCommand::ViewUsageHistory => "view_usage_history",
            RowCommand::ScheduleAppointment => "schedule_appointment",
        }
    }
}

impl fmt::Display for RowCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RowCommand {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "download_receipt" => Ok(RowCommand::DownloadReceipt),
            "view_usage_history" => Ok(RowCommand::ViewUsageHistory),
            "schedule_appointment" => Ok(RowCommand::ScheduleAppointment),
            other => Err(AppError::new(ACTION_UNKNOWN_COMMAND, "Unknown row command")
                .with_context("command", other)),
        }
    }
}

/// Events raised by the modal sub-surface. All of them dismiss the modal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModalEvent {
    Close,
    Cancel,
    Okay,
}

impl FromStr for ModalEvent {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "close" => Ok(ModalEvent::Close),
            "cancel" => Ok(ModalEvent::Cancel),
            "okay" => Ok(ModalEvent::Okay),
            other => Err(AppError::new(ACTION_UNKNOWN_COMMAND, "Unknown modal event")
                .with_context("event", other)),
        }
    }
}

/// State of the single in-flight or most recent row action.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionContext {
    pub command: RowCommand,
    pub pass: Option<PassRecord>,
    pub transaction_id: Option<String>,
    pub document_id: Option<String>,
    pub usage_history: Option<Vec<UsageEntry>>,
    pub modal_visible: bool,
    pub error: Option<AppError>,
}

impl ActionContext {
    pub fn begin(command: RowCommand, pass: &PassRecord) -> Self {
        Self {
            command,
            pass: Some(pass.clone()),
            transaction_id: pass.transaction_id.clone(),
            document_id: None,
            usage_history: None,
            modal_visible: false,
            error: None,
        }
    }
}

/// Commands the presentation surface should offer for `pass`.
pub fn available_commands(pass: &PassRecord) -> Vec<RowCommand> {
    let mut commands = Vec::with_capacity(3);
    if pass.transaction_id.is_some() {
        commands.push(RowCommand::DownloadReceipt);
    }
    commands.push(RowCommand::ViewUsageHistory);
    if pass.schedulable() {
        commands.push(RowCommand::ScheduleAppointment);
    }
    commands
}

/// `{base}servlet/servlet.FileDownload?file={document_id}`
pub fn download_url(site_base: &str, document_id: &str) -> AppResult<String> {
    let mut base = url::Url::parse(site_base)?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    let mut url = base.join(DOWNLOAD_PATH)?;
    url.set_query(None);
    url.query_pairs_mut().append_pair("file", document_id);
    Ok(url.into())
}

pub fn require_transaction(pass: &PassRecord) -> AppResult<&str> {
    pass.transaction_id.as_deref().ok_or_else(|| {
        AppError::new(ACTION_MISSING_FIELD, "Pass has no owning transaction")
            .with_context("pass_id", pass.id.clone())
    })
}

/// Builds the scheduling page reference for a row that offers scheduling.
pub fn schedule_reference(pass: &PassRecord, member_name: &str) -> AppResult<PageReference> {
    if !pass.schedulable() {
        return Err(AppError::new(ACTION_NOT_OFFERED, "Scheduling is not offered for this pass")
            .with_context("pass_id", pass.id.clone()));
    }
    let target = pass
        .schedule_target
        .as_deref()
        .filter(|target| !target.trim().is_empty())
        .ok_or_else(|| {
            AppError::new(ACTION_MISSING_FIELD, "Pass has no scheduling target")
                .with_context("pass_id", pass.id.clone())
        })?;
    Ok(PageReference::scheduler(target, member_name, &pass.id))
}
