use serde::Serialize;
use thiserror::Error;

use super::AppError;
use crate::actions::RowCommand;
use crate::model::Lifecycle;

/// Where an error was caught. Each scope owns exactly one error slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "scope", content = "key", rename_all = "snake_case")]
pub enum ErrorScope {
    Identity,
    Query(Lifecycle),
    Action(RowCommand),
}

/// Failures recorded by the dashboard, classified by the operation that raised them.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DashboardError {
    #[error("identity resolution failed: {source}")]
    IdentityResolution { source: AppError },
    #[error("{lifecycle} passes query failed: {source}")]
    Query {
        lifecycle: Lifecycle,
        source: AppError,
    },
    #[error("{command} failed: {source}")]
    SecondaryFetch {
        command: RowCommand,
        source: AppError,
    },
}

impl DashboardError {
    pub fn scope(&self) -> ErrorScope {
        match self {
            DashboardError::IdentityResolution { .. } => ErrorScope::Identity,
            DashboardError::Query { lifecycle, .. } => ErrorScope::Query(*lifecycle),
            DashboardError::SecondaryFetch { command, .. } => ErrorScope::Action(*command),
        }
    }

    /// The raw error preserved for the presentation surface.
    pub fn app_error(&self) -> &AppError {
        match self {
            DashboardError::IdentityResolution { source }
            | DashboardError::Query { source, .. }
            | DashboardError::SecondaryFetch { source, .. } => source,
        }
    }
}
