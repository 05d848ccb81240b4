use serde::Serialize;

use crate::aggregation::total_count;
use crate::error::AppError;
use crate::model::{HouseholdAggregate, Identity, MemberGroup};

/// Load state of one lifecycle subscription.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum FetchState {
    #[default]
    Idle,
    Loading,
    Ready(Vec<MemberGroup>),
    Failed(AppError),
}

impl FetchState {
    pub fn is_loading(&self) -> bool {
        matches!(self, FetchState::Loading)
    }

    pub fn groups(&self) -> Option<&[MemberGroup]> {
        match self {
            FetchState::Ready(groups) => Some(groups),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&AppError> {
        match self {
            FetchState::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Count contributed to household totals; only ready data counts.
    pub fn total(&self) -> usize {
        self.groups().map(total_count).unwrap_or(0)
    }
}

/// Resolution state of the session identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum IdentityState {
    #[default]
    Pending,
    Resolved(Identity),
    Failed(AppError),
}

impl IdentityState {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            IdentityState::Resolved(identity) => Some(identity),
            _ => None,
        }
    }
}

/// Re-derives household totals from the full current state of both branches.
pub fn derive_aggregate(
    identity: &IdentityState,
    active: &FetchState,
    completed: &FetchState,
) -> HouseholdAggregate {
    let identity = identity.identity();
    HouseholdAggregate::new(
        identity.map(|id| id.account_id.clone()),
        identity.and_then(|id| id.account_name.clone()),
        active.total(),
        completed.total(),
    )
}
