use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

use crate::actions::ActionContext;
use crate::config::DashboardConfig;
use crate::error::{DashboardError, ErrorScope};
use crate::fetch_state::{derive_aggregate, FetchState, IdentityState};
use crate::model::{HouseholdAggregate, Lifecycle, MemberGroup};
use crate::providers::SubscriptionHandle;

/// One lifecycle subscription and the data it last produced.
#[derive(Debug, Default)]
pub(crate) struct Branch {
    pub fetch: FetchState,
    pub handle: Option<SubscriptionHandle>,
    /// Bumped on every re-subscription; results tagged with an older value are dropped.
    pub generation: u64,
}

#[derive(Debug)]
pub(crate) struct DashboardState {
    pub identity: IdentityState,
    pub active: Branch,
    pub completed: Branch,
    pub aggregate: HouseholdAggregate,
    pub action: Option<ActionContext>,
    pub latest_error: Option<DashboardError>,
    pub category_filter: String,
}

impl DashboardState {
    pub fn new(category_filter: String) -> Self {
        Self {
            identity: IdentityState::Pending,
            active: Branch::default(),
            completed: Branch::default(),
            aggregate: HouseholdAggregate::default(),
            action: None,
            latest_error: None,
            category_filter,
        }
    }

    pub fn branch(&self, lifecycle: Lifecycle) -> &Branch {
        match lifecycle {
            Lifecycle::Active => &self.active,
            Lifecycle::Completed => &self.completed,
        }
    }

    pub fn branch_mut(&mut self, lifecycle: Lifecycle) -> &mut Branch {
        match lifecycle {
            Lifecycle::Active => &mut self.active,
            Lifecycle::Completed => &mut self.completed,
        }
    }

    /// Totals are always re-derived from both branches in full.
    pub fn refresh_aggregate(&mut self) {
        self.aggregate = derive_aggregate(&self.identity, &self.active.fetch, &self.completed.fetch);
    }

    pub fn record_error(&mut self, error: DashboardError) {
        self.latest_error = Some(error);
    }

    pub fn clear_error(&mut self, scope: ErrorScope) {
        if self
            .latest_error
            .as_ref()
            .is_some_and(|err| err.scope() == scope)
        {
            self.latest_error = None;
        }
    }

    pub fn household_id(&self) -> Option<String> {
        self.identity.identity().map(|id| id.account_id.clone())
    }

    /// Full name of the member owning `member_id`, from the ready active data.
    pub fn member_name(&self, member_id: Option<&str>) -> Option<String> {
        let member_id = member_id?;
        self.active
            .fetch
            .groups()?
            .iter()
            .find(|group| group.member_id() == member_id)
            .map(|group| group.full_name().to_string())
    }
}

/// Presentation hints for one lifecycle section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionView {
    pub lifecycle: Lifecycle,
    pub header: String,
    pub total: usize,
    pub loading: bool,
    /// Shown instead of the member tables when nothing is ready to display.
    pub empty_description: Option<String>,
    pub empty_member_description: String,
}

impl SectionView {
    fn build(config: &DashboardConfig, lifecycle: Lifecycle, fetch: &FetchState) -> Self {
        let total = fetch.total();
        let empty = match fetch {
            FetchState::Ready(_) => total == 0,
            FetchState::Failed(_) => true,
            FetchState::Idle | FetchState::Loading => false,
        };
        Self {
            lifecycle,
            header: config.section_header(lifecycle).to_string(),
            total,
            loading: fetch.is_loading(),
            empty_description: empty.then(|| config.empty_description(lifecycle).to_string()),
            empty_member_description: config.empty_member_description(lifecycle).to_string(),
        }
    }
}

/// Read-only view of the dashboard handed to the presentation surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub revision: u64,
    pub card_title: Option<String>,
    pub identity: IdentityState,
    pub active: FetchState,
    pub completed: FetchState,
    pub aggregate: HouseholdAggregate,
    pub sections: Vec<SectionView>,
    pub action: Option<ActionContext>,
    pub latest_error: Option<DashboardError>,
    pub busy: bool,
    pub category_filter: String,
}

impl DashboardSnapshot {
    pub(crate) fn capture(
        state: &DashboardState,
        config: &DashboardConfig,
        busy: bool,
        revision: u64,
    ) -> Self {
        Self {
            revision,
            card_title: state
                .identity
                .identity()
                .map(|id| config.card_title(id.account_name.as_deref())),
            identity: state.identity.clone(),
            active: state.active.fetch.clone(),
            completed: state.completed.fetch.clone(),
            aggregate: state.aggregate.clone(),
            sections: Lifecycle::ALL
                .iter()
                .map(|&lifecycle| {
                    SectionView::build(config, lifecycle, &state.branch(lifecycle).fetch)
                })
                .collect(),
            action: state.action.clone(),
            latest_error: state.latest_error.clone(),
            busy,
            category_filter: state.category_filter.clone(),
        }
    }

    pub fn fetch(&self, lifecycle: Lifecycle) -> &FetchState {
        match lifecycle {
            Lifecycle::Active => &self.active,
            Lifecycle::Completed => &self.completed,
        }
    }

    pub fn groups(&self, lifecycle: Lifecycle) -> &[MemberGroup] {
        self.fetch(lifecycle).groups().unwrap_or_default()
    }

    pub fn is_loading(&self) -> bool {
        self.active.is_loading() || self.completed.is_loading()
    }

    /// Both branches have left `Idle`/`Loading`.
    pub fn settled(&self) -> bool {
        Lifecycle::ALL.iter().all(|&lifecycle| {
            matches!(
                self.fetch(lifecycle),
                FetchState::Ready(_) | FetchState::Failed(_)
            )
        })
    }

    pub fn modal_visible(&self) -> bool {
        self.action.as_ref().is_some_and(|ctx| ctx.modal_visible)
    }
}

/// Marks a refresh as in progress; released on drop.
pub(crate) struct RefreshGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RefreshGuard<'a> {
    pub fn begin(flag: &'a AtomicBool) -> Option<Self> {
        if flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }
        Some(Self { flag })
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
