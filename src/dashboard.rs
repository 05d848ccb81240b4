//! Lifecycle controller and action dispatcher for one household dashboard.
//!
//! Every asynchronous operation runs in its own tokio task and writes its result
//! back under a short-held lock; the lock is never held across an await. The two
//! lifecycle branches are independent: a result for one never touches the other,
//! and household totals are re-derived from both branches on every write.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::actions::{self, ActionContext, ModalEvent, RowCommand};
use crate::aggregation::{self, LifecycleSummary};
use crate::config::DashboardConfig;
use crate::error::{
    AppError, AppResult, DashboardError, ErrorScope, ACTION_FETCH_FAILED, ACTION_NOT_OFFERED,
    IDENTITY_MISSING_HOUSEHOLD, IDENTITY_UNRESOLVED, QUERY_FAILED, QUERY_STREAM_CLOSED,
};
use crate::fetch_state::{FetchState, IdentityState};
use crate::logging::LogScope;
use crate::model::{Identity, Lifecycle, PassRecord};
use crate::providers::{
    NavTarget, QueryEvent, QueryId, QueryParams, Services, Subscription, SubscriptionHandle,
};
use crate::state::{DashboardSnapshot, DashboardState, RefreshGuard};
use crate::util::dispatch_async_app_result;

struct Inner {
    config: DashboardConfig,
    services: Services,
    state: Mutex<DashboardState>,
    revision: watch::Sender<u64>,
    busy: AtomicBool,
}

/// Cheap to clone; all clones drive the same dashboard.
#[derive(Clone)]
pub struct Dashboard {
    inner: Arc<Inner>,
}

impl Dashboard {
    pub fn new(config: DashboardConfig, services: Services) -> AppResult<Self> {
        config.validate()?;
        let (revision, _) = watch::channel(0);
        let state = DashboardState::new(config.category_filter.clone());
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                services,
                state: Mutex::new(state),
                revision,
                busy: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &DashboardConfig {
        &self.inner.config
    }

    fn lock(&self) -> MutexGuard<'_, DashboardState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn notify(&self) {
        self.inner.revision.send_modify(|rev| *rev += 1);
    }

    fn update<R>(&self, f: impl FnOnce(&mut DashboardState) -> R) -> R {
        let result = {
            let mut state = self.lock();
            f(&mut state)
        };
        self.notify();
        result
    }

    pub fn snapshot(&self) -> DashboardSnapshot {
        let revision = *self.inner.revision.borrow();
        let state = self.lock();
        DashboardSnapshot::capture(&state, &self.inner.config, self.is_busy(), revision)
    }

    /// Receiver that ticks after every state change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    /// Waits for the first snapshot satisfying `predicate`.
    pub async fn wait_until<F>(&self, predicate: F) -> DashboardSnapshot
    where
        F: Fn(&DashboardSnapshot) -> bool,
    {
        let mut changes = self.changes();
        loop {
            let snapshot = self.snapshot();
            if predicate(&snapshot) {
                return snapshot;
            }
            if changes.changed().await.is_err() {
                return self.snapshot();
            }
        }
    }

    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::SeqCst)
    }

    /// Resolves the session identity, then subscribes both lifecycle queries.
    pub fn start(&self) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.resolve_and_subscribe().await })
    }

    async fn resolve_and_subscribe(&self) {
        let scope = LogScope::new("resolve_identity", None, None);
        let resolver = self.inner.services.identity.clone();
        let resolved = dispatch_async_app_result(|| async move { resolver.resolve().await })
            .await
            .and_then(validate_identity)
            .map_err(|err| err.reframe(IDENTITY_UNRESOLVED, "Could not resolve the current household"));

        match resolved {
            Ok(identity) => {
                scope.success(json!({ "household_id": identity.account_id }));
                self.update(|state| {
                    state.identity = IdentityState::Resolved(identity);
                    state.clear_error(ErrorScope::Identity);
                    state.refresh_aggregate();
                });
                self.subscribe_all().await;
            }
            Err(err) => {
                scope.fail(&err);
                self.update(|state| {
                    state.identity = IdentityState::Failed(err.clone());
                    state.record_error(DashboardError::IdentityResolution { source: err });
                });
            }
        }
    }

    async fn subscribe_all(&self) {
        futures::join!(
            self.subscribe_branch(Lifecycle::Active),
            self.subscribe_branch(Lifecycle::Completed)
        );
    }

    /// Replaces the category filter and re-subscribes both queries with it.
    ///
    /// Results still arriving on the superseded subscriptions are ignored.
    pub fn set_category_filter(&self, filter: impl Into<String>) -> Option<JoinHandle<()>> {
        let filter = filter.into();
        let resolved = self.update(|state| {
            state.category_filter = filter;
            state.identity.identity().is_some()
        });
        if !resolved {
            return None;
        }
        let this = self.clone();
        Some(tokio::spawn(async move { this.subscribe_all().await }))
    }

    async fn subscribe_branch(&self, lifecycle: Lifecycle) {
        let target_field = match lifecycle {
            Lifecycle::Active => self.inner.config.schedule_target_field.clone(),
            Lifecycle::Completed => None,
        };
        let prepared = self.update(|state| {
            let household_id = state.household_id()?;
            let params = QueryParams {
                household_id,
                category_filter: state.category_filter.clone(),
                target_field,
            };
            let branch = state.branch_mut(lifecycle);
            branch.generation += 1;
            let previous = branch.handle.take();
            branch.fetch = FetchState::Loading;
            let generation = branch.generation;
            state.refresh_aggregate();
            Some((params, generation, previous))
        });
        let Some((params, generation, previous)) = prepared else {
            return;
        };
        if let Some(previous) = previous {
            self.release(lifecycle, previous).await;
        }

        let scope = LogScope::new("subscribe", Some(params.household_id.clone()), None);
        let queries = self.inner.services.queries.clone();
        let query = QueryId::for_lifecycle(lifecycle);
        let subscribed =
            dispatch_async_app_result(|| async move { queries.subscribe(query, params).await })
                .await;

        match subscribed {
            Ok(Subscription { handle, events }) => {
                let current = self.update(|state| {
                    let branch = state.branch_mut(lifecycle);
                    if branch.generation != generation {
                        return false;
                    }
                    branch.handle = Some(handle);
                    true
                });
                if !current {
                    scope.warn(json!({ "lifecycle": lifecycle.as_str(), "superseded": true }));
                    drop(events);
                    self.release(lifecycle, handle).await;
                    return;
                }
                scope.success(json!({
                    "lifecycle": lifecycle.as_str(),
                    "handle": handle.to_string()
                }));
                let this = self.clone();
                tokio::spawn(async move { this.consume(lifecycle, generation, events).await });
            }
            Err(err) => {
                scope.fail(&err);
                self.apply_result(lifecycle, generation, Err(err));
            }
        }
    }

    /// Tears down a superseded subscription. Failures are logged only; the
    /// branch has already moved on.
    async fn release(&self, lifecycle: Lifecycle, handle: SubscriptionHandle) {
        let queries = self.inner.services.queries.clone();
        let released =
            dispatch_async_app_result(|| async move { queries.unsubscribe(handle).await }).await;
        if let Err(err) = released {
            warn!(
                target: "punchpass",
                area = "dashboard",
                event = "unsubscribe_failed",
                lifecycle = lifecycle.as_str(),
                %handle,
                code = err.code(),
                message = err.message()
            );
        }
    }

    async fn consume(
        self,
        lifecycle: Lifecycle,
        generation: u64,
        mut events: BoxStream<'static, QueryEvent>,
    ) {
        while let Some(event) = events.next().await {
            if !self.apply_result(lifecycle, generation, event) {
                return;
            }
        }
        let err = AppError::new(QUERY_STREAM_CLOSED, "Query subscription ended")
            .with_context("lifecycle", lifecycle.as_str());
        self.update(|state| {
            let branch = state.branch_mut(lifecycle);
            if branch.generation == generation {
                branch.handle = None;
                if branch.fetch.is_loading() {
                    branch.fetch = FetchState::Failed(err.clone());
                    state.record_error(DashboardError::Query {
                        lifecycle,
                        source: err,
                    });
                    state.refresh_aggregate();
                }
            }
        });
    }

    /// Applies one query result to its branch. Returns `false` once the branch
    /// has moved on to a newer subscription.
    fn apply_result(&self, lifecycle: Lifecycle, generation: u64, result: QueryEvent) -> bool {
        let outcome: AppResult<LifecycleSummary> = match result {
            Ok(envelopes) => Ok(aggregation::summarize(
                lifecycle,
                &envelopes,
                &self.inner.config,
            )),
            Err(err) => Err(err.reframe(QUERY_FAILED, format!("Could not load {lifecycle} passes"))),
        };

        let applied = self.update(|state| {
            if state.branch(lifecycle).generation != generation {
                return None;
            }
            let logged = match outcome {
                Ok(summary) => {
                    let logged = Ok((summary.groups.len(), summary.total));
                    state.branch_mut(lifecycle).fetch = FetchState::Ready(summary.groups);
                    state.clear_error(ErrorScope::Query(lifecycle));
                    logged
                }
                Err(err) => {
                    state.branch_mut(lifecycle).fetch = FetchState::Failed(err.clone());
                    state.record_error(DashboardError::Query {
                        lifecycle,
                        source: err.clone(),
                    });
                    Err(err)
                }
            };
            state.refresh_aggregate();
            Some((logged, state.household_id()))
        });

        match applied {
            None => false,
            Some((Ok((members, total)), household_id)) => {
                info!(
                    target: "punchpass",
                    area = "dashboard",
                    event = "query_ready",
                    lifecycle = lifecycle.as_str(),
                    household_id = household_id.as_deref(),
                    members,
                    total
                );
                true
            }
            Some((Err(err), household_id)) => {
                warn!(
                    target: "punchpass",
                    area = "dashboard",
                    event = "query_failed",
                    lifecycle = lifecycle.as_str(),
                    household_id = household_id.as_deref(),
                    code = err.code(),
                    message = err.message()
                );
                true
            }
        }
    }

    /// Invalidates both subscriptions and puts both branches back into loading.
    ///
    /// A branch without a live subscription (its subscribe call failed or its
    /// stream ended) is subscribed again instead. Returns once the requests are
    /// issued; results arrive later through the branch state. Returns `false`
    /// when a refresh is already being issued or there is nothing to refresh.
    pub fn refresh(&self) -> bool {
        let issued = {
            let Some(_guard) = RefreshGuard::begin(&self.inner.busy) else {
                return false;
            };
            self.notify();

            let (invalidate, resubscribe, household_id) = self.update(|state| {
                let resolved = state.identity.identity().is_some();
                let mut invalidate = Vec::with_capacity(2);
                let mut resubscribe = Vec::new();
                for lifecycle in Lifecycle::ALL {
                    let branch = state.branch_mut(lifecycle);
                    match branch.handle {
                        Some(handle) => {
                            branch.fetch = FetchState::Loading;
                            invalidate.push((lifecycle, handle, branch.generation));
                        }
                        None if resolved => {
                            branch.fetch = FetchState::Loading;
                            resubscribe.push(lifecycle);
                        }
                        None => {}
                    }
                }
                state.refresh_aggregate();
                (invalidate, resubscribe, state.household_id())
            });

            let scope = LogScope::new("refresh", household_id, None);
            for (lifecycle, handle, generation) in invalidate.iter().copied() {
                let this = self.clone();
                tokio::spawn(async move {
                    let queries = this.inner.services.queries.clone();
                    let invalidated =
                        dispatch_async_app_result(|| async move { queries.invalidate(handle).await })
                            .await;
                    if let Err(err) = invalidated {
                        this.apply_result(lifecycle, generation, Err(err));
                    }
                });
            }
            if !resubscribe.is_empty() {
                let this = self.clone();
                let lifecycles = resubscribe.clone();
                tokio::spawn(async move {
                    futures::future::join_all(
                        lifecycles
                            .iter()
                            .map(|&lifecycle| this.subscribe_branch(lifecycle)),
                    )
                    .await;
                });
            }
            scope.success(json!({
                "invalidated": invalidate.len(),
                "resubscribed": resubscribe.len()
            }));
            !invalidate.is_empty() || !resubscribe.is_empty()
        };
        self.notify();
        issued
    }

    /// Starts a row action. Any previous action context is discarded.
    pub fn dispatch(&self, command: RowCommand, pass: &PassRecord) -> JoinHandle<()> {
        let context = ActionContext::begin(command, pass);
        self.update(|state| state.action = Some(context));

        let this = self.clone();
        let pass = pass.clone();
        tokio::spawn(async move {
            match command {
                RowCommand::DownloadReceipt => this.download_receipt(pass).await,
                RowCommand::ViewUsageHistory => this.view_usage_history(pass).await,
                RowCommand::ScheduleAppointment => this.schedule_appointment(pass).await,
            }
        })
    }

    /// Parses a wire command name and dispatches it.
    pub fn dispatch_named(&self, command: &str, pass: &PassRecord) -> AppResult<JoinHandle<()>> {
        let command: RowCommand = command.parse()?;
        Ok(self.dispatch(command, pass))
    }

    fn action_scope(&self, cmd: &'static str, pass: &PassRecord) -> LogScope {
        let household_id = self.lock().household_id();
        LogScope::new(cmd, household_id, pass.member_id.clone())
    }

    fn fail_action(&self, command: RowCommand, context: ActionContext, err: AppError) {
        self.update(|state| {
            state.action = Some(ActionContext {
                error: Some(err.clone()),
                modal_visible: false,
                ..context
            });
            state.record_error(DashboardError::SecondaryFetch {
                command,
                source: err,
            });
        });
    }

    fn site_base(&self) -> AppResult<String> {
        self.lock()
            .identity
            .identity()
            .map(|id| id.site_base_url.clone())
            .ok_or_else(|| AppError::new(IDENTITY_UNRESOLVED, "Session identity is not resolved"))
    }

    async fn navigate(&self, url: &str, target: NavTarget) -> AppResult<()> {
        let navigation = self.inner.services.navigation.clone();
        let url = url.to_string();
        dispatch_async_app_result(|| async move { navigation.navigate(&url, target).await }).await
    }

    async fn download_receipt(&self, pass: PassRecord) {
        let command = RowCommand::DownloadReceipt;
        let scope = self.action_scope("download_receipt", &pass);

        let fetched = async {
            let transaction_id = actions::require_transaction(&pass)?.to_string();
            let fetch = self.inner.services.fetch.clone();
            dispatch_async_app_result(|| async move { fetch.get_document_id(&transaction_id).await })
                .await
                .map_err(|err| {
                    err.reframe(ACTION_FETCH_FAILED, "Could not retrieve the receipt document")
                })
        }
        .await;

        let document_id = match fetched {
            Ok(document_id) => document_id,
            Err(err) => {
                scope.fail(&err);
                let cleared = ActionContext {
                    pass: None,
                    transaction_id: None,
                    ..ActionContext::begin(command, &pass)
                };
                self.fail_action(command, cleared, err);
                return;
            }
        };

        let resolved = ActionContext {
            document_id: Some(document_id.clone()),
            ..ActionContext::begin(command, &pass)
        };
        self.update(|state| {
            state.action = Some(resolved.clone());
            state.clear_error(ErrorScope::Action(command));
        });

        let navigated = async {
            let url = actions::download_url(&self.site_base()?, &document_id)?;
            self.navigate(&url, NavTarget::SameTab).await?;
            Ok::<_, AppError>(url)
        }
        .await;

        match navigated {
            Ok(url) => scope.success(json!({ "document_id": document_id, "url": url })),
            Err(err) => {
                scope.fail(&err);
                self.fail_action(command, resolved, err);
            }
        }
    }

    async fn view_usage_history(&self, pass: PassRecord) {
        let command = RowCommand::ViewUsageHistory;
        let scope = self.action_scope("view_usage_history", &pass);
        let fetch = self.inner.services.fetch.clone();
        let pass_id = pass.id.clone();

        let fetched =
            dispatch_async_app_result(|| async move { fetch.get_usage_history(&pass_id).await })
                .await
                .map_err(|err| err.reframe(ACTION_FETCH_FAILED, "Could not load usage history"));

        match fetched {
            Ok(entries) => {
                scope.success(json!({ "pass_id": pass.id, "entries": entries.len() }));
                self.update(|state| {
                    state.action = Some(ActionContext {
                        usage_history: Some(entries),
                        modal_visible: true,
                        ..ActionContext::begin(command, &pass)
                    });
                    state.clear_error(ErrorScope::Action(command));
                });
            }
            Err(err) => {
                scope.fail(&err);
                self.fail_action(command, ActionContext::begin(command, &pass), err);
            }
        }
    }

    async fn schedule_appointment(&self, pass: PassRecord) {
        let command = RowCommand::ScheduleAppointment;
        let scope = self.action_scope("schedule_appointment", &pass);
        let member_name = self
            .lock()
            .member_name(pass.member_id.as_deref())
            .unwrap_or_default();
        let target = self.inner.config.nav_target();

        let scheduled = async {
            let reference = actions::schedule_reference(&pass, &member_name)?;
            let navigation = self.inner.services.navigation.clone();
            let url =
                dispatch_async_app_result(|| async move { navigation.generate_url(reference).await })
                    .await?;
            self.navigate(&url, target).await?;
            Ok::<_, AppError>(url)
        }
        .await;

        match scheduled {
            Ok(url) => {
                scope.success(json!({ "pass_id": pass.id, "url": url, "target": target }));
                self.update(|state| {
                    state.action = Some(ActionContext::begin(command, &pass));
                    state.clear_error(ErrorScope::Action(command));
                });
            }
            Err(err) => {
                scope.fail(&err);
                self.fail_action(command, ActionContext::begin(command, &pass), err);
            }
        }
    }

    /// Hides the modal. Fetched usage entries stay cached for a later re-open.
    pub fn close_modal(&self) {
        self.update(|state| {
            if let Some(context) = state.action.as_mut() {
                context.modal_visible = false;
            }
        });
    }

    pub fn handle_modal_event(&self, event: ModalEvent) {
        match event {
            ModalEvent::Close | ModalEvent::Cancel | ModalEvent::Okay => self.close_modal(),
        }
    }

    /// Shows the modal again from cached usage entries without refetching.
    pub fn reopen_usage_history(&self) -> bool {
        self.update(|state| match state.action.as_mut() {
            Some(context)
                if context.command == RowCommand::ViewUsageHistory
                    && context.usage_history.is_some() =>
            {
                context.modal_visible = true;
                true
            }
            _ => false,
        })
    }

    /// Navigates to the configured external system.
    pub async fn open_external_system(&self) -> AppResult<()> {
        let url = self.inner.config.external_url.clone().ok_or_else(|| {
            AppError::new(ACTION_NOT_OFFERED, "No external system is configured")
        })?;
        let scope = LogScope::new("open_external_system", self.lock().household_id(), None);
        match self.navigate(&url, self.inner.config.nav_target()).await {
            Ok(()) => {
                scope.success(json!({ "url": url }));
                Ok(())
            }
            Err(err) => {
                scope.fail(&err);
                Err(err)
            }
        }
    }
}

fn validate_identity(identity: Identity) -> AppResult<Identity> {
    if identity.account_id.trim().is_empty() {
        return Err(AppError::new(
            IDENTITY_MISSING_HOUSEHOLD,
            "The current user is not linked to a household",
        ));
    }
    Ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_without_household_is_rejected() {
        let err = validate_identity(Identity {
            contact_id: Some("003".into()),
            account_id: " ".into(),
            account_name: None,
            site_base_url: "https://host/".into(),
        })
        .expect_err("blank household");
        assert_eq!(err.code(), IDENTITY_MISSING_HOUSEHOLD);
    }
}
