use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc::{self, UnboundedSender};
use futures::StreamExt;
use serde::Deserialize;
use tracing::debug;

use super::{
    IdentityResolver, NavTarget, NavigationSink, PageReference, QueryEvent, QueryId, QueryParams,
    QueryProvider, SecondaryFetch, Services, Subscription, SubscriptionHandle,
};
use crate::error::{
    AppError, AppResult, ACTION_FETCH_FAILED, ACTION_NAVIGATION_FAILED, QUERY_UNKNOWN_SUBSCRIPTION,
};
use crate::model::{Identity, MemberEnvelope, UsageEntry};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

async fn pause(latency: Option<Duration>) {
    if let Some(latency) = latency {
        tokio::time::sleep(latency).await;
    }
}

struct LiveSubscription {
    query: QueryId,
    params: QueryParams,
    tx: UnboundedSender<QueryEvent>,
}

#[derive(Default)]
struct QueryBook {
    results: HashMap<(QueryId, String), QueryEvent>,
    latency: HashMap<QueryId, Duration>,
    live: HashMap<SubscriptionHandle, LiveSubscription>,
    subscribe_log: Vec<(QueryId, QueryParams)>,
    invalidations: usize,
}

/// Query provider backed by fixed per-household results.
#[derive(Default)]
pub struct MemoryQueryProvider {
    book: Mutex<QueryBook>,
}

impl MemoryQueryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_result(&self, query: QueryId, household_id: &str, result: QueryEvent) {
        lock(&self.book)
            .results
            .insert((query, household_id.to_string()), result);
    }

    pub fn set_latency(&self, query: QueryId, latency: Duration) {
        lock(&self.book).latency.insert(query, latency);
    }

    pub fn subscribe_log(&self) -> Vec<(QueryId, QueryParams)> {
        lock(&self.book).subscribe_log.clone()
    }

    pub fn invalidations(&self) -> usize {
        lock(&self.book).invalidations
    }

    pub fn live_subscriptions(&self) -> usize {
        lock(&self.book)
            .live
            .values()
            .filter(|sub| !sub.tx.is_closed())
            .count()
    }

    fn emit(&self, handle: SubscriptionHandle) -> AppResult<()> {
        let (tx, result, latency) = {
            let book = lock(&self.book);
            let live = book.live.get(&handle).ok_or_else(|| {
                AppError::new(QUERY_UNKNOWN_SUBSCRIPTION, "Subscription is not registered")
                    .with_context("handle", handle.to_string())
            })?;
            let key = (live.query, live.params.household_id.clone());
            let result = book.results.get(&key).cloned().unwrap_or_else(|| Ok(Vec::new()));
            (live.tx.clone(), result, book.latency.get(&live.query).copied())
        };

        match latency {
            Some(latency) => {
                tokio::spawn(async move {
                    tokio::time::sleep(latency).await;
                    let _ = tx.unbounded_send(result);
                });
            }
            None => {
                let _ = tx.unbounded_send(result);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl QueryProvider for MemoryQueryProvider {
    async fn subscribe(&self, query: QueryId, params: QueryParams) -> AppResult<Subscription> {
        let handle = SubscriptionHandle::new();
        let (tx, rx) = mpsc::unbounded();
        {
            let mut book = lock(&self.book);
            book.subscribe_log.push((query, params.clone()));
            book.live.insert(handle, LiveSubscription { query, params, tx });
        }
        debug!(target: "punchpass", area = "memory", event = "subscribe", query = ?query, %handle);
        self.emit(handle)?;
        Ok(Subscription {
            handle,
            events: rx.boxed(),
        })
    }

    async fn invalidate(&self, handle: SubscriptionHandle) -> AppResult<()> {
        lock(&self.book).invalidations += 1;
        self.emit(handle)
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> AppResult<()> {
        let removed = lock(&self.book).live.remove(&handle);
        debug!(
            target: "punchpass",
            area = "memory",
            event = "unsubscribe",
            %handle,
            known = removed.is_some()
        );
        Ok(())
    }
}

pub struct StaticIdentity {
    result: AppResult<Identity>,
}

impl StaticIdentity {
    pub fn resolved(identity: Identity) -> Self {
        Self {
            result: Ok(identity),
        }
    }

    pub fn failing(error: AppError) -> Self {
        Self { result: Err(error) }
    }
}

#[async_trait]
impl IdentityResolver for StaticIdentity {
    async fn resolve(&self) -> AppResult<Identity> {
        self.result.clone()
    }
}

#[derive(Default)]
struct FetchBook {
    documents: HashMap<String, AppResult<String>>,
    usage: HashMap<String, AppResult<Vec<UsageEntry>>>,
    latency: Option<Duration>,
    calls: Vec<String>,
}

/// Secondary fetch services backed by fixed maps. Unknown keys fail.
#[derive(Default)]
pub struct MemoryFetchServices {
    book: Mutex<FetchBook>,
}

impl MemoryFetchServices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_document(&self, transaction_id: &str, result: AppResult<String>) {
        lock(&self.book)
            .documents
            .insert(transaction_id.to_string(), result);
    }

    pub fn set_usage(&self, pass_id: &str, result: AppResult<Vec<UsageEntry>>) {
        lock(&self.book).usage.insert(pass_id.to_string(), result);
    }

    pub fn set_latency(&self, latency: Duration) {
        lock(&self.book).latency = Some(latency);
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.book).calls.clone()
    }
}

#[async_trait]
impl SecondaryFetch for MemoryFetchServices {
    async fn get_document_id(&self, transaction_id: &str) -> AppResult<String> {
        let (result, latency) = {
            let mut book = lock(&self.book);
            book.calls.push(format!("document:{transaction_id}"));
            (book.documents.get(transaction_id).cloned(), book.latency)
        };
        pause(latency).await;
        result.unwrap_or_else(|| {
            Err(AppError::new(ACTION_FETCH_FAILED, "No document for transaction")
                .with_context("transaction_id", transaction_id))
        })
    }

    async fn get_usage_history(&self, pass_id: &str) -> AppResult<Vec<UsageEntry>> {
        let (result, latency) = {
            let mut book = lock(&self.book);
            book.calls.push(format!("usage:{pass_id}"));
            (book.usage.get(pass_id).cloned(), book.latency)
        };
        pause(latency).await;
        result.unwrap_or_else(|| {
            Err(AppError::new(ACTION_FETCH_FAILED, "No usage history for pass")
                .with_context("pass_id", pass_id))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationRecord {
    pub url: String,
    pub target: NavTarget,
}

/// Navigation sink that records every request instead of leaving the page.
pub struct RecordingNavigator {
    site_base: String,
    navigations: Mutex<Vec<NavigationRecord>>,
    references: Mutex<Vec<PageReference>>,
    reject: Mutex<bool>,
}

impl RecordingNavigator {
    pub fn new(site_base: impl Into<String>) -> Self {
        Self {
            site_base: site_base.into(),
            navigations: Mutex::new(Vec::new()),
            references: Mutex::new(Vec::new()),
            reject: Mutex::new(false),
        }
    }

    pub fn navigations(&self) -> Vec<NavigationRecord> {
        lock(&self.navigations).clone()
    }

    pub fn references(&self) -> Vec<PageReference> {
        lock(&self.references).clone()
    }

    pub fn reject_navigation(&self, reject: bool) {
        *lock(&self.reject) = reject;
    }
}

#[async_trait]
impl NavigationSink for RecordingNavigator {
    async fn generate_url(&self, reference: PageReference) -> AppResult<String> {
        let base = url::Url::parse(&self.site_base)?;
        let mut url = base.join(&reference.page)?;
        if !reference.state.is_empty() {
            url.query_pairs_mut().extend_pairs(reference.state.iter());
        }
        lock(&self.references).push(reference);
        Ok(url.to_string())
    }

    async fn navigate(&self, url: &str, target: NavTarget) -> AppResult<()> {
        if *lock(&self.reject) {
            return Err(AppError::new(ACTION_NAVIGATION_FAILED, "Navigation was blocked")
                .with_context("url", url));
        }
        lock(&self.navigations).push(NavigationRecord {
            url: url.to_string(),
            target,
        });
        Ok(())
    }
}

/// JSON fixture describing one household, used by the CLI and tests.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryFixture {
    pub identity: Identity,
    #[serde(default)]
    pub active: Vec<MemberEnvelope>,
    #[serde(default)]
    pub completed: Vec<MemberEnvelope>,
    #[serde(default)]
    pub documents: HashMap<String, String>,
    #[serde(default)]
    pub usage_history: HashMap<String, Vec<UsageEntry>>,
}

/// Concrete handles to the in-memory collaborators behind a [`Services`].
#[derive(Clone)]
pub struct MemoryBackend {
    pub queries: Arc<MemoryQueryProvider>,
    pub identity: Arc<StaticIdentity>,
    pub fetch: Arc<MemoryFetchServices>,
    pub navigation: Arc<RecordingNavigator>,
}

impl MemoryBackend {
    pub fn new(identity: StaticIdentity, site_base: &str) -> Self {
        Self {
            queries: Arc::new(MemoryQueryProvider::new()),
            identity: Arc::new(identity),
            fetch: Arc::new(MemoryFetchServices::new()),
            navigation: Arc::new(RecordingNavigator::new(site_base)),
        }
    }

    pub fn from_fixture(fixture: MemoryFixture) -> Self {
        let household = fixture.identity.account_id.clone();
        let backend = Self::new(
            StaticIdentity::resolved(fixture.identity.clone()),
            &fixture.identity.site_base_url,
        );
        backend.queries.set_result(
            QueryId::ActivePassesByHousehold,
            &household,
            Ok(fixture.active),
        );
        backend.queries.set_result(
            QueryId::CompletedPassesByHousehold,
            &household,
            Ok(fixture.completed),
        );
        for (transaction, document) in fixture.documents {
            backend.fetch.set_document(&transaction, Ok(document));
        }
        for (pass, entries) in fixture.usage_history {
            backend.fetch.set_usage(&pass, Ok(entries));
        }
        backend
    }

    pub fn services(&self) -> Services {
        Services {
            queries: self.queries.clone(),
            identity: self.identity.clone(),
            fetch: self.fetch.clone(),
            navigation: self.navigation.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(household: &str) -> QueryParams {
        QueryParams {
            household_id: household.into(),
            category_filter: "Gym".into(),
            target_field: None,
        }
    }

    #[tokio::test]
    async fn subscription_emits_on_subscribe_and_invalidate() {
        let provider = MemoryQueryProvider::new();
        provider.set_result(QueryId::ActivePassesByHousehold, "001", Ok(Vec::new()));

        let mut sub = provider
            .subscribe(QueryId::ActivePassesByHousehold, params("001"))
            .await
            .expect("subscribe");
        assert!(matches!(sub.events.next().await, Some(Ok(rows)) if rows.is_empty()));

        provider.invalidate(sub.handle).await.expect("invalidate");
        assert!(sub.events.next().await.is_some());
        assert_eq!(provider.invalidations(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_ends_the_stream() {
        let provider = MemoryQueryProvider::new();
        let mut sub = provider
            .subscribe(QueryId::CompletedPassesByHousehold, params("001"))
            .await
            .expect("subscribe");
        assert!(sub.events.next().await.is_some());
        assert_eq!(provider.live_subscriptions(), 1);

        provider.unsubscribe(sub.handle).await.expect("unsubscribe");
        assert_eq!(provider.live_subscriptions(), 0);
        assert!(sub.events.next().await.is_none());

        let err = provider
            .invalidate(sub.handle)
            .await
            .expect_err("handle torn down");
        assert_eq!(err.code(), QUERY_UNKNOWN_SUBSCRIPTION);
    }

    #[tokio::test]
    async fn invalidating_unknown_handle_fails() {
        let provider = MemoryQueryProvider::new();
        let err = provider
            .invalidate(SubscriptionHandle::new())
            .await
            .expect_err("unknown handle");
        assert_eq!(err.code(), QUERY_UNKNOWN_SUBSCRIPTION);
    }

    #[tokio::test]
    async fn navigator_generates_state_query() {
        let nav = RecordingNavigator::new("https://host/s/");
        let url = nav
            .generate_url(PageReference::scheduler("book-swim", "Ann Lee", "a0P1"))
            .await
            .expect("generate");
        assert_eq!(url, "https://host/s/book-swim?c__ctName=Ann+Lee&c__memId=a0P1");
    }
}
