//! Seams to the systems this core does not own: the remote query provider, the
//! identity resolver, secondary fetch services and the navigation sink.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppResult;
use crate::model::{Identity, Lifecycle, MemberEnvelope, UsageEntry};

pub mod memory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueryId {
    ActivePassesByHousehold,
    CompletedPassesByHousehold,
}

impl QueryId {
    pub fn for_lifecycle(lifecycle: Lifecycle) -> Self {
        match lifecycle {
            Lifecycle::Active => QueryId::ActivePassesByHousehold,
            Lifecycle::Completed => QueryId::CompletedPassesByHousehold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryParams {
    pub household_id: String,
    /// Comma-delimited, formatted by the caller.
    pub category_filter: String,
    /// Active query only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_field: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionHandle(Uuid);

impl SubscriptionHandle {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SubscriptionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

pub type QueryEvent = AppResult<Vec<MemberEnvelope>>;

/// A live subscription: every emitted item is a fresh full result for the query.
pub struct Subscription {
    pub handle: SubscriptionHandle,
    pub events: BoxStream<'static, QueryEvent>,
}

#[async_trait]
pub trait QueryProvider: Send + Sync {
    async fn subscribe(&self, query: QueryId, params: QueryParams) -> AppResult<Subscription>;

    /// Drops the cached result for `handle` and re-emits on its stream.
    async fn invalidate(&self, handle: SubscriptionHandle) -> AppResult<()>;

    /// Tears down `handle`; its stream ends once pending emissions drain.
    async fn unsubscribe(&self, handle: SubscriptionHandle) -> AppResult<()>;
}

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self) -> AppResult<Identity>;
}

#[async_trait]
pub trait SecondaryFetch: Send + Sync {
    async fn get_document_id(&self, transaction_id: &str) -> AppResult<String>;
    async fn get_usage_history(&self, pass_id: &str) -> AppResult<Vec<UsageEntry>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NavTarget {
    SameTab,
    NewTab,
}

/// Navigation request handed to the URL generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageReference {
    pub page: String,
    pub state: Vec<(String, String)>,
}

pub const STATE_CONTACT_NAME: &str = "c__ctName";
pub const STATE_MEMBERSHIP_ID: &str = "c__memId";

impl PageReference {
    pub fn scheduler(page: impl Into<String>, contact_name: &str, membership_id: &str) -> Self {
        Self {
            page: page.into(),
            state: vec![
                (STATE_CONTACT_NAME.to_string(), contact_name.to_string()),
                (STATE_MEMBERSHIP_ID.to_string(), membership_id.to_string()),
            ],
        }
    }

    pub fn state_value(&self, key: &str) -> Option<&str> {
        self.state
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }

    /// Banner shown by the scheduling page for this reference.
    pub fn scheduler_display_text(&self) -> String {
        match (
            self.state_value(STATE_CONTACT_NAME),
            self.state_value(STATE_MEMBERSHIP_ID),
        ) {
            (Some(name), Some(id)) => {
                format!("Schedule an appointment for {name}'s package with id : {id}")
            }
            _ => "Membership was not passed".to_string(),
        }
    }
}

#[async_trait]
pub trait NavigationSink: Send + Sync {
    async fn generate_url(&self, reference: PageReference) -> AppResult<String>;
    async fn navigate(&self, url: &str, target: NavTarget) -> AppResult<()>;
}

/// The collaborators one dashboard talks to.
#[derive(Clone)]
pub struct Services {
    pub queries: Arc<dyn QueryProvider>,
    pub identity: Arc<dyn IdentityResolver>,
    pub fetch: Arc<dyn SecondaryFetch>,
    pub navigation: Arc<dyn NavigationSink>,
}
