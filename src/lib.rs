//! Household punch-pass dashboard core.
//!
//! Subscribes to the active and completed pass queries for the current household,
//! aggregates the nested results into per-member groups and household totals, and
//! dispatches row actions (receipt download, usage history, scheduling).

pub mod actions;
pub mod aggregation;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod fetch_state;
pub mod logging;
pub mod model;
pub mod providers;
pub mod state;
pub mod util;

pub use actions::{ActionContext, ModalEvent, RowCommand};
pub use config::DashboardConfig;
pub use dashboard::Dashboard;
pub use error::{AppError, AppResult, DashboardError};
pub use fetch_state::{FetchState, IdentityState};
pub use logging::init_logging;
pub use model::{HouseholdAggregate, Identity, Lifecycle, MemberGroup, PassRecord};
pub use state::DashboardSnapshot;
