//! Activity stream served to an external polling consumer.
//!
//! - [`pagination`]: `(modified_on, id)` cursor pagination
//! - [`sources`]: feeds backed by the primary store, the search engine or memory
//! - [`auth`]: Hawk signature and client IP checks
//! - [`server`]: the axum endpoint

pub mod auth;
pub mod pagination;
pub mod server;
pub mod sources;

pub use auth::{AuthError, HawkAuthenticator, HawkCredentials, HawkRequest};
pub use pagination::{ActivityCursorPagination, ActivitySource};
pub use server::{create_app, run_server, ActivityStreamState};
pub use sources::{InMemoryActivitySource, PostgresActivitySource, SearchActivitySource};
