//! V1 API module for Mediascribe.
//!
//! Job dispatch and status, bulk operations, and maintenance.

pub mod routes;

pub use routes::{v1_router, V1_PREFIX};
