// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! ThreadFlow API Library
//!
//! HTTP surface over the payments reconciliation core: webhook ingress,
//! manual activation after checkout redirect, entitlement reads, and the
//! emergency revert.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
