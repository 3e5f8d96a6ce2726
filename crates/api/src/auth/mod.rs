//! Authentication

pub mod middleware;

pub use middleware::{auth_middleware, AuthState, AuthUser};

#[cfg(test)]
mod middleware_tests;
