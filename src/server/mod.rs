//! HTTP surface of the service.
//!
//! Exposes a liveness route and the bearer-authenticated completion route;
//! request handling is stateless dispatch into the shared [`crate::query::QueryEngine`].

pub mod routes;

pub use routes::{app_router, AppState};
