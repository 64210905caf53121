//! API server implementation
//!
//! Exposes the arbitration engine over plain JSON GET endpoints.

pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;

pub use server::{ApiServer, AppState};
