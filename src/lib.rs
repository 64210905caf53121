//! Balancer - Proxy Arbitration Service
//!
//! Decides, per request, whether a client may use an egress proxy for a
//! target domain and which proxy to hand out.
//!
//! ## Features
//!
//! - Domain resolution by most specific registered suffix
//! - Per client and domain quotas with payment notices and exceed windows
//! - Country allow and block lists backed by a MaxMind database
//! - Round-robin rotation shared per country group
//! - Per-UID domain lists that grow with client age
//! - Resilient Redis store with reconnect and in-memory test backend

pub mod api;
pub mod arbitration;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod geo;
pub mod models;
pub mod services;
pub mod store;

pub use config::Config;
pub use error::{BalancerError, Result};
