//! Proxy arbitration
//!
//! [`ArbitrationEngine`] combines domain resolution, geo eligibility, quota
//! bookkeeping and proxy rotation into one decision per request. It also
//! serves the domain lists and extension configs clients poll for.

mod catalog;
mod client_config;
mod country;
mod engine;
mod quota;
mod registry;
mod rotation;
mod share;

pub use catalog::{DomainCatalog, SelfHosted};
pub use client_config::{default_notification, is_older, ClientConfigService, ConfigParams};
pub use country::CountryResolver;
pub use engine::ArbitrationEngine;
pub use quota::{QuotaOutcome, QuotaTracker};
pub use registry::{suffix_candidates, DomainRegistry};
pub use rotation::ProxyRotator;
pub use share::share_notice;
