//! Background services

pub mod maintenance;

pub use maintenance::{MaintenanceHandle, MaintenanceService};
