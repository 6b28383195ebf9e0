pub mod allocation;
pub mod config;
pub mod controller;
pub mod diagnostics;
pub mod domain;
pub mod error;
pub mod hydraulics;
pub mod network;
pub mod routing;
pub mod scheduling;
pub mod telemetry;

#[cfg(test)]
mod testutil;

pub use config::Config;
pub use error::PlanError;
