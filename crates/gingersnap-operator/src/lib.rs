//! Gingersnap operator - cache and cache-rule controllers
//!
//! Three kinds are reconciled, each by a pipeline of ordered steps built on
//! `gingersnap-reconcile`:
//! - `Cache`: backend service, discovery service, server config, deployment
//! - `EagerCacheRule`: rule config plus the shared db-syncer and its bindings
//! - `LazyCacheRule`: rule config only
//!
//! [`driver::Driver`] runs one attempt for one instance; [`controller`] hooks
//! it into kube-runtime.

#![warn(unreachable_pub)]

pub mod backoff;
pub mod cache;
pub mod config;
pub mod controller;
pub mod driver;
pub mod rule;
pub mod status;
pub mod telemetry;

pub use config::{ConfigError, LogFormat, OperatorConfig};
pub use controller::{run, ControllerState};
pub use driver::{Driver, Reconciled};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
