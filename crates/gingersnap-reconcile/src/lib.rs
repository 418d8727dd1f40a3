//! Gingersnap Reconcile - ordered-step reconciliation engine
//!
//! Drives one resource instance toward its desired state by running an
//! ordered list of steps against a shared per-attempt context:
//! - Typed remote client with create-or-patch and server-side apply
//! - Controller owner references injected on every write
//! - Requeue decisions that stop the pipeline at the requesting step
//! - Separate convergence and finalization sequences
//!
//! # Example
//!
//! ```rust,ignore
//! use gingersnap_reconcile::prelude::*;
//!
//! let pipeline = PipelineBuilder::new()
//!     .step(ApplyService)
//!     .step_if(|c: &Cache| c.is_clustered(), ApplyDiscoveryService)
//!     .with_context_provider(move || Context::new(client.clone(), span.clone(), CacheData::default()))
//!     .build(&cache)?;
//!
//! let result = pipeline.process(&cache).await;
//! if result.retry {
//!     println!("retry in {:?}", result.delay);
//! }
//! ```

#![warn(unreachable_pub)]

pub mod client;
pub mod context;
pub mod diff;
pub mod error;
pub mod kube_store;
pub mod pipeline;
pub mod step;
pub mod store;

pub use client::{Client, Object, OperationResult, Scope};
pub use context::{Context, Halt, Requeue, Slot};
pub use error::{ReconcileError, RemoteError};
pub use kube_store::KubeStore;
pub use pipeline::{ContextProvider, Phase, Pipeline, PipelineBuilder, PipelineError, PipelineResult};
pub use step::{Step, StepResult};
pub use store::{ApplyParams, ConflictPolicy, ListQuery, ObjectKey, ObjectStore};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for writing steps
    pub use crate::{
        Client, Context, OperationResult, PipelineBuilder, PipelineResult, ReconcileError,
        RemoteError, Scope, Slot, Step, StepResult,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
