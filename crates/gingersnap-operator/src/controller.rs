//! Host scheduler wiring
//!
//! kube-runtime owns watching, queueing and per-key exclusion. This module
//! only translates between its `reconcile`/`error_policy` callbacks and the
//! [`Driver`].

use std::sync::Arc;

use futures::StreamExt;
use gingersnap_api::{Cache, EagerCacheRule, LazyCacheRule};
use gingersnap_reconcile::{KubeStore, ObjectStore, ReconcileError};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::NamespaceResourceScope;
use kube::runtime::controller::Action;
use kube::runtime::{watcher, Controller};
use kube::{Api, Resource, ResourceExt};
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::config::OperatorConfig;
use crate::driver::{Driver, Reconciled};

/// State shared by every reconciliation
pub struct ControllerState {
    driver: Driver,
    backoff: Backoff,
}

impl ControllerState {
    /// Build the shared state over `store`
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, config: OperatorConfig) -> Self {
        let backoff = Backoff::new(config.backoff);
        Self {
            driver: Driver::new(store, config),
            backoff,
        }
    }

    /// Driver running the attempts
    #[inline]
    #[must_use]
    pub fn driver(&self) -> &Driver {
        &self.driver
    }
}

fn backoff_key<R: Reconciled>(instance: &R) -> String {
    format!(
        "{}/{}/{}",
        R::kind(&()),
        instance.namespace().unwrap_or_default(),
        instance.name_any()
    )
}

/// Run one attempt for `instance`
///
/// Completed attempts forget the failure history of the key. A requested
/// retry without an error becomes a plain requeue.
///
/// # Errors
/// The error the pipeline stopped with; [`error_policy`] picks the delay.
pub async fn reconcile<R: Reconciled>(instance: Arc<R>, state: Arc<ControllerState>) -> Result<Action, ReconcileError> {
    let namespace = instance.namespace().unwrap_or_default();
    let result = state.driver.reconcile::<R>(&namespace, &instance.name_any()).await;
    if let Some(error) = result.error {
        return Err(error);
    }

    state.backoff.reset(&backoff_key(instance.as_ref()));
    Ok(if result.retry {
        Action::requeue(result.delay)
    } else {
        Action::await_change()
    })
}

/// Pick the requeue delay after a failed attempt
///
/// Retryable failures back off exponentially per key; anything else waits
/// the maximum delay, since only a spec change is likely to help.
pub fn error_policy<R: Reconciled>(instance: Arc<R>, error: &ReconcileError, state: Arc<ControllerState>) -> Action {
    let key = backoff_key(instance.as_ref());
    let delay = if error.is_retryable() {
        state.backoff.next_delay(&key)
    } else {
        state.backoff.max_delay()
    };
    warn!(%key, %error, retryable = error.is_retryable(), ?delay, "reconciliation failed");
    Action::requeue(delay)
}

fn api<K>(client: &kube::Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

async fn drain<R: Reconciled>(controller: Controller<R>, state: Arc<ControllerState>) {
    controller
        .shutdown_on_signal()
        .run(reconcile::<R>, error_policy::<R>, state)
        .for_each(|outcome| async move {
            match outcome {
                Ok((object, _)) => debug!(object = %object, "reconciled"),
                Err(e) => debug!(error = %e, "controller event failed"),
            }
        })
        .await;
}

/// Run the cache and rule controllers until a shutdown signal arrives
pub async fn run(client: kube::Client, config: OperatorConfig) {
    let namespace = config.watch_namespace.clone();
    let ns = namespace.as_deref();
    info!(namespace = ns.unwrap_or("*"), "starting controllers");

    let store: Arc<dyn ObjectStore> = Arc::new(KubeStore::new(client.clone()));
    let state = Arc::new(ControllerState::new(store, config));

    let caches = Controller::new(api::<Cache>(&client, ns), watcher::Config::default())
        .owns(api::<Service>(&client, ns), watcher::Config::default())
        .owns(api::<ConfigMap>(&client, ns), watcher::Config::default())
        .owns(api::<Deployment>(&client, ns), watcher::Config::default());
    let eager = Controller::new(api::<EagerCacheRule>(&client, ns), watcher::Config::default());
    let lazy = Controller::new(api::<LazyCacheRule>(&client, ns), watcher::Config::default());

    tokio::join!(
        drain(caches, state.clone()),
        drain(eager, state.clone()),
        drain(lazy, state),
    );
    error!("controllers stopped");
}
