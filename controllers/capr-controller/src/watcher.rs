//! Kubernetes resource watchers.
//!
//! RKEBootstraps are reconciled through `kube_runtime::Controller`, which
//! handles reconnection, requeues and per-object serialization. The CA secret
//! only feeds a setting, so it uses a plain watcher stream.

use crate::ca::{CA_SECRET_NAME, apply_ca_event};
use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use capr_settings::Settings;
use crds::RKEBootstrap;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, ResourceExt};
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::{Controller, WatchStreamExt, watcher};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

type ReconcileFuture = Pin<Box<dyn Future<Output = Result<Action, ControllerError>> + Send>>;

fn resource_key<K: kube::Resource>(obj: &K) -> String {
    format!("{}/{}", obj.namespace().unwrap_or_default(), obj.name_any())
}

/// Run a `kube_runtime::Controller` over `api` until its stream ends.
///
/// Failed reconciliations are retried with a per-object Fibonacci backoff.
async fn watch_resource<K, F>(
    api: Api<K>,
    reconciler: Arc<Reconciler>,
    reconcile_fn: F,
    resource_name: &'static str,
) -> Result<(), ControllerError>
where
    K: kube::Resource + Clone + Send + Sync + 'static + std::fmt::Debug + serde::de::DeserializeOwned,
    K::DynamicType: Default + std::cmp::Eq + std::hash::Hash + Clone + std::fmt::Debug + Unpin,
    F: Fn(Arc<Reconciler>, Arc<K>) -> ReconcileFuture + Send + Sync + Clone + 'static,
{
    info!("Starting {} watcher", resource_name);

    let error_policy = move |obj: Arc<K>, error: &ControllerError, ctx: Arc<Reconciler>| {
        let key = resource_key(obj.as_ref());
        let (delay, attempts) = ctx.next_error_backoff(&key);
        error!(
            "Reconciliation error for {} {} (attempt {}), retrying in {:?}: {}",
            resource_name, key, attempts, delay, error
        );
        Action::requeue(delay)
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<Reconciler>| {
        let reconcile_fn = reconcile_fn.clone();
        async move {
            let key = resource_key(obj.as_ref());
            debug!("Reconciling {} {}", resource_name, key);
            let action = reconcile_fn(ctx.clone(), obj).await?;
            ctx.reset_backoff(&key);
            Ok::<Action, ControllerError>(action)
        }
    };

    // Debounce batches bursts of status updates into one pass
    let controller_config = ControllerConfig::default()
        .debounce(Duration::from_secs(5))
        .concurrency(3);

    Controller::new(api, watcher::Config::default())
        .with_config(controller_config)
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            if let Err(e) = res {
                debug!("Controller event for {}: {}", resource_name, e);
            }
        })
        .await;

    Err(ControllerError::Watch(format!("{resource_name} controller stream ended")))
}

/// Watches Kubernetes resources for changes.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    bootstrap_api: Api<RKEBootstrap>,
    ca_secret_api: Api<Secret>,
    settings: Arc<Settings>,
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(
        reconciler: Arc<Reconciler>,
        bootstrap_api: Api<RKEBootstrap>,
        ca_secret_api: Api<Secret>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            reconciler,
            bootstrap_api,
            ca_secret_api,
            settings,
        }
    }

    /// Reconciles RKEBootstraps into node identity on their infrastructure machines.
    pub async fn watch_bootstraps(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.bootstrap_api.clone(),
            self.reconciler.clone(),
            |reconciler, bootstrap| {
                Box::pin(async move {
                    let state = reconciler.reconcile_bootstrap(&bootstrap).await?;
                    debug!("Bootstrap {} is {:?}", resource_key(bootstrap.as_ref()), state);
                    Ok(state.action())
                })
            },
            "RKEBootstrap",
        )
        .await
    }

    /// Copies the CA secret's certificate into the `cacerts` setting.
    pub async fn watch_ca_secret(&self) -> Result<(), ControllerError> {
        info!("Starting CA secret watcher");
        let config = watcher::Config::default().fields(&format!("metadata.name={CA_SECRET_NAME}"));
        let mut events = watcher(self.ca_secret_api.clone(), config).default_backoff().boxed();

        while let Some(event) = events.next().await {
            match event {
                Ok(event) => apply_ca_event(&self.settings, &event),
                Err(e) => warn!("CA secret watch error: {}", e),
            }
        }

        Err(ControllerError::Watch("CA secret watch stream ended".to_string()))
    }
}
