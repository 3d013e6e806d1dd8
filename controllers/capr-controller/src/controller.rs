//! Main controller implementation.
//!
//! Wires the object store caches, the plan delivery server and the watchers
//! together, then supervises them. Any of them ending takes the process down
//! so the pod is restarted.

use crate::ca::CA_SECRET_NAMESPACE;
use crate::config::Config;
use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::watcher::Watcher;
use capr_client::{DownstreamNodeLister, KubeClusterStore};
use capr_settings::{CAPI_API_SERVER_URL, SERVER_URL, Settings};
use config_server::{AppState, Installer, PlanDelivery, StandaloneResolver};
use crds::RKEBootstrap;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Settings derived from the controller configuration
fn build_settings(mut settings: Settings, config: &Config, cluster_url: &str) -> Settings {
    if let Some(defaults) = &config.inject_defaults {
        match settings.inject_defaults(defaults) {
            Ok(count) => info!("Injected {} setting defaults", count),
            Err(e) => warn!("Ignoring injected setting defaults: {}", e),
        }
    }
    settings.set(SERVER_URL, config.server_url.clone());
    settings.set(
        CAPI_API_SERVER_URL,
        config.api_server_url.clone().unwrap_or_else(|| cluster_url.to_string()),
    );
    settings
}

/// Supervisor for the controller's long-running tasks.
pub struct Controller {
    server: JoinHandle<Result<(), ControllerError>>,
    bootstrap_watcher: JoinHandle<Result<(), ControllerError>>,
    ca_watcher: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance and starts its tasks.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing CAPR Controller");

        let kube_config = kube::Config::infer().await?;
        let cluster_url = kube_config.cluster_url.to_string();
        let kube_client = Client::try_from(kube_config)?;

        let settings = Arc::new(build_settings(Settings::from_process_env(), &config, &cluster_url));
        info!("  API server URL for agents: {}", settings.get(CAPI_API_SERVER_URL));

        let store = Arc::new(KubeClusterStore::start_in(kube_client.clone(), config.namespace.clone()));
        let nodes = Arc::new(DownstreamNodeLister::new(kube_client.clone()));

        let resolver = Arc::new(StandaloneResolver::new(store.clone(), settings.clone()));
        let delivery = PlanDelivery::new(store.clone(), resolver).with_plan_wait_timeout(config.plan_wait_timeout);
        let state = Arc::new(AppState {
            delivery,
            installer: Installer::new(settings.clone()),
            settings: settings.clone(),
        });

        let bootstrap_api: Api<RKEBootstrap> = match &config.namespace {
            Some(ns) => Api::namespaced(kube_client.clone(), ns),
            None => Api::all(kube_client.clone()),
        };
        let ca_secret_api: Api<Secret> = Api::namespaced(kube_client, CA_SECRET_NAMESPACE);

        let reconciler = Arc::new(Reconciler::new(store.clone(), store, nodes));
        let watcher_instance = Arc::new(Watcher::new(reconciler, bootstrap_api, ca_secret_api, settings));

        let addr = config.listen_addr();
        let server = tokio::spawn(async move {
            config_server::serve(addr, state).await?;
            Ok::<(), ControllerError>(())
        });

        let bootstrap_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_bootstraps().await })
        };

        let ca_watcher = {
            let watcher = watcher_instance;
            tokio::spawn(async move { watcher.watch_ca_secret().await })
        };

        Ok(Self {
            server,
            bootstrap_watcher,
            ca_watcher,
        })
    }

    /// Runs until one of the supervised tasks stops.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("CAPR Controller running");

        tokio::select! {
            result = &mut self.server => {
                result.map_err(|e| ControllerError::Watch(format!("Plan delivery server panicked: {e}")))?
                    .map_err(|e| ControllerError::Watch(format!("Plan delivery server error: {e}")))?;
            }
            result = &mut self.bootstrap_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("RKEBootstrap watcher panicked: {e}")))?
                    .map_err(|e| ControllerError::Watch(format!("RKEBootstrap watcher error: {e}")))?;
            }
            result = &mut self.ca_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("CA secret watcher panicked: {e}")))?
                    .map_err(|e| ControllerError::Watch(format!("CA secret watcher error: {e}")))?;
            }
        }

        warn!("A supervised task stopped, shutting down");
        Ok(())
    }
}
