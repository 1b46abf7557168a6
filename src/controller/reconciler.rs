//! CheManager reconciliation loop
//!
//! Level-triggered: every pass re-reads the manager, asserts the gateway
//! objects, records the outcome in the status and publishes the manager into
//! the shared registry where the routing solver picks it up. Deletion runs
//! through a finalizer so that a manager cannot disappear while workspaces
//! still route through its gateway.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::{error, info, instrument, warn};

use crate::crd::{CheManager, CheManagerStatus, GatewayPhase};
use crate::error::{Error, Result};
use crate::registry::{ManagerKey, ManagerRecord, ManagerRegistry};

use super::finalizers;
use super::gateway;

/// Shared state handed to every reconcile invocation
#[derive(Clone)]
pub struct ControllerState {
    pub client: Client,
    pub registry: ManagerRegistry,
}

/// Requeue interval while the gateway is still coming up
const REQUEUE_FAST: Duration = Duration::from_secs(15);
/// Requeue interval once the gateway is established
const REQUEUE_SLOW: Duration = Duration::from_secs(300);

/// Run the CheManager controller until shutdown
pub async fn run_manager_controller(client: Client, registry: ManagerRegistry) -> Result<()> {
    let managers: Api<CheManager> = Api::all(client.clone());

    // fail fast when the CRD is not installed
    if let Err(e) = managers.list(&Default::default()).await {
        error!("CheManager CRD is not queryable: {:?}", e);
        return Err(Error::KubeError(e));
    }

    let state = Arc::new(ControllerState { client: client.clone(), registry });

    info!("starting CheManager controller");
    Controller::new(managers, watcher::Config::default())
        .owns(
            Api::<Deployment>::all(client.clone()),
            watcher::Config::default(),
        )
        .owns(
            Api::<Service>::all(client.clone()),
            watcher::Config::default(),
        )
        .owns(
            Api::<ConfigMap>::all(client.clone()),
            watcher::Config::default(),
        )
        .shutdown_on_signal()
        .run(reconcile, error_policy, state)
        .for_each(|result| async move {
            match result {
                Ok((object, _)) => info!("reconciled CheManager {:?}", object.name),
                Err(e) => warn!("reconciliation failed: {:?}", e),
            }
        })
        .await;

    info!("CheManager controller terminated");
    Ok(())
}

#[instrument(skip(manager, state), fields(name = %manager.name_any(), namespace = manager.namespace()))]
async fn reconcile(manager: Arc<CheManager>, state: Arc<ControllerState>) -> Result<Action> {
    let client = &state.client;
    let namespace = manager.namespace().unwrap_or_else(|| "default".to_string());
    let name = manager.name_any();
    let key = ManagerKey::new(&namespace, &name);

    let api: Api<CheManager> = Api::namespaced(client.clone(), &namespace);

    // Re-fetch so deletions observed between watch event and reconcile do not
    // resurrect a registry entry.
    let manager = match api.get_opt(&name).await? {
        Some(manager) => manager,
        None => {
            state.registry.delete(&key);
            info!("CheManager {} is gone, registry entry dropped", key);
            return Ok(Action::await_change());
        }
    };

    if manager.metadata.deletion_timestamp.is_some() {
        if finalizers::has_finalizer(&manager) {
            finalizers::finalize(client, &manager).await?;
            state.registry.delete(&key);
            finalizers::remove_finalizer(client, &manager).await?;
            info!("finalized CheManager {}", key);
        }
        return Ok(Action::await_change());
    }

    finalizers::add_finalizer(client, &manager).await?;

    let established = gateway::reconcile_gateway(client, &manager).await?;

    let phase = if !manager.is_single_host() {
        GatewayPhase::Inactive
    } else if established {
        GatewayPhase::Established
    } else {
        GatewayPhase::Initializing
    };
    patch_status(&api, &manager, phase).await?;

    state
        .registry
        .put(key, ManagerRecord::from_manager(&manager, established));

    let requeue = match phase {
        GatewayPhase::Established | GatewayPhase::Inactive => REQUEUE_SLOW,
        GatewayPhase::Initializing => REQUEUE_FAST,
    };
    Ok(Action::requeue(requeue))
}

async fn patch_status(
    api: &Api<CheManager>,
    manager: &CheManager,
    phase: GatewayPhase,
) -> Result<()> {
    let message = match phase {
        GatewayPhase::Established => "gateway is running".to_string(),
        GatewayPhase::Initializing => "waiting for the gateway deployment".to_string(),
        GatewayPhase::Inactive => "multi-host routing runs no gateway".to_string(),
    };

    let status = CheManagerStatus {
        gateway_phase: phase,
        message: Some(message),
        observed_generation: manager.metadata.generation,
    };

    let patch = json!({ "status": status });
    api.patch_status(
        &manager.name_any(),
        &PatchParams::apply("che-gateway-operator"),
        &Patch::Merge(&patch),
    )
    .await?;

    Ok(())
}

fn error_policy(manager: Arc<CheManager>, error: &Error, _state: Arc<ControllerState>) -> Action {
    let delay = if error.is_retriable() {
        Duration::from_secs(15)
    } else {
        Duration::from_secs(60)
    };

    warn!(
        "reconciliation of CheManager {} failed, retrying in {:?}: {}",
        manager.name_any(),
        delay,
        error
    );
    Action::requeue(delay)
}
