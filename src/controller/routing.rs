//! WorkspaceRouting reconciliation loop
//!
//! This controller is deliberately thin. It negotiates a solver for the
//! routing class, lets the solver synthesize the cluster objects, persists
//! them and publishes the resolved endpoint URLs into the status. All routing
//! policy lives in the solver.
//!
//! Besides the primary watch it also watches gateway workspace ConfigMaps and
//! maps them back to their originating routing, so an out-of-band edit of a
//! workspace's gateway config converges again on the next pass.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::finalizer::{finalizer, Event};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher;
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::{error, info, instrument, warn};

use crate::crd::{ExposedEndpoint, RoutingPhase, WorkspaceRouting, WorkspaceRoutingStatus};
use crate::error::{Error, Result};
use crate::registry::ManagerRegistry;
use crate::solver::{self, CheRouterGetter, RoutingError, SolverGetter};

use super::reconciler::ControllerState;

/// Finalizer gating WorkspaceRouting deletion
pub const WORKSPACE_ROUTING_FINALIZER: &str = "workspacerouting.controller.devfile.io/finalizer";

/// Requeue interval once the routing is fully resolved
const REQUEUE_RESOLVED: Duration = Duration::from_secs(300);
/// Requeue interval while endpoint URLs cannot be determined yet
const REQUEUE_UNRESOLVED: Duration = Duration::from_secs(5);

/// Run the WorkspaceRouting controller until shutdown
pub async fn run_routing_controller(client: Client, registry: ManagerRegistry) -> Result<()> {
    let routings: Api<WorkspaceRouting> = Api::all(client.clone());

    if let Err(e) = routings.list(&Default::default()).await {
        error!("WorkspaceRouting CRD is not queryable: {:?}", e);
        return Err(Error::KubeError(e));
    }

    let state = Arc::new(ControllerState { client: client.clone(), registry });

    info!("starting WorkspaceRouting controller");
    Controller::new(routings, watcher::Config::default())
        .owns(
            Api::<Service>::all(client.clone()),
            watcher::Config::default(),
        )
        .watches(
            Api::<ConfigMap>::all(client.clone()),
            watcher::Config::default(),
            |config| {
                solver::is_gateway_workspace_config(&config)
                    .map(|(name, namespace)| ObjectRef::new(&name).within(&namespace))
            },
        )
        .shutdown_on_signal()
        .run(reconcile, error_policy, state)
        .for_each(|result| async move {
            match result {
                Ok((object, _)) => info!("reconciled WorkspaceRouting {:?}", object.name),
                Err(e) => warn!("reconciliation failed: {:?}", e),
            }
        })
        .await;

    info!("WorkspaceRouting controller terminated");
    Ok(())
}

#[instrument(skip(routing, state), fields(name = %routing.name_any(), namespace = routing.namespace()))]
async fn reconcile(routing: Arc<WorkspaceRouting>, state: Arc<ControllerState>) -> Result<Action> {
    let getter = CheRouterGetter::new(state.registry.clone());

    // Routings of a class we have no solver for belong to another controller.
    if !getter.has_solver(&routing.spec.routing_class) {
        return Ok(Action::await_change());
    }

    let namespace = routing.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<WorkspaceRouting> = Api::namespaced(state.client.clone(), &namespace);

    let state = state.clone();
    finalizer(&api, WORKSPACE_ROUTING_FINALIZER, routing, |event| async {
        match event {
            Event::Apply(routing) => apply(&routing, &state).await,
            Event::Cleanup(routing) => cleanup(&routing, &state).await,
        }
    })
    .await
    .map_err(Error::from)
}

async fn apply(routing: &WorkspaceRouting, state: &ControllerState) -> Result<Action> {
    let getter = CheRouterGetter::new(state.registry.clone());
    let solver = getter.get_solver(state.client.clone(), &routing.spec.routing_class)?;

    let objects = match solver.get_spec_objects(routing).await {
        Ok(objects) => objects,
        Err(RoutingError::NotReady { retry_after }) => {
            patch_status(
                state,
                routing,
                RoutingPhase::Preparing,
                Some("waiting for routing dependencies".to_string()),
                BTreeMap::new(),
            )
            .await?;
            return Ok(Action::requeue(retry_after));
        }
        Err(e) => {
            patch_status(
                state,
                routing,
                RoutingPhase::Failed,
                Some(e.to_string()),
                BTreeMap::new(),
            )
            .await?;
            return Err(Error::Routing(e));
        }
    };

    persist_services(&state.client, routing, &objects.services).await?;

    let (exposed, ready) = match solver
        .get_exposed_endpoints(&routing.spec.endpoints, &objects)
        .await
    {
        Ok(resolved) => resolved,
        Err(RoutingError::NotReady { retry_after }) => {
            patch_status(
                state,
                routing,
                RoutingPhase::Preparing,
                Some("waiting for routing dependencies".to_string()),
                BTreeMap::new(),
            )
            .await?;
            return Ok(Action::requeue(retry_after));
        }
        Err(e) => {
            patch_status(
                state,
                routing,
                RoutingPhase::Failed,
                Some(e.to_string()),
                BTreeMap::new(),
            )
            .await?;
            return Err(Error::Routing(e));
        }
    };

    if ready {
        patch_status(state, routing, RoutingPhase::Ready, None, exposed).await?;
        Ok(Action::requeue(REQUEUE_RESOLVED))
    } else {
        patch_status(
            state,
            routing,
            RoutingPhase::Preparing,
            Some("endpoint URLs cannot be determined yet".to_string()),
            BTreeMap::new(),
        )
        .await?;
        Ok(Action::requeue(REQUEUE_UNRESOLVED))
    }
}

async fn cleanup(routing: &WorkspaceRouting, state: &ControllerState) -> Result<Action> {
    let getter = CheRouterGetter::new(state.registry.clone());
    let solver = getter.get_solver(state.client.clone(), &routing.spec.routing_class)?;

    if solver.finalizer_required(routing) {
        solver.finalize(routing).await?;
        info!(
            "finalized WorkspaceRouting {} for workspace {}",
            routing.name_any(),
            routing.spec.workspace_id
        );
    }

    Ok(Action::await_change())
}

/// Apply the synthesized services, taking ownership of our fields
async fn persist_services(
    client: &Client,
    routing: &WorkspaceRouting,
    services: &[Service],
) -> Result<()> {
    let namespace = routing.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<Service> = Api::namespaced(client.clone(), &namespace);

    for service in services {
        let name = service.name_any();
        api.patch(
            &name,
            &PatchParams::apply("che-gateway-operator").force(),
            &Patch::Apply(service),
        )
        .await?;
    }

    Ok(())
}

async fn patch_status(
    state: &ControllerState,
    routing: &WorkspaceRouting,
    phase: RoutingPhase,
    message: Option<String>,
    exposed_endpoints: BTreeMap<String, Vec<ExposedEndpoint>>,
) -> Result<()> {
    let namespace = routing.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<WorkspaceRouting> = Api::namespaced(state.client.clone(), &namespace);

    let status = WorkspaceRoutingStatus {
        phase,
        message,
        exposed_endpoints,
    };

    let patch = json!({ "status": status });
    api.patch_status(
        &routing.name_any(),
        &PatchParams::apply("che-gateway-operator"),
        &Patch::Merge(&patch),
    )
    .await?;

    Ok(())
}

/// Delay the solver explicitly asked for, if the error carries one.
///
/// Errors from apply/cleanup arrive wrapped by the finalizer helper, so the
/// wrapper has to be peeled before the solver's NotReady can be seen.
fn requested_delay(error: &Error) -> Option<Duration> {
    match error {
        Error::Routing(RoutingError::NotReady { retry_after }) => Some(*retry_after),
        Error::FinalizerError(wrapped) => match wrapped.as_ref() {
            kube::runtime::finalizer::Error::ApplyFailed(e)
            | kube::runtime::finalizer::Error::CleanupFailed(e) => requested_delay(e),
            _ => None,
        },
        _ => None,
    }
}

fn error_policy(
    routing: Arc<WorkspaceRouting>,
    error: &Error,
    _state: Arc<ControllerState>,
) -> Action {
    // Honor the delay the solver asked for.
    if let Some(retry_after) = requested_delay(error) {
        return Action::requeue(retry_after);
    }

    let delay = if error.is_retriable() {
        Duration::from_secs(15)
    } else {
        Duration::from_secs(60)
    };

    warn!(
        "reconciliation of WorkspaceRouting {} failed, retrying in {:?}: {}",
        routing.name_any(),
        delay,
        error
    );
    Action::requeue(delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn not_ready(secs: u64) -> Error {
        Error::Routing(RoutingError::not_ready(Duration::from_secs(secs)))
    }

    #[test]
    fn solver_delay_is_honored_directly() {
        assert_eq!(
            requested_delay(&not_ready(10)),
            Some(Duration::from_secs(10))
        );
    }

    #[test]
    fn solver_delay_is_honored_through_the_finalizer_wrapper() {
        let apply_failed = Error::FinalizerError(Box::new(
            kube::runtime::finalizer::Error::ApplyFailed(not_ready(10)),
        ));
        assert_eq!(
            requested_delay(&apply_failed),
            Some(Duration::from_secs(10))
        );

        let cleanup_failed = Error::FinalizerError(Box::new(
            kube::runtime::finalizer::Error::CleanupFailed(not_ready(1)),
        ));
        assert_eq!(
            requested_delay(&cleanup_failed),
            Some(Duration::from_secs(1))
        );
    }

    #[test]
    fn other_errors_carry_no_solver_delay() {
        assert_eq!(requested_delay(&Error::UnsupportedRoutingMode), None);

        let invalid = Error::FinalizerError(Box::new(
            kube::runtime::finalizer::Error::ApplyFailed(Error::Routing(
                RoutingError::Invalid {
                    reason: "ambiguous".to_string(),
                },
            )),
        ));
        assert_eq!(requested_delay(&invalid), None);
    }
}
