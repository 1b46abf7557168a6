//! The `che` routing solver
//!
//! Resolves the manager owning a routing request through the shared manager
//! registry and branches on its routing mode. The solver keeps no state of
//! its own; every invocation starts from the registry snapshot and the
//! request, so stale or out-of-order deliveries are harmless.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use kube::{Client, ResourceExt};
use tracing::debug;

use crate::crd::{Endpoint, ExposedEndpoint, RoutingObjects, WorkspaceRouting};
use crate::defaults::{
    ANNOTATION_CHE_MANAGER_NAME, ANNOTATION_CHE_MANAGER_NAMESPACE, LABEL_WORKSPACE_ID,
};
use crate::registry::{ManagerKey, ManagerRecord, ManagerRegistry};

use super::singlehost;
use super::{RoutingError, RoutingSolver, SolverGetter, CHE_ROUTING_CLASS};

fn is_supported(routing_class: &str) -> bool {
    routing_class == CHE_ROUTING_CLASS
}

/// Negotiates the `che` solver with the routing controller
#[derive(Clone)]
pub struct CheRouterGetter {
    registry: ManagerRegistry,
}

impl CheRouterGetter {
    pub fn new(registry: ManagerRegistry) -> Self {
        Self { registry }
    }
}

impl SolverGetter for CheRouterGetter {
    fn has_solver(&self, routing_class: &str) -> bool {
        is_supported(routing_class)
    }

    fn get_solver(
        &self,
        client: Client,
        routing_class: &str,
    ) -> Result<Box<dyn RoutingSolver>, RoutingError> {
        if !is_supported(routing_class) {
            return Err(RoutingError::NotSupported);
        }
        Ok(Box::new(CheRoutingSolver::new(client, self.registry.clone())))
    }
}

/// Routing solver for Che-specific single-host routing of workspaces
pub struct CheRoutingSolver {
    client: Client,
    registry: ManagerRegistry,
}

impl CheRoutingSolver {
    pub fn new(client: Client, registry: ManagerRegistry) -> Self {
        Self { client, registry }
    }

    /// Resolve the manager owning a routing via its annotation pair
    fn manager_of_routing(&self, routing: &WorkspaceRouting) -> Result<ManagerRecord, RoutingError> {
        let annotations = routing.annotations();
        let name = annotations
            .get(ANNOTATION_CHE_MANAGER_NAME)
            .cloned()
            .unwrap_or_default();
        let namespace = annotations
            .get(ANNOTATION_CHE_MANAGER_NAMESPACE)
            .cloned()
            .unwrap_or_default();

        let key = if name.is_empty() {
            None
        } else {
            Some(ManagerKey::new(namespace, name))
        };

        find_manager(&self.registry, key)
    }
}

#[async_trait]
impl RoutingSolver for CheRoutingSolver {
    fn finalizer_required(&self, _routing: &WorkspaceRouting) -> bool {
        true
    }

    async fn get_spec_objects(
        &self,
        routing: &WorkspaceRouting,
    ) -> Result<RoutingObjects, RoutingError> {
        let manager = self.manager_of_routing(routing)?;

        if manager.is_single_host() {
            singlehost::spec_objects(&self.client, &manager, routing).await
        } else {
            Err(RoutingError::UnsupportedMode)
        }
    }

    async fn get_exposed_endpoints(
        &self,
        endpoints: &BTreeMap<String, Vec<Endpoint>>,
        objects: &RoutingObjects,
    ) -> Result<(BTreeMap<String, Vec<ExposedEndpoint>>, bool), RoutingError> {
        // no services means this routing exposes nothing; that is a valid,
        // fully resolved state
        let Some(service) = objects.services.first() else {
            return Ok((BTreeMap::new(), true));
        };

        let annotations = service.annotations();
        let name = annotations
            .get(ANNOTATION_CHE_MANAGER_NAME)
            .cloned()
            .unwrap_or_default();
        let namespace = annotations
            .get(ANNOTATION_CHE_MANAGER_NAMESPACE)
            .cloned()
            .unwrap_or_default();
        let workspace_id = service
            .labels()
            .get(LABEL_WORKSPACE_ID)
            .cloned()
            .unwrap_or_default();

        let key = if name.is_empty() {
            None
        } else {
            Some(ManagerKey::new(namespace, name))
        };
        let manager = find_manager(&self.registry, key)?;

        if manager.is_single_host() {
            Ok(singlehost::exposed_endpoints(
                &manager,
                &workspace_id,
                endpoints,
            ))
        } else {
            Err(RoutingError::UnsupportedMode)
        }
    }

    async fn finalize(&self, routing: &WorkspaceRouting) -> Result<(), RoutingError> {
        // resolution failure is non-fatal here: the manager may already be
        // gone and the routing must still be able to clean up after itself
        match self.manager_of_routing(routing) {
            Ok(manager) if !manager.is_single_host() => {
                return Err(RoutingError::UnsupportedMode);
            }
            Ok(_) | Err(_) => {}
        }

        singlehost::finalize(&self.client, routing).await
    }
}

/// Look up a manager in the registry, applying the implied-manager rule.
///
/// With no key given, a lone registered manager is implied; several
/// candidates make the request invalid. An empty registry or a missing named
/// manager are bring-up conditions reported as NotReady with an explicit
/// retry delay.
pub(crate) fn find_manager(
    registry: &ManagerRegistry,
    key: Option<ManagerKey>,
) -> Result<ManagerRecord, RoutingError> {
    let mut managers = registry.list();

    if managers.is_empty() {
        // no manager has been reconciled yet, so let's wait a bit
        return Err(RoutingError::not_ready(Duration::from_secs(1)));
    }

    let key = match key {
        Some(key) => key,
        None => {
            if managers.len() > 1 {
                return Err(RoutingError::Invalid {
                    reason: format!(
                        "the routing does not specify any Che manager in its configuration \
                         but there are {} Che managers in the cluster",
                        managers.len()
                    ),
                });
            }
            if let Some((_, record)) = managers.drain().next() {
                return Ok(record);
            }
            return Err(RoutingError::not_ready(Duration::from_secs(1)));
        }
    };

    managers.remove(&key).ok_or_else(|| {
        debug!(key = %key, "routing requires a non-existing Che manager, retrying in 10 seconds");
        RoutingError::not_ready(Duration::from_secs(10))
    })
}
