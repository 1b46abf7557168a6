//! Pluggable routing solvers
//!
//! A solver translates an abstract [`WorkspaceRouting`] request into concrete
//! cluster objects. Solvers are negotiated through [`SolverGetter`] by routing
//! class; this operator ships exactly one solver, for the `che` class, which
//! routes workspaces through the owning manager's single-host gateway.
//!
//! Solvers are stateless per call. Their only view into manager lifecycle is
//! the shared [`ManagerRegistry`](crate::registry::ManagerRegistry), so
//! "dependency not yet visible" is an expected steady state during bring-up
//! and is reported as [`RoutingError::NotReady`] rather than a failure.

pub mod traefik;

mod che;
mod singlehost;

#[cfg(test)]
mod che_test;
#[cfg(test)]
mod singlehost_test;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Client, ResourceExt};

use crate::crd::{Endpoint, ExposedEndpoint, RoutingObjects, WorkspaceRouting};
use crate::defaults::{
    gateway_workspace_config_name, ANNOTATION_WORKSPACE_ROUTING_NAME,
    ANNOTATION_WORKSPACE_ROUTING_NAMESPACE, LABEL_WORKSPACE_ID,
};

pub use che::{CheRouterGetter, CheRoutingSolver};

/// The routing class handled by this operator's solver
pub const CHE_ROUTING_CLASS: &str = "che";

/// Errors of the solver plugin contract
#[derive(thiserror::Error, Debug)]
pub enum RoutingError {
    /// The requested routing class is unrecognized; terminal, not retried
    #[error("the routing class is not supported by this solver")]
    NotSupported,

    /// A required dependency is not yet visible; retry after the delay
    #[error("routing dependencies are not ready, retry in {retry_after:?}")]
    NotReady { retry_after: Duration },

    /// The request is ambiguous or self-contradictory; terminal until corrected
    #[error("invalid routing: {reason}")]
    Invalid { reason: String },

    /// Multi-host routing was requested; recognized but not implemented
    #[error("multi-host routing mode is not supported at the moment")]
    UnsupportedMode,

    /// Object-store failure; retried by the caller's generic policy
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("failed to serialize gateway configuration: {0}")]
    Serialization(#[from] serde_yaml::Error),
}

impl RoutingError {
    pub fn not_ready(retry_after: Duration) -> Self {
        RoutingError::NotReady { retry_after }
    }

    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            RoutingError::NotReady { .. } | RoutingError::Kube(_)
        )
    }
}

/// The solver plugin contract towards the routing controller
#[async_trait]
pub trait RoutingSolver: Send + Sync {
    /// Whether finalization must run before the routing object may disappear
    fn finalizer_required(&self, routing: &WorkspaceRouting) -> bool;

    /// Undo everything the solver synthesized for this routing.
    ///
    /// Must succeed even if the owning manager was already deleted.
    async fn finalize(&self, routing: &WorkspaceRouting) -> Result<(), RoutingError>;

    /// Construct the cluster objects that should be applied for this routing
    async fn get_spec_objects(
        &self,
        routing: &WorkspaceRouting,
    ) -> Result<RoutingObjects, RoutingError>;

    /// Resolve the externally reachable URL of every declared endpoint.
    ///
    /// The returned flag is false, without an error, while URLs cannot be
    /// determined yet; the caller retries later.
    async fn get_exposed_endpoints(
        &self,
        endpoints: &BTreeMap<String, Vec<Endpoint>>,
        objects: &RoutingObjects,
    ) -> Result<(BTreeMap<String, Vec<ExposedEndpoint>>, bool), RoutingError>;
}

/// Negotiates a solver for a routing class
pub trait SolverGetter: Send + Sync {
    fn has_solver(&self, routing_class: &str) -> bool;

    fn get_solver(
        &self,
        client: Client,
        routing_class: &str,
    ) -> Result<Box<dyn RoutingSolver>, RoutingError>;
}

/// Map a gateway workspace ConfigMap back to the routing that produced it.
///
/// The routing controller hooks this into its ConfigMap watch so that
/// out-of-band edits to a workspace's gateway config re-enqueue the routing
/// and the config converges again. Returns the (name, namespace) of the
/// originating routing.
pub fn is_gateway_workspace_config(config_map: &ConfigMap) -> Option<(String, String)> {
    let workspace_id = config_map.labels().get(LABEL_WORKSPACE_ID)?;

    // bail out quickly on configmaps that don't follow the naming convention
    if config_map.name_any() != gateway_workspace_config_name(workspace_id) {
        return None;
    }

    let annotations = config_map.annotations();
    let routing_name = annotations.get(ANNOTATION_WORKSPACE_ROUTING_NAME)?;
    let routing_namespace = annotations.get(ANNOTATION_WORKSPACE_ROUTING_NAMESPACE)?;

    if routing_name.is_empty() {
        return None;
    }

    Some((routing_name.clone(), routing_namespace.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn workspace_config_map(name: &str, workspace_id: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("ns".to_string()),
                labels: Some(std::collections::BTreeMap::from([(
                    LABEL_WORKSPACE_ID.to_string(),
                    workspace_id.to_string(),
                )])),
                annotations: Some(std::collections::BTreeMap::from([
                    (
                        ANNOTATION_WORKSPACE_ROUTING_NAME.to_string(),
                        "routing".to_string(),
                    ),
                    (
                        ANNOTATION_WORKSPACE_ROUTING_NAMESPACE.to_string(),
                        "ws".to_string(),
                    ),
                ])),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn workspace_config_maps_back_to_its_routing() {
        let config = workspace_config_map("wsid", "wsid");

        let (name, namespace) =
            is_gateway_workspace_config(&config).expect("config should map to its routing");
        assert_eq!(name, "routing");
        assert_eq!(namespace, "ws");
    }

    #[test]
    fn config_with_unexpected_name_is_ignored() {
        let config = workspace_config_map("something-else", "wsid");
        assert!(is_gateway_workspace_config(&config).is_none());
    }

    #[test]
    fn config_without_routing_annotations_is_ignored() {
        let mut config = workspace_config_map("wsid", "wsid");
        config.metadata.annotations = None;
        assert!(is_gateway_workspace_config(&config).is_none());
    }

    #[test]
    fn config_without_workspace_label_is_ignored() {
        let mut config = workspace_config_map("wsid", "wsid");
        config.metadata.labels = None;
        assert!(is_gateway_workspace_config(&config).is_none());
    }
}
