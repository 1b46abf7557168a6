//! CheManager Custom Resource Definition
//!
//! A CheManager owns one single-host gateway through which all workspaces of
//! the cluster are exposed. The manager reconciler keeps the gateway objects
//! in sync with this spec and publishes the observed state to the in-process
//! manager registry for the routing solver to consume.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Routing mode of a manager.
///
/// An absent value on the spec is a synonym for `SingleHost`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum RoutingMode {
    /// All workspaces share the manager's host behind a single gateway
    SingleHost,
    /// One host per workspace; recognized but not implemented
    MultiHost,
}

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "che.eclipse.org",
    version = "v1alpha1",
    kind = "CheManager",
    namespaced,
    status = "CheManagerStatus",
    shortname = "chemgr",
    printcolumn = r#"{"name":"Host","type":"string","jsonPath":".spec.host"}"#,
    printcolumn = r#"{"name":"Routing","type":"string","jsonPath":".spec.routing"}"#,
    printcolumn = r#"{"name":"Gateway","type":"string","jsonPath":".status.gatewayPhase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CheManagerSpec {
    /// Externally reachable base domain for the gateway
    pub host: String,

    /// Routing mode; omitting it means single-host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<RoutingMode>,

    /// Image of the gateway container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_image: Option<String>,

    /// Image of the sidecar that feeds gateway ConfigMaps into the gateway
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_configurer_image: Option<String>,
}

/// Lifecycle phase of the manager's gateway
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum GatewayPhase {
    /// Gateway objects exist but the deployment is not ready yet
    #[default]
    Initializing,
    /// The gateway deployment reports ready replicas
    Established,
    /// No gateway is run for this manager (multi-host mode)
    Inactive,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheManagerStatus {
    #[serde(default)]
    pub gateway_phase: GatewayPhase,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl CheManager {
    /// Whether this manager runs in single-host mode.
    ///
    /// An unset routing mode counts as single-host.
    pub fn is_single_host(&self) -> bool {
        matches!(self.spec.routing, None | Some(RoutingMode::SingleHost))
    }
}
