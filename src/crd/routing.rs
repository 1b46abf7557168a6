//! WorkspaceRouting Custom Resource Definition
//!
//! A WorkspaceRouting is an abstract request to expose the endpoints of one
//! workspace. The routing controller hands it to a pluggable solver which
//! translates it into concrete cluster objects; this operator ships the
//! single-host `che` solver.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, Service, Volume};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Exposure class of a declared endpoint
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum EndpointExposure {
    /// Reachable from outside the cluster through the gateway
    #[default]
    Public,
    /// Reachable only from within the cluster
    Internal,
    /// Not exposed at all
    None,
}

/// One endpoint declaration of a workspace component
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub name: String,

    pub target_port: i32,

    #[serde(default)]
    pub exposure: EndpointExposure,

    /// Application-level protocol, e.g. `http`, `https`, `ws`; empty means http
    #[serde(default)]
    pub protocol: String,

    /// Path under the endpoint's base URL; empty means `/`
    #[serde(default)]
    pub path: String,

    /// Whether the endpoint requires a secure scheme regardless of protocol
    #[serde(default)]
    pub secure: bool,
}

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "controller.devfile.io",
    version = "v1alpha1",
    kind = "WorkspaceRouting",
    namespaced,
    status = "WorkspaceRoutingStatus",
    shortname = "wsr",
    printcolumn = r#"{"name":"Workspace","type":"string","jsonPath":".spec.workspaceId"}"#,
    printcolumn = r#"{"name":"Class","type":"string","jsonPath":".spec.routingClass"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceRoutingSpec {
    /// Cluster-unique id of the workspace being exposed
    pub workspace_id: String,

    /// Routing class selecting the solver; this operator implements `che`
    pub routing_class: String,

    /// Endpoint declarations per component, in declaration order
    #[serde(default)]
    pub endpoints: BTreeMap<String, Vec<Endpoint>>,

    /// Pod selector for the services the solver synthesizes
    #[serde(default)]
    pub pod_selector: BTreeMap<String, String>,
}

/// Lifecycle phase of a routing request
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum RoutingPhase {
    /// Dependencies are not visible yet; the solver asked for a retry
    #[default]
    Preparing,
    /// All exposed endpoints resolve to a definite URL
    Ready,
    /// The request is contradictory or names an unsupported mode/class
    Failed,
}

/// A resolved, externally reachable endpoint
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExposedEndpoint {
    pub name: String,
    pub url: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceRoutingStatus {
    #[serde(default)]
    pub phase: RoutingPhase,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Resolved endpoints per component, mirroring declaration order
    #[serde(default)]
    pub exposed_endpoints: BTreeMap<String, Vec<ExposedEndpoint>>,
}

/// Additions the solver may request on the workspace pod
#[derive(Clone, Debug, Default)]
pub struct PodAdditions {
    pub containers: Vec<Container>,
    pub volumes: Vec<Volume>,
}

/// Cluster objects synthesized by a solver for one routing request.
///
/// Owned by the routing controller once returned; the controller persists
/// them. The single-host solver only ever produces services, the gateway
/// config fragments are synced by the solver itself.
#[derive(Clone, Debug, Default)]
pub struct RoutingObjects {
    pub services: Vec<Service>,
    pub pod_additions: Option<PodAdditions>,
}
