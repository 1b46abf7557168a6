//! Custom Resource Definitions for the che-gateway-operator

mod manager;
mod routing;


pub use manager::{CheManager, CheManagerSpec, CheManagerStatus, GatewayPhase, RoutingMode};
pub use routing::{
    Endpoint, EndpointExposure, ExposedEndpoint, PodAdditions, RoutingObjects, RoutingPhase,
    WorkspaceRouting, WorkspaceRoutingSpec, WorkspaceRoutingStatus,
};
