//! Controllers of the che-gateway-operator
//!
//! Two independently scheduled, level-triggered loops run here. The manager
//! reconciler owns CheManager lifecycle, keeps the gateway objects in sync
//! and maintains the shared manager registry as a side effect. The routing
//! controller drives the pluggable solver for WorkspaceRouting objects and
//! has no view into manager state other than that registry.

pub mod gateway;
pub mod routing;

mod finalizers;
mod reconciler;

#[cfg(test)]
mod gateway_test;

pub use finalizers::CHE_MANAGER_FINALIZER;
pub use reconciler::{run_manager_controller, ControllerState};
pub use routing::run_routing_controller;
