//! che-gateway-operator: Kubernetes operator for Che single-host routing
//!
//! This crate runs two cooperating controllers: one managing the lifecycle of
//! CheManager objects and their gateway, and one resolving WorkspaceRouting
//! requests through a pluggable solver. They share an in-memory registry of
//! reconciled managers and nothing else.

pub mod controller;
pub mod crd;
pub mod defaults;
pub mod error;
pub mod registry;
pub mod solver;

pub use crate::error::{Error, Result};
