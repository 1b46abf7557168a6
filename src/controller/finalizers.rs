//! Finalizer handling for CheManager teardown
//!
//! A manager may only disappear once no workspace depends on its gateway.
//! Dependent workspaces are detected by the gateway-config ConfigMaps they
//! leave in the manager's namespace; as long as any remain, finalization
//! fails with a retryable error and the finalizer stays in place.

use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::info;

use crate::crd::CheManager;
use crate::defaults::{
    ANNOTATION_CHE_MANAGER_NAME, ANNOTATION_CHE_MANAGER_NAMESPACE, GATEWAY_CONFIG_COMPONENT,
};
use crate::error::{Error, Result};

use super::gateway;

/// Finalizer gating CheManager deletion
pub const CHE_MANAGER_FINALIZER: &str = "chemanager.che.eclipse.org/finalizer";

pub fn has_finalizer(manager: &CheManager) -> bool {
    manager
        .finalizers()
        .iter()
        .any(|f| f == CHE_MANAGER_FINALIZER)
}

/// Add the finalizer to a manager if not present
pub async fn add_finalizer(client: &Client, manager: &CheManager) -> Result<()> {
    if has_finalizer(manager) {
        return Ok(());
    }

    let namespace = manager.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<CheManager> = Api::namespaced(client.clone(), &namespace);

    let mut finalizers: Vec<String> = manager.finalizers().to_vec();
    finalizers.push(CHE_MANAGER_FINALIZER.to_string());

    let patch = json!({
        "metadata": {
            "finalizers": finalizers
        }
    });
    api.patch(
        &manager.name_any(),
        &PatchParams::apply("che-gateway-operator"),
        &Patch::Merge(&patch),
    )
    .await?;

    info!("added finalizer to CheManager {}", manager.name_any());
    Ok(())
}

/// Remove the finalizer after teardown completed
pub async fn remove_finalizer(client: &Client, manager: &CheManager) -> Result<()> {
    let namespace = manager.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<CheManager> = Api::namespaced(client.clone(), &namespace);

    let finalizers: Vec<String> = manager
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != CHE_MANAGER_FINALIZER)
        .cloned()
        .collect();

    let patch = json!({
        "metadata": {
            "finalizers": finalizers
        }
    });
    api.patch(
        &manager.name_any(),
        &PatchParams::apply("che-gateway-operator"),
        &Patch::Merge(&patch),
    )
    .await?;

    info!("removed finalizer from CheManager {}", manager.name_any());
    Ok(())
}

/// Run the finalization gate and, once it passes, tear the gateway down.
///
/// Multi-host managers cannot be finalized: the mode is not implemented and
/// there is no defined teardown for it.
pub async fn finalize(client: &Client, manager: &CheManager) -> Result<()> {
    let workspaces = if manager.is_single_host() {
        dependent_workspace_count(client, manager).await?
    } else {
        0
    };
    finalization_gate(manager, workspaces)?;

    gateway::delete_gateway(client, manager).await
}

/// Decide whether a manager may be finalized right now.
///
/// A manager with dependent workspace configs stays blocked until the last
/// one is gone; multi-host managers are rejected outright.
fn finalization_gate(manager: &CheManager, workspaces: usize) -> Result<()> {
    if !manager.is_single_host() {
        return Err(Error::UnsupportedRoutingMode);
    }
    if workspaces > 0 {
        return Err(Error::FinalizationBlocked { workspaces });
    }
    Ok(())
}

/// Count the workspace gateway configs still referencing this manager.
///
/// Workspace configs are selected by the manager's gateway-config labels and
/// confirmed by their manager annotations; the manager's own config carries
/// the labels but not the annotations and is therefore not counted.
async fn dependent_workspace_count(client: &Client, manager: &CheManager) -> Result<usize> {
    let namespace = manager.namespace().unwrap_or_else(|| "default".to_string());
    let name = manager.name_any();
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), &namespace);

    let selector = format!(
        "app.kubernetes.io/part-of={},app.kubernetes.io/component={}",
        name, GATEWAY_CONFIG_COMPONENT
    );
    let list = api.list(&ListParams::default().labels(&selector)).await?;

    Ok(count_dependent_configs(&list.items, &name, &namespace))
}

fn count_dependent_configs(items: &[ConfigMap], name: &str, namespace: &str) -> usize {
    items
        .iter()
        .filter(|config| {
            let annotations = config.annotations();
            annotations.get(ANNOTATION_CHE_MANAGER_NAME).map(String::as_str) == Some(name)
                && annotations
                    .get(ANNOTATION_CHE_MANAGER_NAMESPACE)
                    .map(String::as_str)
                    == Some(namespace)
        })
        .count()
}
