//! Shared constants and naming conventions
//!
//! Annotation and label keys correlate routing-produced objects with their
//! owning Che manager and workspace routing, and the naming functions pin the
//! contract between the manager reconciler and the routing solver: the
//! per-workspace gateway ConfigMap is named by the workspace id, the
//! per-manager one by the manager's name.

use std::collections::BTreeMap;

use crate::crd::CheManager;
use kube::ResourceExt;

/// Annotation linking a routing-produced object back to its owning manager
pub const ANNOTATION_CHE_MANAGER_NAME: &str = "cheManagerName";

/// Annotation holding the namespace of the owning manager
pub const ANNOTATION_CHE_MANAGER_NAMESPACE: &str = "cheManagerNamespace";

/// Annotation linking a workspace gateway ConfigMap back to its routing
pub const ANNOTATION_WORKSPACE_ROUTING_NAME: &str = "workspaceRoutingName";

/// Annotation holding the namespace of the originating routing
pub const ANNOTATION_WORKSPACE_ROUTING_NAMESPACE: &str = "workspaceRoutingNamespace";

/// Label marking every service/config produced for a given workspace
pub const LABEL_WORKSPACE_ID: &str = "workspaceId";

/// Gateway component names used in the canonical label sets
pub const GATEWAY_COMPONENT: &str = "gateway";
pub const GATEWAY_CONFIG_COMPONENT: &str = "gateway-config";

/// Default gateway container images
pub const DEFAULT_GATEWAY_IMAGE: &str = "docker.io/traefik:v2.11";
pub const DEFAULT_GATEWAY_CONFIGURER_IMAGE: &str =
    "quay.io/che-incubator/configbump:latest";

/// Port the gateway listens on inside the cluster
pub const GATEWAY_PORT: i32 = 8080;

/// Name of the per-workspace gateway ConfigMap
pub fn gateway_workspace_config_name(workspace_id: &str) -> String {
    workspace_id.to_string()
}

/// Name of the per-manager gateway ConfigMap (and all other gateway objects)
pub fn gateway_object_name(manager: &CheManager) -> String {
    manager.name_any()
}

/// Key of a workspace's routing-table fragment inside a gateway ConfigMap
pub fn gateway_config_entry_key(workspace_id: &str) -> String {
    format!("{}.yml", workspace_id)
}

/// Canonical labels for a named component of a manager's gateway
pub fn labels_for_component(manager_name: &str, component: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app.kubernetes.io/name".to_string(), "che".to_string());
    labels.insert(
        "app.kubernetes.io/part-of".to_string(),
        manager_name.to_string(),
    );
    labels.insert(
        "app.kubernetes.io/component".to_string(),
        component.to_string(),
    );
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        "che-gateway-operator".to_string(),
    );
    labels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_config_is_named_by_workspace_id() {
        assert_eq!(gateway_workspace_config_name("wsid"), "wsid");
    }

    #[test]
    fn config_entry_key_has_yml_suffix() {
        assert_eq!(gateway_config_entry_key("wsid"), "wsid.yml");
    }

    #[test]
    fn component_labels_carry_the_component_and_owner() {
        let labels = labels_for_component("che", "gateway-config");
        assert_eq!(labels.get("app.kubernetes.io/part-of").unwrap(), "che");
        assert_eq!(
            labels.get("app.kubernetes.io/component").unwrap(),
            "gateway-config"
        );
    }
}
