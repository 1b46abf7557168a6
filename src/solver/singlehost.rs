//! Single-host object synthesis and endpoint resolution
//!
//! In single-host mode every workspace is exposed under the manager's host,
//! path-prefixed by `/<workspaceId>/<component>/<port>`. The solver produces
//! one ClusterIP service per exposed component and merges a routing-table
//! fragment into both the workspace-scoped and the manager-scoped gateway
//! ConfigMaps; the gateway picks those up through its configurer sidecar.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ConfigMap, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, info};

use crate::crd::{
    Endpoint, EndpointExposure, ExposedEndpoint, RoutingObjects, WorkspaceRouting,
};
use crate::defaults::{
    gateway_config_entry_key, gateway_workspace_config_name, labels_for_component,
    ANNOTATION_CHE_MANAGER_NAME, ANNOTATION_CHE_MANAGER_NAMESPACE,
    ANNOTATION_WORKSPACE_ROUTING_NAME, ANNOTATION_WORKSPACE_ROUTING_NAMESPACE,
    GATEWAY_CONFIG_COMPONENT, LABEL_WORKSPACE_ID,
};
use crate::registry::ManagerRecord;

use super::traefik::{self, component_service_name};
use super::RoutingError;

const FIELD_MANAGER: &str = "che-gateway-operator";

/// Construct the single-host routing objects and sync the gateway configs
pub(super) async fn spec_objects(
    client: &Client,
    manager: &ManagerRecord,
    routing: &WorkspaceRouting,
) -> Result<RoutingObjects, RoutingError> {
    let services = workspace_services(manager, routing);

    let workspace_namespace = routing.namespace().unwrap_or_else(|| "default".to_string());
    let fragment = traefik::workspace_config(
        &routing.spec.workspace_id,
        &workspace_namespace,
        &routing.spec.endpoints,
    );

    // all objects are computed before the first write so a failure never
    // leaves a partially synthesized set behind
    sync_gateway_configs(client, manager, routing, &fragment).await?;

    Ok(RoutingObjects {
        services,
        pod_additions: None,
    })
}

/// One ClusterIP service per component with publicly exposed endpoints
pub(super) fn workspace_services(
    manager: &ManagerRecord,
    routing: &WorkspaceRouting,
) -> Vec<Service> {
    let workspace_id = &routing.spec.workspace_id;
    let mut services = Vec::new();

    for (component, endpoints) in &routing.spec.endpoints {
        let mut ports: Vec<i32> = Vec::new();
        for endpoint in endpoints {
            if endpoint.exposure == EndpointExposure::Public && !ports.contains(&endpoint.target_port)
            {
                ports.push(endpoint.target_port);
            }
        }
        if ports.is_empty() {
            continue;
        }

        let service_ports = ports
            .into_iter()
            .map(|port| ServicePort {
                name: Some(format!("port-{}", port)),
                port,
                target_port: Some(IntOrString::Int(port)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            })
            .collect();

        services.push(Service {
            metadata: ObjectMeta {
                name: Some(component_service_name(workspace_id, component)),
                namespace: routing.namespace(),
                labels: Some(BTreeMap::from([(
                    LABEL_WORKSPACE_ID.to_string(),
                    workspace_id.clone(),
                )])),
                annotations: Some(BTreeMap::from([
                    (
                        ANNOTATION_CHE_MANAGER_NAME.to_string(),
                        manager.name.clone(),
                    ),
                    (
                        ANNOTATION_CHE_MANAGER_NAMESPACE.to_string(),
                        manager.namespace.clone(),
                    ),
                ])),
                owner_references: routing_owner_reference(routing).map(|r| vec![r]),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                selector: Some(routing.spec.pod_selector.clone()),
                ports: Some(service_ports),
                type_: Some("ClusterIP".to_string()),
                ..Default::default()
            }),
            status: None,
        });
    }

    services
}

fn routing_owner_reference(routing: &WorkspaceRouting) -> Option<OwnerReference> {
    routing.metadata.uid.as_ref().map(|uid| OwnerReference {
        api_version: WorkspaceRouting::api_version(&()).to_string(),
        kind: WorkspaceRouting::kind(&()).to_string(),
        name: routing.name_any(),
        uid: uid.clone(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}

/// Merge the workspace's fragment into both gateway ConfigMaps.
///
/// The workspace-scoped ConfigMap is created on first use; the entry in the
/// manager-scoped ConfigMap is written with a single-key merge patch so that
/// concurrent merges for different workspaces are serialized by the API
/// server rather than by in-process locking.
async fn sync_gateway_configs(
    client: &Client,
    manager: &ManagerRecord,
    routing: &WorkspaceRouting,
    fragment: &traefik::TraefikConfig,
) -> Result<(), RoutingError> {
    let workspace_id = &routing.spec.workspace_id;
    let entry_key = gateway_config_entry_key(workspace_id);
    let entry_value = serde_yaml::to_string(fragment)?;

    let api: Api<ConfigMap> = Api::namespaced(client.clone(), &manager.namespace);

    // workspace-scoped config, named by the workspace id
    let workspace_config = workspace_config_map(manager, routing, &entry_key, &entry_value);
    let workspace_config_name = gateway_workspace_config_name(workspace_id);
    match api.get_opt(&workspace_config_name).await? {
        None => {
            info!(
                "creating gateway config for workspace {} in {}",
                workspace_id, manager.namespace
            );
            api.create(&PostParams::default(), &workspace_config).await?;
        }
        Some(_) => {
            api.patch(
                &workspace_config_name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&workspace_config),
            )
            .await?;
        }
    }

    // manager-scoped config, named by the manager; only this workspace's
    // entry is touched
    let entry_patch = serde_json::json!({ "data": { entry_key: entry_value } });
    api.patch(
        &manager.name,
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&entry_patch),
    )
    .await?;

    Ok(())
}

fn workspace_config_map(
    manager: &ManagerRecord,
    routing: &WorkspaceRouting,
    entry_key: &str,
    entry_value: &str,
) -> ConfigMap {
    let workspace_id = &routing.spec.workspace_id;

    let mut labels = labels_for_component(&manager.name, GATEWAY_CONFIG_COMPONENT);
    labels.insert(LABEL_WORKSPACE_ID.to_string(), workspace_id.clone());

    let annotations = BTreeMap::from([
        (
            ANNOTATION_CHE_MANAGER_NAME.to_string(),
            manager.name.clone(),
        ),
        (
            ANNOTATION_CHE_MANAGER_NAMESPACE.to_string(),
            manager.namespace.clone(),
        ),
        (
            ANNOTATION_WORKSPACE_ROUTING_NAME.to_string(),
            routing.name_any(),
        ),
        (
            ANNOTATION_WORKSPACE_ROUTING_NAMESPACE.to_string(),
            routing.namespace().unwrap_or_else(|| "default".to_string()),
        ),
    ]);

    ConfigMap {
        metadata: ObjectMeta {
            name: Some(gateway_workspace_config_name(workspace_id)),
            namespace: Some(manager.namespace.clone()),
            labels: Some(labels),
            annotations: Some(annotations),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            entry_key.to_string(),
            entry_value.to_string(),
        )])),
        ..Default::default()
    }
}

/// The externally reachable URL of one endpoint under the single-host gateway
pub(crate) fn endpoint_url(
    host: &str,
    workspace_id: &str,
    component: &str,
    endpoint: &Endpoint,
) -> String {
    let protocol = if endpoint.protocol.is_empty() {
        "http"
    } else {
        endpoint.protocol.as_str()
    };

    let scheme = if endpoint.secure || protocol == "https" || protocol == "wss" {
        match protocol {
            "ws" | "wss" => "wss",
            _ => "https",
        }
    } else {
        protocol
    };

    let path = if endpoint.path.is_empty() {
        "/".to_string()
    } else if endpoint.path.starts_with('/') {
        endpoint.path.clone()
    } else {
        format!("/{}", endpoint.path)
    };

    format!(
        "{}://{}/{}/{}/{}{}",
        scheme, host, workspace_id, component, endpoint.target_port, path
    )
}

/// Resolve all publicly exposed endpoints to URLs, in declaration order.
///
/// Not ready (without an error) while the manager's gateway is not yet
/// established; the URLs would point at a gateway that cannot serve them.
pub(super) fn exposed_endpoints(
    manager: &ManagerRecord,
    workspace_id: &str,
    endpoints: &BTreeMap<String, Vec<Endpoint>>,
) -> (BTreeMap<String, Vec<ExposedEndpoint>>, bool) {
    if !manager.established {
        debug!(
            "gateway of manager {}/{} not established yet",
            manager.namespace, manager.name
        );
        return (BTreeMap::new(), false);
    }

    let mut exposed = BTreeMap::new();

    for (component, declared) in endpoints {
        let resolved: Vec<ExposedEndpoint> = declared
            .iter()
            .filter(|e| e.exposure == EndpointExposure::Public)
            .map(|e| ExposedEndpoint {
                name: e.name.clone(),
                url: endpoint_url(&manager.host, workspace_id, component, e),
            })
            .collect();

        if !resolved.is_empty() {
            exposed.insert(component.clone(), resolved);
        }
    }

    (exposed, true)
}

/// Remove the workspace's routing-table fragment from the cluster.
///
/// Works off the gateway-config labels and annotations rather than the
/// registry, so it succeeds even when the owning manager is long gone. The
/// workspace-scoped ConfigMap is deleted outright once it holds no further
/// fragments; the manager-scoped one only loses this workspace's entry.
pub(super) async fn finalize(
    client: &Client,
    routing: &WorkspaceRouting,
) -> Result<(), RoutingError> {
    let workspace_id = &routing.spec.workspace_id;
    let routing_name = routing.name_any();
    let routing_namespace = routing.namespace().unwrap_or_else(|| "default".to_string());
    let entry_key = gateway_config_entry_key(workspace_id);

    let all_configs: Api<ConfigMap> = Api::all(client.clone());
    let selector = format!(
        "{}={},app.kubernetes.io/component={}",
        LABEL_WORKSPACE_ID, workspace_id, GATEWAY_CONFIG_COMPONENT
    );
    let list = all_configs
        .list(&ListParams::default().labels(&selector))
        .await?;

    for config in list.items {
        let annotations = config.annotations();
        if annotations.get(ANNOTATION_WORKSPACE_ROUTING_NAME) != Some(&routing_name)
            || annotations.get(ANNOTATION_WORKSPACE_ROUTING_NAMESPACE) != Some(&routing_namespace)
        {
            continue;
        }

        let namespace = config.namespace().unwrap_or_else(|| "default".to_string());
        let api: Api<ConfigMap> = Api::namespaced(client.clone(), &namespace);

        // clean the manager-scoped config this workspace was merged into
        if let Some(manager_name) = annotations.get(ANNOTATION_CHE_MANAGER_NAME) {
            let entry_removal = serde_json::json!({ "data": { &entry_key: null } });
            match api
                .patch(
                    manager_name,
                    &PatchParams::apply(FIELD_MANAGER),
                    &Patch::Merge(&entry_removal),
                )
                .await
            {
                Ok(_) => {}
                Err(kube::Error::Api(e)) if e.code == 404 => {
                    debug!("manager config {} already gone", manager_name);
                }
                Err(e) => return Err(RoutingError::Kube(e)),
            }
        }

        // drop the fragment from the workspace config; delete the config
        // once nothing is left in it
        let mut data = config.data.clone().unwrap_or_default();
        traefik::remove_fragment(&mut data, workspace_id);

        let config_name = config.name_any();
        if data.is_empty() {
            match api.delete(&config_name, &DeleteParams::default()).await {
                Ok(_) => {
                    info!(
                        "deleted gateway config for workspace {} in {}",
                        workspace_id, namespace
                    );
                }
                Err(kube::Error::Api(e)) if e.code == 404 => {}
                Err(e) => return Err(RoutingError::Kube(e)),
            }
        } else {
            let entry_removal = serde_json::json!({ "data": { &entry_key: null } });
            api.patch(
                &config_name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&entry_removal),
            )
            .await?;
        }
    }

    Ok(())
}
