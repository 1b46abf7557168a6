//! Gateway object builders for a CheManager
//!
//! The gateway of a single-host manager consists of six objects, all named
//! after the manager: a Deployment running the gateway and its config-bump
//! sidecar, a ClusterIP Service in front of it, the RBAC triple that lets the
//! sidecar read the gateway ConfigMaps, and the manager-scoped gateway
//! ConfigMap itself into which the routing solver merges per-workspace
//! fragments.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, ContainerPort, EmptyDirVolumeSource, EnvVar, EnvVarSource,
    ObjectFieldSelector, PodSpec, PodTemplateSpec, Service, ServiceAccount, ServicePort,
    ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use tracing::{info, instrument, warn};

use crate::crd::CheManager;
use crate::defaults::{
    gateway_object_name, labels_for_component, DEFAULT_GATEWAY_CONFIGURER_IMAGE,
    DEFAULT_GATEWAY_IMAGE, GATEWAY_COMPONENT, GATEWAY_CONFIG_COMPONENT, GATEWAY_PORT,
};
use crate::error::{Error, Result};

const CONFIG_VOLUME: &str = "dynamic-config";
const CONFIG_DIR: &str = "/dynamic-config";

/// Reconcile the gateway of a manager.
///
/// Single-host managers get all gateway objects asserted and the return value
/// reports whether the gateway deployment is operational. Multi-host managers
/// run no gateway; any objects from a previous single-host configuration are
/// removed.
pub async fn reconcile_gateway(client: &Client, manager: &CheManager) -> Result<bool> {
    if !manager.is_single_host() {
        delete_gateway(client, manager).await?;
        return Ok(false);
    }

    ensure_service_account(client, manager).await?;
    ensure_role(client, manager).await?;
    ensure_role_binding(client, manager).await?;
    ensure_config_map(client, manager).await?;
    ensure_deployment(client, manager).await?;
    ensure_service(client, manager).await?;

    gateway_ready(client, manager).await
}

/// Create an OwnerReference for garbage collection
pub fn owner_reference(manager: &CheManager) -> OwnerReference {
    OwnerReference {
        api_version: CheManager::api_version(&()).to_string(),
        kind: CheManager::kind(&()).to_string(),
        name: manager.name_any(),
        uid: manager.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Canonical labels merged over whatever labels the object carries.
///
/// Canonical keys always win so that out-of-band edits are reverted, while
/// foreign keys added by other tooling survive reconciliation.
pub(super) fn merged_labels(
    existing: Option<&BTreeMap<String, String>>,
    canonical: BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut labels = existing.cloned().unwrap_or_default();
    labels.extend(canonical);
    labels
}

fn object_meta(manager: &CheManager, component: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(gateway_object_name(manager)),
        namespace: manager.namespace(),
        labels: Some(labels_for_component(&manager.name_any(), component)),
        owner_references: Some(vec![owner_reference(manager)]),
        ..Default::default()
    }
}

// ============================================================================
// ServiceAccount / RBAC
// ============================================================================

#[instrument(skip(client, manager), fields(name = %manager.name_any(), namespace = manager.namespace()))]
async fn ensure_service_account(client: &Client, manager: &CheManager) -> Result<()> {
    let namespace = manager.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<ServiceAccount> = Api::namespaced(client.clone(), &namespace);

    let desired = ServiceAccount {
        metadata: object_meta(manager, GATEWAY_COMPONENT),
        ..Default::default()
    };

    ensure_object(&api, &gateway_object_name(manager), desired, |existing, desired| {
        desired.metadata.labels = Some(merged_labels(
            existing.metadata.labels.as_ref(),
            labels_for_component(&manager.name_any(), GATEWAY_COMPONENT),
        ));
    })
    .await
}

#[instrument(skip(client, manager), fields(name = %manager.name_any(), namespace = manager.namespace()))]
async fn ensure_role(client: &Client, manager: &CheManager) -> Result<()> {
    let namespace = manager.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<Role> = Api::namespaced(client.clone(), &namespace);

    let desired = Role {
        metadata: object_meta(manager, GATEWAY_COMPONENT),
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec!["".to_string()]),
            resources: Some(vec!["configmaps".to_string()]),
            verbs: vec![
                "get".to_string(),
                "list".to_string(),
                "watch".to_string(),
            ],
            ..Default::default()
        }]),
    };

    ensure_object(&api, &gateway_object_name(manager), desired, |existing, desired| {
        desired.metadata.labels = Some(merged_labels(
            existing.metadata.labels.as_ref(),
            labels_for_component(&manager.name_any(), GATEWAY_COMPONENT),
        ));
    })
    .await
}

#[instrument(skip(client, manager), fields(name = %manager.name_any(), namespace = manager.namespace()))]
async fn ensure_role_binding(client: &Client, manager: &CheManager) -> Result<()> {
    let namespace = manager.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<RoleBinding> = Api::namespaced(client.clone(), &namespace);
    let name = gateway_object_name(manager);

    let desired = RoleBinding {
        metadata: object_meta(manager, GATEWAY_COMPONENT),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: name.clone(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: name.clone(),
            namespace: Some(namespace.clone()),
            ..Default::default()
        }]),
    };

    ensure_object(&api, &name, desired, |existing, desired| {
        desired.metadata.labels = Some(merged_labels(
            existing.metadata.labels.as_ref(),
            labels_for_component(&manager.name_any(), GATEWAY_COMPONENT),
        ));
    })
    .await
}

// ============================================================================
// ConfigMap
// ============================================================================

/// Ensure the manager-scoped gateway ConfigMap exists.
///
/// Only metadata is asserted here; the data entries are owned by the routing
/// solver, one per workspace, and must survive manager reconciles untouched.
#[instrument(skip(client, manager), fields(name = %manager.name_any(), namespace = manager.namespace()))]
async fn ensure_config_map(client: &Client, manager: &CheManager) -> Result<()> {
    let namespace = manager.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), &namespace);
    let name = gateway_object_name(manager);

    match api.get_opt(&name).await? {
        None => {
            info!("creating gateway config map {}", name);
            let config = ConfigMap {
                metadata: object_meta(manager, GATEWAY_CONFIG_COMPONENT),
                ..Default::default()
            };
            api.create(&PostParams::default(), &config).await?;
        }
        Some(existing) => {
            let labels = merged_labels(
                existing.metadata.labels.as_ref(),
                labels_for_component(&manager.name_any(), GATEWAY_CONFIG_COMPONENT),
            );
            let patch = serde_json::json!({ "metadata": { "labels": labels } });
            api.patch(
                &name,
                &PatchParams::apply("che-gateway-operator"),
                &Patch::Merge(&patch),
            )
            .await?;
        }
    }

    Ok(())
}

// ============================================================================
// Deployment
// ============================================================================

#[instrument(skip(client, manager), fields(name = %manager.name_any(), namespace = manager.namespace()))]
async fn ensure_deployment(client: &Client, manager: &CheManager) -> Result<()> {
    let namespace = manager.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<Deployment> = Api::namespaced(client.clone(), &namespace);

    let desired = build_deployment(manager);

    ensure_object(&api, &gateway_object_name(manager), desired, |existing, desired| {
        desired.metadata.labels = Some(merged_labels(
            existing.metadata.labels.as_ref(),
            labels_for_component(&manager.name_any(), "deployment"),
        ));
    })
    .await
}

pub(super) fn build_deployment(manager: &CheManager) -> Deployment {
    let name = gateway_object_name(manager);
    let pod_labels = labels_for_component(&manager.name_any(), GATEWAY_COMPONENT);

    let gateway_image = manager
        .spec
        .gateway_image
        .clone()
        .unwrap_or_else(|| DEFAULT_GATEWAY_IMAGE.to_string());
    let configurer_image = manager
        .spec
        .gateway_configurer_image
        .clone()
        .unwrap_or_else(|| DEFAULT_GATEWAY_CONFIGURER_IMAGE.to_string());

    let config_mount = VolumeMount {
        name: CONFIG_VOLUME.to_string(),
        mount_path: CONFIG_DIR.to_string(),
        ..Default::default()
    };

    let gateway_container = Container {
        name: "gateway".to_string(),
        image: Some(gateway_image),
        args: Some(vec![
            format!("--providers.file.directory={}", CONFIG_DIR),
            "--providers.file.watch=true".to_string(),
            format!("--entryPoints.http.address=:{}", GATEWAY_PORT),
        ]),
        ports: Some(vec![ContainerPort {
            name: Some("http".to_string()),
            container_port: GATEWAY_PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        volume_mounts: Some(vec![config_mount.clone()]),
        ..Default::default()
    };

    let configurer_container = Container {
        name: "gateway-configurer".to_string(),
        image: Some(configurer_image),
        env: Some(vec![
            EnvVar {
                name: "CONFIG_BUMP_DIR".to_string(),
                value: Some(CONFIG_DIR.to_string()),
                ..Default::default()
            },
            EnvVar {
                name: "CONFIG_BUMP_LABELS".to_string(),
                value: Some(format!(
                    "app.kubernetes.io/part-of={},app.kubernetes.io/component={}",
                    manager.name_any(),
                    GATEWAY_CONFIG_COMPONENT
                )),
                ..Default::default()
            },
            EnvVar {
                name: "CONFIG_BUMP_NAMESPACE".to_string(),
                value_from: Some(EnvVarSource {
                    field_ref: Some(ObjectFieldSelector {
                        field_path: "metadata.namespace".to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
        ]),
        volume_mounts: Some(vec![config_mount]),
        ..Default::default()
    };

    Deployment {
        metadata: ObjectMeta {
            labels: Some(labels_for_component(&manager.name_any(), "deployment")),
            ..object_meta(manager, GATEWAY_COMPONENT)
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(pod_labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(name),
                    containers: vec![gateway_container, configurer_container],
                    volumes: Some(vec![Volume {
                        name: CONFIG_VOLUME.to_string(),
                        empty_dir: Some(EmptyDirVolumeSource::default()),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

// ============================================================================
// Service
// ============================================================================

#[instrument(skip(client, manager), fields(name = %manager.name_any(), namespace = manager.namespace()))]
async fn ensure_service(client: &Client, manager: &CheManager) -> Result<()> {
    let namespace = manager.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<Service> = Api::namespaced(client.clone(), &namespace);

    let desired = Service {
        metadata: object_meta(manager, GATEWAY_COMPONENT),
        spec: Some(ServiceSpec {
            selector: Some(labels_for_component(&manager.name_any(), GATEWAY_COMPONENT)),
            ports: Some(vec![ServicePort {
                name: Some("gateway-http".to_string()),
                port: GATEWAY_PORT,
                target_port: Some(IntOrString::Int(GATEWAY_PORT)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            type_: Some("ClusterIP".to_string()),
            ..Default::default()
        }),
        status: None,
    };

    ensure_object(&api, &gateway_object_name(manager), desired, |existing, desired| {
        desired.metadata.labels = Some(merged_labels(
            existing.metadata.labels.as_ref(),
            labels_for_component(&manager.name_any(), GATEWAY_COMPONENT),
        ));
    })
    .await
}

// ============================================================================
// Shared ensure/delete plumbing
// ============================================================================

async fn ensure_object<K>(
    api: &Api<K>,
    name: &str,
    mut desired: K,
    on_update: impl FnOnce(&K, &mut K),
) -> Result<()>
where
    K: kube::Resource + Clone + std::fmt::Debug + serde::Serialize + serde::de::DeserializeOwned,
{
    match api.get_opt(name).await? {
        None => {
            info!("creating {}", name);
            api.create(&PostParams::default(), &desired).await?;
        }
        Some(existing) => {
            on_update(&existing, &mut desired);
            api.patch(
                name,
                &PatchParams::apply("che-gateway-operator"),
                &Patch::Merge(&desired),
            )
            .await?;
        }
    }
    Ok(())
}

/// Whether the gateway deployment reports at least one ready replica
pub async fn gateway_ready(client: &Client, manager: &CheManager) -> Result<bool> {
    let namespace = manager.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<Deployment> = Api::namespaced(client.clone(), &namespace);

    match api.get_opt(&gateway_object_name(manager)).await? {
        Some(deployment) => {
            let ready = deployment
                .status
                .as_ref()
                .and_then(|s| s.ready_replicas)
                .unwrap_or(0);
            Ok(ready > 0)
        }
        None => Ok(false),
    }
}

/// Delete all gateway objects of a manager, tolerating their absence.
///
/// All six objects are attempted; the first non-404 failure is returned so
/// the manager finalizer is not stripped over a partial teardown.
pub async fn delete_gateway(client: &Client, manager: &CheManager) -> Result<()> {
    let namespace = manager.namespace().unwrap_or_else(|| "default".to_string());
    let name = gateway_object_name(manager);

    let results = [
        delete_one::<Service>(client, &namespace, &name).await,
        delete_one::<Deployment>(client, &namespace, &name).await,
        delete_one::<ConfigMap>(client, &namespace, &name).await,
        delete_one::<RoleBinding>(client, &namespace, &name).await,
        delete_one::<Role>(client, &namespace, &name).await,
        delete_one::<ServiceAccount>(client, &namespace, &name).await,
    ];

    results.into_iter().collect()
}

async fn delete_one<K>(client: &Client, namespace: &str, name: &str) -> Result<()>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
        + Clone
        + std::fmt::Debug
        + serde::de::DeserializeOwned,
    K::DynamicType: Default,
{
    let api: Api<K> = Api::namespaced(client.clone(), namespace);
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => {
            info!("deleted {} {}", K::kind(&K::DynamicType::default()), name);
            Ok(())
        }
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
        Err(e) => {
            warn!(
                "failed to delete {} {}: {:?}",
                K::kind(&K::DynamicType::default()),
                name,
                e
            );
            Err(Error::KubeError(e))
        }
    }
}
