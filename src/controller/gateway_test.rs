//! Unit tests for the gateway object builders.

use std::collections::BTreeMap;

use crate::crd::{CheManager, CheManagerSpec, RoutingMode};
use crate::defaults::{DEFAULT_GATEWAY_CONFIGURER_IMAGE, DEFAULT_GATEWAY_IMAGE, GATEWAY_PORT};

use super::gateway::{build_deployment, merged_labels, owner_reference};

fn manager() -> CheManager {
    let mut manager = CheManager::new(
        "che",
        CheManagerSpec {
            host: "over.the.rainbow".to_string(),
            routing: Some(RoutingMode::SingleHost),
            gateway_image: None,
            gateway_configurer_image: None,
        },
    );
    manager.metadata.namespace = Some("ns".to_string());
    manager.metadata.uid = Some("uid-1".to_string());
    manager
}

#[test]
fn deployment_runs_gateway_and_configurer() {
    let deployment = build_deployment(&manager());

    let containers = &deployment
        .spec
        .as_ref()
        .unwrap()
        .template
        .spec
        .as_ref()
        .unwrap()
        .containers;
    assert_eq!(containers.len(), 2);
    assert_eq!(containers[0].name, "gateway");
    assert_eq!(containers[1].name, "gateway-configurer");
}

#[test]
fn deployment_uses_default_images_when_unset() {
    let deployment = build_deployment(&manager());

    let containers = &deployment
        .spec
        .as_ref()
        .unwrap()
        .template
        .spec
        .as_ref()
        .unwrap()
        .containers;
    assert_eq!(containers[0].image.as_deref(), Some(DEFAULT_GATEWAY_IMAGE));
    assert_eq!(
        containers[1].image.as_deref(),
        Some(DEFAULT_GATEWAY_CONFIGURER_IMAGE)
    );
}

#[test]
fn deployment_honors_image_overrides() {
    let mut manager = manager();
    manager.spec.gateway_image = Some("example.com/traefik:custom".to_string());
    manager.spec.gateway_configurer_image = Some("example.com/bump:custom".to_string());

    let deployment = build_deployment(&manager);

    let containers = &deployment
        .spec
        .as_ref()
        .unwrap()
        .template
        .spec
        .as_ref()
        .unwrap()
        .containers;
    assert_eq!(
        containers[0].image.as_deref(),
        Some("example.com/traefik:custom")
    );
    assert_eq!(
        containers[1].image.as_deref(),
        Some("example.com/bump:custom")
    );
}

#[test]
fn deployment_selector_matches_pod_labels() {
    let deployment = build_deployment(&manager());
    let spec = deployment.spec.as_ref().unwrap();

    let selector = spec.selector.match_labels.as_ref().unwrap();
    let pod_labels = spec
        .template
        .metadata
        .as_ref()
        .unwrap()
        .labels
        .as_ref()
        .unwrap();
    assert_eq!(selector, pod_labels);
}

#[test]
fn gateway_listens_on_the_gateway_port() {
    let deployment = build_deployment(&manager());

    let containers = &deployment
        .spec
        .as_ref()
        .unwrap()
        .template
        .spec
        .as_ref()
        .unwrap()
        .containers;
    let ports = containers[0].ports.as_ref().unwrap();
    assert_eq!(ports[0].container_port, GATEWAY_PORT);

    let args = containers[0].args.as_ref().unwrap();
    assert!(args
        .iter()
        .any(|a| a == &format!("--entryPoints.http.address=:{}", GATEWAY_PORT)));
}

#[test]
fn pod_runs_under_the_gateway_service_account() {
    let deployment = build_deployment(&manager());

    let pod_spec = deployment
        .spec
        .as_ref()
        .unwrap()
        .template
        .spec
        .as_ref()
        .unwrap();
    assert_eq!(pod_spec.service_account_name.as_deref(), Some("che"));
}

#[test]
fn both_containers_mount_the_config_volume() {
    let deployment = build_deployment(&manager());

    let pod_spec = deployment
        .spec
        .as_ref()
        .unwrap()
        .template
        .spec
        .as_ref()
        .unwrap();

    let volumes = pod_spec.volumes.as_ref().unwrap();
    assert_eq!(volumes.len(), 1);
    assert!(volumes[0].empty_dir.is_some());

    for container in &pod_spec.containers {
        let mounts = container.volume_mounts.as_ref().unwrap();
        assert_eq!(mounts[0].name, volumes[0].name);
    }
}

#[test]
fn owner_reference_points_at_the_manager() {
    let reference = owner_reference(&manager());

    assert_eq!(reference.kind, "CheManager");
    assert_eq!(reference.api_version, "che.eclipse.org/v1alpha1");
    assert_eq!(reference.name, "che");
    assert_eq!(reference.uid, "uid-1");
    assert_eq!(reference.controller, Some(true));
}

#[test]
fn canonical_labels_win_but_foreign_labels_survive() {
    let existing = BTreeMap::from([
        ("app.kubernetes.io/name".to_string(), "edited".to_string()),
        ("acme.org/team".to_string(), "platform".to_string()),
    ]);
    let canonical = BTreeMap::from([(
        "app.kubernetes.io/name".to_string(),
        "che".to_string(),
    )]);

    let merged = merged_labels(Some(&existing), canonical);

    assert_eq!(merged.get("app.kubernetes.io/name").unwrap(), "che");
    assert_eq!(merged.get("acme.org/team").unwrap(), "platform");
}
