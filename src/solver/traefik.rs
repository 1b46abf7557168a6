//! Gateway routing-table fragments in Traefik's dynamic configuration format
//!
//! Each workspace contributes one YAML document with a router per exposed
//! (component, port) pair, keyed `"<workspaceId>-<component>-<port>"`. The
//! document is stored under the `"<workspaceId>.yml"` entry of the
//! workspace-scoped gateway ConfigMap and merged into the manager-scoped one.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::crd::{Endpoint, EndpointExposure};
use crate::defaults::gateway_config_entry_key;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TraefikConfig {
    pub http: TraefikHttpConfig,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TraefikHttpConfig {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub routers: BTreeMap<String, TraefikRouter>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub services: BTreeMap<String, TraefikService>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub middlewares: BTreeMap<String, TraefikMiddleware>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TraefikRouter {
    pub rule: String,
    pub service: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub middlewares: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraefikService {
    pub load_balancer: TraefikLoadBalancer,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TraefikLoadBalancer {
    pub servers: Vec<TraefikServer>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TraefikServer {
    pub url: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraefikMiddleware {
    pub strip_prefix: TraefikStripPrefix,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TraefikStripPrefix {
    pub prefixes: Vec<String>,
}

/// Name of the in-cluster service exposing one component of a workspace
pub fn component_service_name(workspace_id: &str, component: &str) -> String {
    format!("{}-{}", workspace_id, component)
}

/// Router key for one exposed (component, port) pair of a workspace
pub fn router_key(workspace_id: &str, component: &str, port: i32) -> String {
    format!("{}-{}-{}", workspace_id, component, port)
}

/// Build the routing-table fragment for one workspace.
///
/// One router per exposed (component, port) pair; endpoints sharing a port
/// share a router. The router strips the `/<workspaceId>/<component>/<port>`
/// prefix and forwards to the component's service in the workspace namespace.
pub fn workspace_config(
    workspace_id: &str,
    workspace_namespace: &str,
    endpoints: &BTreeMap<String, Vec<Endpoint>>,
) -> TraefikConfig {
    let mut config = TraefikConfig::default();

    for (component, declared) in endpoints {
        let mut seen_ports = Vec::new();
        for endpoint in declared {
            if endpoint.exposure != EndpointExposure::Public {
                continue;
            }
            if seen_ports.contains(&endpoint.target_port) {
                continue;
            }
            seen_ports.push(endpoint.target_port);

            let key = router_key(workspace_id, component, endpoint.target_port);
            let prefix = format!("/{}/{}/{}", workspace_id, component, endpoint.target_port);

            config.http.routers.insert(
                key.clone(),
                TraefikRouter {
                    rule: format!("PathPrefix(`{}`)", prefix),
                    service: key.clone(),
                    middlewares: vec![key.clone()],
                },
            );
            config.http.services.insert(
                key.clone(),
                TraefikService {
                    load_balancer: TraefikLoadBalancer {
                        servers: vec![TraefikServer {
                            url: format!(
                                "http://{}.{}.svc:{}",
                                component_service_name(workspace_id, component),
                                workspace_namespace,
                                endpoint.target_port
                            ),
                        }],
                    },
                },
            );
            config.http.middlewares.insert(
                key,
                TraefikMiddleware {
                    strip_prefix: TraefikStripPrefix {
                        prefixes: vec![prefix],
                    },
                },
            );
        }
    }

    config
}

/// Serialize a workspace fragment into a ConfigMap's data under its entry key
pub fn merge_fragment(
    data: &mut BTreeMap<String, String>,
    workspace_id: &str,
    config: &TraefikConfig,
) -> Result<(), serde_yaml::Error> {
    data.insert(
        gateway_config_entry_key(workspace_id),
        serde_yaml::to_string(config)?,
    );
    Ok(())
}

/// Remove a workspace fragment from a ConfigMap's data.
///
/// Returns true if the entry was present.
pub fn remove_fragment(data: &mut BTreeMap<String, String>, workspace_id: &str) -> bool {
    data.remove(&gateway_config_entry_key(workspace_id)).is_some()
}
