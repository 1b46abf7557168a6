//! Unit tests for single-host service synthesis and endpoint resolution.

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::crd::{
        Endpoint, EndpointExposure, WorkspaceRouting, WorkspaceRoutingSpec,
    };
    use crate::defaults::{
        ANNOTATION_CHE_MANAGER_NAME, ANNOTATION_CHE_MANAGER_NAMESPACE, LABEL_WORKSPACE_ID,
    };
    use crate::registry::ManagerRecord;
    use crate::solver::singlehost::{endpoint_url, exposed_endpoints, workspace_services};

    fn manager(established: bool) -> ManagerRecord {
        ManagerRecord {
            namespace: "ns".to_string(),
            name: "che".to_string(),
            host: "over.the.rainbow".to_string(),
            routing: None,
            established,
        }
    }

    fn simple_routing() -> WorkspaceRouting {
        let mut routing = WorkspaceRouting::new(
            "routing",
            WorkspaceRoutingSpec {
                workspace_id: "wsid".to_string(),
                routing_class: "che".to_string(),
                endpoints: BTreeMap::from([(
                    "m1".to_string(),
                    vec![
                        Endpoint {
                            name: "e1".to_string(),
                            target_port: 9999,
                            exposure: EndpointExposure::Public,
                            protocol: "https".to_string(),
                            path: "/1/".to_string(),
                            secure: false,
                        },
                        Endpoint {
                            name: "e2".to_string(),
                            target_port: 9999,
                            exposure: EndpointExposure::Public,
                            protocol: "http".to_string(),
                            path: "/2.js".to_string(),
                            secure: true,
                        },
                        Endpoint {
                            name: "e3".to_string(),
                            target_port: 9999,
                            exposure: EndpointExposure::Public,
                            ..Default::default()
                        },
                    ],
                )]),
                pod_selector: BTreeMap::from([(
                    "controller.devfile.io/workspace_id".to_string(),
                    "wsid".to_string(),
                )]),
            },
        );
        routing.metadata.namespace = Some("ws".to_string());
        routing
    }

    // -----------------------------------------------------------------------
    // Service synthesis
    // -----------------------------------------------------------------------

    #[test]
    fn services_record_the_owning_manager_in_annotations() {
        let services = workspace_services(&manager(true), &simple_routing());
        assert_eq!(services.len(), 1);

        for service in &services {
            let annotations = service.metadata.annotations.as_ref().unwrap();
            assert_eq!(
                annotations.get(ANNOTATION_CHE_MANAGER_NAME).unwrap(),
                "che"
            );
            assert_eq!(
                annotations.get(ANNOTATION_CHE_MANAGER_NAMESPACE).unwrap(),
                "ns"
            );
        }
    }

    #[test]
    fn services_carry_the_workspace_id_label() {
        let services = workspace_services(&manager(true), &simple_routing());

        for service in &services {
            let labels = service.metadata.labels.as_ref().unwrap();
            assert_eq!(labels.get(LABEL_WORKSPACE_ID).unwrap(), "wsid");
        }
    }

    #[test]
    fn service_exposes_each_public_port_once() {
        let services = workspace_services(&manager(true), &simple_routing());

        let ports = services[0].spec.as_ref().unwrap().ports.as_ref().unwrap();
        assert_eq!(ports.len(), 1, "three endpoints share one port");
        assert_eq!(ports[0].port, 9999);
    }

    #[test]
    fn service_selects_the_workspace_pods() {
        let routing = simple_routing();
        let services = workspace_services(&manager(true), &routing);

        let selector = services[0]
            .spec
            .as_ref()
            .unwrap()
            .selector
            .as_ref()
            .unwrap();
        assert_eq!(selector, &routing.spec.pod_selector);
    }

    #[test]
    fn components_without_public_endpoints_get_no_service() {
        let mut routing = simple_routing();
        routing.spec.endpoints = BTreeMap::from([(
            "m1".to_string(),
            vec![Endpoint {
                name: "internal".to_string(),
                target_port: 8080,
                exposure: EndpointExposure::Internal,
                ..Default::default()
            }],
        )]);

        let services = workspace_services(&manager(true), &routing);
        assert!(services.is_empty());
    }

    // -----------------------------------------------------------------------
    // Endpoint URL resolution
    // -----------------------------------------------------------------------

    #[test]
    fn https_endpoint_without_path_resolves_to_trailing_slash() {
        let endpoint = Endpoint {
            name: "e1".to_string(),
            target_port: 9999,
            protocol: "https".to_string(),
            ..Default::default()
        };

        assert_eq!(
            endpoint_url("over.the.rainbow", "wsid", "m1", &endpoint),
            "https://over.the.rainbow/wsid/m1/9999/"
        );
    }

    #[test]
    fn secure_flag_upgrades_http_to_https() {
        let endpoint = Endpoint {
            name: "e2".to_string(),
            target_port: 9999,
            protocol: "http".to_string(),
            path: "/2.js".to_string(),
            secure: true,
            ..Default::default()
        };

        assert_eq!(
            endpoint_url("over.the.rainbow", "wsid", "m1", &endpoint),
            "https://over.the.rainbow/wsid/m1/9999/2.js"
        );
    }

    #[test]
    fn unset_protocol_and_path_default_to_http_and_slash() {
        let endpoint = Endpoint {
            name: "e3".to_string(),
            target_port: 9999,
            ..Default::default()
        };

        assert_eq!(
            endpoint_url("over.the.rainbow", "wsid", "m1", &endpoint),
            "http://over.the.rainbow/wsid/m1/9999/"
        );
    }

    #[test]
    fn secure_flag_upgrades_ws_to_wss() {
        let endpoint = Endpoint {
            name: "e4".to_string(),
            target_port: 4444,
            protocol: "ws".to_string(),
            secure: true,
            ..Default::default()
        };

        assert_eq!(
            endpoint_url("h", "w", "m", &endpoint),
            "wss://h/w/m/4444/"
        );
    }

    #[test]
    fn wss_protocol_stays_secure_without_the_flag() {
        let endpoint = Endpoint {
            name: "e5".to_string(),
            target_port: 4444,
            protocol: "wss".to_string(),
            ..Default::default()
        };

        assert_eq!(
            endpoint_url("h", "w", "m", &endpoint),
            "wss://h/w/m/4444/"
        );
    }

    #[test]
    fn relative_path_gets_a_single_separator() {
        let endpoint = Endpoint {
            name: "e6".to_string(),
            target_port: 8000,
            path: "index.html".to_string(),
            ..Default::default()
        };

        assert_eq!(
            endpoint_url("h", "w", "m", &endpoint),
            "http://h/w/m/8000/index.html"
        );
    }

    // -----------------------------------------------------------------------
    // Exposed endpoint reporting
    // -----------------------------------------------------------------------

    #[test]
    fn all_public_endpoints_resolve_in_declaration_order() {
        let routing = simple_routing();
        let (exposed, ready) = exposed_endpoints(&manager(true), "wsid", &routing.spec.endpoints);

        assert!(ready);
        assert_eq!(exposed.len(), 1);

        let m1 = &exposed["m1"];
        assert_eq!(m1.len(), 3);
        assert_eq!(m1[0].name, "e1");
        assert_eq!(m1[0].url, "https://over.the.rainbow/wsid/m1/9999/1/");
        assert_eq!(m1[1].name, "e2");
        assert_eq!(m1[1].url, "https://over.the.rainbow/wsid/m1/9999/2.js");
        assert_eq!(m1[2].name, "e3");
        assert_eq!(m1[2].url, "http://over.the.rainbow/wsid/m1/9999/");
    }

    #[test]
    fn unestablished_gateway_reports_not_ready_without_error() {
        let routing = simple_routing();
        let (exposed, ready) = exposed_endpoints(&manager(false), "wsid", &routing.spec.endpoints);

        assert!(!ready);
        assert!(exposed.is_empty());
    }

    #[test]
    fn internal_endpoints_are_not_reported() {
        let endpoints = BTreeMap::from([(
            "m1".to_string(),
            vec![
                Endpoint {
                    name: "pub".to_string(),
                    target_port: 8080,
                    exposure: EndpointExposure::Public,
                    ..Default::default()
                },
                Endpoint {
                    name: "internal".to_string(),
                    target_port: 9090,
                    exposure: EndpointExposure::Internal,
                    ..Default::default()
                },
            ],
        )]);

        let (exposed, ready) = exposed_endpoints(&manager(true), "wsid", &endpoints);
        assert!(ready);
        assert_eq!(exposed["m1"].len(), 1);
        assert_eq!(exposed["m1"][0].name, "pub");
    }
}
