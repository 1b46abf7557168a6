//! Unit tests for manager resolution in the che solver.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::registry::{ManagerKey, ManagerRecord, ManagerRegistry};
    use crate::solver::che::find_manager;
    use crate::solver::RoutingError;

    fn record(ns: &str, name: &str) -> ManagerRecord {
        ManagerRecord {
            namespace: ns.to_string(),
            name: name.to_string(),
            host: "over.the.rainbow".to_string(),
            routing: None,
            established: true,
        }
    }

    fn registry_with(records: &[(&str, &str)]) -> ManagerRegistry {
        let registry = ManagerRegistry::new();
        for (ns, name) in records {
            registry.put(ManagerKey::new(*ns, *name), record(ns, name));
        }
        registry
    }

    #[test]
    fn empty_registry_is_not_ready_with_one_second_retry() {
        let registry = ManagerRegistry::new();

        let err = find_manager(&registry, None).unwrap_err();
        match err {
            RoutingError::NotReady { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(1));
            }
            other => panic!("expected NotReady, got {:?}", other),
        }
    }

    #[test]
    fn empty_registry_is_not_ready_even_for_a_named_manager() {
        let registry = ManagerRegistry::new();

        let err = find_manager(&registry, Some(ManagerKey::new("ns", "che"))).unwrap_err();
        assert!(matches!(
            err,
            RoutingError::NotReady { retry_after } if retry_after == Duration::from_secs(1)
        ));
    }

    #[test]
    fn lone_manager_is_implied_when_none_is_named() {
        let registry = registry_with(&[("ns", "che")]);

        let manager = find_manager(&registry, None).expect("lone manager should be implied");
        assert_eq!(manager.name, "che");
        assert_eq!(manager.namespace, "ns");
    }

    #[test]
    fn several_managers_and_none_named_is_invalid() {
        let registry = registry_with(&[("ns", "che"), ("other", "che2")]);

        let err = find_manager(&registry, None).unwrap_err();
        match err {
            RoutingError::Invalid { reason } => {
                assert!(reason.contains("2 Che managers"), "reason: {}", reason);
            }
            other => panic!("expected Invalid, got {:?}", other),
        }
    }

    #[test]
    fn named_but_unreconciled_manager_is_not_ready_with_ten_second_retry() {
        let registry = registry_with(&[("ns", "che")]);

        let err =
            find_manager(&registry, Some(ManagerKey::new("ns", "someone-else"))).unwrap_err();
        match err {
            RoutingError::NotReady { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(10));
            }
            other => panic!("expected NotReady, got {:?}", other),
        }
    }

    #[test]
    fn named_manager_resolves_among_several() {
        let registry = registry_with(&[("ns", "che"), ("other", "che2")]);

        let manager = find_manager(&registry, Some(ManagerKey::new("other", "che2")))
            .expect("named manager should resolve");
        assert_eq!(manager.name, "che2");
    }
}
