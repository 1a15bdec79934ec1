//! Graph builder: turns flat discovery records into a cross-linked snapshot.

use crate::error::BuildError;
use crate::graph::{
    parse_service_ports, Container, ContainerId, ContextGraph, Host, HostId, SelfRef, Service,
    ServiceId, Stack, StackId, DEPLOYMENT_UNIT_LABEL, LAUNCH_CONFIG_LABEL, PRIMARY_LAUNCH_CONFIG,
};
use crate::metadata::{ContainerRecord, HostRecord, SelfRecord, ServiceRecord, StackRecord};
use std::collections::HashMap;
use tracing::{debug, instrument};

/// Builds one [`ContextGraph`] snapshot from flat records.
///
/// Hosts and stacks are materialized first (no cross-references), then
/// services with a two-pass sidekick resolution over declared sidekick names,
/// then containers with a mirrored two-pass resolution keyed by the
/// deployment-unit label. Self identity is resolved last, from the already
/// built container links.
pub struct GraphBuilder {
    self_override: Option<String>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            self_override: None,
        }
    }

    /// Use an explicit container UUID for self resolution instead of the
    /// ambient identity reported by the source.
    pub fn with_self_override(mut self, uuid: Option<String>) -> Self {
        self.self_override = uuid;
        self
    }

    #[instrument(skip_all, fields(
        hosts = host_records.len(),
        stacks = stack_records.len(),
        services = service_records.len(),
        containers = container_records.len(),
    ))]
    pub fn build(
        &self,
        mut host_records: Vec<HostRecord>,
        mut stack_records: Vec<StackRecord>,
        mut service_records: Vec<ServiceRecord>,
        mut container_records: Vec<ContainerRecord>,
        self_record: &SelfRecord,
    ) -> Result<ContextGraph, BuildError> {
        // Records are sorted before materialization, so arena order is the
        // deterministic iteration order and index-sorted link lists are
        // UUID-sorted link lists.
        stack_records.sort_by(|a, b| a.uuid.cmp(&b.uuid));
        host_records.sort_by(|a, b| a.uuid.cmp(&b.uuid));
        service_records.sort_by(|a, b| a.uuid.cmp(&b.uuid).then_with(|| a.name.cmp(&b.name)));
        container_records.sort_by(|a, b| {
            a.create_index
                .cmp(&b.create_index)
                .then_with(|| a.uuid.cmp(&b.uuid))
                .then_with(|| a.name.cmp(&b.name))
        });

        let mut stacks = Vec::with_capacity(stack_records.len());
        let mut stack_by_name: HashMap<String, StackId> = HashMap::new();
        for record in stack_records {
            let id = StackId(stacks.len());
            stack_by_name.insert(record.name.clone(), id);
            stacks.push(Stack {
                uuid: record.uuid,
                name: record.name,
                services: Vec::new(),
            });
        }

        let mut hosts = Vec::with_capacity(host_records.len());
        let mut host_by_uuid: HashMap<String, HostId> = HashMap::new();
        for record in host_records {
            let id = HostId(hosts.len());
            host_by_uuid.insert(record.uuid.clone(), id);
            hosts.push(Host {
                uuid: record.uuid,
                name: record.name,
                address: record.address,
                labels: record.labels,
                containers: Vec::new(),
            });
        }

        // Services, pass 1: materialize and index primaries by their declared
        // sidekick names.
        let mut services = Vec::with_capacity(service_records.len());
        let mut service_by_key: HashMap<(String, String), ServiceId> = HashMap::new();
        let mut declared_sidekicks: HashMap<(String, String), ServiceId> = HashMap::new();
        for record in service_records {
            let id = ServiceId(services.len());
            let primary = record.name == record.primary_service_name;
            let stack = stack_by_name.get(&record.stack_name).copied();

            if primary {
                if let Some(stack_id) = stack {
                    stacks[stack_id.0].services.push(id);
                }
                for sidekick_name in &record.sidekicks {
                    declared_sidekicks
                        .insert((record.stack_name.clone(), sidekick_name.clone()), id);
                }
            }

            service_by_key.insert((record.stack_name.clone(), record.name.clone()), id);
            services.push(Service {
                uuid: record.uuid,
                name: record.name,
                kind: record.kind,
                stack,
                labels: record.labels,
                metadata: record.metadata,
                ports: parse_service_ports(&record.ports),
                primary,
                sidekicks: Vec::new(),
                parent: None,
                containers: Vec::new(),
            });
        }

        // Services, pass 2: link sidekicks to their primaries. A sidekick with
        // no matching declaration is simply left unlinked.
        let mut service_links: Vec<(ServiceId, ServiceId)> = Vec::new();
        for (index, service) in services.iter().enumerate() {
            if service.primary {
                continue;
            }
            let stack_name = service
                .stack
                .map(|id| stacks[id.0].name.clone())
                .unwrap_or_default();
            if let Some(&parent) = declared_sidekicks.get(&(stack_name, service.name.clone())) {
                service_links.push((ServiceId(index), parent));
            }
        }
        for (child, parent) in service_links {
            services[child.0].parent = Some(parent);
            services[parent.0].sidekicks.push(child);
            debug!(
                sidekick = %services[child.0].name,
                parent = %services[parent.0].name,
                "Linked sidekick service"
            );
        }
        for service in &mut services {
            service.sidekicks.sort_unstable_by_key(|id| id.0);
        }
        for stack in &mut stacks {
            stack.services.sort_unstable_by_key(|id| id.0);
        }

        // Containers, pass 1: materialize and index primaries by their
        // deployment-unit label value.
        let mut containers = Vec::with_capacity(container_records.len());
        let mut deployment_parent: HashMap<String, ContainerId> = HashMap::new();
        for record in container_records {
            let id = ContainerId(containers.len());
            // A container without the launch-config label counts as primary.
            let primary = record
                .labels
                .get(LAUNCH_CONFIG_LABEL)
                .map_or(true, |value| value == PRIMARY_LAUNCH_CONFIG);

            if primary {
                if let Some(unit) = record.labels.get(DEPLOYMENT_UNIT_LABEL) {
                    deployment_parent.insert(unit.clone(), id);
                }
            }

            containers.push(Container {
                service: service_by_key
                    .get(&(record.stack_name.clone(), record.service_name.clone()))
                    .copied(),
                host: host_by_uuid.get(&record.host_uuid).copied(),
                uuid: record.uuid,
                name: record.name,
                address: record.address,
                state: record.state,
                health_state: record.health_state,
                create_index: record.create_index,
                labels: record.labels,
                ports: parse_service_ports(&record.ports),
                primary,
                parent: None,
                sidekicks: Vec::new(),
            });
        }

        // Containers, pass 2: link sidekicks into their deployment unit and
        // attach every container to its service and host. Arena order keeps
        // all link lists deterministic.
        let mut sidekick_links: Vec<(ContainerId, ContainerId)> = Vec::new();
        let mut service_members: Vec<(ServiceId, ContainerId)> = Vec::new();
        let mut host_members: Vec<(HostId, ContainerId)> = Vec::new();
        for (index, container) in containers.iter().enumerate() {
            let id = ContainerId(index);
            if !container.primary {
                if let Some(unit) = container.labels.get(DEPLOYMENT_UNIT_LABEL) {
                    if let Some(&parent) = deployment_parent.get(unit) {
                        sidekick_links.push((id, parent));
                    }
                }
            }
            if let Some(service) = container.service {
                service_members.push((service, id));
            }
            if let Some(host) = container.host {
                host_members.push((host, id));
            }
        }
        for (child, parent) in sidekick_links {
            containers[child.0].parent = Some(parent);
            containers[parent.0].sidekicks.push(child);
            // The sidekick's service inherits the primary container's service
            // as its parent, mirroring the container-level link.
            if let (Some(child_service), Some(parent_service)) =
                (containers[child.0].service, containers[parent.0].service)
            {
                if child_service != parent_service {
                    services[child_service.0].parent = Some(parent_service);
                }
            }
        }
        for (service, container) in service_members {
            services[service.0].containers.push(container);
        }
        for (host, container) in host_members {
            hosts[host.0].containers.push(container);
        }

        let self_ref = self.resolve_self(&containers, &services, self_record)?;

        debug!("Finished building context graph");

        Ok(ContextGraph {
            hosts,
            stacks,
            services,
            containers,
            self_ref,
        })
    }

    /// Resolve the process's own identity. An explicit override UUID takes
    /// precedence over the ambient identity reported by the source.
    fn resolve_self(
        &self,
        containers: &[Container],
        services: &[Service],
        self_record: &SelfRecord,
    ) -> Result<SelfRef, BuildError> {
        let target = self
            .self_override
            .as_deref()
            .unwrap_or(self_record.uuid.as_str());

        let (id, container) = containers
            .iter()
            .enumerate()
            .find(|(_, c)| c.uuid == target)
            .ok_or_else(|| {
                BuildError::SelfUnresolved(format!("no container with UUID '{}'", target))
            })?;

        debug!(uuid = %container.uuid, "Resolved self container");

        Ok(SelfRef {
            container: ContainerId(id),
            service: container.service,
            stack: container.service.and_then(|s| services[s.0].stack),
            host: container.host,
        })
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{ContainerRecord, HostRecord, SelfRecord, ServiceRecord, StackRecord};
    use std::collections::BTreeMap;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn stack(uuid: &str, name: &str) -> StackRecord {
        StackRecord {
            uuid: uuid.to_string(),
            name: name.to_string(),
        }
    }

    fn host(uuid: &str, name: &str) -> HostRecord {
        HostRecord {
            uuid: uuid.to_string(),
            name: name.to_string(),
            address: format!("10.0.0.{}", uuid.len()),
            labels: BTreeMap::new(),
        }
    }

    fn service(uuid: &str, name: &str, stack: &str, primary_name: &str) -> ServiceRecord {
        ServiceRecord {
            uuid: uuid.to_string(),
            name: name.to_string(),
            stack_name: stack.to_string(),
            kind: "service".to_string(),
            primary_service_name: primary_name.to_string(),
            ..Default::default()
        }
    }

    fn container(uuid: &str, name: &str, stack: &str, svc: &str, host: &str) -> ContainerRecord {
        ContainerRecord {
            uuid: uuid.to_string(),
            name: name.to_string(),
            stack_name: stack.to_string(),
            service_name: svc.to_string(),
            host_uuid: host.to_string(),
            state: "running".to_string(),
            ..Default::default()
        }
    }

    fn self_record(uuid: &str) -> SelfRecord {
        SelfRecord {
            uuid: uuid.to_string(),
            ..Default::default()
        }
    }

    /// A small but fully linked fixture: stack `web` with primary service
    /// `app` declaring sidekick `proxy`, one container per service sharing a
    /// deployment unit.
    fn build_fixture() -> ContextGraph {
        let mut app = service("s1", "app", "web", "app");
        app.sidekicks = vec!["proxy".to_string()];
        let proxy = service("s2", "proxy", "web", "app");

        let mut app_c = container("c1", "app-1", "web", "app", "h1");
        app_c.create_index = 1;
        app_c.labels = labels(&[
            (LAUNCH_CONFIG_LABEL, PRIMARY_LAUNCH_CONFIG),
            (DEPLOYMENT_UNIT_LABEL, "unit-1"),
        ]);
        let mut proxy_c = container("c2", "proxy-1", "web", "proxy", "h1");
        proxy_c.create_index = 2;
        proxy_c.labels = labels(&[
            (LAUNCH_CONFIG_LABEL, "proxy"),
            (DEPLOYMENT_UNIT_LABEL, "unit-1"),
        ]);

        GraphBuilder::new()
            .build(
                vec![host("h1", "node-1")],
                vec![stack("st1", "web")],
                vec![app, proxy],
                vec![app_c, proxy_c],
                &self_record("c1"),
            )
            .unwrap()
    }

    #[test]
    fn test_sidekick_service_links_to_declaring_primary() {
        let graph = build_fixture();

        let (proxy_id, proxy) = graph
            .services()
            .find(|(_, s)| s.name == "proxy")
            .unwrap();
        let (app_id, app) = graph.services().find(|(_, s)| s.name == "app").unwrap();

        assert!(!proxy.primary);
        assert_eq!(proxy.parent, Some(app_id));
        assert_eq!(app.sidekicks, vec![proxy_id]);
    }

    #[test]
    fn test_sidekick_container_links_by_deployment_unit() {
        let graph = build_fixture();

        let (proxy_id, proxy_c) = graph
            .containers()
            .find(|(_, c)| c.name == "proxy-1")
            .unwrap();
        let (app_id, app_c) = graph
            .containers()
            .find(|(_, c)| c.name == "app-1")
            .unwrap();

        assert!(app_c.primary);
        assert!(!proxy_c.primary);
        assert_eq!(proxy_c.parent, Some(app_id));
        assert_eq!(app_c.sidekicks, vec![proxy_id]);
        assert_eq!(
            app_c.sidekicks.iter().filter(|&&id| id == proxy_id).count(),
            1
        );
    }

    #[test]
    fn test_undeclared_sidekick_service_is_left_unlinked() {
        let app = service("s1", "app", "web", "app");
        let stray = service("s2", "stray", "web", "app");

        let graph = GraphBuilder::new()
            .build(
                vec![host("h1", "node-1")],
                vec![stack("st1", "web")],
                vec![app, stray],
                vec![container("c1", "app-1", "web", "app", "h1")],
                &self_record("c1"),
            )
            .unwrap();

        let (_, stray) = graph.services().find(|(_, s)| s.name == "stray").unwrap();
        assert!(stray.parent.is_none());
    }

    #[test]
    fn test_container_without_launch_config_label_is_primary() {
        let graph = GraphBuilder::new()
            .build(
                vec![host("h1", "node-1")],
                vec![stack("st1", "web")],
                vec![service("s1", "app", "web", "app")],
                vec![container("c1", "app-1", "web", "app", "h1")],
                &self_record("c1"),
            )
            .unwrap();

        let (_, c) = graph.containers().next().unwrap();
        assert!(c.primary);
    }

    #[test]
    fn test_self_resolves_from_container_links() {
        let graph = build_fixture();

        let self_ref = &graph.self_ref;
        assert_eq!(graph.container(self_ref.container).name, "app-1");
        let service = self_ref.service.map(|id| graph.service(id)).unwrap();
        assert_eq!(service.name, "app");
        let stack = self_ref.stack.map(|id| graph.stack(id)).unwrap();
        assert_eq!(stack.name, "web");
        let host = self_ref.host.map(|id| graph.host(id)).unwrap();
        assert_eq!(host.name, "node-1");
    }

    #[test]
    fn test_self_override_takes_precedence() {
        let mut app = service("s1", "app", "web", "app");
        app.sidekicks = vec!["proxy".to_string()];
        let proxy = service("s2", "proxy", "web", "app");
        let mut proxy_c = container("c2", "proxy-1", "web", "proxy", "h1");
        proxy_c.labels = labels(&[(LAUNCH_CONFIG_LABEL, "proxy")]);

        let graph = GraphBuilder::new()
            .with_self_override(Some("c2".to_string()))
            .build(
                vec![host("h1", "node-1")],
                vec![stack("st1", "web")],
                vec![app, proxy],
                vec![
                    container("c1", "app-1", "web", "app", "h1"),
                    proxy_c,
                ],
                &self_record("c1"),
            )
            .unwrap();

        assert_eq!(graph.container(graph.self_ref.container).uuid, "c2");
    }

    #[test]
    fn test_unresolvable_self_is_a_build_error() {
        let result = GraphBuilder::new().build(
            vec![host("h1", "node-1")],
            vec![stack("st1", "web")],
            vec![service("s1", "app", "web", "app")],
            vec![container("c1", "app-1", "web", "app", "h1")],
            &self_record("missing"),
        );

        assert!(matches!(result, Err(BuildError::SelfUnresolved(_))));
    }

    #[test]
    fn test_iteration_order_is_deterministic() {
        let build = || {
            GraphBuilder::new().build(
                vec![host("h2", "node-2"), host("h1", "node-1")],
                vec![stack("st2", "db"), stack("st1", "web")],
                vec![
                    service("s2", "pg", "db", "pg"),
                    service("s1", "app", "web", "app"),
                ],
                vec![
                    {
                        let mut c = container("c2", "pg-1", "db", "pg", "h2");
                        c.create_index = 2;
                        c
                    },
                    {
                        let mut c = container("c1", "app-1", "web", "app", "h1");
                        c.create_index = 1;
                        c
                    },
                ],
                &self_record("c1"),
            )
        };

        let graph = build().unwrap();
        let host_uuids: Vec<_> = graph.hosts().map(|(_, h)| h.uuid.clone()).collect();
        let stack_uuids: Vec<_> = graph.stacks().map(|(_, s)| s.uuid.clone()).collect();
        let container_names: Vec<_> = graph.containers().map(|(_, c)| c.name.clone()).collect();

        assert_eq!(host_uuids, vec!["h1", "h2"]);
        assert_eq!(stack_uuids, vec!["st1", "st2"]);
        assert_eq!(container_names, vec!["app-1", "pg-1"]);

        let again = build().unwrap();
        let again_names: Vec<_> = again.containers().map(|(_, c)| c.name.clone()).collect();
        assert_eq!(container_names, again_names);
    }
}
