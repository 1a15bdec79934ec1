//! Context Graph
//!
//! An immutable snapshot of the discovery data with resolved relationships:
//! hosts, stacks, services, containers, sidekick/parent links and the identity
//! of the container this process runs in. Entities live in per-type arenas and
//! reference each other by typed indices, so the cyclic service/stack/container
//! relationships need no shared ownership. A graph is rebuilt from scratch
//! every cycle and never mutated afterwards.

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::warn;

mod builder;

pub use builder::GraphBuilder;

/// Label carrying a container's launch configuration name.
pub const LAUNCH_CONFIG_LABEL: &str = "service.launch.config";

/// Launch-config label value marking a container as its deployment's primary.
pub const PRIMARY_LAUNCH_CONFIG: &str = "service.primary.launch.config";

/// Label shared by a primary container and its sidekicks, identifying one
/// logical deployment instance.
pub const DEPLOYMENT_UNIT_LABEL: &str = "service.deployment.unit";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StackId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContainerId(pub(crate) usize);

/// Sorted key/value labels attached to hosts, services and containers.
pub type LabelMap = BTreeMap<String, String>;

/// Sorted key/value service metadata with arbitrary JSON values.
pub type MetadataMap = BTreeMap<String, serde_json::Value>;

/// A port exposed by a service or container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServicePort {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,
    pub public_port: String,
    pub internal_port: String,
    pub protocol: String,
}

#[derive(Debug, Clone)]
pub struct Host {
    pub uuid: String,
    pub name: String,
    pub address: String,
    pub labels: LabelMap,
    /// All containers scheduled on this host, in container arena order.
    pub containers: Vec<ContainerId>,
}

#[derive(Debug, Clone)]
pub struct Stack {
    pub uuid: String,
    pub name: String,
    /// Primary services in this stack, sorted by UUID.
    pub services: Vec<ServiceId>,
}

#[derive(Debug, Clone)]
pub struct Service {
    pub uuid: String,
    pub name: String,
    pub kind: String,
    pub stack: Option<StackId>,
    pub labels: LabelMap,
    pub metadata: MetadataMap,
    pub ports: Vec<ServicePort>,
    /// True when this service is its deployment's primary launch config.
    pub primary: bool,
    pub sidekicks: Vec<ServiceId>,
    pub parent: Option<ServiceId>,
    pub containers: Vec<ContainerId>,
}

#[derive(Debug, Clone)]
pub struct Container {
    pub uuid: String,
    pub name: String,
    pub address: String,
    pub state: String,
    pub health_state: String,
    pub create_index: u64,
    pub labels: LabelMap,
    pub ports: Vec<ServicePort>,
    pub primary: bool,
    pub service: Option<ServiceId>,
    pub host: Option<HostId>,
    pub parent: Option<ContainerId>,
    pub sidekicks: Vec<ContainerId>,
}

/// The resolved identity of the process's own container.
#[derive(Debug, Clone)]
pub struct SelfRef {
    pub container: ContainerId,
    pub service: Option<ServiceId>,
    pub stack: Option<StackId>,
    pub host: Option<HostId>,
}

/// One immutable, fully cross-linked snapshot of the discovery data.
///
/// Arena order is the deterministic iteration order: hosts and stacks sorted
/// by UUID, services by UUID then name, containers by creation index then
/// UUID then name.
#[derive(Debug)]
pub struct ContextGraph {
    hosts: Vec<Host>,
    stacks: Vec<Stack>,
    services: Vec<Service>,
    containers: Vec<Container>,
    pub self_ref: SelfRef,
}

impl ContextGraph {
    pub fn host(&self, id: HostId) -> &Host {
        &self.hosts[id.0]
    }

    pub fn stack(&self, id: StackId) -> &Stack {
        &self.stacks[id.0]
    }

    pub fn service(&self, id: ServiceId) -> &Service {
        &self.services[id.0]
    }

    pub fn container(&self, id: ContainerId) -> &Container {
        &self.containers[id.0]
    }

    pub fn hosts(&self) -> impl Iterator<Item = (HostId, &Host)> {
        self.hosts.iter().enumerate().map(|(i, h)| (HostId(i), h))
    }

    pub fn stacks(&self) -> impl Iterator<Item = (StackId, &Stack)> {
        self.stacks.iter().enumerate().map(|(i, s)| (StackId(i), s))
    }

    pub fn services(&self) -> impl Iterator<Item = (ServiceId, &Service)> {
        self.services.iter().enumerate().map(|(i, s)| (ServiceId(i), s))
    }

    pub fn containers(&self) -> impl Iterator<Item = (ContainerId, &Container)> {
        self.containers
            .iter()
            .enumerate()
            .map(|(i, c)| (ContainerId(i), c))
    }
}

/// Parse a compact port string: `[bindAddress:]publicPort:internalPort/protocol`.
///
/// Entries matching neither shape are dropped with a warning; port parsing
/// never fails a build.
pub fn parse_service_ports(ports: &[String]) -> Vec<ServicePort> {
    let mut parsed = Vec::new();

    for port in ports {
        let parts: Vec<&str> = port.split(':').collect();
        let (bind_address, public, rest) = match parts.as_slice() {
            [public, rest] => (None, *public, *rest),
            [bind, public, rest] => (Some(bind.to_string()), *public, *rest),
            _ => {
                warn!(port = %port, "Unexpected format of service port");
                continue;
            }
        };

        match rest.split_once('/') {
            Some((internal, protocol)) if !internal.is_empty() && !protocol.is_empty() => {
                parsed.push(ServicePort {
                    bind_address,
                    public_port: public.to_string(),
                    internal_port: internal.to_string(),
                    protocol: protocol.to_string(),
                });
            }
            _ => {
                warn!(port = %port, "Unexpected format of service port");
            }
        }
    }

    parsed
}
