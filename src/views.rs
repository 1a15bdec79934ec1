//! Template-facing views of the context graph.
//!
//! The graph is cyclic (service ↔ stack ↔ container), so it cannot be handed
//! to the template engine as-is. Views serialize it with bounded depth: a full
//! view embeds its children as full or reference views, while back-references
//! (a container's service, a service's stack) are flat reference views that
//! carry scalars and labels but no further relationship arrays.

use crate::graph::{ContainerId, ContextGraph, HostId, ServiceId, StackId};
use serde_json::{json, Map, Value};

fn host_fields(graph: &ContextGraph, id: HostId) -> Map<String, Value> {
    let host = graph.host(id);
    let mut fields = Map::new();
    fields.insert("uuid".to_string(), json!(host.uuid));
    fields.insert("name".to_string(), json!(host.name));
    fields.insert("address".to_string(), json!(host.address));
    fields.insert("labels".to_string(), json!(host.labels));
    fields
}

fn service_fields(graph: &ContextGraph, id: ServiceId) -> Map<String, Value> {
    let service = graph.service(id);
    let mut fields = Map::new();
    fields.insert("uuid".to_string(), json!(service.uuid));
    fields.insert("name".to_string(), json!(service.name));
    fields.insert("kind".to_string(), json!(service.kind));
    fields.insert(
        "stack_name".to_string(),
        json!(service.stack.map(|s| graph.stack(s).name.clone())),
    );
    fields.insert("primary".to_string(), json!(service.primary));
    fields.insert("sidekick".to_string(), json!(!service.primary));
    fields.insert("labels".to_string(), json!(service.labels));
    fields.insert("metadata".to_string(), json!(service.metadata));
    fields.insert("ports".to_string(), json!(service.ports));
    fields
}

fn container_fields(graph: &ContextGraph, id: ContainerId) -> Map<String, Value> {
    let container = graph.container(id);
    let mut fields = Map::new();
    fields.insert("uuid".to_string(), json!(container.uuid));
    fields.insert("name".to_string(), json!(container.name));
    fields.insert("address".to_string(), json!(container.address));
    fields.insert("state".to_string(), json!(container.state));
    fields.insert("health_state".to_string(), json!(container.health_state));
    fields.insert("create_index".to_string(), json!(container.create_index));
    fields.insert("primary".to_string(), json!(container.primary));
    fields.insert("sidekick".to_string(), json!(!container.primary));
    fields.insert("labels".to_string(), json!(container.labels));
    fields.insert("ports".to_string(), json!(container.ports));
    fields
}

pub fn host_ref(graph: &ContextGraph, id: HostId) -> Value {
    Value::Object(host_fields(graph, id))
}

pub fn stack_ref(graph: &ContextGraph, id: StackId) -> Value {
    let stack = graph.stack(id);
    json!({
        "uuid": stack.uuid,
        "name": stack.name,
    })
}

pub fn service_ref(graph: &ContextGraph, id: ServiceId) -> Value {
    Value::Object(service_fields(graph, id))
}

pub fn container_ref(graph: &ContextGraph, id: ContainerId) -> Value {
    Value::Object(container_fields(graph, id))
}

/// Container with its service, host, parent and sidekicks as reference views.
pub fn container_view(graph: &ContextGraph, id: ContainerId) -> Value {
    let container = graph.container(id);
    let mut fields = container_fields(graph, id);

    fields.insert(
        "service".to_string(),
        opt(container.service.map(|s| service_ref(graph, s))),
    );
    fields.insert(
        "host".to_string(),
        opt(container.host.map(|h| host_ref(graph, h))),
    );
    fields.insert(
        "parent".to_string(),
        opt(container.parent.map(|p| container_ref(graph, p))),
    );
    fields.insert(
        "sidekicks".to_string(),
        Value::Array(
            container
                .sidekicks
                .iter()
                .map(|&s| container_ref(graph, s))
                .collect(),
        ),
    );
    Value::Object(fields)
}

/// Service with its stack, parent and sidekicks as reference views and its
/// containers as full container views.
pub fn service_view(graph: &ContextGraph, id: ServiceId) -> Value {
    let service = graph.service(id);
    let mut fields = service_fields(graph, id);

    fields.insert(
        "stack".to_string(),
        opt(service.stack.map(|s| stack_ref(graph, s))),
    );
    fields.insert(
        "parent".to_string(),
        opt(service.parent.map(|p| service_ref(graph, p))),
    );
    fields.insert(
        "sidekicks".to_string(),
        Value::Array(
            service
                .sidekicks
                .iter()
                .map(|&s| service_ref(graph, s))
                .collect(),
        ),
    );
    fields.insert(
        "containers".to_string(),
        Value::Array(
            service
                .containers
                .iter()
                .map(|&c| container_view(graph, c))
                .collect(),
        ),
    );
    Value::Object(fields)
}

/// Stack with its primary services as full service views.
pub fn stack_view(graph: &ContextGraph, id: StackId) -> Value {
    let stack = graph.stack(id);
    let mut fields = Map::new();
    fields.insert("uuid".to_string(), json!(stack.uuid));
    fields.insert("name".to_string(), json!(stack.name));
    fields.insert(
        "services".to_string(),
        Value::Array(
            stack
                .services
                .iter()
                .map(|&s| service_view(graph, s))
                .collect(),
        ),
    );
    Value::Object(fields)
}

/// Host with its containers as full container views.
pub fn host_view(graph: &ContextGraph, id: HostId) -> Value {
    let host = graph.host(id);
    let mut fields = host_fields(graph, id);
    fields.insert(
        "containers".to_string(),
        Value::Array(
            host.containers
                .iter()
                .map(|&c| container_view(graph, c))
                .collect(),
        ),
    );
    Value::Object(fields)
}

/// The identity of the process's own container, service, stack and host.
pub fn self_view(graph: &ContextGraph) -> Value {
    let me = &graph.self_ref;
    json!({
        "container": container_view(graph, me.container),
        "service": opt(me.service.map(|s| service_view(graph, s))),
        "stack": opt(me.stack.map(|s| stack_view(graph, s))),
        "host": opt(me.host.map(|h| host_view(graph, h))),
    })
}

fn opt(value: Option<Value>) -> Value {
    value.unwrap_or(Value::Null)
}
