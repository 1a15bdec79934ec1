//! Query Engine
//!
//! Lookup, filter and group operations closed over one [`ContextGraph`]
//! snapshot. These back the template function namespace: lookups that find
//! nothing yield an absent value (never a hard error), while malformed
//! selectors and identifiers are reported as [`QueryError`]s.
//!
//! Selector grammar: `@key=value` filters by label (any number, AND-combined)
//! and `.stack-name` scopes services to one stack (at most one).

use crate::error::QueryError;
use crate::graph::{Container, ContextGraph, Host, HostId, LabelMap, Service, ServiceId, StackId};
use regex::Regex;
use std::collections::BTreeMap;

/// Capability interface for entities carrying labels. The polymorphic
/// filter/group functions operate only through this trait.
pub trait Labeled {
    fn labels(&self) -> &LabelMap;
}

impl Labeled for Host {
    fn labels(&self) -> &LabelMap {
        &self.labels
    }
}

impl Labeled for Service {
    fn labels(&self) -> &LabelMap {
        &self.labels
    }
}

impl Labeled for Container {
    fn labels(&self) -> &LabelMap {
        &self.labels
    }
}

/// Query functions bound to one graph snapshot.
pub struct Query<'g> {
    graph: &'g ContextGraph,
}

impl<'g> Query<'g> {
    pub fn new(graph: &'g ContextGraph) -> Self {
        Self { graph }
    }

    /// Look up a host by UUID. Without an argument, resolves to the host the
    /// process runs on.
    pub fn host(&self, uuid: Option<&str>) -> Option<HostId> {
        match uuid {
            Some(uuid) if !uuid.is_empty() => self
                .graph
                .hosts()
                .find(|(_, h)| h.uuid.eq_ignore_ascii_case(uuid))
                .map(|(id, _)| id),
            _ => self.graph.self_ref.host,
        }
    }

    /// All hosts, optionally filtered by `@key=value` label selectors.
    pub fn hosts(&self, selectors: &[String]) -> Result<Vec<HostId>, QueryError> {
        let filters = parse_label_selectors(selectors)?;
        Ok(self
            .graph
            .hosts()
            .filter(|(_, h)| matches_labels(&h.labels, &filters))
            .map(|(id, _)| id)
            .collect())
    }

    /// Look up a service by `name` or `name.stack`. Without an argument,
    /// resolves to the service of the process's own container.
    pub fn service(&self, identifier: Option<&str>) -> Result<Option<ServiceId>, QueryError> {
        let (name, stack) = match identifier {
            Some(identifier) if !identifier.is_empty() => {
                let parts: Vec<&str> = identifier.split('.').collect();
                match parts.as_slice() {
                    [name] => (name.to_string(), self.self_stack_name()),
                    [name, stack] => (name.to_string(), Some(stack.to_string())),
                    _ => return Err(QueryError::InvalidIdentifier(identifier.to_string())),
                }
            }
            _ => {
                let name = match self.graph.self_ref.service {
                    Some(id) => self.graph.service(id).name.clone(),
                    None => return Ok(None),
                };
                (name, self.self_stack_name())
            }
        };

        let Some(stack) = stack else {
            return Ok(None);
        };

        Ok(self
            .graph
            .services()
            .find(|(_, s)| {
                s.name.eq_ignore_ascii_case(&name)
                    && s.stack
                        .map(|id| self.graph.stack(id).name.eq_ignore_ascii_case(&stack))
                        .unwrap_or(false)
            })
            .map(|(id, _)| id))
    }

    /// All services, filtered by at most one `.stack` selector and any number
    /// of `@key=value` selectors, AND-combined.
    pub fn services(&self, selectors: &[String]) -> Result<Vec<ServiceId>, QueryError> {
        let mut stack: Option<String> = None;
        let mut filters: Vec<(String, String)> = Vec::new();

        for selector in selectors {
            match selector.chars().next() {
                Some('.') => {
                    if stack.is_some() {
                        return Err(QueryError::MultipleStackSelectors(selector.clone()));
                    }
                    stack = Some(selector[1..].to_string());
                }
                Some('@') => filters.push(parse_label_selector(selector)?),
                _ => return Err(QueryError::InvalidSelector(selector.clone())),
            }
        }

        Ok(self
            .graph
            .services()
            .filter(|(_, s)| match &stack {
                Some(stack) => s
                    .stack
                    .map(|id| self.graph.stack(id).name.eq_ignore_ascii_case(stack))
                    .unwrap_or(false),
                None => true,
            })
            .filter(|(_, s)| matches_labels(&s.labels, &filters))
            .map(|(id, _)| id)
            .collect())
    }

    /// Look up a stack by name. Without an argument, resolves to the stack of
    /// the process's own container.
    pub fn stack(&self, identifier: Option<&str>) -> Option<StackId> {
        match identifier {
            Some(name) if !name.is_empty() => self
                .graph
                .stacks()
                .find(|(_, s)| s.name.eq_ignore_ascii_case(name))
                .map(|(id, _)| id),
            _ => self.graph.self_ref.stack,
        }
    }

    pub fn stacks(&self) -> Vec<StackId> {
        self.graph.stacks().map(|(id, _)| id).collect()
    }

    fn self_stack_name(&self) -> Option<String> {
        self.graph
            .self_ref
            .stack
            .map(|id| self.graph.stack(id).name.clone())
    }
}

/// Keep items carrying the given label key.
pub fn where_label_exists<'a, T: Labeled>(key: &str, items: &[&'a T]) -> Vec<&'a T> {
    items
        .iter()
        .filter(|item| item.labels().contains_key(key))
        .copied()
        .collect()
}

/// Keep items whose label value equals the given value, case-insensitively.
pub fn where_label_equals<'a, T: Labeled>(key: &str, value: &str, items: &[&'a T]) -> Vec<&'a T> {
    items
        .iter()
        .filter(|item| {
            item.labels()
                .get(key)
                .map(|actual| actual.eq_ignore_ascii_case(value))
                .unwrap_or(false)
        })
        .copied()
        .collect()
}

/// Keep items whose label value matches the given regular expression.
pub fn where_label_matches<'a, T: Labeled>(
    key: &str,
    pattern: &str,
    items: &[&'a T],
) -> Result<Vec<&'a T>, QueryError> {
    let rx = Regex::new(pattern)?;
    Ok(items
        .iter()
        .filter(|item| {
            item.labels()
                .get(key)
                .map(|actual| rx.is_match(actual))
                .unwrap_or(false)
        })
        .copied()
        .collect())
}

/// Group items by the value of the given label. Items lacking the label are
/// excluded from every group.
pub fn group_by_label<'a, T: Labeled>(
    key: &str,
    items: &[&'a T],
) -> BTreeMap<String, Vec<&'a T>> {
    let mut groups: BTreeMap<String, Vec<&'a T>> = BTreeMap::new();
    for item in items {
        if let Some(value) = item.labels().get(key) {
            if !value.is_empty() {
                groups.entry(value.clone()).or_default().push(item);
            }
        }
    }
    groups
}

/// Check a label map against `(key, value)` filters. The value must match
/// case-insensitively; on mismatch it is retried as a regular expression
/// against the actual value.
pub fn matches_labels(labels: &LabelMap, filters: &[(String, String)]) -> bool {
    filters.iter().all(|(key, wanted)| {
        labels.get(key).is_some_and(|actual| {
            actual.eq_ignore_ascii_case(wanted)
                || Regex::new(wanted)
                    .map(|rx| rx.is_match(actual))
                    .unwrap_or(false)
        })
    })
}

fn parse_label_selector(selector: &str) -> Result<(String, String), QueryError> {
    let body = selector
        .strip_prefix('@')
        .ok_or_else(|| QueryError::InvalidSelector(selector.to_string()))?;
    match body.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(QueryError::MalformedLabelSelector(selector.to_string())),
    }
}

fn parse_label_selectors(selectors: &[String]) -> Result<Vec<(String, String)>, QueryError> {
    selectors.iter().map(|s| parse_label_selector(s)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphBuilder;
    use crate::metadata::{ContainerRecord, HostRecord, SelfRecord, ServiceRecord, StackRecord};
    use std::collections::BTreeMap;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn fixture() -> ContextGraph {
        let hosts = vec![
            HostRecord {
                uuid: "h1".to_string(),
                name: "node-1".to_string(),
                address: "10.0.0.1".to_string(),
                labels: labels(&[("zone", "eu-west")]),
            },
            HostRecord {
                uuid: "h2".to_string(),
                name: "node-2".to_string(),
                address: "10.0.0.2".to_string(),
                labels: labels(&[("zone", "us-east")]),
            },
        ];
        let stacks = vec![
            StackRecord {
                uuid: "st1".to_string(),
                name: "web".to_string(),
            },
            StackRecord {
                uuid: "st2".to_string(),
                name: "db".to_string(),
            },
        ];
        let services = vec![
            ServiceRecord {
                uuid: "s1".to_string(),
                name: "app".to_string(),
                stack_name: "web".to_string(),
                primary_service_name: "app".to_string(),
                labels: labels(&[("env", "prod"), ("tier", "web")]),
                ..Default::default()
            },
            ServiceRecord {
                uuid: "s2".to_string(),
                name: "pg".to_string(),
                stack_name: "db".to_string(),
                primary_service_name: "pg".to_string(),
                labels: labels(&[("env", "prod"), ("tier", "data")]),
                ..Default::default()
            },
        ];
        let containers = vec![
            ContainerRecord {
                uuid: "c1".to_string(),
                name: "app-1".to_string(),
                stack_name: "web".to_string(),
                service_name: "app".to_string(),
                host_uuid: "h1".to_string(),
                create_index: 1,
                labels: labels(&[("version", "1.2")]),
                ..Default::default()
            },
            ContainerRecord {
                uuid: "c2".to_string(),
                name: "pg-1".to_string(),
                stack_name: "db".to_string(),
                service_name: "pg".to_string(),
                host_uuid: "h2".to_string(),
                create_index: 2,
                labels: labels(&[("version", "2.0")]),
                ..Default::default()
            },
        ];
        GraphBuilder::new()
            .build(
                hosts,
                stacks,
                services,
                containers,
                &SelfRecord {
                    uuid: "c1".to_string(),
                    ..Default::default()
                },
            )
            .unwrap()
    }

    fn sels(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_host_defaults_to_self() {
        let graph = fixture();
        let query = Query::new(&graph);
        let id = query.host(None).unwrap();
        assert_eq!(graph.host(id).uuid, "h1");
    }

    #[test]
    fn test_host_lookup_is_case_insensitive() {
        let graph = fixture();
        let query = Query::new(&graph);
        let id = query.host(Some("H2")).unwrap();
        assert_eq!(graph.host(id).name, "node-2");
    }

    #[test]
    fn test_hosts_label_selector() {
        let graph = fixture();
        let query = Query::new(&graph);
        let ids = query.hosts(&sels(&["@zone=eu-west"])).unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(graph.host(ids[0]).name, "node-1");
    }

    #[test]
    fn test_hosts_rejects_stack_selector() {
        let graph = fixture();
        let query = Query::new(&graph);
        assert!(query.hosts(&sels(&[".web"])).is_err());
    }

    #[test]
    fn test_service_by_qualified_name() {
        let graph = fixture();
        let query = Query::new(&graph);
        let id = query.service(Some("pg.db")).unwrap().unwrap();
        assert_eq!(graph.service(id).uuid, "s2");
    }

    #[test]
    fn test_service_bare_name_scopes_to_self_stack() {
        let graph = fixture();
        let query = Query::new(&graph);
        // self is app-1 in stack web; `pg` lives in stack db
        assert!(query.service(Some("pg")).unwrap().is_none());
        let id = query.service(Some("app")).unwrap().unwrap();
        assert_eq!(graph.service(id).uuid, "s1");
    }

    #[test]
    fn test_service_malformed_identifier() {
        let graph = fixture();
        let query = Query::new(&graph);
        assert!(matches!(
            query.service(Some("a.b.c")),
            Err(QueryError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_services_selector_composition_is_order_independent() {
        let graph = fixture();
        let query = Query::new(&graph);
        let a = query.services(&sels(&["@env=prod", "@tier=web"])).unwrap();
        let b = query.services(&sels(&["@tier=web", "@env=prod"])).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 1);
        assert_eq!(graph.service(a[0]).name, "app");
    }

    #[test]
    fn test_services_stack_and_label_selectors_combine() {
        let graph = fixture();
        let query = Query::new(&graph);
        let ids = query.services(&sels(&[".db", "@env=prod"])).unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(graph.service(ids[0]).name, "pg");

        let none = query.services(&sels(&[".db", "@tier=web"])).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_services_rejects_multiple_stack_selectors() {
        let graph = fixture();
        let query = Query::new(&graph);
        assert!(matches!(
            query.services(&sels(&[".web", ".db"])),
            Err(QueryError::MultipleStackSelectors(_))
        ));
    }

    #[test]
    fn test_selector_value_falls_back_to_regex() {
        let graph = fixture();
        let query = Query::new(&graph);
        let ids = query.services(&sels(&["@tier=web|data"])).unwrap();
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn test_stack_defaults_to_self() {
        let graph = fixture();
        let query = Query::new(&graph);
        let id = query.stack(None).unwrap();
        assert_eq!(graph.stack(id).name, "web");
        assert!(query.stack(Some("nope")).is_none());
        assert_eq!(query.stacks().len(), 2);
    }

    #[test]
    fn test_where_label_matches_regression() {
        let graph = fixture();
        let containers: Vec<&Container> = graph.containers().map(|(_, c)| c).collect();
        let matched = where_label_matches("version", "^1\\.", &containers).unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].name, "app-1");
    }

    #[test]
    fn test_where_label_exists_and_equals() {
        let graph = fixture();
        let hosts: Vec<&Host> = graph.hosts().map(|(_, h)| h).collect();
        assert_eq!(where_label_exists("zone", &hosts).len(), 2);
        assert_eq!(where_label_exists("missing", &hosts).len(), 0);

        let matched = where_label_equals("zone", "EU-WEST", &hosts);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].name, "node-1");
    }

    #[test]
    fn test_group_by_label_excludes_unlabeled_items() {
        let graph = fixture();
        let services: Vec<&Service> = graph.services().map(|(_, s)| s).collect();
        let groups = group_by_label("tier", &services);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups["web"].len(), 1);
        assert_eq!(groups["data"].len(), 1);

        let empty = group_by_label("missing", &services);
        assert!(empty.is_empty());
    }
}
