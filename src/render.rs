//! Template Rendering
//!
//! Binds the query engine to a Tera instance and renders one template source
//! against one graph snapshot. Tera supplies the expression language itself
//! (conditionals, loops, filter pipelines, same-file macros via `self::`);
//! this module only provides the data and function contract:
//!
//! - functions `host`, `hosts`, `service`, `services`, `stack`, `stacks`
//!   mirroring [`crate::query::Query`], taking selector strings via the
//!   `selector` argument (a string or an array of strings),
//! - filters `where_label_exists`, `where_label_equals`, `where_label_matches`
//!   and `group_by_label` over lists of host/service/container views,
//! - the process's own identity as the `this` context variable.
//!
//! Lookups that find nothing render as an absent value, so templates can
//! branch on presence without aborting the whole render.

use crate::error::RenderError;
use crate::graph::ContextGraph;
use crate::query::Query;
use crate::views;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tera::{Context, Tera};

/// Renders templates against one immutable graph snapshot.
pub struct TemplateEngine {
    graph: Arc<ContextGraph>,
}

impl TemplateEngine {
    pub fn new(graph: Arc<ContextGraph>) -> Self {
        Self { graph }
    }

    /// Render a template file to bytes.
    pub fn render_file(&self, path: &Path) -> Result<Vec<u8>, RenderError> {
        let source = std::fs::read_to_string(path).map_err(|e| RenderError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.render_named(&name, &source)
    }

    /// Render a named template source to bytes.
    pub fn render_named(&self, name: &str, source: &str) -> Result<Vec<u8>, RenderError> {
        let mut tera = Tera::default();
        register_functions(&mut tera, self.graph.clone());
        register_filters(&mut tera);

        tera.add_raw_template(name, source)
            .map_err(|e| RenderError::Syntax {
                name: name.to_string(),
                detail: describe(&e),
            })?;

        let mut context = Context::new();
        context.insert("this", &views::self_view(&self.graph));

        let rendered = tera
            .render(name, &context)
            .map_err(|e| RenderError::Execution {
                name: name.to_string(),
                detail: describe(&e),
            })?;

        Ok(rendered.into_bytes())
    }
}

/// Flatten a tera error with its source chain into one line.
fn describe(error: &tera::Error) -> String {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn register_functions(tera: &mut Tera, graph: Arc<ContextGraph>) {
    let g = graph.clone();
    tera.register_function(
        "host",
        move |args: &HashMap<String, Value>| -> tera::Result<Value> {
            let uuid = string_arg(args, "uuid")?;
            let query = Query::new(&g);
            Ok(match query.host(uuid.as_deref()) {
                Some(id) => views::host_view(&g, id),
                None => Value::Null,
            })
        },
    );

    let g = graph.clone();
    tera.register_function(
        "hosts",
        move |args: &HashMap<String, Value>| -> tera::Result<Value> {
            let selectors = selector_args(args)?;
            let query = Query::new(&g);
            let ids = query.hosts(&selectors).map_err(|e| tera::Error::msg(e.to_string()))?;
            Ok(Value::Array(
                ids.into_iter().map(|id| views::host_view(&g, id)).collect(),
            ))
        },
    );

    let g = graph.clone();
    tera.register_function(
        "service",
        move |args: &HashMap<String, Value>| -> tera::Result<Value> {
            let identifier = string_arg(args, "id")?;
            let query = Query::new(&g);
            let found = query
                .service(identifier.as_deref())
                .map_err(|e| tera::Error::msg(e.to_string()))?;
            Ok(match found {
                Some(id) => views::service_view(&g, id),
                None => Value::Null,
            })
        },
    );

    let g = graph.clone();
    tera.register_function(
        "services",
        move |args: &HashMap<String, Value>| -> tera::Result<Value> {
            let selectors = selector_args(args)?;
            let query = Query::new(&g);
            let ids = query
                .services(&selectors)
                .map_err(|e| tera::Error::msg(e.to_string()))?;
            Ok(Value::Array(
                ids.into_iter()
                    .map(|id| views::service_view(&g, id))
                    .collect(),
            ))
        },
    );

    let g = graph.clone();
    tera.register_function(
        "stack",
        move |args: &HashMap<String, Value>| -> tera::Result<Value> {
            let name = string_arg(args, "name")?;
            let query = Query::new(&g);
            Ok(match query.stack(name.as_deref()) {
                Some(id) => views::stack_view(&g, id),
                None => Value::Null,
            })
        },
    );

    let g = graph;
    tera.register_function(
        "stacks",
        move |_args: &HashMap<String, Value>| -> tera::Result<Value> {
            let query = Query::new(&g);
            Ok(Value::Array(
                query
                    .stacks()
                    .into_iter()
                    .map(|id| views::stack_view(&g, id))
                    .collect(),
            ))
        },
    );
}

fn register_filters(tera: &mut Tera) {
    tera.register_filter(
        "where_label_exists",
        |value: &Value, args: &HashMap<String, Value>| -> tera::Result<Value> {
            let key = required_string(args, "key", "where_label_exists")?;
            filter_items(value, "where_label_exists", |labels| {
                Ok(labels.contains_key(&key))
            })
        },
    );

    tera.register_filter(
        "where_label_equals",
        |value: &Value, args: &HashMap<String, Value>| -> tera::Result<Value> {
            let key = required_string(args, "key", "where_label_equals")?;
            let wanted = required_string(args, "value", "where_label_equals")?;
            filter_items(value, "where_label_equals", |labels| {
                Ok(labels
                    .get(&key)
                    .map(|actual| actual.eq_ignore_ascii_case(&wanted))
                    .unwrap_or(false))
            })
        },
    );

    tera.register_filter(
        "where_label_matches",
        |value: &Value, args: &HashMap<String, Value>| -> tera::Result<Value> {
            let key = required_string(args, "key", "where_label_matches")?;
            let pattern = required_string(args, "pattern", "where_label_matches")?;
            let rx = regex::Regex::new(&pattern)
                .map_err(|e| tera::Error::msg(format!("(where_label_matches) {}", e)))?;
            filter_items(value, "where_label_matches", |labels| {
                Ok(labels
                    .get(&key)
                    .map(|actual| rx.is_match(actual))
                    .unwrap_or(false))
            })
        },
    );

    tera.register_filter(
        "group_by_label",
        |value: &Value, args: &HashMap<String, Value>| -> tera::Result<Value> {
            let key = required_string(args, "key", "group_by_label")?;
            let items = as_item_list(value, "group_by_label")?;

            let mut groups: BTreeMap<String, Vec<Value>> = BTreeMap::new();
            for item in items {
                let labels = item_labels(&item, "group_by_label")?;
                if let Some(label_value) = labels.get(&key) {
                    if !label_value.is_empty() {
                        groups.entry(label_value.clone()).or_default().push(item);
                    }
                }
            }

            let mut object = serde_json::Map::new();
            for (label_value, members) in groups {
                object.insert(label_value, Value::Array(members));
            }
            Ok(Value::Object(object))
        },
    );
}

/// Apply a label predicate to each element of a homogeneous view list.
fn filter_items<F>(value: &Value, name: &str, predicate: F) -> tera::Result<Value>
where
    F: Fn(&BTreeMap<String, String>) -> tera::Result<bool>,
{
    let items = as_item_list(value, name)?;
    let mut kept = Vec::new();
    for item in items {
        let labels = item_labels(&item, name)?;
        if predicate(&labels)? {
            kept.push(item);
        }
    }
    Ok(Value::Array(kept))
}

fn as_item_list(value: &Value, name: &str) -> tera::Result<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items.clone()),
        _ => Err(tera::Error::msg(format!(
            "({}) input must be a list of hosts, services or containers",
            name
        ))),
    }
}

/// Extract the label map of a host/service/container view. Any other element
/// type is an error.
fn item_labels(item: &Value, name: &str) -> tera::Result<BTreeMap<String, String>> {
    let labels = item
        .as_object()
        .and_then(|object| object.get("labels"))
        .and_then(|labels| labels.as_object())
        .ok_or_else(|| {
            tera::Error::msg(format!(
                "({}) unsupported element type: expected a host, service or container",
                name
            ))
        })?;

    Ok(labels
        .iter()
        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
        .collect())
}

fn string_arg(args: &HashMap<String, Value>, key: &str) -> tera::Result<Option<String>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(tera::Error::msg(format!(
            "argument '{}' must be a string, got {}",
            key, other
        ))),
    }
}

/// The `selector` argument: a single selector string or an array of them.
fn selector_args(args: &HashMap<String, Value>) -> tera::Result<Vec<String>> {
    match args.get("selector") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(vec![s.clone()]),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                other => Err(tera::Error::msg(format!(
                    "selector entries must be strings, got {}",
                    other
                ))),
            })
            .collect(),
        Some(other) => Err(tera::Error::msg(format!(
            "argument 'selector' must be a string or an array of strings, got {}",
            other
        ))),
    }
}

fn required_string(
    args: &HashMap<String, Value>,
    key: &str,
    name: &str,
) -> tera::Result<String> {
    string_arg(args, key)?
        .ok_or_else(|| tera::Error::msg(format!("({}) missing required argument '{}'", name, key)))
}
