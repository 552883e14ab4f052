//! Reconciles generated contexts into the kubeconfig file.
//!
//! The file is edited as an ordered YAML tree rather than through kube's
//! typed model, so every node that is not a generated entry keeps its fields
//! and key order.

use std::{collections::BTreeMap, path::Path};

use anyhow::anyhow;
use kube::config::{Kubeconfig, NamedAuthInfo, NamedCluster, NamedContext};
use serde::{Serialize, de::DeserializeOwned};
use serde_yaml::{Mapping, Value};
use tracing::{debug, info};

use crate::{Error, Result, names::OWNED_PREFIX, persist, state::ClusterRecord, state::State};

const EXEC_API_VERSION: &str = "client.authentication.k8s.io/v1beta1";
const EXEC_COMMAND: &str = "aws";

const CLUSTERS: &str = "clusters";
const USERS: &str = "users";
const CONTEXTS: &str = "contexts";
const CURRENT_CONTEXT: &str = "current-context";

/// What a context reconciliation changed (or would change, in a dry run).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextSyncResult {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

fn is_owned(name: &str) -> bool {
    name.starts_with(OWNED_PREFIX)
}

fn read_text(path: &Path) -> Result<Option<String>> {
    Ok(persist::read_optional(path)?.filter(|text| !text.trim().is_empty()))
}

fn parse_typed(path: &Path, text: &str) -> Result<Kubeconfig> {
    Kubeconfig::from_yaml(text).map_err(|source| Error::Kubeconfig {
        path: path.to_path_buf(),
        source,
    })
}

/// Read the kubeconfig at `path`; a missing or blank file is an empty config.
pub fn load(path: &Path) -> Result<Kubeconfig> {
    match read_text(path)? {
        Some(text) => parse_typed(path, &text),
        None => Ok(Kubeconfig {
            api_version: Some("v1".into()),
            kind: Some("Config".into()),
            ..Kubeconfig::default()
        }),
    }
}

/// A fresh document, laid out the way kubectl writes one.
fn empty_document() -> Mapping {
    [
        ("apiVersion", Value::from("v1")),
        (CLUSTERS, Value::Sequence(Vec::new())),
        (CONTEXTS, Value::Sequence(Vec::new())),
        (CURRENT_CONTEXT, Value::from("")),
        ("kind", Value::from("Config")),
        ("preferences", Value::Mapping(Mapping::new())),
        (USERS, Value::Sequence(Vec::new())),
    ]
    .into_iter()
    .map(|(key, value)| (Value::from(key), value))
    .collect()
}

fn read_document(path: &Path) -> Result<Mapping> {
    let Some(text) = read_text(path)? else {
        return Ok(empty_document());
    };
    parse_typed(path, &text)?;
    match serde_yaml::from_str(&text) {
        Ok(Value::Mapping(root)) => Ok(root),
        Ok(_) => Err(Error::Parse {
            path: path.to_path_buf(),
            source: anyhow!("kubeconfig is not a mapping"),
        }),
        Err(err) => Err(Error::Parse {
            path: path.to_path_buf(),
            source: err.into(),
        }),
    }
}

fn save(path: &Path, root: Mapping) -> Result<()> {
    let text =
        serde_yaml::to_string(&Value::Mapping(root)).map_err(|err| Error::Encode(err.into()))?;
    persist::write_atomic(path, text.as_bytes())
}

/// Items of the list under `key`; a missing or null list is empty.
fn list(root: &Mapping, key: &str) -> Vec<Value> {
    root.get(key)
        .and_then(Value::as_sequence)
        .cloned()
        .unwrap_or_default()
}

fn set_list(root: &mut Mapping, key: &str, items: Vec<Value>) {
    if list(root, key) != items {
        root.insert(Value::from(key), Value::Sequence(items));
    }
}

fn entry_name(item: &Value) -> Option<&str> {
    item.get("name").and_then(Value::as_str)
}

/// `aws eks get-token` arguments for the generated user of `record`.
pub fn exec_args(record: &ClusterRecord) -> Vec<String> {
    [
        "eks",
        "get-token",
        "--profile",
        &record.aws_profile,
        "--cluster-name",
        &record.cluster_name,
        "--region",
        &record.region,
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

fn mapping<const N: usize>(entries: [(&str, Value); N]) -> Value {
    Value::Mapping(
        entries
            .into_iter()
            .map(|(key, value)| (Value::from(key), value))
            .collect(),
    )
}

struct DesiredEntry {
    cluster: Value,
    user: Value,
    context: Value,
}

impl DesiredEntry {
    fn new(name: &str, record: &ClusterRecord) -> Self {
        let mut context = vec![("cluster", Value::from(name))];
        if !record.namespace.is_empty() {
            context.push(("namespace", Value::from(record.namespace.as_str())));
        }
        context.push(("user", Value::from(name)));
        let context = Value::Mapping(
            context
                .into_iter()
                .map(|(key, value)| (Value::from(key), value))
                .collect(),
        );

        let args = exec_args(record).into_iter().map(Value::from).collect();
        Self {
            cluster: mapping([
                (
                    "cluster",
                    mapping([
                        (
                            "certificate-authority-data",
                            Value::from(record.cluster_certificate_base64.as_str()),
                        ),
                        ("server", Value::from(record.cluster_endpoint.as_str())),
                    ]),
                ),
                ("name", Value::from(name)),
            ]),
            user: mapping([
                ("name", Value::from(name)),
                (
                    "user",
                    mapping([(
                        "exec",
                        mapping([
                            ("apiVersion", Value::from(EXEC_API_VERSION)),
                            ("args", Value::Sequence(args)),
                            ("command", Value::from(EXEC_COMMAND)),
                        ]),
                    )]),
                ),
            ]),
            context: mapping([("context", context), ("name", Value::from(name))]),
        }
    }
}

/// Whether two entries mean the same thing to kube, ignoring layout and
/// defaulted fields.
fn same_entry<T: DeserializeOwned + Serialize>(current: &Value, desired: &Value) -> bool {
    let typed = |value: &Value| {
        serde_yaml::from_value::<T>(value.clone())
            .ok()
            .and_then(|entry| serde_json::to_value(entry).ok())
    };
    match (typed(current), typed(desired)) {
        (Some(current), Some(desired)) => current == desired,
        _ => current == desired,
    }
}

/// Replace the entry called `name` with `desired` unless it already matches,
/// or append it. Returns whether the list changed.
fn upsert<T: DeserializeOwned + Serialize>(
    items: &mut Vec<Value>,
    name: &str,
    desired: Value,
) -> bool {
    match items.iter().position(|item| entry_name(item) == Some(name)) {
        Some(index) if same_entry::<T>(&items[index], &desired) => false,
        Some(index) => {
            items[index] = desired;
            true
        }
        None => {
            items.push(desired);
            true
        }
    }
}

/// Bring the generated contexts in the kubeconfig at `path` in line with
/// `state`.
///
/// Each context, cluster and user this crate generates shares the context
/// name. Only list items whose name starts with the owned prefix are diffed,
/// replaced or removed; an owned cluster or user left without a desired
/// context is swept too. Every other node is written back as it was read.
/// `current-context` is cleared when it points nowhere and then set to the
/// first generated context when unset. The file is only written when
/// something changed and never in a dry run.
pub fn reconcile(path: &Path, state: &State, dry_run: bool) -> Result<ContextSyncResult> {
    let mut root = read_document(path)?;
    let original = root.clone();
    let mut result = ContextSyncResult::default();

    let desired: BTreeMap<&str, &ClusterRecord> = state
        .clusters
        .iter()
        .map(|c| (c.kube_context.as_str(), c))
        .collect();
    let keep = |item: &Value| {
        entry_name(item).is_none_or(|name| !is_owned(name) || desired.contains_key(name))
    };

    let mut clusters = list(&root, CLUSTERS);
    let mut users = list(&root, USERS);
    let mut contexts = list(&root, CONTEXTS);

    for name in contexts.iter().filter(|&item| !keep(item)).filter_map(entry_name) {
        debug!(context = %name, "removing stale context");
        result.removed += 1;
    }
    clusters.retain(keep);
    users.retain(keep);
    contexts.retain(keep);

    for (&name, record) in &desired {
        let entry = DesiredEntry::new(name, record);
        let existed = contexts.iter().any(|item| entry_name(item) == Some(name));

        let cluster_changed = upsert::<NamedCluster>(&mut clusters, name, entry.cluster);
        let user_changed = upsert::<NamedAuthInfo>(&mut users, name, entry.user);
        let context_changed = upsert::<NamedContext>(&mut contexts, name, entry.context);

        if !existed {
            result.added += 1;
        } else if cluster_changed || user_changed || context_changed {
            debug!(context = %name, "updating context");
            result.updated += 1;
        }
    }

    let current = root
        .get(CURRENT_CONTEXT)
        .and_then(Value::as_str)
        .map(str::to_string);
    let next = current
        .clone()
        .filter(|name| contexts.iter().any(|item| entry_name(item) == Some(name.as_str())))
        .or_else(|| desired.keys().next().map(|name| name.to_string()));
    match next {
        Some(name) if current.as_deref() != Some(name.as_str()) => {
            root.insert(Value::from(CURRENT_CONTEXT), Value::from(name));
        }
        None if current.as_deref().is_some_and(|name| !name.is_empty()) => {
            root.insert(Value::from(CURRENT_CONTEXT), Value::from(""));
        }
        _ => {}
    }

    set_list(&mut root, CLUSTERS, clusters);
    set_list(&mut root, USERS, users);
    set_list(&mut root, CONTEXTS, contexts);

    info!(
        path = %path.display(),
        added = result.added,
        updated = result.updated,
        removed = result.removed,
        dry_run,
        "reconciled kube contexts"
    );
    if !dry_run && root != original {
        save(path, root)?;
    }
    Ok(result)
}
