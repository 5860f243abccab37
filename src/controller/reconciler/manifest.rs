//! # Manifest Loader
//!
//! Turns the files under a target's path at one revision into an ordered set
//! of declared objects with content hashes.
//!
//! A path holding a kustomization file at its root is rendered with
//! `kustomize build` and the rendered stream is loaded instead of the raw
//! files. Elsewhere kustomization files are not manifests and are skipped.
//!
//! Ordering puts Namespaces first and CustomResourceDefinitions second so that
//! nothing is applied before its prerequisites; every other object keeps its
//! file-then-declaration order.
//!
//! Scope is first guessed from a list of well-known cluster-scoped kinds and
//! then settled by `resolve_scopes` against discovery, so any kind the
//! cluster serves as cluster-scoped loses the defaulted namespace.

use crate::adapter::{ClusterAdapter, SourceAdapter, SourceError};
use crate::constants::{KUSTOMIZATION_FILES, MANIFEST_EXTENSIONS};
use crate::controller::reconciler::types::{
    ManagedObject, ObjectKey, ReconcilerError, Target,
};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Built-in kinds that never carry a namespace
const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "Namespace",
    "CustomResourceDefinition",
    "ClusterRole",
    "ClusterRoleBinding",
    "PersistentVolume",
    "StorageClass",
    "PriorityClass",
    "IngressClass",
    "RuntimeClass",
    "APIService",
    "ValidatingWebhookConfiguration",
    "MutatingWebhookConfiguration",
];

/// Load and order all objects declared under `target.path` at `revision`
pub async fn load(
    source: &dyn SourceAdapter,
    target: &Target,
    revision: &str,
) -> Result<Vec<ManagedObject>, ReconcilerError> {
    let files = source
        .list_files(target, revision, &target.path)
        .await
        .map_err(|e| match e {
            SourceError::PathNotFound(_) => ReconcilerError::PathNotFound {
                path: target.path.clone(),
                revision: revision.to_string(),
            },
            SourceError::Unreachable(msg) => ReconcilerError::SourceUnreachable(msg),
            SourceError::Render(msg) => ReconcilerError::ManifestInvalid {
                revision: revision.to_string(),
                reason: msg,
            },
        })?;

    let invalid = |reason: String| ReconcilerError::ManifestInvalid {
        revision: revision.to_string(),
        reason,
    };
    let source_error = |e: SourceError| match e {
        SourceError::Unreachable(msg) => ReconcilerError::SourceUnreachable(msg),
        SourceError::PathNotFound(p) => invalid(format!("{p}: listed but unreadable")),
        SourceError::Render(msg) => invalid(msg),
    };

    let mut objects = Vec::new();
    let mut seen = HashSet::new();
    let root = match target.path.trim().trim_start_matches("./").trim_matches('/') {
        "." => "",
        root => root,
    };

    if let Some(kustomization) = files.iter().find(|f| is_kustomization_root(f, root)) {
        debug!("Rendering {} for {}", kustomization, target.key);
        let bytes = source
            .render_kustomization(target, revision, &target.path)
            .await
            .map_err(source_error)?;
        let documents = parse_documents("rendered.yaml", &bytes)
            .map_err(|e| invalid(format!("{kustomization}: rendered output: {e}")))?;
        debug!("Rendered {} documents from {}", documents.len(), kustomization);
        collect(&mut objects, &mut seen, documents, kustomization, target)
            .map_err(invalid)?;
    } else {
        for file in files
            .iter()
            .filter(|f| is_manifest_file(f) && !is_kustomization_file(f))
        {
            let bytes = source
                .read_file(target, revision, file)
                .await
                .map_err(source_error)?;

            let documents =
                parse_documents(file, &bytes).map_err(|e| invalid(format!("{file}: {e}")))?;
            debug!("Parsed {} documents from {}", documents.len(), file);
            collect(&mut objects, &mut seen, documents, file, target).map_err(invalid)?;
        }
    }

    order_objects(&mut objects);
    Ok(objects)
}

fn collect(
    objects: &mut Vec<ManagedObject>,
    seen: &mut HashSet<ObjectKey>,
    documents: Vec<Value>,
    file: &str,
    target: &Target,
) -> Result<(), String> {
    for manifest in documents {
        let object = object_from_manifest(manifest, file, &target.key.namespace)
            .map_err(|e| format!("{file}: {e}"))?;
        if !seen.insert(object.key.clone()) {
            return Err(format!("{file}: {} is declared more than once", object.key));
        }
        objects.push(object);
    }
    Ok(())
}

fn is_kustomization_file(file: &str) -> bool {
    std::path::Path::new(file)
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| KUSTOMIZATION_FILES.contains(&name))
}

/// Whether `file` is a kustomization file directly under `root`
fn is_kustomization_root(file: &str, root: &str) -> bool {
    is_kustomization_file(file)
        && std::path::Path::new(file).parent() == Some(std::path::Path::new(root))
}

fn is_manifest_file(file: &str) -> bool {
    std::path::Path::new(file)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            MANIFEST_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}

/// Parse a file into its non-empty documents, expanding `*List` kinds
pub fn parse_documents(file: &str, bytes: &[u8]) -> Result<Vec<Value>, String> {
    let mut raw = Vec::new();
    if file.to_lowercase().ends_with(".json") {
        let value: Value = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
        raw.push(value);
    } else {
        for document in serde_yaml::Deserializer::from_slice(bytes) {
            let value = serde_yaml::Value::deserialize(document).map_err(|e| e.to_string())?;
            if value.is_null() {
                continue;
            }
            let value = serde_json::to_value(&value).map_err(|e| e.to_string())?;
            raw.push(value);
        }
    }

    let mut documents = Vec::with_capacity(raw.len());
    for value in raw {
        let is_list = value
            .get("kind")
            .and_then(Value::as_str)
            .is_some_and(|kind| kind.ends_with("List"))
            && value.get("items").is_some_and(Value::is_array);
        if is_list {
            if let Some(Value::Array(items)) = value.get("items") {
                documents.extend(items.iter().cloned());
            }
        } else if !value.is_null() {
            documents.push(value);
        }
    }
    Ok(documents)
}

/// Build a ManagedObject from one manifest
///
/// Namespaced kinds without `metadata.namespace` are placed in
/// `default_namespace`; the manifest is updated so the hash and the apply
/// agree.
pub fn object_from_manifest(
    mut manifest: Value,
    file: &str,
    default_namespace: &str,
) -> Result<ManagedObject, String> {
    if !manifest.is_object() {
        return Err("document is not a mapping".to_string());
    }

    let api_version = required_str(&manifest, &["apiVersion"])?;
    let kind = required_str(&manifest, &["kind"])?;
    let name = required_str(&manifest, &["metadata", "name"])?;

    let namespace = if CLUSTER_SCOPED_KINDS.contains(&kind.as_str()) {
        if let Some(metadata) = manifest.get_mut("metadata").and_then(Value::as_object_mut) {
            metadata.remove("namespace");
        }
        String::new()
    } else {
        match manifest
            .pointer("/metadata/namespace")
            .and_then(Value::as_str)
            .filter(|ns| !ns.is_empty())
        {
            Some(ns) => ns.to_string(),
            None => {
                if let Some(metadata) = manifest.get_mut("metadata").and_then(Value::as_object_mut)
                {
                    metadata.insert(
                        "namespace".to_string(),
                        Value::String(default_namespace.to_string()),
                    );
                }
                default_namespace.to_string()
            }
        }
    };

    let desired_hash = content_hash(&manifest);
    Ok(ManagedObject {
        key: ObjectKey {
            kind,
            namespace,
            name,
        },
        api_version,
        source_file: file.to_string(),
        manifest,
        desired_hash,
        last_applied_hash: None,
        last_observed_hash: None,
    })
}

fn required_str(manifest: &Value, path: &[&str]) -> Result<String, String> {
    let mut current = manifest;
    for segment in path {
        current = current
            .get(segment)
            .ok_or_else(|| format!("missing {}", path.join(".")))?;
    }
    current
        .as_str()
        .filter(|s| !s.trim().is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| format!("{} must be a non-empty string", path.join(".")))
}

/// Settle the scope of every object with the cluster's discovery data
///
/// CustomResourceDefinitions declared in the same set win over discovery,
/// since their kinds are not served until they are applied. Kinds the cluster
/// does not know keep the loader's guess; their apply fails and the next
/// cycle resolves them again.
pub async fn resolve_scopes(
    cluster: &dyn ClusterAdapter,
    revision: &str,
    objects: &mut [ManagedObject],
) -> Result<(), ReconcilerError> {
    let declared = declared_scopes(objects);
    let mut discovered: HashMap<(String, String), Option<bool>> = HashMap::new();

    for object in objects.iter_mut() {
        let group = api_group(&object.api_version).to_string();
        let namespaced = match declared.get(&(group, object.key.kind.clone())) {
            Some(namespaced) => Some(*namespaced),
            None => {
                let lookup = (object.api_version.clone(), object.key.kind.clone());
                match discovered.get(&lookup) {
                    Some(cached) => *cached,
                    None => {
                        let found = cluster
                            .is_namespaced(&object.api_version, &object.key.kind)
                            .await
                            .unwrap_or_else(|e| {
                                debug!("Scope lookup for {} failed: {}", object.key, e);
                                None
                            });
                        discovered.insert(lookup, found);
                        found
                    }
                }
            }
        };
        if namespaced == Some(false) && !object.key.namespace.is_empty() {
            debug!("{} is cluster-scoped, dropping its namespace", object.key);
            make_cluster_scoped(object);
        }
    }

    let mut seen = HashSet::new();
    for object in objects.iter() {
        if !seen.insert(&object.key) {
            return Err(ReconcilerError::ManifestInvalid {
                revision: revision.to_string(),
                reason: format!(
                    "{}: {} is declared more than once",
                    object.source_file, object.key
                ),
            });
        }
    }
    Ok(())
}

/// Scopes of the kinds defined by CustomResourceDefinitions in `objects`,
/// keyed by (group, kind)
pub fn declared_scopes(objects: &[ManagedObject]) -> HashMap<(String, String), bool> {
    objects
        .iter()
        .filter(|o| o.key.kind == "CustomResourceDefinition")
        .filter_map(|o| {
            let spec = o.manifest.get("spec")?;
            let group = spec.get("group")?.as_str()?;
            let kind = spec.pointer("/names/kind")?.as_str()?;
            let namespaced = spec.get("scope")?.as_str()? != "Cluster";
            Some(((group.to_string(), kind.to_string()), namespaced))
        })
        .collect()
}

fn api_group(api_version: &str) -> &str {
    api_version
        .split_once('/')
        .map_or("", |(group, _)| group)
}

fn make_cluster_scoped(object: &mut ManagedObject) {
    if let Some(metadata) = object
        .manifest
        .get_mut("metadata")
        .and_then(Value::as_object_mut)
    {
        metadata.remove("namespace");
    }
    object.key.namespace.clear();
    object.desired_hash = content_hash(&object.manifest);
}

/// Prerequisite-first stable ordering
pub fn order_objects(objects: &mut [ManagedObject]) {
    objects.sort_by_key(|o| match o.key.kind.as_str() {
        "Namespace" => 0,
        "CustomResourceDefinition" => 1,
        _ => 2,
    });
}

/// SHA-256 over the key-sorted JSON encoding, hex encoded
pub fn content_hash(value: &Value) -> String {
    let canonical = canonicalize(value);
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    format!("{:x}", Sha256::digest(&bytes))
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
