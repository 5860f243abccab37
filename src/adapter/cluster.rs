//! # Kubernetes Cluster Adapter
//!
//! Reads and applies arbitrary manifests through the dynamic API.
//!
//! Kinds are resolved with API discovery once and cached. Objects are written
//! with server-side apply under the controller's field manager, and each
//! applied object carries the hash of the manifest it was applied from so an
//! identical re-apply can be reported as unchanged.

use super::{ApplyOutcome, ClusterAdapter, ClusterError};
use crate::constants::{APPLIED_HASH_ANNOTATION, FIELD_MANAGER};
use crate::controller::reconciler::drift::observed_hash;
use crate::controller::reconciler::types::ManagedObject;
use async_trait::async_trait;
use kube::{
    api::{Api, ApiResource, Patch, PatchParams},
    core::{DynamicObject, GroupVersionKind},
    discovery::{pinned_kind, ApiCapabilities, Scope},
    Client,
};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Cluster adapter backed by a kube client
pub struct KubeClusterAdapter {
    client: Client,
    discovery: RwLock<HashMap<GroupVersionKind, (ApiResource, ApiCapabilities)>>,
}

impl KubeClusterAdapter {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            discovery: RwLock::new(HashMap::new()),
        }
    }

    async fn resolve(
        &self,
        api_version: &str,
        kind: &str,
    ) -> Result<(ApiResource, ApiCapabilities), ClusterError> {
        let gvk = parse_gvk(api_version, kind);
        if let Some(found) = self.discovery.read().await.get(&gvk) {
            return Ok(found.clone());
        }

        let resolved = pinned_kind(&self.client, &gvk).await.map_err(|e| match e {
            kube::Error::Api(ref api_err) if api_err.code == 404 => {
                ClusterError::UnknownKind(format!("{api_version}/{kind}"))
            }
            kube::Error::Discovery(_) => ClusterError::UnknownKind(format!("{api_version}/{kind}")),
            other => ClusterError::Api(other.to_string()),
        })?;
        debug!(
            "Discovered {} as {} ({:?})",
            kind, resolved.0.plural, resolved.1.scope
        );
        self.discovery
            .write()
            .await
            .insert(gvk, resolved.clone());
        Ok(resolved)
    }

    async fn api_for(&self, object: &ManagedObject) -> Result<Api<DynamicObject>, ClusterError> {
        let (resource, capabilities) = self
            .resolve(&object.api_version, &object.key.kind)
            .await?;
        match capabilities.scope {
            Scope::Cluster => Ok(Api::all_with(self.client.clone(), &resource)),
            Scope::Namespaced => {
                if object.key.namespace.is_empty() {
                    return Err(ClusterError::InvalidManifest(format!(
                        "{} is namespaced but has no namespace",
                        object.key
                    )));
                }
                Ok(Api::namespaced_with(
                    self.client.clone(),
                    &object.key.namespace,
                    &resource,
                ))
            }
        }
    }
}

#[async_trait]
impl ClusterAdapter for KubeClusterAdapter {
    async fn get_object(&self, object: &ManagedObject) -> Result<Option<Value>, ClusterError> {
        let api = self.api_for(object).await?;
        let live = api
            .get_opt(&object.key.name)
            .await
            .map_err(|e| ClusterError::Api(e.to_string()))?;
        live.map(|o| serde_json::to_value(o).map_err(|e| ClusterError::Api(e.to_string())))
            .transpose()
    }

    async fn apply_object(&self, object: &ManagedObject) -> Result<ApplyOutcome, ClusterError> {
        let api = self.api_for(object).await?;

        if let Some(live) = api
            .get_opt(&object.key.name)
            .await
            .map_err(|e| ClusterError::Api(e.to_string()))?
        {
            let stamped = live
                .metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(APPLIED_HASH_ANNOTATION))
                .is_some_and(|h| *h == object.desired_hash);
            if stamped {
                let live = serde_json::to_value(&live).map_err(|e| ClusterError::Api(e.to_string()))?;
                if observed_hash(&live, &object.manifest) == object.desired_hash {
                    return Ok(ApplyOutcome::Unchanged);
                }
            }
        }

        let manifest = stamp_applied_hash(&object.manifest, &object.desired_hash)?;
        api.patch(
            &object.key.name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(manifest),
        )
        .await
        .map_err(|e| match e {
            kube::Error::Api(api_err) => ClusterError::Api(format!(
                "{} ({}): {}",
                api_err.reason, api_err.code, api_err.message
            )),
            other => ClusterError::Api(other.to_string()),
        })?;
        Ok(ApplyOutcome::Applied)
    }

    async fn is_namespaced(
        &self,
        api_version: &str,
        kind: &str,
    ) -> Result<Option<bool>, ClusterError> {
        match self.resolve(api_version, kind).await {
            Ok((_, capabilities)) => Ok(Some(matches!(capabilities.scope, Scope::Namespaced))),
            Err(ClusterError::UnknownKind(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Split `apiVersion` into group and version
fn parse_gvk(api_version: &str, kind: &str) -> GroupVersionKind {
    let (group, version) = match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    };
    GroupVersionKind::gvk(group, version, kind)
}

/// Copy of the manifest carrying the applied-hash annotation
fn stamp_applied_hash(manifest: &Value, hash: &str) -> Result<Value, ClusterError> {
    let mut manifest = manifest.clone();
    let metadata = manifest
        .get_mut("metadata")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| ClusterError::InvalidManifest("metadata is not a mapping".to_string()))?;
    let annotations = metadata
        .entry("annotations")
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    match annotations.as_object_mut() {
        Some(map) => {
            map.insert(
                APPLIED_HASH_ANNOTATION.to_string(),
                Value::String(hash.to_string()),
            );
            Ok(manifest)
        }
        None => Err(ClusterError::InvalidManifest(
            "metadata.annotations is not a mapping".to_string(),
        )),
    }
}
