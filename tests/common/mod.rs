//! Common test utilities
//!
//! In-memory stand-ins for the Git source, the cluster and the validator, so
//! the reconciliation engine can be driven end to end without a cluster.

#![allow(dead_code)]

use async_trait::async_trait;
use configsync_controller::adapter::{
    ApplyOutcome, ClusterAdapter, ClusterError, SourceAdapter, SourceError, Validation, Validator,
};
use configsync_controller::controller::reconciler::{
    ManagedObject, MemoryStatusStore, ObjectKey, Reconciler, StatusReporter, Target, TargetKey,
};
use configsync_controller::crd::Environment;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Target pointing at `envs/<namespace>` of a fake repository
pub fn target(namespace: &str, name: &str) -> Target {
    Target {
        key: TargetKey::new(namespace, name),
        repository: "https://example.com/config.git".into(),
        reference: "main".into(),
        path: format!("envs/{namespace}"),
        environment: Environment::Development,
        sync_interval: Duration::from_secs(60),
        drift_scan_interval: Duration::from_secs(120),
        auto_approve: false,
        drift_detection: true,
    }
}

/// YAML for a ConfigMap with a single `value` entry
pub fn config_map(name: &str, value: &str) -> String {
    format!(
        "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {name}\ndata:\n  value: \"{value}\"\n"
    )
}

#[derive(Default)]
struct SourceState {
    head: String,
    trees: HashMap<String, BTreeMap<String, String>>,
    unreachable: bool,
    delay: Duration,
    rendered: Option<Result<String, String>>,
    renders: usize,
}

/// Git source whose history is set by the test
#[derive(Default)]
pub struct FakeSource {
    state: Mutex<SourceState>,
    resolves: AtomicUsize,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a commit holding exactly `files` and move the branch to it
    pub fn commit(&self, revision: &str, files: &[(&str, String)]) {
        let mut state = self.state.lock().unwrap();
        state.head = revision.to_string();
        state.trees.insert(
            revision.to_string(),
            files
                .iter()
                .map(|(path, content)| ((*path).to_string(), content.clone()))
                .collect(),
        );
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unwrap().unreachable = unreachable;
    }

    /// Delay every resolve, to keep cycles in flight
    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().unwrap().delay = delay;
    }

    pub fn resolve_count(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }

    /// Output of every kustomization render, or the error it fails with
    pub fn set_rendered(&self, rendered: Result<String, String>) {
        self.state.lock().unwrap().rendered = Some(rendered);
    }

    pub fn render_count(&self) -> usize {
        self.state.lock().unwrap().renders
    }
}

#[async_trait]
impl SourceAdapter for FakeSource {
    async fn resolve_revision(&self, _target: &Target) -> Result<String, SourceError> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        let (delay, unreachable, head) = {
            let state = self.state.lock().unwrap();
            (state.delay, state.unreachable, state.head.clone())
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if unreachable {
            return Err(SourceError::Unreachable("connection refused".into()));
        }
        if head.is_empty() {
            return Err(SourceError::Unreachable("no commits on main".into()));
        }
        Ok(head)
    }

    async fn list_files(
        &self,
        _target: &Target,
        revision: &str,
        path: &str,
    ) -> Result<Vec<String>, SourceError> {
        let state = self.state.lock().unwrap();
        let tree = state
            .trees
            .get(revision)
            .ok_or_else(|| SourceError::Unreachable(format!("unknown revision {revision}")))?;
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let files: Vec<String> = tree
            .keys()
            .filter(|file| file.starts_with(&prefix))
            .cloned()
            .collect();
        if files.is_empty() {
            return Err(SourceError::PathNotFound(path.to_string()));
        }
        Ok(files)
    }

    async fn read_file(
        &self,
        _target: &Target,
        revision: &str,
        file: &str,
    ) -> Result<Vec<u8>, SourceError> {
        let state = self.state.lock().unwrap();
        state
            .trees
            .get(revision)
            .and_then(|tree| tree.get(file))
            .map(|content| content.clone().into_bytes())
            .ok_or_else(|| SourceError::PathNotFound(file.to_string()))
    }

    async fn render_kustomization(
        &self,
        _target: &Target,
        _revision: &str,
        path: &str,
    ) -> Result<Vec<u8>, SourceError> {
        let mut state = self.state.lock().unwrap();
        state.renders += 1;
        match &state.rendered {
            Some(Ok(output)) => Ok(output.clone().into_bytes()),
            Some(Err(reason)) => Err(SourceError::Render(reason.clone())),
            None => Err(SourceError::Render(format!("{path}: nothing to render"))),
        }
    }
}

#[derive(Default)]
struct ClusterState {
    objects: HashMap<ObjectKey, Value>,
    apply_calls: HashMap<ObjectKey, usize>,
    writes: usize,
    failing: HashMap<String, String>,
    in_flight: usize,
    max_in_flight: usize,
    in_flight_by_namespace: HashMap<String, usize>,
    overlapped: HashSet<String>,
    scopes: HashMap<String, bool>,
}

/// Cluster that stores applied manifests verbatim
///
/// An apply whose manifest equals the stored object reports `Unchanged`.
/// Concurrency is tracked per object namespace, so tests that give each
/// target its own namespace can detect overlapping cycles of one target.
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<ClusterState>,
    delay: Mutex<Duration>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every apply of objects named `name` fail
    pub fn fail_object(&self, name: &str, reason: &str) {
        self.state
            .lock()
            .unwrap()
            .failing
            .insert(name.to_string(), reason.to_string());
    }

    pub fn heal_object(&self, name: &str) {
        self.state.lock().unwrap().failing.remove(name);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Serve `kind` through discovery with the given scope
    pub fn serve_kind(&self, kind: &str, namespaced: bool) {
        self.state
            .lock()
            .unwrap()
            .scopes
            .insert(kind.to_string(), namespaced);
    }

    /// Apply calls for objects named `name`, whatever their result
    pub fn apply_count(&self, name: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .apply_calls
            .iter()
            .filter(|(key, _)| key.name == name)
            .map(|(_, count)| count)
            .sum()
    }

    pub fn total_applies(&self) -> usize {
        self.state.lock().unwrap().apply_calls.values().sum()
    }

    /// Applies that changed the stored object
    pub fn writes(&self) -> usize {
        self.state.lock().unwrap().writes
    }

    pub fn live(&self, name: &str) -> Option<Value> {
        let state = self.state.lock().unwrap();
        state
            .objects
            .iter()
            .find(|(key, _)| key.name == name)
            .map(|(_, value)| value.clone())
    }

    /// Edit a live object out of band
    pub fn edit_live(&self, name: &str, edit: impl FnOnce(&mut Value)) {
        let mut state = self.state.lock().unwrap();
        if let Some((_, value)) = state.objects.iter_mut().find(|(key, _)| key.name == name) {
            edit(value);
        }
    }

    /// Delete a live object out of band
    pub fn delete_live(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .objects
            .retain(|key, _| key.name != name);
    }

    pub fn max_in_flight(&self) -> usize {
        self.state.lock().unwrap().max_in_flight
    }

    /// Namespaces that saw two applies in flight at once
    pub fn overlapped(&self) -> HashSet<String> {
        self.state.lock().unwrap().overlapped.clone()
    }
}

#[async_trait]
impl ClusterAdapter for FakeCluster {
    async fn get_object(&self, object: &ManagedObject) -> Result<Option<Value>, ClusterError> {
        Ok(self.state.lock().unwrap().objects.get(&object.key).cloned())
    }

    async fn apply_object(&self, object: &ManagedObject) -> Result<ApplyOutcome, ClusterError> {
        let _in_flight = InFlight::enter(&self.state, &object.key);

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        if let Some(reason) = state.failing.get(&object.key.name) {
            return Err(ClusterError::Api(reason.clone()));
        }
        if state.objects.get(&object.key) == Some(&object.manifest) {
            return Ok(ApplyOutcome::Unchanged);
        }
        state.objects.insert(object.key.clone(), object.manifest.clone());
        state.writes += 1;
        Ok(ApplyOutcome::Applied)
    }

    async fn is_namespaced(
        &self,
        _api_version: &str,
        kind: &str,
    ) -> Result<Option<bool>, ClusterError> {
        Ok(self.state.lock().unwrap().scopes.get(kind).copied())
    }
}

/// Marks an apply as in flight until dropped, including when the caller
/// abandons the apply mid-way
struct InFlight<'a> {
    state: &'a Mutex<ClusterState>,
    namespace: String,
}

impl<'a> InFlight<'a> {
    fn enter(state: &'a Mutex<ClusterState>, key: &ObjectKey) -> Self {
        let mut guard = state.lock().unwrap();
        *guard.apply_calls.entry(key.clone()).or_default() += 1;
        guard.in_flight += 1;
        guard.max_in_flight = guard.max_in_flight.max(guard.in_flight);
        let per_namespace = guard
            .in_flight_by_namespace
            .entry(key.namespace.clone())
            .or_default();
        *per_namespace += 1;
        if *per_namespace > 1 {
            guard.overlapped.insert(key.namespace.clone());
        }
        Self {
            state,
            namespace: key.namespace.clone(),
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut guard = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.in_flight -= 1;
        if let Some(count) = guard.in_flight_by_namespace.get_mut(&self.namespace) {
            *count -= 1;
        }
    }
}

/// Validator that rejects objects by name
#[derive(Default)]
pub struct FakeValidator {
    invalid: Mutex<HashSet<String>>,
    unavailable: Mutex<bool>,
}

impl FakeValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject(&self, name: &str) {
        self.invalid.lock().unwrap().insert(name.to_string());
    }

    pub fn allow(&self, name: &str) {
        self.invalid.lock().unwrap().remove(name);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock().unwrap() = unavailable;
    }
}

#[async_trait]
impl Validator for FakeValidator {
    async fn validate(&self, object: &ManagedObject) -> anyhow::Result<Validation> {
        if *self.unavailable.lock().unwrap() {
            anyhow::bail!("validator binary not found");
        }
        if self.invalid.lock().unwrap().contains(&object.key.name) {
            return Ok(Validation::Invalid(vec![format!(
                "{} is rejected by policy",
                object.key.name
            )]));
        }
        Ok(Validation::Valid)
    }
}

/// Fakes wired into a reconciler context
pub struct Harness {
    pub source: Arc<FakeSource>,
    pub cluster: Arc<FakeCluster>,
    pub validator: Arc<FakeValidator>,
    pub store: Arc<MemoryStatusStore>,
    pub ctx: Reconciler,
}

impl Harness {
    pub fn new() -> Self {
        let source = Arc::new(FakeSource::new());
        let cluster = Arc::new(FakeCluster::new());
        let validator = Arc::new(FakeValidator::new());
        let store = Arc::new(MemoryStatusStore::new());
        let ctx = Reconciler {
            source: source.clone(),
            cluster: cluster.clone(),
            validator: validator.clone(),
            reporter: StatusReporter::new(store.clone()),
        };
        Self {
            source,
            cluster,
            validator,
            store,
            ctx,
        }
    }
}
