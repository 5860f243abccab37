//! # Status Reporter
//!
//! Single writer of a target's sync state.
//!
//! Cycle outcomes are folded into the ConfigSync status (revision, sync time
//! and conditions) and written through a `StatusStore`. A write only happens
//! when something actually changed, which keeps the watch stream quiet.

use crate::constants::FIELD_MANAGER;
use crate::controller::reconciler::types::{
    Drift, DriftOutcome, ObjectFailure, ReconcilerError, SyncOutcome, Target, TargetKey,
};
use crate::crd::{ConditionStatus, ConditionType, ConfigSync, ConfigSyncStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Durable storage for per-target sync state
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Load the stored state; a target never written loads as empty
    async fn load(&self, key: &TargetKey) -> Result<ConfigSyncStatus>;
    async fn save(&self, key: &TargetKey, status: &ConfigSyncStatus) -> Result<()>;
}

/// Stores sync state in the ConfigSync status subresource
#[derive(Clone)]
pub struct KubeStatusStore {
    client: Client,
}

impl KubeStatusStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StatusStore for KubeStatusStore {
    async fn load(&self, key: &TargetKey) -> Result<ConfigSyncStatus> {
        let api: Api<ConfigSync> = Api::namespaced(self.client.clone(), &key.namespace);
        let resource = api
            .get_opt(&key.name)
            .await
            .with_context(|| format!("Failed to read ConfigSync {key}"))?;
        Ok(resource.and_then(|r| r.status).unwrap_or_default())
    }

    async fn save(&self, key: &TargetKey, status: &ConfigSyncStatus) -> Result<()> {
        let api: Api<ConfigSync> = Api::namespaced(self.client.clone(), &key.namespace);
        let patch = serde_json::json!({
            "status": status
        });
        api.patch_status(
            &key.name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(patch),
        )
        .await
        .with_context(|| format!("Failed to patch status of ConfigSync {key}"))?;
        Ok(())
    }
}

/// In-process status store
#[derive(Debug, Default)]
pub struct MemoryStatusStore {
    states: Mutex<HashMap<TargetKey, ConfigSyncStatus>>,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state for a target, if any was written
    pub fn get(&self, key: &TargetKey) -> Option<ConfigSyncStatus> {
        self.states
            .lock()
            .ok()
            .and_then(|states| states.get(key).cloned())
    }

    /// Seed the state of a target
    pub fn insert(&self, key: TargetKey, status: ConfigSyncStatus) {
        if let Ok(mut states) = self.states.lock() {
            states.insert(key, status);
        }
    }

    /// Number of successful saves
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Make every following save fail
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn load(&self, key: &TargetKey) -> Result<ConfigSyncStatus> {
        Ok(self.get(key).unwrap_or_default())
    }

    async fn save(&self, key: &TargetKey, status: &ConfigSyncStatus) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            anyhow::bail!("status store rejected write for {key}");
        }
        self.states
            .lock()
            .map_err(|_| anyhow::anyhow!("status store lock poisoned"))?
            .insert(key.clone(), status.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Publishes cycle outcomes as sync state
#[derive(Clone)]
pub struct StatusReporter {
    store: Arc<dyn StatusStore>,
}

impl std::fmt::Debug for StatusReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusReporter").finish_non_exhaustive()
    }
}

impl StatusReporter {
    pub fn new(store: Arc<dyn StatusStore>) -> Self {
        Self { store }
    }

    pub async fn load(&self, key: &TargetKey) -> Result<ConfigSyncStatus, ReconcilerError> {
        self.store
            .load(key)
            .await
            .map_err(|e| ReconcilerError::StatusStore(format!("{e:#}")))
    }

    /// Publish the outcome of a sync cycle
    pub async fn publish_sync(
        &self,
        target: &Target,
        current: &ConfigSyncStatus,
        outcome: &SyncOutcome,
    ) -> Result<ConfigSyncStatus, ReconcilerError> {
        let mut next = current.clone();
        let mut changed = apply_sync_outcome(&mut next, outcome, &now());
        if matches!(outcome, SyncOutcome::Succeeded { .. }) {
            let source = target.source_fingerprint();
            if next.last_synced_source != source {
                next.last_synced_source = source;
                changed = true;
            }
        }
        self.save_if_changed(target, next, changed).await
    }

    /// Publish the outcome of a drift scan
    pub async fn publish_drift(
        &self,
        target: &Target,
        current: &ConfigSyncStatus,
        outcome: &DriftOutcome,
    ) -> Result<ConfigSyncStatus, ReconcilerError> {
        let mut next = current.clone();
        let changed = apply_drift_outcome(&mut next, outcome, &now());
        self.save_if_changed(target, next, changed).await
    }

    /// Record a cycle that was abandoned because it ran past its timeout
    pub async fn publish_timeout(
        &self,
        target: &Target,
        timeout: std::time::Duration,
    ) -> Result<ConfigSyncStatus, ReconcilerError> {
        let current = self.load(&target.key).await?;
        self.publish_sync(
            target,
            &current,
            &SyncOutcome::Failed(ReconcilerError::Timeout(timeout)),
        )
        .await
    }

    async fn save_if_changed(
        &self,
        target: &Target,
        status: ConfigSyncStatus,
        changed: bool,
    ) -> Result<ConfigSyncStatus, ReconcilerError> {
        if !changed {
            debug!("Skipping status update for {} - nothing changed", target.key);
            return Ok(status);
        }
        self.store
            .save(&target.key, &status)
            .await
            .map_err(|e| ReconcilerError::StatusStore(format!("{e:#}")))?;
        debug!("Updated status for {}", target.key);
        Ok(status)
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Fold a sync outcome into `status`; returns whether anything changed
pub fn apply_sync_outcome(status: &mut ConfigSyncStatus, outcome: &SyncOutcome, now: &str) -> bool {
    let mut changed = false;
    match outcome {
        // The source is back at the last fully synced revision, so any error
        // still on record belongs to an earlier cycle
        SyncOutcome::Unchanged { revision } => {
            if !status.is_true(ConditionType::Synced) {
                changed |= status.set_condition(
                    ConditionType::Synced,
                    ConditionStatus::True,
                    "Synced",
                    &format!("Revision {revision} is in sync"),
                    now,
                );
            }
            if status.is_true(ConditionType::Error) {
                changed |= status.set_condition(
                    ConditionType::Error,
                    ConditionStatus::False,
                    "ReconciliationSucceeded",
                    "",
                    now,
                );
            }
        }
        SyncOutcome::Succeeded {
            revision,
            applied,
            unchanged,
        } => {
            if status.last_synced_revision != *revision {
                status.last_synced_revision = revision.clone();
                changed = true;
            }
            status.last_sync_time = Some(now.to_string());
            changed = true;
            changed |= status.set_condition(
                ConditionType::Synced,
                ConditionStatus::True,
                "Synced",
                &format!("Synced revision {revision}: {applied} applied, {unchanged} unchanged"),
                now,
            );
            changed |= status.set_condition(
                ConditionType::Error,
                ConditionStatus::False,
                "ReconciliationSucceeded",
                "",
                now,
            );
        }
        SyncOutcome::PartiallyFailed { revision, failures } => {
            let message = format!(
                "{} objects failed at revision {revision}: {}",
                failures.len(),
                format_failures(failures)
            );
            changed |= status.set_condition(
                ConditionType::Synced,
                ConditionStatus::False,
                "PartiallyFailed",
                &message,
                now,
            );
            changed |= status.set_condition(
                ConditionType::Error,
                ConditionStatus::True,
                "ApplyFailed",
                &message,
                now,
            );
        }
        SyncOutcome::Failed(error) => {
            let message = error.to_string();
            let pins_sync = matches!(
                error,
                ReconcilerError::Timeout(_)
                    | ReconcilerError::PathNotFound { .. }
                    | ReconcilerError::ManifestInvalid { .. }
                    | ReconcilerError::ValidationFailed { .. }
            );
            if pins_sync {
                changed |= status.set_condition(
                    ConditionType::Synced,
                    ConditionStatus::False,
                    error.reason(),
                    &message,
                    now,
                );
            }
            changed |= status.set_condition(
                ConditionType::Error,
                ConditionStatus::True,
                error.reason(),
                &message,
                now,
            );
        }
    }
    changed |= refresh_ready(status, now);
    changed
}

/// Fold a drift outcome into `status`; returns whether anything changed
pub fn apply_drift_outcome(status: &mut ConfigSyncStatus, outcome: &DriftOutcome, now: &str) -> bool {
    let mut changed = match outcome {
        DriftOutcome::Skipped => false,
        DriftOutcome::Clean => status.set_condition(
            ConditionType::Drifted,
            ConditionStatus::False,
            "NoDrift",
            "",
            now,
        ),
        DriftOutcome::Remediated { drifted } => status.set_condition(
            ConditionType::Drifted,
            ConditionStatus::False,
            "Remediated",
            &format!("Restored {} objects: {}", drifted.len(), format_drift(drifted)),
            now,
        ),
        DriftOutcome::AwaitingApproval { drifted } => status.set_condition(
            ConditionType::Drifted,
            ConditionStatus::True,
            "AwaitingApproval",
            &format!(
                "{} objects drifted, remediation requires autoApprove: {}",
                drifted.len(),
                format_drift(drifted)
            ),
            now,
        ),
        DriftOutcome::RemediationFailed { drifted, failures } => status.set_condition(
            ConditionType::Drifted,
            ConditionStatus::True,
            "RemediationFailed",
            &format!(
                "{} objects drifted, {} could not be restored: {}",
                drifted.len(),
                failures.len(),
                format_failures(failures)
            ),
            now,
        ),
        DriftOutcome::Failed(error) => status.set_condition(
            ConditionType::Error,
            ConditionStatus::True,
            error.reason(),
            &error.to_string(),
            now,
        ),
    };
    changed |= refresh_ready(status, now);
    changed
}

/// Recompute Ready from the other conditions
fn refresh_ready(status: &mut ConfigSyncStatus, now: &str) -> bool {
    let (ready, reason, message) = if status.is_true(ConditionType::Error) {
        let c = status.condition(ConditionType::Error);
        (
            false,
            c.map(|c| c.reason.clone()).unwrap_or_default(),
            c.map(|c| c.message.clone()).unwrap_or_default(),
        )
    } else if status.is_true(ConditionType::Drifted) {
        let c = status.condition(ConditionType::Drifted);
        (
            false,
            c.map(|c| c.reason.clone()).unwrap_or_default(),
            c.map(|c| c.message.clone()).unwrap_or_default(),
        )
    } else if status.is_true(ConditionType::Synced) {
        (
            true,
            "ReconciliationSucceeded".to_string(),
            format!("Revision {} applied", status.last_synced_revision),
        )
    } else {
        (false, "NotSynced".to_string(), String::new())
    };

    status.set_condition(
        ConditionType::Ready,
        ConditionStatus::from(ready),
        &reason,
        &message,
        now,
    )
}

fn format_failures(failures: &[ObjectFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.key, f.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

fn format_drift(drifted: &[Drift]) -> String {
    drifted
        .iter()
        .map(|d| {
            if d.is_missing() {
                format!("{} (missing)", d.key)
            } else {
                d.key.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}
