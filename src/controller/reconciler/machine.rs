//! # Target State Machine
//!
//! Drives one target through a sync cycle or a drift scan.
//!
//! ```text
//! sync:  Idle -> Fetching -> (Unchanged -> Idle)
//!                         -> Loading -> Validating -> Applying -> Idle
//! drift: Idle -> DriftScanning -> (Clean | Remediating | AwaitingApproval) -> Idle
//! ```
//!
//! The machine is owned by the target's task, so phases of one target never
//! overlap. Every finished cycle publishes exactly once through the status
//! reporter. A cycle dropped mid-way (cancellation, timeout) publishes nothing.

use crate::controller::reconciler::apply;
use crate::controller::reconciler::change::{self, Change};
use crate::controller::reconciler::drift;
use crate::controller::reconciler::manifest;
use crate::controller::reconciler::types::{
    ApplyResult, DriftOutcome, ManagedObject, ObjectFailure, ObjectKey, Phase, Reconciler, ReconcilerError,
    ReconciliationAttempt, SyncOutcome, Target,
};
use crate::crd::ConfigSyncStatus;
use crate::observability::metrics;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Per-target reconciliation state
pub struct TargetMachine {
    ctx: Reconciler,
    phase: Phase,
    /// Objects last applied successfully, keyed by identity
    applied: BTreeMap<ObjectKey, ManagedObject>,
    /// Last revision rejected for its content, with the error it produced
    rejected: Option<(String, ReconcilerError)>,
    /// Ignore the tracked revision on the next sync
    force_reload: bool,
}

impl std::fmt::Debug for TargetMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetMachine")
            .field("phase", &self.phase)
            .field("applied", &self.applied.len())
            .field("rejected", &self.rejected.as_ref().map(|(revision, _)| revision))
            .field("force_reload", &self.force_reload)
            .finish_non_exhaustive()
    }
}

impl TargetMachine {
    pub fn new(ctx: Reconciler) -> Self {
        Self {
            ctx,
            phase: Phase::Idle,
            applied: BTreeMap::new(),
            rejected: None,
            force_reload: false,
        }
    }

    /// Forget cached state after the target's source location changed
    ///
    /// The next sync loads and applies the current revision even if the
    /// tracked revision did not move.
    pub fn invalidate(&mut self) {
        self.applied.clear();
        self.rejected = None;
        self.force_reload = true;
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Objects currently believed to be applied
    pub fn applied(&self) -> impl Iterator<Item = &ManagedObject> {
        self.applied.values()
    }

    /// Return to Idle after a cycle was dropped mid-way
    pub fn abandon_cycle(&mut self) {
        if self.phase != Phase::Idle {
            debug!("Abandoned cycle left in {}, back to idle", self.phase.as_str());
            self.phase = Phase::Idle;
        }
    }

    fn enter(&mut self, phase: Phase, target: &Target) {
        debug!("{}: {} -> {}", target.key, self.phase.as_str(), phase.as_str());
        self.phase = phase;
    }

    /// Run one sync cycle
    pub async fn sync(&mut self, target: &Target) -> SyncOutcome {
        self.abandon_cycle();
        self.enter(Phase::Fetching, target);

        let status = match self.ctx.reporter.load(&target.key).await {
            Ok(status) => status,
            Err(e) => {
                warn!("Failed to load sync state for {}: {}", target.key, e);
                self.enter(Phase::Idle, target);
                return SyncOutcome::Failed(e);
            }
        };

        let outcome = self.run_sync(target, &status).await;

        let outcome = match self
            .ctx
            .reporter
            .publish_sync(target, &status, &outcome)
            .await
        {
            Ok(_) => outcome,
            Err(e) => {
                warn!("Failed to publish sync outcome for {}: {}", target.key, e);
                SyncOutcome::Failed(e)
            }
        };

        self.enter(Phase::Idle, target);
        outcome
    }

    async fn run_sync(&mut self, target: &Target, status: &ConfigSyncStatus) -> SyncOutcome {
        // A revision synced from another repository, reference or path says
        // nothing about the current one
        let same_source = status.last_synced_source == target.source_fingerprint();
        let tracked = if self.force_reload || !same_source {
            ""
        } else {
            status.last_synced_revision.as_str()
        };
        let revision = match change::detect(self.ctx.source.as_ref(), target, tracked).await {
            Ok(Change::Unchanged { revision }) => {
                debug!("{} unchanged at {}", target.key, revision);
                return SyncOutcome::Unchanged { revision };
            }
            Ok(Change::Changed { revision }) => revision,
            Err(e) => return SyncOutcome::Failed(e),
        };

        if let Some((rejected, error)) = &self.rejected {
            if *rejected == revision {
                debug!(
                    "{} still at rejected revision {}, waiting for the source to move",
                    target.key, revision
                );
                return SyncOutcome::Failed(error.clone());
            }
        }

        info!(
            "Syncing {} to revision {} (was {})",
            target.key,
            revision,
            if tracked.is_empty() { "<none>" } else { tracked }
        );

        self.enter(Phase::Loading, target);
        let mut objects = match self.load_objects(target, &revision).await {
            Ok(objects) => objects,
            Err(e) => return self.reject(e),
        };

        self.enter(Phase::Validating, target);
        if let Err(e) = apply::validate(self.ctx.validator.as_ref(), &revision, &objects).await {
            return self.reject(e);
        }
        self.rejected = None;

        self.enter(Phase::Applying, target);
        let results = apply::apply(self.ctx.cluster.as_ref(), &mut objects).await;
        let mut attempt = ReconciliationAttempt::new(revision, objects);
        attempt.results = results;
        let outcome = attempt.outcome();
        if matches!(outcome, SyncOutcome::Succeeded { .. }) {
            self.force_reload = false;
        }
        self.remember_applied(&attempt, &outcome);
        outcome
    }

    async fn load_objects(
        &self,
        target: &Target,
        revision: &str,
    ) -> Result<Vec<ManagedObject>, ReconcilerError> {
        let mut objects = manifest::load(self.ctx.source.as_ref(), target, revision).await?;
        manifest::resolve_scopes(self.ctx.cluster.as_ref(), revision, &mut objects).await?;
        Ok(objects)
    }

    /// Pin content errors to their revision so it is not reloaded every tick
    fn reject(&mut self, error: ReconcilerError) -> SyncOutcome {
        if let Some(revision) = error.rejected_revision() {
            warn!("Rejected revision {}: {}", revision, error);
            self.rejected = Some((revision.to_string(), error.clone()));
        }
        SyncOutcome::Failed(error)
    }

    fn remember_applied(&mut self, attempt: &ReconciliationAttempt, outcome: &SyncOutcome) {
        let succeeded: Vec<&ManagedObject> = attempt
            .objects
            .iter()
            .filter(|o| o.last_applied_hash.is_some())
            .collect();

        match outcome {
            SyncOutcome::Succeeded { .. } => {
                self.applied = succeeded
                    .into_iter()
                    .map(|o| (o.key.clone(), o.clone()))
                    .collect();
            }
            SyncOutcome::PartiallyFailed { .. } => {
                for object in succeeded {
                    self.applied.insert(object.key.clone(), object.clone());
                }
            }
            _ => {}
        }
    }

    /// Run one drift scan
    pub async fn scan_drift(&mut self, target: &Target) -> DriftOutcome {
        if !target.drift_detection {
            return DriftOutcome::Skipped;
        }
        self.abandon_cycle();
        self.enter(Phase::DriftScanning, target);

        let status = match self.ctx.reporter.load(&target.key).await {
            Ok(status) => status,
            Err(e) => {
                warn!("Failed to load sync state for {}: {}", target.key, e);
                self.enter(Phase::Idle, target);
                return DriftOutcome::Failed(e);
            }
        };

        let outcome = self.run_drift(target, &status).await;

        let outcome = match self
            .ctx
            .reporter
            .publish_drift(target, &status, &outcome)
            .await
        {
            Ok(_) => outcome,
            Err(e) => {
                warn!("Failed to publish drift outcome for {}: {}", target.key, e);
                DriftOutcome::Failed(e)
            }
        };

        self.enter(Phase::Idle, target);
        outcome
    }

    async fn run_drift(&mut self, target: &Target, status: &ConfigSyncStatus) -> DriftOutcome {
        if self.applied.is_empty() {
            if status.last_synced_revision.is_empty() {
                debug!("{} has nothing applied yet, skipping drift scan", target.key);
                return DriftOutcome::Skipped;
            }
            if status.last_synced_source != target.source_fingerprint() {
                debug!(
                    "{} source changed since revision {}, skipping drift scan until it syncs",
                    target.key, status.last_synced_revision
                );
                return DriftOutcome::Skipped;
            }
            if let Err(e) = self.hydrate(target, &status.last_synced_revision).await {
                return DriftOutcome::Failed(e);
            }
        }

        let mut objects: Vec<ManagedObject> = self.applied.values().cloned().collect();
        let drifted = drift::detect_drift(self.ctx.cluster.as_ref(), &mut objects).await;
        for object in objects {
            self.applied.insert(object.key.clone(), object);
        }

        if drifted.is_empty() {
            debug!("No drift for {}", target.key);
            return DriftOutcome::Clean;
        }

        info!("Detected drift on {} objects of {}", drifted.len(), target.key);
        metrics::increment_drift_detected(drifted.len() as u64);

        if !target.auto_approve {
            return DriftOutcome::AwaitingApproval { drifted };
        }

        self.enter(Phase::Remediating, target);
        let mut failures = Vec::new();
        for drift in &drifted {
            let Some(object) = self.applied.get_mut(&drift.key) else {
                continue;
            };
            let result = apply::apply_one(self.ctx.cluster.as_ref(), object).await;
            metrics::increment_remediations(result.as_str());
            if let ApplyResult::Failed(reason) = result {
                failures.push(ObjectFailure {
                    key: drift.key.clone(),
                    reason,
                });
            }
        }

        if failures.is_empty() {
            DriftOutcome::Remediated { drifted }
        } else {
            DriftOutcome::RemediationFailed { drifted, failures }
        }
    }

    /// Rebuild the last-applied set from the tracked revision
    ///
    /// Used after a restart, when only the revision survived in the status.
    async fn hydrate(&mut self, target: &Target, revision: &str) -> Result<(), ReconcilerError> {
        debug!("Rebuilding applied objects of {} from {}", target.key, revision);
        let objects = self.load_objects(target, revision).await?;
        self.applied = objects
            .into_iter()
            .map(|mut o| {
                o.last_applied_hash = Some(o.desired_hash.clone());
                (o.key.clone(), o)
            })
            .collect();
        Ok(())
    }
}
