//! # Apply Engine
//!
//! Validates a candidate object set and applies it object by object.
//!
//! Validation is all-or-nothing: a single invalid object aborts the cycle
//! before the first apply. Applying is fault-isolated: every object is
//! attempted exactly once, in order, and one failure never stops the rest.

use crate::adapter::{ApplyOutcome, ClusterAdapter, Validation, Validator};
use crate::controller::reconciler::types::{
    ApplyResult, ManagedObject, ObjectDiagnostics, ObjectResult, ReconcilerError,
};
use crate::observability::metrics;
use tracing::{debug, info, warn};

/// Validate every object before anything is applied
pub async fn validate(
    validator: &dyn Validator,
    revision: &str,
    objects: &[ManagedObject],
) -> Result<(), ReconcilerError> {
    let verdicts = validator
        .validate_batch(objects)
        .await
        .map_err(|e| ReconcilerError::ValidatorUnavailable(format!("{e:#}")))?;

    if verdicts.len() != objects.len() {
        return Err(ReconcilerError::ValidatorUnavailable(format!(
            "validator returned {} verdicts for {} objects",
            verdicts.len(),
            objects.len()
        )));
    }

    let failures: Vec<ObjectDiagnostics> = objects
        .iter()
        .zip(verdicts)
        .filter_map(|(object, verdict)| match verdict {
            Validation::Valid => None,
            Validation::Invalid(diagnostics) => Some(ObjectDiagnostics {
                key: object.key.clone(),
                diagnostics,
            }),
        })
        .collect();

    if failures.is_empty() {
        debug!("All {} objects passed validation", objects.len());
        Ok(())
    } else {
        for failure in &failures {
            warn!("Validation failed for {}", failure);
        }
        metrics::increment_validation_failures();
        Err(ReconcilerError::ValidationFailed {
            revision: revision.to_string(),
            failures,
        })
    }
}

/// Apply objects in order, recording one result per object
///
/// Successful objects get `last_applied_hash` set to their desired hash.
pub async fn apply(cluster: &dyn ClusterAdapter, objects: &mut [ManagedObject]) -> Vec<ObjectResult> {
    let mut results = Vec::with_capacity(objects.len());
    for object in objects.iter_mut() {
        let result = apply_one(cluster, object).await;
        metrics::increment_objects_applied(result.as_str());
        results.push(ObjectResult {
            key: object.key.clone(),
            result,
        });
    }
    results
}

/// Apply a single object
pub async fn apply_one(cluster: &dyn ClusterAdapter, object: &mut ManagedObject) -> ApplyResult {
    match cluster.apply_object(object).await {
        Ok(outcome) => {
            object.last_applied_hash = Some(object.desired_hash.clone());
            object.last_observed_hash = Some(object.desired_hash.clone());
            match outcome {
                ApplyOutcome::Applied => {
                    info!("Applied {}", object.key);
                    ApplyResult::Applied
                }
                ApplyOutcome::Unchanged => {
                    debug!("{} unchanged", object.key);
                    ApplyResult::Unchanged
                }
            }
        }
        Err(e) => {
            warn!("Failed to apply {}: {}", object.key, e);
            ApplyResult::Failed(e.to_string())
        }
    }
}
