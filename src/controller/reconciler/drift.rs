//! # Drift Detector
//!
//! Compares live objects against the manifests last applied for a target.
//!
//! The live object is projected onto the fields the desired manifest declares
//! before hashing, so fields populated by the API server (status, uid,
//! resourceVersion, defaulted values) never count as drift.

use crate::adapter::ClusterAdapter;
use crate::controller::reconciler::manifest::content_hash;
use crate::controller::reconciler::types::{Drift, ManagedObject};
use serde_json::Value;
use tracing::{debug, warn};

/// Keep only the parts of `live` that `desired` declares
///
/// Arrays of the same length are projected element by element; arrays whose
/// length differs are kept whole so added or removed items show up as drift.
pub fn project(live: &Value, desired: &Value) -> Value {
    match (live, desired) {
        (Value::Object(live_map), Value::Object(desired_map)) => {
            let mut projected = serde_json::Map::new();
            for (key, desired_value) in desired_map {
                if let Some(live_value) = live_map.get(key) {
                    projected.insert(key.clone(), project(live_value, desired_value));
                }
            }
            Value::Object(projected)
        }
        (Value::Array(live_items), Value::Array(desired_items))
            if live_items.len() == desired_items.len() =>
        {
            Value::Array(
                live_items
                    .iter()
                    .zip(desired_items)
                    .map(|(l, d)| project(l, d))
                    .collect(),
            )
        }
        _ => live.clone(),
    }
}

/// Hash of the live object as seen through the desired manifest
pub fn observed_hash(live: &Value, desired: &Value) -> String {
    content_hash(&project(live, desired))
}

/// Scan every last-applied object and report the ones that drifted
///
/// Objects whose lookup fails are logged and left out of the result: they are
/// neither drifted nor clean. Each object's `last_observed_hash` is refreshed
/// with what was seen.
pub async fn detect_drift(
    cluster: &dyn ClusterAdapter,
    applied: &mut [ManagedObject],
) -> Vec<Drift> {
    let mut drifted = Vec::new();
    for object in applied.iter_mut() {
        let Some(applied_hash) = object.last_applied_hash.clone() else {
            continue;
        };

        match cluster.get_object(object).await {
            Ok(Some(live)) => {
                let observed = observed_hash(&live, &object.manifest);
                object.last_observed_hash = Some(observed.clone());
                if observed != applied_hash {
                    debug!("{} drifted from its last applied manifest", object.key);
                    drifted.push(Drift {
                        key: object.key.clone(),
                        observed_hash: Some(observed),
                    });
                }
            }
            Ok(None) => {
                debug!("{} is missing from the cluster", object.key);
                object.last_observed_hash = None;
                drifted.push(Drift {
                    key: object.key.clone(),
                    observed_hash: None,
                });
            }
            Err(e) => {
                warn!("Skipping drift check for {}: {}", object.key, e);
            }
        }
    }
    drifted
}
