//! Watch events drive the scheduler's target set

mod common;

use common::{config_map, Harness};
use configsync_controller::config::ControllerConfig;
use configsync_controller::controller::reconciler::TargetKey;
use configsync_controller::controller::scheduler::{Scheduler, SchedulerSettings};
use configsync_controller::crd::ConfigSync;
use configsync_controller::runtime::watch_loop::apply_event;
use kube_runtime::watcher::Event;
use serde_json::json;
use std::collections::HashSet;

fn resource(name: &str, suspend: bool) -> ConfigSync {
    serde_json::from_value(json!({
        "apiVersion": "configsync.io/v1alpha1",
        "kind": "ConfigSync",
        "metadata": { "name": name, "namespace": "team-a" },
        "spec": {
            "gitRepository": "https://example.com/config.git",
            "path": "envs/team-a",
            "environment": "development",
            "syncInterval": "10m",
            "suspend": suspend
        }
    }))
    .expect("valid ConfigSync")
}

fn keys(names: &[&str]) -> Vec<TargetKey> {
    names.iter().map(|n| TargetKey::new("team-a", *n)).collect()
}

#[tokio::test]
async fn test_listing_starts_targets_and_prunes_stale_ones() {
    let h = Harness::new();
    h.source
        .commit("r1", &[("envs/team-a/cm.yaml", config_map("cm", "1"))]);
    let config = ControllerConfig::default();
    let scheduler = Scheduler::new(h.ctx.clone(), SchedulerSettings::from(&config));
    let mut listing: Option<HashSet<TargetKey>> = None;

    // Left over from a previous watch, gone from the cluster since
    assert!(!apply_event(
        &scheduler,
        &config,
        Event::Apply(resource("stale", false)),
        &mut listing
    ));

    assert!(!apply_event(&scheduler, &config, Event::Init, &mut listing));
    apply_event(
        &scheduler,
        &config,
        Event::InitApply(resource("alpha", false)),
        &mut listing,
    );
    apply_event(
        &scheduler,
        &config,
        Event::InitApply(resource("paused", true)),
        &mut listing,
    );
    assert!(apply_event(&scheduler, &config, Event::InitDone, &mut listing));

    assert_eq!(scheduler.targets(), keys(&["alpha"]));
    assert!(listing.is_none());

    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_apply_suspend_and_delete_events() {
    let h = Harness::new();
    h.source
        .commit("r1", &[("envs/team-a/cm.yaml", config_map("cm", "1"))]);
    let config = ControllerConfig::default();
    let scheduler = Scheduler::new(h.ctx.clone(), SchedulerSettings::from(&config));
    let mut listing = None;

    apply_event(
        &scheduler,
        &config,
        Event::Apply(resource("alpha", false)),
        &mut listing,
    );
    apply_event(
        &scheduler,
        &config,
        Event::Apply(resource("beta", false)),
        &mut listing,
    );
    assert_eq!(scheduler.targets(), keys(&["alpha", "beta"]));

    apply_event(
        &scheduler,
        &config,
        Event::Apply(resource("beta", true)),
        &mut listing,
    );
    assert_eq!(scheduler.targets(), keys(&["alpha"]));

    apply_event(
        &scheduler,
        &config,
        Event::Delete(resource("alpha", false)),
        &mut listing,
    );
    assert!(scheduler.targets().is_empty());

    scheduler.shutdown().await;
}
