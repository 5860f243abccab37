//! # Watch Loop
//!
//! Watches ConfigSync resources and keeps the scheduler's target set in step
//! with the cluster. Reconciliation itself runs in the scheduler's per-target
//! tasks; this loop only starts, updates and stops them.

use crate::config::ControllerConfig;
use crate::controller::reconciler::{Target, TargetKey};
use crate::controller::scheduler::Scheduler;
use crate::controller::server::ServerState;
use crate::crd::ConfigSync;
use crate::observability::metrics;
use crate::runtime::error_policy::handle_watch_stream_error;
use futures::StreamExt;
use kube::api::Api;
use kube_runtime::watcher::{self, watcher, Event};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Run the controller watch loop until a shutdown signal arrives
///
/// The watch is restarted after stream errors. On shutdown the server is
/// marked not ready and every target task is cancelled and awaited.
pub async fn run_watch_loop(
    configs: Api<ConfigSync>,
    scheduler: Arc<Scheduler>,
    server_state: Arc<ServerState>,
    config: ControllerConfig,
) -> Result<(), anyhow::Error> {
    info!("Starting controller watch loop...");

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    let shutdown_server_state = server_state.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
        shutdown_server_state.set_ready(false);
        shutdown_signal.cancel();
    });

    let backoff_start_ms = config.backoff_start_secs.saturating_mul(1000).max(1);
    let max_backoff_ms = config.backoff_max_secs.saturating_mul(1000).max(backoff_start_ms);
    let backoff_ms = AtomicU64::new(backoff_start_ms);

    'watch: while !shutdown.is_cancelled() {
        let mut stream = watcher(configs.clone(), watcher::Config::default()).boxed();
        let mut initial_listing: Option<HashSet<TargetKey>> = None;

        loop {
            let next = tokio::select! {
                () = shutdown.cancelled() => break 'watch,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(event)) => {
                    backoff_ms.store(backoff_start_ms, Ordering::Relaxed);
                    if apply_event(&scheduler, &config, event, &mut initial_listing) {
                        server_state.set_ready(true);
                    }
                }
                Some(Err(e)) => {
                    let error_string = format!("{e:?}");
                    if handle_watch_stream_error(
                        &error_string,
                        &backoff_ms,
                        max_backoff_ms,
                        config.watch_restart_delay(),
                    )
                    .await
                    {
                        break;
                    }
                }
                None => {
                    warn!(
                        "Watch stream ended, restarting in {:?}",
                        config.watch_restart_delay()
                    );
                    metrics::increment_watch_restarts("ended");
                    tokio::select! {
                        () = shutdown.cancelled() => break 'watch,
                        () = tokio::time::sleep(config.watch_restart_delay()) => {}
                    }
                    break;
                }
            }
        }

        info!("Restarting watch stream...");
    }

    info!("Shutdown requested, exiting watch loop");
    server_state.set_ready(false);
    scheduler.shutdown().await;
    info!("All target tasks stopped");
    Ok(())
}

/// Apply one watch event to the scheduler
///
/// `initial_listing` collects the keys seen during a (re)list so targets whose
/// resources disappeared while the watch was down can be stopped. Returns
/// `true` once a listing completes.
pub fn apply_event(
    scheduler: &Scheduler,
    config: &ControllerConfig,
    event: Event<ConfigSync>,
    initial_listing: &mut Option<HashSet<TargetKey>>,
) -> bool {
    match event {
        Event::Init => {
            debug!("Listing ConfigSync resources");
            *initial_listing = Some(HashSet::new());
            false
        }
        Event::InitApply(resource) => {
            let key = key_of(&resource);
            upsert_resource(scheduler, config, &resource);
            if let Some(seen) = initial_listing.as_mut() {
                seen.insert(key);
            }
            false
        }
        Event::InitDone => {
            let seen = initial_listing.take().unwrap_or_default();
            for key in scheduler.targets() {
                if !seen.contains(&key) {
                    info!("ConfigSync {} no longer exists, stopping target", key);
                    scheduler.remove(&key);
                }
            }
            info!("Watching {} ConfigSync resources", seen.len());
            true
        }
        Event::Apply(resource) => {
            upsert_resource(scheduler, config, &resource);
            false
        }
        Event::Delete(resource) => {
            let key = key_of(&resource);
            if scheduler.remove(&key) {
                info!("ConfigSync {} deleted, target stopped", key);
            }
            false
        }
    }
}

fn upsert_resource(scheduler: &Scheduler, config: &ControllerConfig, resource: &ConfigSync) {
    if resource.spec.suspend {
        let key = key_of(resource);
        if scheduler.remove(&key) {
            info!("ConfigSync {} suspended, target stopped", key);
        } else {
            debug!("ConfigSync {} is suspended, skipping", key);
        }
        return;
    }
    scheduler.upsert(Target::from_resource(resource, config));
}

fn key_of(resource: &ConfigSync) -> TargetKey {
    TargetKey::new(
        resource.metadata.namespace.as_deref().unwrap_or("default"),
        resource.metadata.name.as_deref().unwrap_or("unknown"),
    )
}
