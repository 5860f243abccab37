//! # Initialization
//!
//! Controller initialization logic including rustls setup, tracing, metrics,
//! server startup, Kubernetes client setup and adapter wiring.

use crate::adapter::cluster::KubeClusterAdapter;
use crate::adapter::git::GitSourceAdapter;
use crate::adapter::validator::{KubectlValidator, StructuralValidator};
use crate::adapter::Validator;
use crate::config::{ControllerConfig, ValidatorKind};
use crate::controller::reconciler::{KubeStatusStore, Reconciler, StatusReporter};
use crate::controller::scheduler::{Scheduler, SchedulerSettings};
use crate::controller::server::{start_server, ServerState};
use crate::crd::ConfigSync;
use crate::observability;
use anyhow::{anyhow, Context, Result};
use kube::{api::Api, Client};
use std::sync::Arc;
use tracing::{error, info};

/// Everything the watch loop needs to run the controller
pub struct InitializationResult {
    /// API for ConfigSync resources in all namespaces
    pub configs: Api<ConfigSync>,
    /// Owner of the per-target tasks
    pub scheduler: Arc<Scheduler>,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
    /// Controller configuration read at startup
    pub config: ControllerConfig,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field(
                "server_ready",
                &self
                    .server_state
                    .is_ready
                    .load(std::sync::atomic::Ordering::Relaxed),
            )
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Initialize the controller runtime
///
/// This function handles:
/// - rustls crypto provider setup
/// - Tracing subscriber setup
/// - Metrics registration
/// - HTTP server startup
/// - Kubernetes client creation
/// - Adapter and scheduler setup
pub async fn initialize() -> Result<InitializationResult> {
    // Must run before any client is built; rustls 0.23 has no implicit provider
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        return Err(anyhow!("Failed to install rustls crypto provider"));
    }

    let config = ControllerConfig::from_env();
    observability::logging::init_tracing(&config.log_format)?;

    info!("Starting ConfigSync controller");
    info!(
        "Build info: datetime={}, git_hash={}",
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );
    info!("Controller configuration: {:?}", config);

    observability::metrics::register_metrics()?;

    // Not ready until the watch has listed every resource
    let server_state = Arc::new(ServerState::default());

    let server_state_clone = server_state.clone();
    let server_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let configs: Api<ConfigSync> = Api::all(client.clone());

    let reconciler = build_reconciler(client, &config);
    let scheduler = Arc::new(Scheduler::new(reconciler, SchedulerSettings::from(&config)));

    info!("Controller initialized, starting watch loop...");

    Ok(InitializationResult {
        configs,
        scheduler,
        server_state,
        config,
    })
}

/// Wire the production adapters into a reconciler context
pub fn build_reconciler(client: Client, config: &ControllerConfig) -> Reconciler {
    let validator: Arc<dyn Validator> = match config.validator {
        ValidatorKind::Structural => Arc::new(StructuralValidator::new()),
        ValidatorKind::Kubectl => Arc::new(KubectlValidator::default()),
    };
    info!(
        "Using {:?} validator, source cache at {}",
        config.validator,
        config.source_cache_dir.display()
    );

    Reconciler {
        source: Arc::new(GitSourceAdapter::new(config.source_cache_dir.clone())),
        cluster: Arc::new(KubeClusterAdapter::new(client.clone())),
        validator,
        reporter: StatusReporter::new(Arc::new(KubeStatusStore::new(client))),
    }
}
