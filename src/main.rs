//! # ConfigSync Controller
//!
//! A Kubernetes controller that keeps cluster objects in sync with manifests
//! stored in Git.
//!
//! ## Overview
//!
//! For every `ConfigSync` resource the controller:
//!
//! 1. **Watches the source** - Resolves the configured branch to a commit on every sync interval
//! 2. **Loads manifests** - Parses the YAML/JSON files under the configured path at that commit
//! 3. **Validates** - Rejects the whole revision if any manifest is invalid
//! 4. **Applies** - Server-side applies each object, skipping objects whose content hash is unchanged
//! 5. **Detects drift** - Compares live objects against the last applied content and remediates when `autoApprove` is set
//!
//! ## Features
//!
//! - **Bounded concurrency**: A global limit on simultaneous reconciliations
//! - **Per-target serialization**: Cycles for one target never overlap
//! - **Exponential backoff**: Retryable failures back off up to a cap
//! - **Prometheus metrics**: `/metrics` on the metrics port
//! - **Health probes**: `/healthz` and `/readyz`

use anyhow::Result;
use configsync_controller::runtime::{initialization::initialize, watch_loop::run_watch_loop};

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;

    run_watch_loop(init.configs, init.scheduler, init.server_state, init.config).await
}
