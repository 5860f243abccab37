//! # CRD Generator
//!
//! Prints the `ConfigSync` CustomResourceDefinition as YAML.
//!
//! ## Usage
//!
//! ```bash
//! # Generate CRD YAML
//! cargo run --bin crdgen > config/crd/configsync.yaml
//!
//! # Generate and apply directly
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use configsync_controller::crd::ConfigSync;
use kube::core::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crd = serde_yaml::to_string(&ConfigSync::crd())?;
    print!("{crd}");
    Ok(())
}
