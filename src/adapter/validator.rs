//! # Validators
//!
//! - `StructuralValidator` checks the fields every Kubernetes object needs,
//!   in-process and without a cluster.
//! - `KubectlValidator` pipes each manifest through
//!   `kubectl apply --dry-run=client`.

use super::{Validation, Validator};
use crate::controller::reconciler::types::ManagedObject;
use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::process::Stdio;
use std::sync::LazyLock;
use tokio::io::AsyncWriteExt;

/// DNS-1123 subdomain (object names)
static DNS_SUBDOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("DNS subdomain regex should compile")
});

/// DNS-1123 label (namespaces)
static DNS_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("DNS label regex should compile")
});

static API_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-z0-9]([-a-z0-9.]*[a-z0-9])?/)?v[0-9]+((alpha|beta)[0-9]+)?$")
        .expect("apiVersion regex should compile")
});

static KIND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][A-Za-z0-9]*$").expect("kind regex should compile"));

/// In-process structural checks
#[derive(Debug, Clone, Default)]
pub struct StructuralValidator;

impl StructuralValidator {
    pub fn new() -> Self {
        Self
    }

    /// All diagnostics for one manifest, empty when it is valid
    pub fn diagnostics(manifest: &Value) -> Vec<String> {
        let mut diagnostics = Vec::new();

        match manifest.get("apiVersion").and_then(Value::as_str) {
            Some(api_version) if API_VERSION.is_match(api_version) => {}
            Some(api_version) => diagnostics.push(format!("apiVersion '{api_version}' is malformed")),
            None => diagnostics.push("apiVersion is required".to_string()),
        }

        match manifest.get("kind").and_then(Value::as_str) {
            Some(kind) if KIND.is_match(kind) => {}
            Some(kind) => diagnostics.push(format!("kind '{kind}' must be CamelCase")),
            None => diagnostics.push("kind is required".to_string()),
        }

        match manifest.pointer("/metadata/name").and_then(Value::as_str) {
            Some(name) if name.len() > 253 => {
                diagnostics.push("metadata.name must be at most 253 characters".to_string());
            }
            Some(name) if DNS_SUBDOMAIN.is_match(name) => {}
            Some(name) => diagnostics.push(format!(
                "metadata.name '{name}' must be a lowercase RFC 1123 subdomain"
            )),
            None => diagnostics.push("metadata.name is required".to_string()),
        }

        if let Some(namespace) = manifest.pointer("/metadata/namespace") {
            match namespace.as_str() {
                Some(ns) if ns.len() <= 63 && DNS_LABEL.is_match(ns) => {}
                Some(ns) => diagnostics.push(format!(
                    "metadata.namespace '{ns}' must be a lowercase RFC 1123 label"
                )),
                None => diagnostics.push("metadata.namespace must be a string".to_string()),
            }
        }

        for field in ["labels", "annotations"] {
            if let Some(map) = manifest.pointer(&format!("/metadata/{field}")) {
                let all_strings = map
                    .as_object()
                    .is_some_and(|m| m.values().all(Value::is_string));
                if !all_strings {
                    diagnostics.push(format!("metadata.{field} must map strings to strings"));
                }
            }
        }

        diagnostics
    }
}

#[async_trait]
impl Validator for StructuralValidator {
    async fn validate(&self, object: &ManagedObject) -> Result<Validation> {
        let diagnostics = Self::diagnostics(&object.manifest);
        if diagnostics.is_empty() {
            Ok(Validation::Valid)
        } else {
            Ok(Validation::Invalid(diagnostics))
        }
    }
}

/// Validates with `kubectl apply --dry-run=client`
#[derive(Debug, Clone)]
pub struct KubectlValidator {
    kubectl_binary: String,
}

impl Default for KubectlValidator {
    fn default() -> Self {
        Self::new("kubectl")
    }
}

impl KubectlValidator {
    pub fn new(kubectl_binary: impl Into<String>) -> Self {
        Self {
            kubectl_binary: kubectl_binary.into(),
        }
    }
}

#[async_trait]
impl Validator for KubectlValidator {
    async fn validate(&self, object: &ManagedObject) -> Result<Validation> {
        let yaml = serde_yaml::to_string(&object.manifest)
            .with_context(|| format!("Failed to render {} as YAML", object.key))?;

        let mut child = tokio::process::Command::new(&self.kubectl_binary)
            .args(["apply", "--dry-run=client", "--validate=true", "-o", "name", "-f", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to execute {}", self.kubectl_binary))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(yaml.as_bytes())
                .await
                .context("Failed to write manifest to kubectl")?;
        }

        let output = child
            .wait_with_output()
            .await
            .context("Failed to wait for kubectl")?;

        if output.status.success() {
            return Ok(Validation::Valid);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let diagnostics: Vec<String> = stderr
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(ToString::to_string)
            .collect();

        // kubectl exits non-zero with an empty stderr when it could not run at all
        if diagnostics.is_empty() {
            anyhow::bail!(
                "{} exited with {} without diagnostics",
                self.kubectl_binary,
                output.status
            );
        }
        Ok(Validation::Invalid(diagnostics))
    }
}
