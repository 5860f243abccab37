//! # Git Source Adapter
//!
//! Resolves revisions and reads manifests with the `git` command line.
//!
//! Each target gets its own bare repository under the cache directory. Only the
//! commits the engine asks for are fetched (`--depth 1`), so the cache stays
//! small even for large repositories. Command-line git is used instead of a
//! library binding to keep OpenSSL out of the build.
//!
//! Kustomizations are rendered from a throwaway checkout of the revision with
//! the `kustomize` binary.

use super::{SourceAdapter, SourceError};
use crate::controller::reconciler::types::Target;
use crate::observability::metrics;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Source adapter backed by the `git` binary
#[derive(Debug, Clone)]
pub struct GitSourceAdapter {
    cache_dir: PathBuf,
    git_binary: String,
    kustomize_binary: String,
}

impl GitSourceAdapter {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            git_binary: "git".to_string(),
            kustomize_binary: "kustomize".to_string(),
        }
    }

    /// Use a specific kustomize executable
    #[must_use]
    pub fn with_kustomize_binary(mut self, kustomize_binary: impl Into<String>) -> Self {
        self.kustomize_binary = kustomize_binary.into();
        self
    }

    /// Use a specific git executable
    #[must_use]
    pub fn with_git_binary(mut self, git_binary: impl Into<String>) -> Self {
        self.git_binary = git_binary.into();
        self
    }

    /// Cache directory for one target
    pub fn repository_dir(&self, target: &Target) -> PathBuf {
        self.cache_dir.join(format!(
            "{}--{}",
            sanitize_path_component(&target.key.namespace),
            sanitize_path_component(&target.key.name)
        ))
    }

    async fn run_git(&self, repo: Option<&Path>, args: &[&str]) -> Result<Vec<u8>, String> {
        let mut cmd = tokio::process::Command::new(&self.git_binary);
        if let Some(repo) = repo {
            cmd.arg("-C").arg(repo);
        }
        cmd.args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true);

        let output = cmd
            .output()
            .await
            .map_err(|e| format!("failed to execute {}: {e}", self.git_binary))?;

        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(format!(
                "git {} failed: {}",
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            ))
        }
    }

    async fn ensure_repository(&self, target: &Target) -> Result<PathBuf, SourceError> {
        let dir = self.repository_dir(target);
        if dir.join("HEAD").exists() {
            return Ok(dir);
        }

        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            SourceError::Unreachable(format!(
                "failed to create cache directory {}: {e}",
                dir.display()
            ))
        })?;
        let dir_str = dir.to_string_lossy().to_string();
        self.run_git(None, &["init", "--bare", "--quiet", &dir_str])
            .await
            .map_err(SourceError::Unreachable)?;
        info!("Initialised source cache for {} at {}", target.key, dir_str);
        Ok(dir)
    }

    async fn has_commit(&self, repo: &Path, revision: &str) -> bool {
        let spec = format!("{revision}^{{commit}}");
        self.run_git(Some(repo), &["cat-file", "-e", &spec])
            .await
            .is_ok()
    }

    /// Make sure `revision` is present locally, fetching it by id if needed
    async fn ensure_revision(&self, target: &Target, revision: &str) -> Result<PathBuf, SourceError> {
        let repo = self.ensure_repository(target).await?;
        if self.has_commit(&repo, revision).await {
            return Ok(repo);
        }

        debug!("Revision {} missing from cache for {}, fetching", revision, target.key);
        self.run_git(
            Some(&repo),
            &["fetch", "--quiet", "--depth", "1", "--no-tags", &target.repository, revision],
        )
        .await
        .map_err(SourceError::Unreachable)?;

        if self.has_commit(&repo, revision).await {
            Ok(repo)
        } else {
            Err(SourceError::Unreachable(format!(
                "revision {revision} not available from {}",
                target.repository
            )))
        }
    }

    /// Check out `revision` into a fresh directory next to the repository cache
    async fn checkout(
        &self,
        repo: &Path,
        target: &Target,
        revision: &str,
    ) -> Result<PathBuf, SourceError> {
        let mut name = self.repository_dir(target).into_os_string();
        name.push(format!(".render-{}", sanitize_path_component(revision)));
        let dir = PathBuf::from(name);

        if dir.exists() {
            tokio::fs::remove_dir_all(&dir).await.map_err(|e| {
                SourceError::Unreachable(format!("failed to clear {}: {e}", dir.display()))
            })?;
        }
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            SourceError::Unreachable(format!("failed to create {}: {e}", dir.display()))
        })?;

        let work_tree = dir.to_string_lossy().to_string();
        self.run_git(
            Some(repo),
            &["--work-tree", &work_tree, "checkout", "--force", revision, "--", "."],
        )
        .await
        .map_err(SourceError::Unreachable)?;
        Ok(dir)
    }

    async fn kustomize_build(&self, dir: &Path) -> Result<Vec<u8>, SourceError> {
        info!("Running kustomize build on {}", dir.display());
        let start = Instant::now();
        let output = tokio::process::Command::new(&self.kustomize_binary)
            .arg("build")
            .arg(dir)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                SourceError::Unreachable(format!(
                    "failed to execute {}: {e}",
                    self.kustomize_binary
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!("Kustomize build failed: {}", stderr);
            metrics::increment_kustomize_builds("failed");
            return Err(SourceError::Render(format!("kustomize build failed: {stderr}")));
        }

        metrics::increment_kustomize_builds("succeeded");
        metrics::observe_kustomize_build_duration(start.elapsed().as_secs_f64());
        debug!("Kustomize build succeeded in {:?}", start.elapsed());
        Ok(output.stdout)
    }
}

#[async_trait]
impl SourceAdapter for GitSourceAdapter {
    async fn resolve_revision(&self, target: &Target) -> Result<String, SourceError> {
        let repo = self.ensure_repository(target).await?;
        self.run_git(
            Some(&repo),
            &[
                "fetch",
                "--quiet",
                "--depth",
                "1",
                "--no-tags",
                &target.repository,
                &target.reference,
            ],
        )
        .await
        .map_err(SourceError::Unreachable)?;

        let output = self
            .run_git(Some(&repo), &["rev-parse", "FETCH_HEAD^{commit}"])
            .await
            .map_err(SourceError::Unreachable)?;
        let revision = String::from_utf8_lossy(&output).trim().to_string();
        if revision.is_empty() {
            return Err(SourceError::Unreachable(format!(
                "could not resolve {} in {}",
                target.reference, target.repository
            )));
        }
        Ok(revision)
    }

    async fn list_files(
        &self,
        target: &Target,
        revision: &str,
        path: &str,
    ) -> Result<Vec<String>, SourceError> {
        let repo = self.ensure_revision(target, revision).await?;
        let path = normalize_path(path);

        let mut args = vec!["ls-tree", "-r", "--name-only", "-z", revision];
        if !path.is_empty() {
            args.push("--");
            args.push(&path);
        }
        let output = self
            .run_git(Some(&repo), &args)
            .await
            .map_err(SourceError::Unreachable)?;

        let files: Vec<String> = output
            .split(|b| *b == 0)
            .filter(|entry| !entry.is_empty())
            .map(|entry| String::from_utf8_lossy(entry).to_string())
            .collect();

        // git prints nothing for a path that does not exist
        if files.is_empty() {
            return Err(SourceError::PathNotFound(path));
        }
        Ok(files)
    }

    async fn read_file(
        &self,
        target: &Target,
        revision: &str,
        file: &str,
    ) -> Result<Vec<u8>, SourceError> {
        let repo = self.ensure_revision(target, revision).await?;
        let object = format!("{revision}:{file}");
        self.run_git(Some(&repo), &["cat-file", "blob", &object])
            .await
            .map_err(SourceError::Unreachable)
    }

    async fn render_kustomization(
        &self,
        target: &Target,
        revision: &str,
        path: &str,
    ) -> Result<Vec<u8>, SourceError> {
        let span = info_span!("kustomize.build", kustomize.path = path, revision = revision);
        async {
            let repo = self.ensure_revision(target, revision).await?;
            let checkout = self.checkout(&repo, target, revision).await?;
            let rendered = self.kustomize_build(&checkout.join(normalize_path(path))).await;
            if let Err(e) = tokio::fs::remove_dir_all(&checkout).await {
                warn!("Failed to remove checkout {}: {}", checkout.display(), e);
            }
            rendered
        }
        .instrument(span)
        .await
    }
}

/// Strip leading "./" and slashes so git pathspecs match
fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_start_matches("./").trim_matches('/');
    if trimmed == "." {
        String::new()
    } else {
        trimmed.to_string()
    }
}

/// Sanitize a string for use in filesystem paths
fn sanitize_path_component(s: &str) -> String {
    s.replace(['@', '/', ':', '\\', ' ', '\t', '\n', '\r'], "-")
        .replace("..", "-")
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect()
}
