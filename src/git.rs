use crate::error::GitError;
use crate::orchestrator::HeadHash;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

const FALLBACK_BRANCH: &str = "master";

/// Reads repository state through the `git` CLI.
#[derive(Debug, Clone)]
pub struct GitCli {
    dir: PathBuf,
}

impl GitCli {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String, GitError> {
        let output = Command::new("git")
            .current_dir(&self.dir)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GitError::Command {
                args: args.join(" "),
                stderr: stderr.trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if stdout.is_empty() {
            return Err(GitError::Empty(args.join(" ")));
        }
        Ok(stdout)
    }

    /// Branch that `origin/HEAD` points at, else `main` or `master` if one
    /// exists locally.
    pub async fn default_branch(&self) -> String {
        if let Ok(reference) = self
            .run(&["symbolic-ref", "--short", "refs/remotes/origin/HEAD"])
            .await
        {
            if let Some(branch) = reference.strip_prefix("origin/") {
                return branch.to_string();
            }
        }

        for candidate in ["main", "master"] {
            let reference = format!("refs/heads/{}", candidate);
            if self
                .run(&["rev-parse", "--verify", "--quiet", &reference])
                .await
                .is_ok()
            {
                return candidate.to_string();
            }
        }

        debug!("Could not detect default branch, using {}", FALLBACK_BRANCH);
        FALLBACK_BRANCH.to_string()
    }
}

#[async_trait]
impl HeadHash for GitCli {
    async fn head_hash(&self) -> Result<String, GitError> {
        self.run(&["rev-parse", "HEAD"]).await
    }
}
