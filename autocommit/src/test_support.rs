//! Test-only helpers: throwaway repositories and scripted drafters.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result, bail};
use tempfile::TempDir;

use crate::io::config::LlmConfig;
use crate::io::drafter::{DraftedMessage, MessageDrafter};
use crate::io::git::Git;

/// A git repository in a temporary directory with a local identity.
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    /// Repository with one commit containing `README.md`.
    pub fn new() -> Result<Self> {
        let repo = Self::empty()?;
        repo.write_file("README.md", "hi\n")?;
        repo.git_ok(&["add", "README.md"])?;
        repo.git_ok(&["commit", "-q", "-m", "chore: init"])?;
        Ok(repo)
    }

    /// Repository with no commits yet.
    pub fn empty() -> Result<Self> {
        let dir = tempfile::tempdir().context("tempdir")?;
        let repo = Self { dir };
        repo.git_ok(&["init", "-q"])?;
        repo.git_ok(&["config", "user.email", "test@example.com"])?;
        repo.git_ok(&["config", "user.name", "test"])?;
        repo.git_ok(&["config", "commit.gpgsign", "false"])?;
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn git(&self) -> Git {
        Git::new(self.path())
    }

    /// Write `contents` to `rel`, creating parent directories.
    pub fn write_file(&self, rel: &str, contents: &str) -> Result<()> {
        let path = self.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
    }

    pub fn read_file(&self, rel: &str) -> Result<String> {
        let path = self.path().join(rel);
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }

    /// Run git and return trimmed stdout, failing on nonzero exit.
    pub fn git_ok(&self, args: &[&str]) -> Result<String> {
        let out = Command::new("git")
            .args(args)
            .current_dir(self.path())
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !out.status.success() {
            bail!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&out.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
    }

    /// Stage everything and commit on the current branch.
    pub fn commit_all(&self, message: &str) -> Result<()> {
        self.git_ok(&["add", "-A"])?;
        self.git_ok(&["commit", "-q", "-m", message])?;
        Ok(())
    }

    /// Create a bare repository next to this one and register it as `name`.
    pub fn add_bare_remote(&self, name: &str) -> Result<TempDir> {
        let remote = tempfile::tempdir().context("tempdir")?;
        let out = Command::new("git")
            .args(["init", "-q", "--bare"])
            .current_dir(remote.path())
            .output()
            .context("spawn git init --bare")?;
        if !out.status.success() {
            bail!("git init --bare failed");
        }
        let url = remote.path().to_string_lossy().into_owned();
        self.git_ok(&["remote", "add", name, &url])?;
        Ok(remote)
    }
}

/// Drafter that replays queued replies and records every diff it was given.
///
/// Once the queue is empty it answers with a fallback.
#[derive(Default)]
pub struct ScriptedDrafter {
    replies: Mutex<VecDeque<DraftedMessage>>,
    diffs: Mutex<Vec<String>>,
}

impl ScriptedDrafter {
    pub fn new(replies: Vec<DraftedMessage>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            diffs: Mutex::new(Vec::new()),
        }
    }

    /// Drafter that always answers `Generated(text)` for the first `n` calls.
    pub fn repeating(text: &str, n: usize) -> Self {
        Self::new(vec![DraftedMessage::Generated(text.to_string()); n])
    }

    pub fn calls(&self) -> usize {
        self.diffs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn diffs(&self) -> Vec<String> {
        self.diffs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl MessageDrafter for ScriptedDrafter {
    fn draft(&self, diff: &str, _llm: &LlmConfig) -> DraftedMessage {
        self.diffs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(diff.to_string());
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| DraftedMessage::fallback("script exhausted"))
    }
}
