//! Git adapter for the backup daemon.
//!
//! Everything the daemon does to a repository goes through [`Git::run`], a
//! small wrapper around `git` subprocess calls. Callers get trimmed stdout or a
//! [`CommandError`] and decide themselves which failures are benign.

use std::fmt;
use std::path::PathBuf;
use std::process::Command;

use anyhow::Context;
use tracing::{debug, instrument, warn};

use crate::io::process::{RunLimits, run_captured};

/// A `git` invocation that failed to spawn or exited nonzero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandError {
    /// Full argv, starting with the program name.
    pub command: Vec<String>,
    /// Captured stderr (or the spawn error text when the child never ran).
    pub stderr: String,
    /// Exit code; `None` if the process never started or died from a signal.
    pub exit_code: Option<i32>,
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self.exit_code {
            Some(code) => code.to_string(),
            None => "none".to_string(),
        };
        write!(f, "{} failed (exit {code})", self.command.join(" "))?;
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            write!(f, ": {stderr}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CommandError {}

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Run `git <args>` and return trimmed stdout.
    ///
    /// Stdin is only connected when `stdin` is `Some`, so git never blocks on an
    /// interactive prompt.
    #[instrument(skip_all, fields(args = %args.join(" ")))]
    pub fn run(&self, args: &[&str], stdin: Option<&str>) -> Result<String, CommandError> {
        self.run_raw(args, stdin).map(|out| out.trim().to_string())
    }

    /// Like [`Git::run`] but returns stdout untouched.
    fn run_raw(&self, args: &[&str], stdin: Option<&str>) -> Result<String, CommandError> {
        let command: Vec<String> = std::iter::once("git")
            .chain(args.iter().copied())
            .map(str::to_string)
            .collect();

        let mut cmd = Command::new("git");
        cmd.args(args)
            .current_dir(&self.workdir)
            .env("GIT_TERMINAL_PROMPT", "0");

        let output = run_captured(cmd, stdin.map(str::as_bytes), RunLimits::default())
            .map_err(|err| CommandError {
                command: command.clone(),
                stderr: format!("{err:#}"),
                exit_code: None,
            })?;

        if !output.status.success() {
            let err = CommandError {
                command,
                stderr: output.stderr_lossy().trim().to_string(),
                exit_code: output.status.code(),
            };
            debug!(%err, "git command failed");
            return Err(err);
        }
        Ok(output.stdout_lossy())
    }

    /// Return the current branch name, or `None` on a detached HEAD.
    pub fn current_branch(&self) -> Result<Option<String>, CommandError> {
        let name = self.run(&["rev-parse", "--abbrev-ref", "HEAD"], None)?;
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Ok(None);
        }
        debug!(branch = %name, "current branch");
        Ok(Some(name))
    }

    /// Resolve a revision to a full object id.
    pub fn rev_parse(&self, rev: &str) -> Result<String, CommandError> {
        self.run(&["rev-parse", "--verify", "--quiet", rev], None)
    }

    /// Check whether a fully qualified ref (e.g. `refs/heads/main`) exists.
    ///
    /// `show-ref` exits 1 for a missing ref; any other failure is an error.
    pub fn ref_exists(&self, full_ref: &str) -> Result<bool, CommandError> {
        match self.run(&["show-ref", "--verify", "--quiet", full_ref], None) {
            Ok(_) => Ok(true),
            Err(err) if err.exit_code == Some(1) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<(), CommandError> {
        self.run(&["add", "-A"], None)?;
        Ok(())
    }

    /// Diff of the index against HEAD.
    pub fn staged_diff(&self) -> Result<String, CommandError> {
        self.run(&["diff", "--cached", "--no-color", "--no-ext-diff", "HEAD"], None)
    }

    /// Write the current index as a tree object and return its id.
    pub fn write_tree(&self) -> Result<String, CommandError> {
        self.run(&["write-tree"], None)
    }

    /// Create a commit object for `tree` with a single `parent`.
    ///
    /// The message goes over stdin so it is never subject to argv quoting.
    pub fn commit_tree(&self, tree: &str, parent: &str, message: &str) -> Result<String, CommandError> {
        self.run(&["commit-tree", tree, "-p", parent, "-F", "-"], Some(message))
    }

    /// Point `full_ref` at `new`, but only if it currently points at `old`.
    ///
    /// An empty `old` requires the ref not to exist yet.
    pub fn update_ref(&self, full_ref: &str, new: &str, old: &str, reason: &str) -> Result<(), CommandError> {
        self.run(&["update-ref", "-m", reason, full_ref, new, old], None)?;
        Ok(())
    }

    /// Number of commits reachable from `rev`.
    pub fn commit_count(&self, rev: &str) -> anyhow::Result<u64> {
        let out = self.run(&["rev-list", "--count", rev], None)?;
        out.parse()
            .with_context(|| format!("parse rev-list count '{out}'"))
    }

    /// Tracked files that match the repository's exclusion rules.
    pub fn tracked_ignored_files(&self) -> Result<Vec<String>, CommandError> {
        let out = self.run_raw(
            &["ls-files", "-z", "--cached", "--ignored", "--exclude-standard"],
            None,
        )?;
        Ok(out
            .split('\0')
            .filter(|path| !path.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Remove `paths` from the index, leaving the files on disk.
    pub fn rm_cached(&self, paths: &[String]) -> Result<(), CommandError> {
        let mut args = vec!["rm", "--cached", "--quiet", "--ignore-unmatch", "--"];
        args.extend(paths.iter().map(String::as_str));
        self.run(&args, None)?;
        Ok(())
    }

    /// Push `refspec` to `remote` without prompting for credentials.
    pub fn push(&self, remote: &str, refspec: &str) -> Result<String, CommandError> {
        self.run(&["push", remote, refspec], None)
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>, CommandError> {
        let out = self.run_raw(&["status", "--porcelain=v1", "-uall"], None)?;
        Ok(out
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(parse_status_line)
            .collect())
    }
}

fn parse_status_line(line: &str) -> Option<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Some(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        warn!(line, "unexpected porcelain line");
        return None;
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Some(StatusEntry { code, path })
}
