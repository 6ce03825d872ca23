//! First-run scaffold: writes a default `.autocommit.toml`.
//!
//! The config is also listed in `.git/info/exclude`, so it stays out of the
//! user's index and out of backup trees without touching a tracked
//! `.gitignore`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::info;

use super::config::{AutocommitConfig, CONFIG_FILE_NAME, write_config};
use super::git::Git;

/// Options for `init_config`.
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// If true, replace an existing config with defaults.
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitOutcome {
    Created(PathBuf),
    Overwritten(PathBuf),
    /// Config already present and `force` was not set.
    Kept(PathBuf),
}

/// Resolve the repository root containing `dir`.
pub fn repository_root(dir: &Path) -> Result<PathBuf> {
    match Git::new(dir).run(&["rev-parse", "--show-toplevel"], None) {
        Ok(top) if !top.is_empty() => Ok(PathBuf::from(top)),
        Ok(_) => bail!("{} is not inside a git work tree", dir.display()),
        Err(err) => bail!("{} is not a git repository: {err}", dir.display()),
    }
}

/// Write the default config at the root of the repository containing `dir`.
pub fn init_config(dir: &Path, options: &InitOptions) -> Result<InitOutcome> {
    let root = repository_root(dir)?;
    let path = root.join(CONFIG_FILE_NAME);

    exclude_locally(&root, CONFIG_FILE_NAME)?;

    let existed = path.exists();
    if existed && !options.force {
        info!(path = %path.display(), "config already exists, keeping it");
        return Ok(InitOutcome::Kept(path));
    }

    write_config(&path, &AutocommitConfig::default())?;
    info!(path = %path.display(), "wrote default config");
    Ok(if existed {
        InitOutcome::Overwritten(path)
    } else {
        InitOutcome::Created(path)
    })
}

/// Add `/{name}` to the repository's local exclude file unless already there.
///
/// Returns true when the file was changed.
pub fn exclude_locally(root: &Path, name: &str) -> Result<bool> {
    let git = Git::new(root);
    let raw = git
        .run(&["rev-parse", "--git-path", "info/exclude"], None)
        .context("locate info/exclude")?;
    let exclude_path = root.join(raw);

    let entry = format!("/{name}");
    let existing = match fs::read_to_string(&exclude_path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(err) => {
            return Err(err).with_context(|| format!("read {}", exclude_path.display()));
        }
    };
    if existing
        .lines()
        .any(|line| line.trim() == entry || line.trim() == name)
    {
        return Ok(false);
    }

    if let Some(parent) = exclude_path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&exclude_path)
        .with_context(|| format!("open {}", exclude_path.display()))?;
    let separator = if existing.is_empty() || existing.ends_with('\n') { "" } else { "\n" };
    writeln!(file, "{separator}{entry}")
        .with_context(|| format!("write {}", exclude_path.display()))?;
    info!(path = %exclude_path.display(), entry, "excluded config from git");
    Ok(true)
}
