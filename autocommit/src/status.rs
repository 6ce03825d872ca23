//! Read-only summary of the backup branch for `autocommit status`.

use anyhow::{Context, Result};
use serde::Serialize;

use crate::backup::{BACKUP_BRANCH, BACKUP_REF};
use crate::io::git::Git;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupStatus {
    /// `None` on a detached HEAD.
    pub current_branch: Option<String>,
    pub backup_branch: &'static str,
    pub exists: bool,
    pub tip: Option<String>,
    pub tree: Option<String>,
    /// Commits reachable from the backup tip, including the user's history.
    pub commits: u64,
    /// Working tree entries not yet staged or committed.
    pub pending_changes: usize,
}

pub fn backup_status(git: &Git) -> Result<BackupStatus> {
    let current_branch = git.current_branch().context("resolve current branch")?;
    let exists = git.ref_exists(BACKUP_REF).context("look up backup branch")?;
    let pending_changes = git.status_porcelain().context("read status")?.len();

    let (tip, tree, commits) = if exists {
        let tip = git.rev_parse(BACKUP_REF).context("resolve backup tip")?;
        let tree = git
            .rev_parse(&format!("{BACKUP_REF}^{{tree}}"))
            .context("resolve backup tree")?;
        let commits = git.commit_count(BACKUP_REF)?;
        (Some(tip), Some(tree), commits)
    } else {
        (None, None, 0)
    };

    Ok(BackupStatus {
        current_branch,
        backup_branch: BACKUP_BRANCH,
        exists,
        tip,
        tree,
        commits,
        pending_changes,
    })
}
