//! Untracking files that are tracked but now match ignore rules.
//!
//! Files stay on disk; only their index entries are removed, so they drop out
//! of the next backup tree.

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::io::git::Git;

/// What one reconciliation pass removed from the index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UntrackReport {
    /// Paths removed per `git rm --cached` invocation, in order.
    pub batches: Vec<usize>,
}

impl UntrackReport {
    pub fn total(&self) -> usize {
        self.batches.iter().sum()
    }
}

/// Remove every tracked-but-ignored path from the index, `batch_size` at a time.
pub fn untrack_ignored(git: &Git, batch_size: usize) -> Result<UntrackReport> {
    let batch_size = batch_size.max(1);
    let paths = git
        .tracked_ignored_files()
        .context("list tracked ignored files")?;
    if paths.is_empty() {
        debug!("no tracked files match ignore rules");
        return Ok(UntrackReport::default());
    }

    let mut report = UntrackReport::default();
    for chunk in paths.chunks(batch_size) {
        git.rm_cached(chunk)
            .with_context(|| format!("untrack batch starting at {}", chunk[0]))?;
        report.batches.push(chunk.len());
    }
    info!(
        files = report.total(),
        batches = report.batches.len(),
        "untracked files matching ignore rules"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestRepo;

    #[test]
    fn nothing_to_do_in_a_clean_repo() {
        let repo = TestRepo::new().expect("repo");
        let report = untrack_ignored(&repo.git(), 50).expect("untrack");
        assert_eq!(report, UntrackReport::default());
        assert_eq!(report.total(), 0);
    }

    #[test]
    fn newly_ignored_files_leave_the_index_but_stay_on_disk() {
        let repo = TestRepo::new().expect("repo");
        repo.write_file("build/out.log", "log\n").expect("write");
        repo.write_file("src/main.rs", "fn main() {}\n").expect("write");
        repo.commit_all("add files").expect("commit");
        repo.write_file(".gitignore", "build/\n").expect("write");

        let report = untrack_ignored(&repo.git(), 50).expect("untrack");
        assert_eq!(report.batches, vec![1]);

        let tracked = repo.git_ok(&["ls-files"]).expect("ls-files");
        assert!(!tracked.contains("build/out.log"));
        assert!(tracked.contains("src/main.rs"));
        assert_eq!(repo.read_file("build/out.log").expect("read"), "log\n");
    }

    #[test]
    fn removals_are_batched() {
        let repo = TestRepo::new().expect("repo");
        for i in 0..120 {
            repo.write_file(&format!("cache/{i:03}.tmp"), "x\n").expect("write");
        }
        repo.commit_all("add cache").expect("commit");
        repo.write_file(".gitignore", "*.tmp\n").expect("write");

        let report = untrack_ignored(&repo.git(), 50).expect("untrack");
        assert_eq!(report.batches, vec![50, 50, 20]);
        assert_eq!(report.total(), 120);
        assert_eq!(repo.git_ok(&["ls-files", "cache"]).expect("ls-files"), "");
    }
}
