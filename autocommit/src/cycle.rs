//! One commit cycle: reconcile, stage, diff, draft, commit, push.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::backup::{BackupOutcome, commit_index_to_backup_branch, plan_backup_commit};
use crate::core::diff::is_blank;
use crate::core::message::compose_message;
use crate::io::config::AutocommitConfig;
use crate::io::drafter::MessageDrafter;
use crate::io::git::Git;
use crate::publish::{PushOutcome, push_backup_branch};
use crate::reconcile::untrack_ignored;

/// What a single cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Another cycle was already running; nothing was touched.
    Skipped,
    /// Staged diff was blank; no drafting, no commit.
    NoChanges,
    /// Index already matched the backup tip.
    Unchanged,
    Committed {
        commit: String,
        message: String,
        /// `None` when auto-push is off.
        push: Option<PushOutcome>,
    },
    /// The cycle aborted. The backup ref was not moved.
    Failed { error: String },
}

impl CycleOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CycleOutcome::Skipped => "skipped",
            CycleOutcome::NoChanges => "no-changes",
            CycleOutcome::Unchanged => "unchanged",
            CycleOutcome::Committed { .. } => "committed",
            CycleOutcome::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleOutcome::Skipped => f.write_str("skipped: a cycle is already running"),
            CycleOutcome::NoChanges => f.write_str("no changes to back up"),
            CycleOutcome::Unchanged => f.write_str("backup branch already up to date"),
            CycleOutcome::Committed {
                commit,
                message,
                push,
            } => {
                write!(f, "committed {commit}: {message}")?;
                match push {
                    Some(PushOutcome::Pushed { remote }) => write!(f, " (pushed to {remote})"),
                    Some(PushOutcome::Failed { remote, kind, .. }) => {
                        write!(f, " (push to {remote} failed: {kind})")
                    }
                    None => Ok(()),
                }
            }
            CycleOutcome::Failed { error } => write!(f, "failed: {error}"),
        }
    }
}

/// Runs commit cycles for the timer.
pub trait CycleHandler: Send + Sync + 'static {
    fn run_cycle(&self, config: &AutocommitConfig) -> CycleOutcome;
}

/// Clears the running flag on drop.
pub struct RunningGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Cycle implementation over a real repository.
pub struct CycleRunner<D> {
    git: Git,
    drafter: D,
    running: AtomicBool,
}

impl<D: MessageDrafter> CycleRunner<D> {
    pub fn new(git: Git, drafter: D) -> Self {
        Self {
            git,
            drafter,
            running: AtomicBool::new(false),
        }
    }

    pub fn drafter(&self) -> &D {
        &self.drafter
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Claim the running flag, or `None` if a cycle already holds it.
    pub fn try_begin(&self) -> Option<RunningGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunningGuard {
                flag: &self.running,
            })
    }

    pub fn run_cycle(&self, config: &AutocommitConfig) -> CycleOutcome {
        let Some(_guard) = self.try_begin() else {
            warn!("commit cycle already running, skipping");
            return CycleOutcome::Skipped;
        };

        info!("commit cycle started");
        let outcome = match self.run_steps(config) {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(error = %format!("{err:#}"), "commit cycle failed");
                CycleOutcome::Failed {
                    error: format!("{err:#}"),
                }
            }
        };
        info!(outcome = outcome.label(), "commit cycle finished");
        outcome
    }

    fn run_steps(&self, config: &AutocommitConfig) -> Result<CycleOutcome> {
        if config.untrack_ignored {
            if let Err(err) = untrack_ignored(&self.git, config.untrack_batch_size) {
                warn!(error = %format!("{err:#}"), "untracking ignored files failed");
            }
        }

        self.git.add_all().context("stage changes")?;
        let diff = self.git.staged_diff().context("diff staged changes")?;
        if is_blank(&diff) {
            info!("no staged changes");
            return Ok(CycleOutcome::NoChanges);
        }

        // Work already backed up but not yet committed by the user keeps the
        // diff non-blank; don't pay for a draft that would be discarded.
        if plan_backup_commit(&self.git)?.is_noop() {
            info!("staged tree matches backup tip");
            return Ok(CycleOutcome::Unchanged);
        }

        let drafted = self.drafter.draft(&diff, &config.llm);
        let message = compose_message(&config.commit_prefix, drafted.text());

        match commit_index_to_backup_branch(&self.git, &message)? {
            BackupOutcome::Unchanged { .. } => Ok(CycleOutcome::Unchanged),
            BackupOutcome::Committed { commit, .. } => {
                let push = config
                    .auto_push
                    .then(|| push_backup_branch(&self.git, &config.remote));
                Ok(CycleOutcome::Committed {
                    commit,
                    message,
                    push,
                })
            }
        }
    }
}

impl<D: MessageDrafter + 'static> CycleHandler for CycleRunner<D> {
    fn run_cycle(&self, config: &AutocommitConfig) -> CycleOutcome {
        CycleRunner::run_cycle(self, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::BACKUP_REF;
    use crate::io::drafter::{DraftedMessage, FALLBACK_MESSAGE};
    use crate::test_support::{ScriptedDrafter, TestRepo};

    fn runner(repo: &TestRepo, drafter: ScriptedDrafter) -> CycleRunner<ScriptedDrafter> {
        CycleRunner::new(repo.git(), drafter)
    }

    #[test]
    fn modified_file_is_committed_with_prefixed_message() {
        let repo = TestRepo::new().expect("repo");
        repo.write_file("README.md", "hello\n").expect("write");
        let cycle = runner(&repo, ScriptedDrafter::repeating("Update readme", 1));

        let outcome = cycle.run_cycle(&AutocommitConfig::default());
        let CycleOutcome::Committed { message, push, .. } = outcome else {
            panic!("expected a commit, got {outcome:?}");
        };
        assert_eq!(message, "[Auto commit] Update readme");
        assert_eq!(push, None);
        assert!(cycle.drafter().diffs()[0].contains("+hello"));
        assert!(!cycle.is_running());
    }

    #[test]
    fn cycle_is_skipped_while_another_is_running() {
        let repo = TestRepo::new().expect("repo");
        repo.write_file("new.txt", "x\n").expect("write");
        let cycle = runner(&repo, ScriptedDrafter::repeating("msg", 1));

        let guard = cycle.try_begin().expect("first claim");
        assert!(cycle.try_begin().is_none());
        assert_eq!(cycle.run_cycle(&AutocommitConfig::default()), CycleOutcome::Skipped);

        // Nothing was staged or drafted.
        assert_eq!(cycle.drafter().calls(), 0);
        assert_eq!(repo.git_ok(&["diff", "--cached", "--name-only"]).expect("diff"), "");
        drop(guard);
        assert!(!cycle.is_running());
    }

    #[test]
    fn blank_diff_skips_drafting_and_commit() {
        let repo = TestRepo::new().expect("repo");
        let cycle = runner(&repo, ScriptedDrafter::repeating("msg", 1));

        assert_eq!(cycle.run_cycle(&AutocommitConfig::default()), CycleOutcome::NoChanges);
        assert_eq!(cycle.drafter().calls(), 0);
        assert!(!repo.git().ref_exists(BACKUP_REF).expect("show-ref"));
    }

    #[test]
    fn second_cycle_with_same_tree_is_unchanged() {
        let repo = TestRepo::new().expect("repo");
        repo.write_file("a.txt", "one\n").expect("write");
        let cycle = runner(&repo, ScriptedDrafter::repeating("Add a", 2));
        let config = AutocommitConfig::default();

        assert_eq!(cycle.run_cycle(&config).label(), "committed");
        let tip = repo.git_ok(&["rev-parse", BACKUP_REF]).expect("tip");

        // Diff vs HEAD is still non-blank, but the tree equals the backup tip.
        assert_eq!(cycle.run_cycle(&config), CycleOutcome::Unchanged);
        assert_eq!(repo.git_ok(&["rev-parse", BACKUP_REF]).expect("tip"), tip);
    }

    #[test]
    fn idle_uncommitted_work_is_not_redrafted() {
        let repo = TestRepo::new().expect("repo");
        repo.write_file("a.txt", "one\n").expect("write");
        let cycle = runner(&repo, ScriptedDrafter::repeating("Add a", 4));
        let config = AutocommitConfig::default();

        assert_eq!(cycle.run_cycle(&config).label(), "committed");
        for _ in 0..3 {
            assert_eq!(cycle.run_cycle(&config), CycleOutcome::Unchanged);
        }
        assert_eq!(cycle.drafter().calls(), 1);
    }

    #[test]
    fn drafting_fallback_still_commits() {
        let repo = TestRepo::new().expect("repo");
        repo.write_file("a.txt", "one\n").expect("write");
        let cycle = runner(
            &repo,
            ScriptedDrafter::new(vec![DraftedMessage::fallback("no key")]),
        );

        let outcome = cycle.run_cycle(&AutocommitConfig::default());
        let CycleOutcome::Committed { message, .. } = outcome else {
            panic!("expected a commit");
        };
        assert_eq!(message, format!("[Auto commit] {FALLBACK_MESSAGE}"));
    }

    #[test]
    fn ignored_files_are_untracked_before_staging() {
        let repo = TestRepo::new().expect("repo");
        repo.write_file("secret.env", "TOKEN=1\n").expect("write");
        repo.commit_all("oops").expect("commit");
        repo.write_file(".gitignore", "*.env\n").expect("write");
        let cycle = runner(&repo, ScriptedDrafter::repeating("Ignore env files", 1));

        assert_eq!(cycle.run_cycle(&AutocommitConfig::default()).label(), "committed");
        let files = repo
            .git_ok(&["ls-tree", "-r", "--name-only", BACKUP_REF])
            .expect("ls-tree");
        assert!(files.contains(".gitignore"));
        assert!(!files.contains("secret.env"));
        assert_eq!(repo.read_file("secret.env").expect("read"), "TOKEN=1\n");
    }

    #[test]
    fn failures_are_reported_and_release_the_guard() {
        let repo = TestRepo::empty().expect("repo");
        repo.write_file("a.txt", "one\n").expect("write");
        let cycle = runner(&repo, ScriptedDrafter::repeating("msg", 1));

        let outcome = cycle.run_cycle(&AutocommitConfig::default());
        let CycleOutcome::Failed { error } = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert!(error.contains("diff staged changes"));
        assert!(!cycle.is_running());
        assert!(!repo.git().ref_exists(BACKUP_REF).expect("show-ref"));
    }

    #[test]
    fn auto_push_reports_outcome() {
        let repo = TestRepo::new().expect("repo");
        let _remote = repo.add_bare_remote("origin").expect("remote");
        repo.write_file("a.txt", "one\n").expect("write");
        let cycle = runner(&repo, ScriptedDrafter::repeating("Add a", 1));
        let config = AutocommitConfig {
            auto_push: true,
            ..AutocommitConfig::default()
        };

        let outcome = cycle.run_cycle(&config);
        let CycleOutcome::Committed { push, .. } = &outcome else {
            panic!("expected a commit");
        };
        assert_eq!(
            push,
            &Some(PushOutcome::Pushed {
                remote: "origin".to_string()
            })
        );
        assert!(outcome.to_string().contains("pushed to origin"));
    }
}
