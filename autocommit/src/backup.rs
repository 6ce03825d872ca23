//! Commits the staged index onto the backup branch without checking it out.
//!
//! A backup commit is built from plumbing only:
//!
//! 1. `write-tree` turns the index into a tree object.
//! 2. The parent is the backup branch tip, or `HEAD` when the branch is new.
//! 3. If the tree equals the tip's tree there is nothing to record.
//! 4. `commit-tree` creates the commit object.
//! 5. `update-ref` moves the branch, compare-and-swap against the tip seen in
//!    step 2.
//!
//! The checked-out branch, `HEAD` and the working tree are never touched. The
//! ref only moves after the commit object exists, so a failure at any step
//! leaves the branch where it was.

use std::fmt;

use tracing::{debug, info, instrument};

use crate::io::git::{CommandError, Git};

/// Short name of the branch that receives backup commits.
pub const BACKUP_BRANCH: &str = "autocommit/backup";

/// Fully qualified ref of [`BACKUP_BRANCH`].
pub const BACKUP_REF: &str = "refs/heads/autocommit/backup";

/// Plumbing step that failed while committing a backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupStep {
    ValidateMessage,
    WriteTree,
    LookupBranch,
    ResolveParent,
    ResolvePriorTree,
    CommitTree,
    UpdateRef,
}

impl BackupStep {
    fn as_str(self) -> &'static str {
        match self {
            BackupStep::ValidateMessage => "validate message",
            BackupStep::WriteTree => "write tree",
            BackupStep::LookupBranch => "look up backup branch",
            BackupStep::ResolveParent => "resolve parent commit",
            BackupStep::ResolvePriorTree => "resolve backup tree",
            BackupStep::CommitTree => "create commit",
            BackupStep::UpdateRef => "update backup ref",
        }
    }
}

/// A backup plumbing step failed. The backup ref was not moved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitOperationError {
    pub step: BackupStep,
    /// Underlying git failure; `None` for validation errors.
    pub source: Option<CommandError>,
}

impl GitOperationError {
    fn at(step: BackupStep) -> impl FnOnce(CommandError) -> Self {
        move |source| Self {
            step,
            source: Some(source),
        }
    }
}

impl fmt::Display for GitOperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.step, &self.source) {
            (BackupStep::ValidateMessage, _) => f.write_str("backup commit message is empty"),
            (step, Some(source)) => write!(f, "backup failed to {}: {source}", step.as_str()),
            (step, None) => write!(f, "backup failed to {}", step.as_str()),
        }
    }
}

impl std::error::Error for GitOperationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|err| err as &(dyn std::error::Error + 'static))
    }
}

/// Everything needed to decide on, and build, the next backup commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupCommitPlan {
    /// Tree written from the current index.
    pub staged_tree: String,
    pub branch_exists: bool,
    /// Backup tip when the branch exists, otherwise `HEAD`.
    pub parent: String,
    /// Tree of the backup tip; `None` before the first backup.
    pub prior_tree: Option<String>,
}

impl BackupCommitPlan {
    /// True when the index matches the latest backup exactly.
    pub fn is_noop(&self) -> bool {
        self.branch_exists && self.prior_tree.as_deref() == Some(self.staged_tree.as_str())
    }

    /// Old value for the compare-and-swap ref update (empty means "must not exist").
    fn expected_old_tip(&self) -> &str {
        if self.branch_exists { &self.parent } else { "" }
    }
}

/// Result of [`commit_index_to_backup_branch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    /// A new commit was recorded and the branch moved to it.
    Committed {
        commit: String,
        parent: String,
        tree: String,
    },
    /// Index matches the current backup tip; nothing was written.
    Unchanged { tip: String, tree: String },
}

/// Inspect the index and backup branch and decide what a backup would do.
pub fn plan_backup_commit(git: &Git) -> Result<BackupCommitPlan, GitOperationError> {
    let staged_tree = git
        .write_tree()
        .map_err(GitOperationError::at(BackupStep::WriteTree))?;
    let branch_exists = git
        .ref_exists(BACKUP_REF)
        .map_err(GitOperationError::at(BackupStep::LookupBranch))?;

    let (parent, prior_tree) = if branch_exists {
        let tip = git
            .rev_parse(&format!("{BACKUP_REF}^{{commit}}"))
            .map_err(GitOperationError::at(BackupStep::ResolveParent))?;
        let tree = git
            .rev_parse(&format!("{BACKUP_REF}^{{tree}}"))
            .map_err(GitOperationError::at(BackupStep::ResolvePriorTree))?;
        (tip, Some(tree))
    } else {
        let head = git
            .rev_parse("HEAD^{commit}")
            .map_err(GitOperationError::at(BackupStep::ResolveParent))?;
        (head, None)
    };

    Ok(BackupCommitPlan {
        staged_tree,
        branch_exists,
        parent,
        prior_tree,
    })
}

/// Record the current index as a new commit on [`BACKUP_BRANCH`].
///
/// Returns [`BackupOutcome::Unchanged`] when the index matches the existing
/// backup tip. The first backup is parented on `HEAD`.
#[instrument(skip_all)]
pub fn commit_index_to_backup_branch(
    git: &Git,
    message: &str,
) -> Result<BackupOutcome, GitOperationError> {
    if message.trim().is_empty() {
        return Err(GitOperationError {
            step: BackupStep::ValidateMessage,
            source: None,
        });
    }

    let plan = plan_backup_commit(git)?;
    if plan.is_noop() {
        debug!(tip = %plan.parent, tree = %plan.staged_tree, "index matches backup tip");
        return Ok(BackupOutcome::Unchanged {
            tip: plan.parent,
            tree: plan.staged_tree,
        });
    }

    let commit = git
        .commit_tree(&plan.staged_tree, &plan.parent, message)
        .map_err(GitOperationError::at(BackupStep::CommitTree))?;
    git.update_ref(
        BACKUP_REF,
        &commit,
        plan.expected_old_tip(),
        "autocommit: backup snapshot",
    )
    .map_err(GitOperationError::at(BackupStep::UpdateRef))?;

    info!(
        commit = %commit,
        parent = %plan.parent,
        first_backup = !plan.branch_exists,
        "backup commit created"
    );
    Ok(BackupOutcome::Committed {
        commit,
        parent: plan.parent,
        tree: plan.staged_tree,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestRepo;

    fn stage(repo: &TestRepo, rel: &str, contents: &str) {
        repo.write_file(rel, contents).expect("write");
        repo.git().add_all().expect("git add");
    }

    #[test]
    fn first_backup_creates_branch_on_top_of_head() {
        let repo = TestRepo::new().expect("repo");
        let git = repo.git();
        let head = repo.git_ok(&["rev-parse", "HEAD"]).expect("head");
        stage(&repo, "notes.txt", "draft\n");

        let outcome = commit_index_to_backup_branch(&git, "[Auto commit] Add notes").expect("backup");
        let BackupOutcome::Committed { commit, parent, .. } = outcome else {
            panic!("expected a commit, got {outcome:?}");
        };
        assert_eq!(parent, head);
        assert!(git.ref_exists(BACKUP_REF).expect("show-ref"));
        assert_eq!(repo.git_ok(&["rev-parse", BACKUP_REF]).expect("tip"), commit);
        assert_eq!(
            repo.git_ok(&["rev-parse", &format!("{BACKUP_REF}^")]).expect("parent"),
            head
        );
        assert_eq!(
            repo.git_ok(&["log", "-1", "--format=%B", BACKUP_REF]).expect("log"),
            "[Auto commit] Add notes"
        );
    }

    #[test]
    fn first_backup_is_created_even_when_index_matches_head() {
        let repo = TestRepo::new().expect("repo");
        let outcome = commit_index_to_backup_branch(&repo.git(), "snapshot").expect("backup");
        assert!(matches!(outcome, BackupOutcome::Committed { .. }));
        assert!(repo.git().ref_exists(BACKUP_REF).expect("show-ref"));
    }

    #[test]
    fn unchanged_index_does_not_create_a_commit() {
        let repo = TestRepo::new().expect("repo");
        let git = repo.git();
        stage(&repo, "a.txt", "one\n");
        commit_index_to_backup_branch(&git, "first").expect("backup");
        let tip_before = repo.git_ok(&["rev-parse", BACKUP_REF]).expect("tip");

        let outcome = commit_index_to_backup_branch(&git, "second").expect("backup");
        assert_eq!(
            outcome,
            BackupOutcome::Unchanged {
                tip: tip_before.clone(),
                tree: repo.git_ok(&["rev-parse", &format!("{BACKUP_REF}^{{tree}}")]).expect("tree"),
            }
        );
        assert_eq!(repo.git_ok(&["rev-parse", BACKUP_REF]).expect("tip"), tip_before);
    }

    #[test]
    fn later_backups_chain_onto_the_backup_tip() {
        let repo = TestRepo::new().expect("repo");
        let git = repo.git();
        stage(&repo, "a.txt", "one\n");
        commit_index_to_backup_branch(&git, "first").expect("backup");
        let first_tip = repo.git_ok(&["rev-parse", BACKUP_REF]).expect("tip");

        stage(&repo, "a.txt", "two\n");
        let outcome = commit_index_to_backup_branch(&git, "second").expect("backup");
        let BackupOutcome::Committed { parent, .. } = outcome else {
            panic!("expected a commit");
        };
        assert_eq!(parent, first_tip);
        assert_eq!(
            repo.git_ok(&["rev-list", "--count", BACKUP_REF]).expect("count"),
            "3"
        );
    }

    #[test]
    fn checkout_head_and_working_tree_are_untouched() {
        let repo = TestRepo::new().expect("repo");
        let git = repo.git();
        let branch_before = git.current_branch().expect("branch");
        let head_before = repo.git_ok(&["rev-parse", "HEAD"]).expect("head");
        stage(&repo, "work.txt", "in progress\n");

        commit_index_to_backup_branch(&git, "snapshot").expect("backup");

        assert_eq!(git.current_branch().expect("branch"), branch_before);
        assert_eq!(repo.git_ok(&["rev-parse", "HEAD"]).expect("head"), head_before);
        assert_eq!(repo.read_file("work.txt").expect("read"), "in progress\n");
        // Still staged against the user's HEAD.
        assert_eq!(
            repo.git_ok(&["diff", "--cached", "--name-only"]).expect("diff"),
            "work.txt"
        );
    }

    #[test]
    fn empty_message_is_rejected_before_touching_git() {
        let repo = TestRepo::new().expect("repo");
        let err = commit_index_to_backup_branch(&repo.git(), "  \n").expect_err("should fail");
        assert_eq!(err.step, BackupStep::ValidateMessage);
        assert!(err.source.is_none());
        assert!(!repo.git().ref_exists(BACKUP_REF).expect("show-ref"));
    }

    #[test]
    fn repository_without_commits_fails_to_resolve_parent() {
        let repo = TestRepo::empty().expect("repo");
        repo.write_file("a.txt", "one\n").expect("write");
        repo.git().add_all().expect("git add");

        let err = commit_index_to_backup_branch(&repo.git(), "snapshot").expect_err("should fail");
        assert_eq!(err.step, BackupStep::ResolveParent);
        assert!(!repo.git().ref_exists(BACKUP_REF).expect("show-ref"));
    }

    #[test]
    fn ref_created_after_planning_is_not_overwritten() {
        let repo = TestRepo::new().expect("repo");
        let git = repo.git();
        stage(&repo, "b.txt", "x\n");
        let plan = plan_backup_commit(&git).expect("plan");
        assert!(!plan.branch_exists);

        let head = repo.git_ok(&["rev-parse", "HEAD"]).expect("head");
        repo.git_ok(&["update-ref", BACKUP_REF, &head])
            .expect("racing update-ref");

        let commit = git
            .commit_tree(&plan.staged_tree, &plan.parent, "late")
            .expect("commit-tree");
        let err = git
            .update_ref(BACKUP_REF, &commit, plan.expected_old_tip(), "test")
            .expect_err("ref must not be clobbered");
        assert!(err.exit_code.is_some());
        assert_eq!(repo.git_ok(&["rev-parse", BACKUP_REF]).expect("tip"), head);
    }
}
