//! End-to-end commit cycles against real repositories.
//!
//! Drives `CycleRunner` with a scripted drafter and checks what lands on the
//! backup branch and what stays untouched in the user's checkout.

use autocommit::backup::BACKUP_REF;
use autocommit::cycle::{CycleOutcome, CycleRunner};
use autocommit::io::config::AutocommitConfig;
use autocommit::io::git::Git;
use autocommit::publish::PushOutcome;
use autocommit::test_support::{ScriptedDrafter, TestRepo};

fn tip(repo: &TestRepo) -> String {
    repo.git_ok(&["rev-parse", BACKUP_REF]).expect("backup tip")
}

fn commit_count(repo: &TestRepo) -> u64 {
    repo.git()
        .commit_count(BACKUP_REF)
        .expect("rev-list --count")
}

#[test]
fn modified_file_lands_on_backup_branch_with_prefixed_message() {
    let repo = TestRepo::new().expect("repo");
    let branch = repo.git().current_branch().expect("branch");
    let cycle = CycleRunner::new(repo.git(), ScriptedDrafter::repeating("Describe change", 2));
    let config = AutocommitConfig::default();

    repo.write_file("README.md", "first edit\n").expect("write");
    assert_eq!(cycle.run_cycle(&config).label(), "committed");
    let before = commit_count(&repo);

    repo.write_file("README.md", "second edit\n").expect("write");
    let outcome = cycle.run_cycle(&config);
    assert_eq!(outcome.label(), "committed");

    assert_eq!(commit_count(&repo), before + 1);
    assert_eq!(
        repo.git_ok(&["log", "-1", "--format=%s", BACKUP_REF]).expect("log"),
        "[Auto commit] Describe change"
    );
    assert_eq!(
        repo.git_ok(&["show", &format!("{BACKUP_REF}:README.md")])
            .expect("show"),
        "second edit"
    );
    assert_eq!(repo.git().current_branch().expect("branch"), branch);
}

#[test]
fn repeated_cycles_without_edits_leave_the_tip_alone() {
    let repo = TestRepo::new().expect("repo");
    let cycle = CycleRunner::new(repo.git(), ScriptedDrafter::repeating("Snapshot", 3));
    let config = AutocommitConfig::default();

    repo.write_file("notes.md", "todo\n").expect("write");
    assert_eq!(cycle.run_cycle(&config).label(), "committed");
    let first = tip(&repo);

    assert_eq!(cycle.run_cycle(&config), CycleOutcome::Unchanged);
    assert_eq!(cycle.run_cycle(&config), CycleOutcome::Unchanged);
    assert_eq!(tip(&repo), first);
}

#[test]
fn users_checkout_and_files_are_never_touched() {
    let repo = TestRepo::new().expect("repo");
    repo.git_ok(&["checkout", "-q", "-b", "feature/login"])
        .expect("checkout");
    let head = repo.git_ok(&["rev-parse", "HEAD"]).expect("head");
    let cycle = CycleRunner::new(repo.git(), ScriptedDrafter::repeating("WIP", 2));
    let config = AutocommitConfig::default();

    repo.write_file("src/login.rs", "fn login() {}\n").expect("write");
    cycle.run_cycle(&config);
    repo.write_file("src/login.rs", "fn login() { todo!() }\n").expect("write");
    cycle.run_cycle(&config);

    assert_eq!(
        repo.git().current_branch().expect("branch").as_deref(),
        Some("feature/login")
    );
    assert_eq!(repo.git_ok(&["rev-parse", "HEAD"]).expect("head"), head);
    assert_eq!(
        repo.read_file("src/login.rs").expect("read"),
        "fn login() { todo!() }\n"
    );
    assert_eq!(commit_count(&repo), 3);
}

#[test]
fn clean_tree_skips_the_drafter() {
    let repo = TestRepo::new().expect("repo");
    let cycle = CycleRunner::new(repo.git(), ScriptedDrafter::default());

    assert_eq!(
        cycle.run_cycle(&AutocommitConfig::default()),
        CycleOutcome::NoChanges
    );
    assert_eq!(cycle.drafter().calls(), 0);
}

#[test]
fn auto_push_publishes_only_the_backup_branch() {
    let repo = TestRepo::new().expect("repo");
    let remote = repo.add_bare_remote("backup").expect("remote");
    let cycle = CycleRunner::new(repo.git(), ScriptedDrafter::repeating("Push me", 1));
    let config = AutocommitConfig {
        auto_push: true,
        remote: "backup".to_string(),
        ..AutocommitConfig::default()
    };

    repo.write_file("a.txt", "one\n").expect("write");
    let CycleOutcome::Committed { commit, push, .. } = cycle.run_cycle(&config) else {
        panic!("expected a commit");
    };
    assert_eq!(
        push,
        Some(PushOutcome::Pushed {
            remote: "backup".to_string()
        })
    );

    let remote_git = Git::new(remote.path());
    assert_eq!(remote_git.rev_parse(BACKUP_REF).expect("remote tip"), commit);
    assert_eq!(
        remote_git
            .run(&["for-each-ref", "--format=%(refname)"], None)
            .expect("refs"),
        BACKUP_REF
    );
}

#[test]
fn failed_push_does_not_fail_the_cycle() {
    let repo = TestRepo::new().expect("repo");
    let cycle = CycleRunner::new(repo.git(), ScriptedDrafter::repeating("No remote", 1));
    let config = AutocommitConfig {
        auto_push: true,
        remote: "missing".to_string(),
        ..AutocommitConfig::default()
    };

    repo.write_file("a.txt", "one\n").expect("write");
    let outcome = cycle.run_cycle(&config);
    let CycleOutcome::Committed { push, .. } = outcome else {
        panic!("expected a commit, got {outcome:?}");
    };
    assert!(matches!(push, Some(PushOutcome::Failed { .. })));
    assert!(repo.git().ref_exists(BACKUP_REF).expect("show-ref"));
}
