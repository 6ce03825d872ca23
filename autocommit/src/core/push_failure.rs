//! Classification of `git push` failures into actionable categories.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// Broad reason a push failed, derived from git's stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushFailureKind {
    /// The remote refused the update (non-fast-forward, protected ref, hook).
    Rejected,
    /// Credentials missing or refused.
    Auth,
    /// The remote could not be reached.
    Network,
    Other,
}

impl PushFailureKind {
    /// One-line hint shown next to the failure in the log.
    pub fn hint(self) -> &'static str {
        match self {
            PushFailureKind::Rejected => {
                "remote rejected the backup branch; it may have diverged or be protected"
            }
            PushFailureKind::Auth => {
                "authentication failed; check credentials for the remote (prompts are disabled)"
            }
            PushFailureKind::Network => "remote unreachable; check the network and remote URL",
            PushFailureKind::Other => "see git output above",
        }
    }
}

impl fmt::Display for PushFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PushFailureKind::Rejected => "rejected",
            PushFailureKind::Auth => "auth",
            PushFailureKind::Network => "network",
            PushFailureKind::Other => "other",
        };
        f.write_str(name)
    }
}

static REJECTED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[rejected\]|\[remote rejected\]|non-fast-forward|fetch first|protected branch")
        .expect("rejected pattern is valid")
});

static AUTH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)authentication failed|permission denied|could not read (username|password)|terminal prompts disabled|access denied|403",
    )
    .expect("auth pattern is valid")
});

static NETWORK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)could not resolve host|connection (refused|timed out|reset)|network is unreachable|unable to access|could not read from remote repository|does not appear to be a git repository",
    )
    .expect("network pattern is valid")
});

/// Map push stderr to a failure kind. Rejection wins over auth over network.
pub fn classify_push_failure(stderr: &str) -> PushFailureKind {
    if REJECTED_RE.is_match(stderr) {
        PushFailureKind::Rejected
    } else if AUTH_RE.is_match(stderr) {
        PushFailureKind::Auth
    } else if NETWORK_RE.is_match(stderr) {
        PushFailureKind::Network
    } else {
        PushFailureKind::Other
    }
}
