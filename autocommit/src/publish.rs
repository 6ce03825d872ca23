//! Pushing the backup branch to a remote.

use tracing::{info, warn};

use crate::backup::BACKUP_REF;
use crate::core::push_failure::{PushFailureKind, classify_push_failure};
use crate::io::git::Git;

/// Result of a push attempt. Push failures never abort a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed {
        remote: String,
    },
    Failed {
        remote: String,
        kind: PushFailureKind,
        /// Git's stderr, or the spawn error.
        detail: String,
    },
}

/// Push only the backup branch to `remote`, under the same name.
pub fn push_backup_branch(git: &Git, remote: &str) -> PushOutcome {
    let refspec = format!("{BACKUP_REF}:{BACKUP_REF}");
    match git.push(remote, &refspec) {
        Ok(_) => {
            info!(remote, "pushed backup branch");
            PushOutcome::Pushed {
                remote: remote.to_string(),
            }
        }
        Err(err) => {
            let kind = classify_push_failure(&err.stderr);
            warn!(remote, %kind, hint = kind.hint(), error = %err, "push failed");
            PushOutcome::Failed {
                remote: remote.to_string(),
                kind,
                detail: err.stderr,
            }
        }
    }
}
