//! Background backups of a working directory onto a dedicated git branch.
//!
//! Every cycle stages the working tree, asks a language-model command for a
//! commit message and records the index as a commit on `autocommit/backup`,
//! built from plumbing so the user's checkout is never touched. The layout
//! keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (countdown, diff bounds, push
//!   failure classification). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (processes, git, config, drafting).
//!
//! Orchestration modules ([`backup`], [`cycle`], [`daemon`], [`reconcile`],
//! [`publish`], [`status`]) coordinate core logic with I/O to implement CLI
//! commands.

pub mod backup;
pub mod core;
pub mod cycle;
pub mod daemon;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod publish;
pub mod reconcile;
pub mod status;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
