//! I/O helpers for autocommit commands.

pub mod config;
pub mod drafter;
pub mod git;
pub mod init;
pub mod process;
