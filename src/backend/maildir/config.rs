//! Maildir config module.
//!
//! This module contains the representation of the maildir local store
//! configuration.

use std::path::PathBuf;

/// Represents the maildir local store configuration.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct MaildirConfig {
    /// Represents the maildir root directory. Local folders are
    /// Maildir++ subdirectories of it.
    pub root_dir: PathBuf,
}

impl MaildirConfig {
    pub fn new<P: Into<PathBuf>>(root_dir: P) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }
}
