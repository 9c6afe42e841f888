//! Folder synchronization module.
//!
//! This module contains everything needed to synchronize the folders
//! of a local mailbox with the folders of a remote store.

pub mod cache;
pub use cache::{Cache, TrackedFolder, TrackedMessage, TrackedMessages};

pub mod error;
pub use error::{Error, ErrorKind, Result};

pub mod mailbox;
pub use mailbox::MailboxSync;

pub mod reconcile;
pub use reconcile::merge;

pub mod report;
pub use report::{FolderSyncReport, SyncReport, SyncStatistics};

pub mod sync;
pub use sync::FolderSync;
