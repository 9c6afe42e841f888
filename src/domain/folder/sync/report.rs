//! Synchronization report module.

use serde::Serialize;
use std::{fmt, ops};

use super::Error;

/// Represents the counters of one synchronization pass.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct SyncStatistics {
    /// Messages whose flags were already converged.
    pub matched: usize,
    /// Messages whose flags were updated on at least one side.
    pub updated: usize,
    /// Remote messages added to the local store.
    pub added_locally: usize,
    /// Local messages appended to the remote folder.
    pub added_remotely: usize,
    /// Local messages deleted because their remote copy vanished.
    pub deleted_locally: usize,
    /// Remote messages deleted because their local copy vanished.
    pub deleted_remotely: usize,
}

impl SyncStatistics {
    /// Returns `true` if the pass changed nothing on either side.
    pub fn is_unchanged(&self) -> bool {
        self.updated == 0
            && self.added_locally == 0
            && self.added_remotely == 0
            && self.deleted_locally == 0
            && self.deleted_remotely == 0
    }
}

impl ops::AddAssign for SyncStatistics {
    fn add_assign(&mut self, rhs: Self) {
        self.matched += rhs.matched;
        self.updated += rhs.updated;
        self.added_locally += rhs.added_locally;
        self.added_remotely += rhs.added_remotely;
        self.deleted_locally += rhs.deleted_locally;
        self.deleted_remotely += rhs.deleted_remotely;
    }
}

impl fmt::Display for SyncStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "matched={} updated={} added_locally={} added_remotely={} deleted_locally={} deleted_remotely={}",
            self.matched,
            self.updated,
            self.added_locally,
            self.added_remotely,
            self.deleted_locally,
            self.deleted_remotely,
        )
    }
}

/// Represents the outcome of the synchronization of one folder.
#[derive(Debug)]
pub struct FolderSyncReport {
    /// Represents the remote path of the folder, or its local path
    /// if the folder has no remote counterpart.
    pub folder: String,
    pub result: Result<SyncStatistics, Error>,
}

/// Represents the outcome of the synchronization of a whole
/// mailbox. A failed folder never prevents the other folders from
/// being synchronized.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub folders: Vec<FolderSyncReport>,
}

impl SyncReport {
    pub fn push(&mut self, folder: String, result: Result<SyncStatistics, Error>) {
        self.folders.push(FolderSyncReport { folder, result })
    }

    /// Sums the statistics of the successful folders.
    pub fn statistics(&self) -> SyncStatistics {
        let mut stats = SyncStatistics::default();
        for report in &self.folders {
            if let Ok(folder_stats) = &report.result {
                stats += *folder_stats;
            }
        }
        stats
    }

    pub fn errors(&self) -> impl Iterator<Item = (&str, &Error)> {
        self.folders.iter().filter_map(|report| match &report.result {
            Ok(_) => None,
            Err(err) => Some((report.folder.as_str(), err)),
        })
    }

    pub fn is_ok(&self) -> bool {
        self.errors().next().is_none()
    }
}
