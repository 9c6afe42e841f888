//! Mailbox synchronization module.
//!
//! This module contains the synchronization of all the folders of a
//! mailbox, one folder at a time.

use log::{info, warn};
use proc_lock::{lock, LockPath};
use std::collections::HashSet;

use crate::{
    folder::mapper::DEFAULT_DELIM, FlagTable, FolderMapper, LocalStore, LockMode, MailboxLock,
    RemoteFolderClient, SyncConfig,
};

use super::{Cache, Error, FolderSync, Result, SyncReport};

pub struct MailboxSync<'a, R, L>
where
    R: RemoteFolderClient + ?Sized,
    L: LocalStore + ?Sized,
{
    config: &'a SyncConfig,
    remote: &'a R,
    local: &'a L,
    lock: &'a MailboxLock,
    flags: FlagTable,
    full: bool,
}

impl<'a, R, L> MailboxSync<'a, R, L>
where
    R: RemoteFolderClient + ?Sized,
    L: LocalStore + ?Sized,
{
    pub fn new(config: &'a SyncConfig, remote: &'a R, local: &'a L, lock: &'a MailboxLock) -> Self {
        Self {
            config,
            remote,
            local,
            lock,
            flags: FlagTable::default(),
            full: false,
        }
    }

    pub fn with_flag_table(mut self, flags: FlagTable) -> Self {
        self.flags = flags;
        self
    }

    /// Forces the reconciliation of the flags of every tracked
    /// message, even when nothing seems to have changed.
    pub fn full_sync(mut self, full: bool) -> Self {
        self.full = full;
        self
    }

    /// Synchronizes the whole mailbox, using the tracking database
    /// of the sync directory. Only one process at a time can
    /// synchronize a given mailbox.
    pub fn sync_all(&self) -> Result<SyncReport> {
        info!("starting synchronization of mailbox {}", self.config.name);

        let lock_path = LockPath::Tmp(format!("mailbox-sync-{}.lock", self.config.name));
        let guard = lock(&lock_path)
            .map_err(|err| Error::LockMailboxSyncError(err, self.config.name.clone()))?;

        let cache = Cache::new(&self.config.name, self.config.tracking_db_path()?)?;
        let report = self.sync_all_with_cache(&cache)?;

        drop(guard);

        Ok(report)
    }

    /// Synchronizes the whole mailbox using the given tracking state.
    ///
    /// Remote folders are synchronized first, then the local folders
    /// of the sync scope that were not paired with any listed remote
    /// folder. A failing folder is reported and does not stop the
    /// synchronization of the others.
    pub fn sync_all_with_cache(&self, cache: &Cache) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        let folders = self.remote.list("*")?;
        let mapper = FolderMapper::new(self.config).with_delim(folders.delim().unwrap_or(DEFAULT_DELIM));
        let sync = FolderSync::new(cache, self.remote, self.local, self.lock, &mapper, &self.flags)
            .with_delete_batch_size(self.config.delete_batch_size());

        let mut visited = HashSet::new();

        for folder in folders.iter() {
            if let Some(tracker) = cache.get_folder_by_remote_path(&folder.name)? {
                visited.insert(tracker.folder_id);
            }

            let result = match sync.sync_remote_folder(folder, self.full) {
                Ok((tracker, stats)) => {
                    if let Some(tracker) = tracker {
                        visited.insert(tracker.folder_id);
                    }
                    Ok(stats)
                }
                Err(err) => {
                    warn!("cannot synchronize remote folder {}: {}", folder.name, err);
                    // the folder may have been paired before the failure
                    if let Some(tracker) = cache.get_folder_by_remote_path(&folder.name)? {
                        visited.insert(tracker.folder_id);
                    }
                    Err(err)
                }
            };
            report.push(folder.name.clone(), result);
        }

        let local_folders = {
            let _guard = self.lock.acquire(LockMode::Read)?;
            self.local.list_folders()?
        };

        for folder in local_folders {
            if visited.contains(&folder.id) || !mapper.is_in_scope(&folder.path) {
                continue;
            }

            let result = sync.sync_local_folder(&folder, self.full);
            if let Err(err) = &result {
                warn!("cannot synchronize local folder {}: {}", folder.path, err);
            }
            report.push(folder.path, result);
        }

        info!(
            "synchronized mailbox {}: {}",
            self.config.name,
            report.statistics()
        );

        Ok(report)
    }
}
