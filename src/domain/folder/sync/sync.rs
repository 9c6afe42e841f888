//! Folder synchronizer module.
//!
//! This module contains the synchronization pass of one folder:
//! pairing of the local and the remote folders, then reconciliation
//! of their messages against the tracked state.

use chrono::Utc;
use log::{debug, info, trace, warn};
use std::collections::{BTreeSet, HashSet};

use crate::{
    config::DEFAULT_DELETE_BATCH_SIZE, Capability, FetchedFlags, Flag, FlagTable, Flags, Folder,
    FolderMapper, FolderStatus, ItemId, ItemKind, LocalFolder, LocalStore, LockMode, MailboxLock,
    ParsedEmail, RemoteFolderClient, StoreMode, Uid, UidRange, UidSet,
};

use super::{
    reconcile, Cache, Error, Result, SyncStatistics, TrackedFolder, TrackedMessage,
    TrackedMessages,
};

/// Represents the outcome of the pairing check of a tracked folder.
enum Pairing {
    Paired(TrackedFolder),
    /// The local folder was deleted, so were the remote folder and
    /// the tracking.
    Deleted,
    /// The local folder left the sync scope, the tracking was
    /// dropped.
    Abandoned,
}

/// Represents the state of one messages synchronization pass.
struct Pass {
    tracked: TrackedMessages,
    tracked_uids: HashSet<Uid>,
    local_ids: BTreeSet<ItemId>,
    deletes: Vec<TrackedMessage>,
    stats: SyncStatistics,
}

/// Represents the synchronizer of folders. It holds everything a
/// pass needs, and can be reused across folders of the same mailbox.
pub struct FolderSync<'a, R, L>
where
    R: RemoteFolderClient + ?Sized,
    L: LocalStore + ?Sized,
{
    cache: &'a Cache,
    remote: &'a R,
    local: &'a L,
    lock: &'a MailboxLock,
    mapper: &'a FolderMapper,
    flags: &'a FlagTable,
    delete_batch_size: usize,
}

impl<'a, R, L> FolderSync<'a, R, L>
where
    R: RemoteFolderClient + ?Sized,
    L: LocalStore + ?Sized,
{
    pub fn new(
        cache: &'a Cache,
        remote: &'a R,
        local: &'a L,
        lock: &'a MailboxLock,
        mapper: &'a FolderMapper,
        flags: &'a FlagTable,
    ) -> Self {
        Self {
            cache,
            remote,
            local,
            lock,
            mapper,
            flags,
            delete_batch_size: DEFAULT_DELETE_BATCH_SIZE,
        }
    }

    pub fn with_delete_batch_size(mut self, size: usize) -> Self {
        self.delete_batch_size = size.max(1);
        self
    }

    /// Runs the given closure while holding the mailbox lock in write
    /// mode.
    fn commit<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let _guard = self.lock.acquire(LockMode::Write)?;
        f()
    }

    fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let _guard = self.lock.acquire(LockMode::Read)?;
        f()
    }

    /// Synchronizes a folder discovered on the remote side. Returns
    /// the tracked folder, or `None` if the folder was deleted on
    /// both sides.
    pub fn sync_remote_folder(
        &self,
        folder: &Folder,
        full: bool,
    ) -> Result<(Option<TrackedFolder>, SyncStatistics)> {
        debug!("synchronizing remote folder {}", folder.name);

        let tracker = match self.cache.get_folder_by_remote_path(&folder.name)? {
            Some(tracker) => match self.check_tracked_folder(tracker)? {
                Pairing::Paired(tracker) => tracker,
                Pairing::Deleted => return Ok((None, SyncStatistics::default())),
                Pairing::Abandoned => self.create_local_folder(folder)?,
            },
            None => self.create_local_folder(folder)?,
        };

        if !folder.selectable {
            debug!("remote folder {} is not selectable, skipping messages", folder.name);
            return Ok((Some(tracker), SyncStatistics::default()));
        }

        let mut tracker = tracker;
        let stats = self.sync_messages(&mut tracker, full)?;
        Ok((Some(tracker), stats))
    }

    /// Synchronizes a folder discovered on the local side that has
    /// not been visited by the remote folder listing.
    pub fn sync_local_folder(&self, folder: &LocalFolder, full: bool) -> Result<SyncStatistics> {
        debug!("synchronizing local folder {}", folder.path);

        if let Some(tracker) = self.cache.get_folder(folder.id)? {
            info!(
                "remote folder {} was deleted, deleting local folder {}",
                tracker.remote_path, folder.path
            );
            self.commit(|| {
                self.local.delete_folder(folder.id)?;
                self.cache.delete_folder(folder.id)
            })?;
            return Ok(SyncStatistics::default());
        }

        let remote_path = match self.mapper.remote_path(&folder.path) {
            Some(path) => path,
            None => {
                debug!("local folder {} is out of the sync scope", folder.path);
                return Ok(SyncStatistics::default());
            }
        };

        if let Err(err) = self.remote.create(&remote_path) {
            if self.remote.list(&remote_path)?.find(&remote_path).is_some() {
                debug!("remote folder {} created concurrently: {}", remote_path, err);
            } else {
                return Err(err.into());
            }
        }
        info!(
            "created remote folder {} for local folder {}",
            remote_path, folder.path
        );

        let mut tracker = TrackedFolder::new(folder.id, &folder.path, &remote_path, 0);
        self.commit(|| self.cache.insert_folder(&tracker))?;

        self.sync_messages(&mut tracker, full)
    }

    fn check_tracked_folder(&self, mut tracker: TrackedFolder) -> Result<Pairing> {
        let folder = match self.read(|| Ok(self.local.get_folder(tracker.folder_id)?)) {
            Ok(folder) => folder,
            Err(err) if err.is_not_found() => {
                info!(
                    "local folder {} was deleted, deleting remote folder {}",
                    tracker.local_path, tracker.remote_path
                );
                self.remote.delete(&tracker.remote_path)?;
                self.commit(|| self.cache.delete_folder(tracker.folder_id))?;
                return Ok(Pairing::Deleted);
            }
            Err(err) => return Err(err),
        };

        if folder.path == tracker.local_path {
            return Ok(Pairing::Paired(tracker));
        }

        match self.mapper.remote_path(&folder.path) {
            Some(remote_path) => {
                info!(
                    "local folder {} was renamed to {}",
                    tracker.local_path, folder.path
                );
                if remote_path != tracker.remote_path {
                    self.remote.rename(&tracker.remote_path, &remote_path)?;
                }
                tracker.local_path = folder.path;
                tracker.remote_path = remote_path;
                self.commit(|| self.cache.update_folder(&tracker))?;
                Ok(Pairing::Paired(tracker))
            }
            None => {
                info!(
                    "local folder {} was moved out of the sync scope, dropping its tracking",
                    tracker.local_path
                );
                self.commit(|| self.cache.delete_folder(tracker.folder_id))?;
                Ok(Pairing::Abandoned)
            }
        }
    }

    fn create_local_folder(&self, folder: &Folder) -> Result<TrackedFolder> {
        let local_path = self.mapper.local_path(&folder.name, &folder.delim);

        self.commit(|| {
            let local_folder = match self.local.get_folder_by_path(&local_path) {
                Ok(local_folder) => local_folder,
                Err(err) if err.is_not_found() => {
                    info!(
                        "creating local folder {} for remote folder {}",
                        local_path, folder.name
                    );
                    self.local.create_folder(&local_path)?
                }
                Err(err) => return Err(err.into()),
            };

            let tracker = TrackedFolder::new(local_folder.id, local_folder.path, &folder.name, 0);
            self.cache.insert_folder(&tracker)?;
            Ok(tracker)
        })
    }

    /// Synchronizes the messages of a paired folder.
    ///
    /// Flags are only compared when a change was detected or when
    /// `full` is set, so `matched` stays at zero for an incremental
    /// pass over an unchanged folder.
    pub fn sync_messages(&self, tracker: &mut TrackedFolder, full: bool) -> Result<SyncStatistics> {
        let status = self.remote.select(&tracker.remote_path)?;
        trace!("remote folder {} status: {:?}", tracker.remote_path, status);

        if tracker.uid_validity == 0 {
            tracker.uid_validity = status.uid_validity;
            self.commit(|| self.cache.update_folder(tracker))?;
        } else if tracker.uid_validity != status.uid_validity {
            return self.resync_epoch(tracker, &status);
        }

        let folder_id = tracker.folder_id;
        let tracked = self.cache.messages(folder_id)?;
        let local_ids: BTreeSet<ItemId> = self
            .read(|| Ok(self.local.list_item_ids(ItemKind::Message, folder_id)?))?
            .into_iter()
            .collect();

        let last_uid = tracked.max_uid();
        let has_new_remote = status.exists > 0
            && status
                .uid_next
                .map(|uid_next| last_uid + 1 < uid_next)
                .unwrap_or(true);
        let has_local_changes = local_ids.iter().copied().collect::<HashSet<_>>() != tracked.item_ids();

        debug!(
            "folder {}: last uid {}, new remote messages: {}, local changes: {}",
            tracker.remote_path, last_uid, has_new_remote, has_local_changes
        );

        let mut pass = Pass {
            tracked_uids: tracked.iter().map(|msg| msg.uid).collect(),
            tracked,
            local_ids,
            deletes: Vec::new(),
            stats: SyncStatistics::default(),
        };

        if last_uid > 0 && (full || has_new_remote || has_local_changes) {
            let fetched = self.remote.fetch_flags(&UidRange::new(1, last_uid))?;
            self.sync_flags(tracker, &mut pass, fetched)?;
        } else {
            for id in pass.tracked.item_ids() {
                pass.local_ids.remove(&id);
            }
        }

        if has_new_remote {
            self.fetch_new_messages(tracker, &mut pass, last_uid)?;
        }

        self.push_local_messages(tracker, &mut pass)?;
        self.delete_remote_messages(tracker, &mut pass)?;

        tracker.last_sync = Some(Utc::now());
        self.commit(|| self.cache.update_folder(tracker))?;

        info!("synchronized folder {}: {}", tracker.remote_path, pass.stats);
        Ok(pass.stats)
    }

    /// Discards the local content of a folder whose remote UIDs are
    /// no longer comparable to the tracked ones. Local messages that
    /// were never tracked are pushed to the remote folder first.
    fn resync_epoch(&self, tracker: &mut TrackedFolder, status: &FolderStatus) -> Result<SyncStatistics> {
        info!(
            "uid validity of remote folder {} changed from {} to {}, resynchronizing it",
            tracker.remote_path, tracker.uid_validity, status.uid_validity
        );

        let mut stats = SyncStatistics::default();
        let folder_id = tracker.folder_id;
        let local_ids = self.read(|| Ok(self.local.list_item_ids(ItemKind::Message, folder_id)?))?;

        for id in self.cache.list_untracked(folder_id, &local_ids)? {
            let msg = match self.read(|| Ok(self.local.get_message(id)?)) {
                Ok(msg) => msg,
                Err(err) if err.is_not_found() => {
                    debug!("local message {} vanished, skipping it", id);
                    continue;
                }
                Err(err) => return Err(err),
            };
            debug!("appending local message {} to remote folder {}", id, tracker.remote_path);
            self.remote
                .append(&tracker.remote_path, &msg.raw, &self.flags.to_flags(msg.flags))?;
            stats.added_remotely += 1;
        }

        tracker.uid_validity = status.uid_validity;
        tracker.last_sync = Some(Utc::now());
        self.commit(|| {
            self.local.empty_folder(folder_id)?;
            self.cache.delete_messages(folder_id)?;
            self.cache.update_folder(tracker)
        })?;

        Ok(stats)
    }

    fn sync_flags(&self, tracker: &TrackedFolder, pass: &mut Pass, fetched: Vec<FetchedFlags>) -> Result<()> {
        for msg in fetched {
            let tracked = match pass.tracked.remove_by_uid(msg.uid) {
                Some(tracked) => tracked,
                None => {
                    debug!("ignoring flags update of untracked remote message {}", msg.uid);
                    continue;
                }
            };

            if pass.local_ids.remove(&tracked.item_id) {
                self.update_flags(tracker, pass, &msg, tracked)?;
            } else {
                debug!(
                    "local message {} was deleted, deleting remote message {}",
                    tracked.item_id, tracked.uid
                );
                pass.deletes.push(tracked);
            }
        }

        // tracked messages not returned by the remote fetch
        let vanished: Vec<TrackedMessage> = pass.tracked.iter().copied().collect();
        for tracked in vanished {
            pass.tracked.remove_by_uid(tracked.uid);
            let exists_locally = pass.local_ids.remove(&tracked.item_id);
            if exists_locally {
                debug!(
                    "remote message {} was deleted, deleting local message {}",
                    tracked.uid, tracked.item_id
                );
            }
            self.commit(|| {
                if exists_locally {
                    match self.local.delete_item(tracked.item_id) {
                        Err(err) if !err.is_not_found() => return Err(err.into()),
                        _ => (),
                    }
                }
                self.cache.delete_message(tracker.folder_id, tracked.item_id)
            })?;
            if exists_locally {
                pass.stats.deleted_locally += 1;
            }
        }

        Ok(())
    }

    fn update_flags(
        &self,
        tracker: &TrackedFolder,
        pass: &mut Pass,
        msg: &FetchedFlags,
        tracked: TrackedMessage,
    ) -> Result<()> {
        let local_msg = match self.read(|| Ok(self.local.get_message(tracked.item_id)?)) {
            Ok(local_msg) => local_msg,
            Err(err) if err.is_not_found() => {
                debug!("local message {} vanished, deleting remote message {}", tracked.item_id, msg.uid);
                pass.deletes.push(tracked);
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        let mask = self.flags.mask();
        let local = local_msg.flags & mask;
        let remote = self.flags.to_bits(&msg.flags);
        let merged = reconcile::merge(tracked.flags, local, remote);
        trace!(
            "message {}: tracked {}, local {}, remote {}, merged {}",
            msg.uid,
            tracked.flags,
            local,
            remote,
            merged
        );

        if merged != remote {
            let uids = UidSet(vec![msg.uid]);
            let add = self.flags.flags_to_add(&msg.flags, merged);
            if !add.is_empty() {
                self.remote.uid_store(&uids, StoreMode::Add, &add)?;
            }
            let remove = self.flags.flags_to_remove(&msg.flags, merged);
            if !remove.is_empty() {
                self.remote.uid_store(&uids, StoreMode::Remove, &remove)?;
            }
        }

        if merged != local || merged != tracked.flags {
            self.commit(|| {
                if merged != local {
                    self.local
                        .set_flags(tracked.item_id, (local_msg.flags & !mask) | merged)?;
                }
                if merged != tracked.flags {
                    self.cache
                        .set_message_flags(tracker.folder_id, tracked.item_id, merged)?;
                }
                Ok(())
            })?;
        }

        if merged == local && merged == remote && merged == tracked.flags {
            pass.stats.matched += 1;
        } else {
            debug!("updated flags of message {} to {}", msg.uid, merged);
            pass.stats.updated += 1;
        }

        Ok(())
    }

    fn fetch_new_messages(&self, tracker: &TrackedFolder, pass: &mut Pass, last_uid: Uid) -> Result<()> {
        let folder_id = tracker.folder_id;

        for msg in self.remote.fetch_messages(&UidRange::from(last_uid + 1))? {
            let msg = msg?;

            if msg.uid <= last_uid || pass.tracked_uids.contains(&msg.uid) {
                trace!("remote message {} already tracked, skipping it", msg.uid);
                continue;
            }

            let email = match ParsedEmail::parse(msg.body) {
                Ok(email) => email.with_fallback_date(msg.internal_date),
                Err(err) => {
                    warn!("cannot parse remote message {}, skipping it: {}", msg.uid, err);
                    continue;
                }
            };

            let flags = self.flags.to_bits(&msg.flags);
            let item_id = self.commit(|| {
                let item_id = self.local.create_message(folder_id, &email, flags)?;
                self.cache
                    .put_message(folder_id, &TrackedMessage::new(item_id, msg.uid, flags))?;
                Ok(item_id)
            })?;

            debug!("added remote message {} as local message {}", msg.uid, item_id);
            pass.tracked_uids.insert(msg.uid);
            pass.stats.added_locally += 1;
        }

        Ok(())
    }

    fn push_local_messages(&self, tracker: &TrackedFolder, pass: &mut Pass) -> Result<()> {
        let ids: Vec<ItemId> = pass.local_ids.iter().copied().collect();

        for id in ids {
            let msg = match self.read(|| Ok(self.local.get_message(id)?)) {
                Ok(msg) => msg,
                Err(err) if err.is_not_found() => {
                    debug!("local message {} vanished, skipping it", id);
                    continue;
                }
                Err(err) => return Err(err),
            };

            let flags = msg.flags & self.flags.mask();
            let uid = self
                .remote
                .append(&tracker.remote_path, &msg.raw, &self.flags.to_flags(flags))?
                .ok_or_else(|| Error::AppendWithoutUidError(id, tracker.remote_path.clone()))?;

            self.commit(|| {
                self.cache
                    .put_message(tracker.folder_id, &TrackedMessage::new(id, uid, flags))
            })?;

            debug!("added local message {} as remote message {}", id, uid);
            pass.local_ids.remove(&id);
            pass.stats.added_remotely += 1;
        }

        Ok(())
    }

    fn delete_remote_messages(&self, tracker: &TrackedFolder, pass: &mut Pass) -> Result<()> {
        if pass.deletes.is_empty() {
            return Ok(());
        }

        let uid_plus = self.remote.has_capability(Capability::UidPlus)?;
        let deleted = Flags::from_iter([Flag::Deleted]);

        for chunk in pass.deletes.chunks(self.delete_batch_size) {
            let uids: UidSet = chunk.iter().map(|msg| msg.uid).collect();
            debug!("deleting remote messages {} of folder {}", uids, tracker.remote_path);

            self.remote.uid_store(&uids, StoreMode::Add, &deleted)?;
            if uid_plus {
                self.remote.uid_expunge(&uids)?;
            }

            self.commit(|| {
                for msg in chunk {
                    self.cache.delete_message(tracker.folder_id, msg.item_id)?;
                }
                Ok(())
            })?;
            pass.stats.deleted_remotely += chunk.len();
        }

        if !uid_plus {
            warn!(
                "server does not support UIDPLUS, expunging the whole folder {}",
                tracker.remote_path
            );
            self.remote.expunge()?;
        }

        pass.deletes.clear();
        Ok(())
    }
}
