//! Tracked state module.
//!
//! This module contains the SQLite-backed memory of prior
//! convergence: which local folder is paired with which remote
//! folder, and which local item is paired with which remote UID.

use chrono::{DateTime, Utc};
use log::{trace, warn};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::Path,
};

use crate::{FlagBits, FolderId, ItemId, Uid};

use super::Result;

const CREATE_FOLDERS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS folders (
        mailbox      TEXT    NOT NULL,
        folder_id    INTEGER NOT NULL,
        local_path   TEXT    NOT NULL,
        remote_path  TEXT    NOT NULL,
        uid_validity INTEGER NOT NULL,
        last_sync    TEXT,
        UNIQUE(mailbox, folder_id),
        UNIQUE(mailbox, remote_path)
    )
";

const CREATE_MESSAGES_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS messages (
        mailbox   TEXT    NOT NULL,
        folder_id INTEGER NOT NULL,
        item_id   INTEGER NOT NULL,
        uid       INTEGER NOT NULL,
        flags     INTEGER NOT NULL,
        UNIQUE(mailbox, folder_id, item_id),
        UNIQUE(mailbox, folder_id, uid)
    )
";

const INSERT_FOLDER: &str = "
    INSERT INTO folders
    VALUES (?, ?, ?, ?, ?, ?)
";

const UPDATE_FOLDER: &str = "
    UPDATE folders
    SET local_path = ?, remote_path = ?, uid_validity = ?, last_sync = ?
    WHERE mailbox = ?
    AND folder_id = ?
";

const DELETE_FOLDER: &str = "
    DELETE FROM folders
    WHERE mailbox = ?
    AND folder_id = ?
";

const SELECT_FOLDER: &str = "
    SELECT folder_id, local_path, remote_path, uid_validity, last_sync
    FROM folders
    WHERE mailbox = ?
    AND folder_id = ?
";

const SELECT_FOLDER_BY_REMOTE_PATH: &str = "
    SELECT folder_id, local_path, remote_path, uid_validity, last_sync
    FROM folders
    WHERE mailbox = ?
    AND remote_path = ?
";

const SELECT_FOLDERS: &str = "
    SELECT folder_id, local_path, remote_path, uid_validity, last_sync
    FROM folders
    WHERE mailbox = ?
    ORDER BY folder_id
";

const INSERT_MESSAGE: &str = "
    INSERT OR REPLACE INTO messages
    VALUES (?, ?, ?, ?, ?)
";

const UPDATE_MESSAGE_FLAGS: &str = "
    UPDATE messages
    SET flags = ?
    WHERE mailbox = ?
    AND folder_id = ?
    AND item_id = ?
";

const DELETE_MESSAGE: &str = "
    DELETE FROM messages
    WHERE mailbox = ?
    AND folder_id = ?
    AND item_id = ?
";

const DELETE_MESSAGES: &str = "
    DELETE FROM messages
    WHERE mailbox = ?
    AND folder_id = ?
";

const SELECT_MESSAGES: &str = "
    SELECT item_id, uid, flags
    FROM messages
    WHERE mailbox = ?
    AND folder_id = ?
    ORDER BY uid
";

const SELECT_MAX_UID: &str = "
    SELECT COALESCE(MAX(uid), 0)
    FROM messages
    WHERE mailbox = ?
    AND folder_id = ?
";

/// Represents the pairing of a local folder with a remote folder.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TrackedFolder {
    pub folder_id: FolderId,
    pub local_path: String,
    pub remote_path: String,
    /// Represents the UID epoch of the remote folder the tracked
    /// messages belong to. Zero means the folder was never selected.
    pub uid_validity: u32,
    pub last_sync: Option<DateTime<Utc>>,
}

impl TrackedFolder {
    pub fn new<L, R>(folder_id: FolderId, local_path: L, remote_path: R, uid_validity: u32) -> Self
    where
        L: ToString,
        R: ToString,
    {
        Self {
            folder_id,
            local_path: local_path.to_string(),
            remote_path: remote_path.to_string(),
            uid_validity,
            last_sync: None,
        }
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let last_sync: Option<String> = row.get(4)?;
        Ok(Self {
            folder_id: row.get(0)?,
            local_path: row.get(1)?,
            remote_path: row.get(2)?,
            uid_validity: row.get(3)?,
            last_sync: last_sync.and_then(|date| match DateTime::parse_from_rfc3339(&date) {
                Ok(date) => Some(date.with_timezone(&Utc)),
                Err(err) => {
                    warn!("invalid last sync date {}, skipping it: {}", date, err);
                    None
                }
            }),
        })
    }
}

/// Represents the pairing of a local item with a remote UID, along
/// with the last converged flags.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TrackedMessage {
    pub item_id: ItemId,
    pub uid: Uid,
    pub flags: FlagBits,
}

impl TrackedMessage {
    pub fn new(item_id: ItemId, uid: Uid, flags: FlagBits) -> Self {
        Self {
            item_id,
            uid,
            flags,
        }
    }
}

/// Represents the tracked messages of a folder, indexed both by UID
/// and by local item id.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TrackedMessages {
    by_uid: BTreeMap<Uid, TrackedMessage>,
    by_item: HashMap<ItemId, Uid>,
}

impl TrackedMessages {
    pub fn insert(&mut self, msg: TrackedMessage) {
        if let Some(prev) = self.by_uid.insert(msg.uid, msg) {
            self.by_item.remove(&prev.item_id);
        }
        if let Some(prev_uid) = self.by_item.insert(msg.item_id, msg.uid) {
            if prev_uid != msg.uid {
                self.by_uid.remove(&prev_uid);
            }
        }
    }

    pub fn get_by_uid(&self, uid: Uid) -> Option<&TrackedMessage> {
        self.by_uid.get(&uid)
    }

    pub fn get_by_item(&self, item_id: ItemId) -> Option<&TrackedMessage> {
        self.by_item
            .get(&item_id)
            .and_then(|uid| self.by_uid.get(uid))
    }

    pub fn contains_uid(&self, uid: Uid) -> bool {
        self.by_uid.contains_key(&uid)
    }

    pub fn contains_item(&self, item_id: ItemId) -> bool {
        self.by_item.contains_key(&item_id)
    }

    pub fn remove_by_uid(&mut self, uid: Uid) -> Option<TrackedMessage> {
        let msg = self.by_uid.remove(&uid)?;
        self.by_item.remove(&msg.item_id);
        Some(msg)
    }

    pub fn max_uid(&self) -> Uid {
        self.by_uid.keys().next_back().copied().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.by_uid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_uid.is_empty()
    }

    /// Iterates over the tracked messages, ordered by UID.
    pub fn iter(&self) -> impl Iterator<Item = &TrackedMessage> {
        self.by_uid.values()
    }

    pub fn item_ids(&self) -> HashSet<ItemId> {
        self.by_item.keys().copied().collect()
    }
}

impl FromIterator<TrackedMessage> for TrackedMessages {
    fn from_iter<T: IntoIterator<Item = TrackedMessage>>(iter: T) -> Self {
        let mut msgs = Self::default();
        for msg in iter {
            msgs.insert(msg);
        }
        msgs
    }
}

/// Represents the persisted tracking state of a mailbox.
pub struct Cache {
    mailbox: String,
    conn: Connection,
}

impl Cache {
    fn init(mailbox: String, conn: Connection) -> Result<Self> {
        conn.execute(CREATE_FOLDERS_TABLE, [])?;
        conn.execute(CREATE_MESSAGES_TABLE, [])?;
        Ok(Self { mailbox, conn })
    }

    /// Opens the tracking database at the given path, creating it if
    /// needed.
    pub fn new<M, P>(mailbox: M, db_path: P) -> Result<Self>
    where
        M: ToString,
        P: AsRef<Path>,
    {
        trace!("opening tracking database {:?}", db_path.as_ref());
        Self::init(mailbox.to_string(), Connection::open(db_path)?)
    }

    pub fn open_in_memory<M: ToString>(mailbox: M) -> Result<Self> {
        Self::init(mailbox.to_string(), Connection::open_in_memory()?)
    }

    pub fn mailbox(&self) -> &str {
        &self.mailbox
    }

    pub fn get_folder(&self, folder_id: FolderId) -> Result<Option<TrackedFolder>> {
        Ok(self
            .conn
            .query_row(
                SELECT_FOLDER,
                params![self.mailbox, folder_id],
                TrackedFolder::from_row,
            )
            .optional()?)
    }

    pub fn get_folder_by_remote_path(&self, remote_path: &str) -> Result<Option<TrackedFolder>> {
        Ok(self
            .conn
            .query_row(
                SELECT_FOLDER_BY_REMOTE_PATH,
                params![self.mailbox, remote_path],
                TrackedFolder::from_row,
            )
            .optional()?)
    }

    pub fn list_folders(&self) -> Result<Vec<TrackedFolder>> {
        let mut stmt = self.conn.prepare(SELECT_FOLDERS)?;
        let folders = stmt
            .query_map(params![self.mailbox], TrackedFolder::from_row)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(folders)
    }

    pub fn insert_folder(&self, folder: &TrackedFolder) -> Result<()> {
        self.conn.execute(
            INSERT_FOLDER,
            params![
                self.mailbox,
                folder.folder_id,
                folder.local_path,
                folder.remote_path,
                folder.uid_validity,
                folder.last_sync.map(|date| date.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub fn update_folder(&self, folder: &TrackedFolder) -> Result<()> {
        self.conn.execute(
            UPDATE_FOLDER,
            params![
                folder.local_path,
                folder.remote_path,
                folder.uid_validity,
                folder.last_sync.map(|date| date.to_rfc3339()),
                self.mailbox,
                folder.folder_id,
            ],
        )?;
        Ok(())
    }

    /// Deletes the tracked folder along with its tracked messages.
    pub fn delete_folder(&self, folder_id: FolderId) -> Result<()> {
        self.delete_messages(folder_id)?;
        self.conn
            .execute(DELETE_FOLDER, params![self.mailbox, folder_id])?;
        Ok(())
    }

    pub fn messages(&self, folder_id: FolderId) -> Result<TrackedMessages> {
        let mut stmt = self.conn.prepare(SELECT_MESSAGES)?;
        let msgs = stmt
            .query_map(params![self.mailbox, folder_id], |row| {
                Ok(TrackedMessage {
                    item_id: row.get(0)?,
                    uid: row.get(1)?,
                    flags: FlagBits(row.get(2)?),
                })
            })?
            .collect::<rusqlite::Result<_>>()?;
        Ok(msgs)
    }

    pub fn put_message(&self, folder_id: FolderId, msg: &TrackedMessage) -> Result<()> {
        self.conn.execute(
            INSERT_MESSAGE,
            params![self.mailbox, folder_id, msg.item_id, msg.uid, msg.flags.bits()],
        )?;
        Ok(())
    }

    pub fn set_message_flags(&self, folder_id: FolderId, item_id: ItemId, flags: FlagBits) -> Result<()> {
        self.conn.execute(
            UPDATE_MESSAGE_FLAGS,
            params![flags.bits(), self.mailbox, folder_id, item_id],
        )?;
        Ok(())
    }

    pub fn delete_message(&self, folder_id: FolderId, item_id: ItemId) -> Result<()> {
        self.conn
            .execute(DELETE_MESSAGE, params![self.mailbox, folder_id, item_id])?;
        Ok(())
    }

    pub fn delete_messages(&self, folder_id: FolderId) -> Result<()> {
        self.conn
            .execute(DELETE_MESSAGES, params![self.mailbox, folder_id])?;
        Ok(())
    }

    pub fn max_uid(&self, folder_id: FolderId) -> Result<Uid> {
        Ok(self
            .conn
            .query_row(SELECT_MAX_UID, params![self.mailbox, folder_id], |row| {
                row.get(0)
            })?)
    }

    /// Returns the given local ids that are not tracked, preserving
    /// their order.
    pub fn list_untracked(&self, folder_id: FolderId, local_ids: &[ItemId]) -> Result<Vec<ItemId>> {
        let tracked = self.messages(folder_id)?;
        Ok(local_ids
            .iter()
            .copied()
            .filter(|id| !tracked.contains_item(*id))
            .collect())
    }
}
