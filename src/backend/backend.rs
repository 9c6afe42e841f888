//! Backend module.
//!
//! This module exposes the two stores a folder synchronization
//! bridges: the remote folder client, speaking a UID-addressed
//! protocol, and the local store, holding items addressed by integer
//! ids.

use chrono::{DateTime, FixedOffset};
use std::{fmt, result};
use thiserror::Error;

use crate::{FlagBits, Flags, Folders, ParsedEmail};

#[cfg(feature = "maildir-backend")]
use crate::backend::{id_mapper, maildir};

#[cfg(feature = "imap-backend")]
use crate::backend::imap;

pub type Uid = u32;
pub type ItemId = u32;
pub type FolderId = u32;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot find folder {0}")]
    FolderNotFoundError(String),
    #[error("cannot find item {0}")]
    ItemNotFoundError(ItemId),
    #[error("cannot create folder {0}: folder already exists")]
    FolderAlreadyExistsError(String),
    #[error("cannot {0}: no folder selected")]
    NoFolderSelectedError(String),
    #[error("command {0} failed: {1}")]
    CommandFailedError(String, String),

    #[cfg(feature = "maildir-backend")]
    #[error(transparent)]
    IdMapperError(#[from] id_mapper::Error),
    #[cfg(feature = "imap-backend")]
    #[error(transparent)]
    ImapBackendError(#[from] imap::Error),
    #[cfg(feature = "maildir-backend")]
    #[error(transparent)]
    MaildirBackendError(#[from] maildir::Error),
}

impl Error {
    /// Returns `true` if the error means that a folder or an item
    /// vanished between check and use.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::FolderNotFoundError(_) | Self::ItemNotFoundError(_) => true,
            #[cfg(feature = "maildir-backend")]
            Self::MaildirBackendError(err) => err.is_not_found(),
            _ => false,
        }
    }

    /// Returns `true` if the error comes from a local store.
    pub fn is_local(&self) -> bool {
        match self {
            #[cfg(feature = "maildir-backend")]
            Self::IdMapperError(_) | Self::MaildirBackendError(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = result::Result<T, Error>;

/// Represents the state of a remote folder, as returned by SELECT.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FolderStatus {
    pub uid_validity: u32,
    /// The next UID hint, `None` when the server does not announce
    /// it.
    pub uid_next: Option<Uid>,
    pub exists: u32,
}

/// Represents a range of UIDs. An open range ends with the highest
/// UID of the folder.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct UidRange {
    pub start: Uid,
    pub end: Option<Uid>,
}

impl UidRange {
    pub fn new(start: Uid, end: Uid) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    pub fn from(start: Uid) -> Self {
        Self { start, end: None }
    }
}

impl fmt::Display for UidRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "{}:{}", self.start, end),
            None => write!(f, "{}:*", self.start),
        }
    }
}

/// Represents a set of UIDs, displayed as a compact sequence set.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UidSet(pub Vec<Uid>);

impl UidSet {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, uid: Uid) -> bool {
        self.0.contains(&uid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Uid> {
        self.0.iter()
    }
}

impl From<&[Uid]> for UidSet {
    fn from(uids: &[Uid]) -> Self {
        Self(uids.to_vec())
    }
}

impl FromIterator<Uid> for UidSet {
    fn from_iter<T: IntoIterator<Item = Uid>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for UidSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut uids = self.0.clone();
        uids.sort_unstable();
        uids.dedup();

        let mut glue = "";
        let mut uids = uids.into_iter().peekable();
        while let Some(start) = uids.next() {
            let mut end = start;
            while uids.peek() == Some(&(end + 1)) {
                end += 1;
                uids.next();
            }
            if start == end {
                write!(f, "{glue}{start}")?;
            } else {
                write!(f, "{glue}{start}:{end}")?;
            }
            glue = ",";
        }

        Ok(())
    }
}

/// Represents the flags of a remote message.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FetchedFlags {
    pub uid: Uid,
    pub flags: Flags,
}

/// Represents a remote message fetched with its body.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FetchedMessage {
    pub uid: Uid,
    pub flags: Flags,
    pub internal_date: Option<DateTime<FixedOffset>>,
    pub body: Vec<u8>,
}

/// Represents the finite sequence of messages returned by a fetch.
pub type FetchedMessages<'a> = Box<dyn Iterator<Item = Result<FetchedMessage>> + 'a>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StoreMode {
    Add,
    Remove,
    Set,
}

impl fmt::Display for StoreMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => write!(f, "+FLAGS.SILENT"),
            Self::Remove => write!(f, "-FLAGS.SILENT"),
            Self::Set => write!(f, "FLAGS.SILENT"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Capability {
    /// Allows to expunge a given set of UIDs instead of every
    /// message flagged as deleted.
    UidPlus,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UidPlus => "UIDPLUS",
        }
    }
}

/// Represents the client of a remote, UID-addressed message store.
///
/// Message-level commands apply to the folder selected last.
pub trait RemoteFolderClient {
    fn list(&self, pattern: &str) -> Result<Folders>;
    fn select(&self, path: &str) -> Result<FolderStatus>;
    fn create(&self, path: &str) -> Result<()>;
    fn rename(&self, from: &str, to: &str) -> Result<()>;
    fn delete(&self, path: &str) -> Result<()>;

    fn fetch_flags(&self, range: &UidRange) -> Result<Vec<FetchedFlags>>;
    fn fetch_messages(&self, range: &UidRange) -> Result<FetchedMessages<'_>>;
    fn uid_store(&self, uids: &UidSet, mode: StoreMode, flags: &Flags) -> Result<()>;
    fn uid_expunge(&self, uids: &UidSet) -> Result<()>;
    fn expunge(&self) -> Result<()>;
    fn has_capability(&self, capability: Capability) -> Result<bool>;

    /// Appends a message to the given folder and returns its UID,
    /// when the server tells it.
    fn append(&self, path: &str, email: &[u8], flags: &Flags) -> Result<Option<Uid>>;
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ItemKind {
    Message,
    Chat,
}

/// Represents a local folder.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LocalFolder {
    pub id: FolderId,
    /// The absolute path of the folder, segments being separated by
    /// slashes.
    pub path: String,
}

/// Represents a local message.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LocalMessage {
    pub id: ItemId,
    pub folder: FolderId,
    pub kind: ItemKind,
    pub flags: FlagBits,
    pub raw: Vec<u8>,
}

/// Represents the local store.
pub trait LocalStore {
    fn list_folders(&self) -> Result<Vec<LocalFolder>>;
    fn get_folder(&self, id: FolderId) -> Result<LocalFolder>;
    fn get_folder_by_path(&self, path: &str) -> Result<LocalFolder>;
    fn create_folder(&self, path: &str) -> Result<LocalFolder>;
    fn delete_folder(&self, id: FolderId) -> Result<()>;
    fn empty_folder(&self, id: FolderId) -> Result<()>;

    fn list_item_ids(&self, kind: ItemKind, folder: FolderId) -> Result<Vec<ItemId>>;
    fn get_message(&self, id: ItemId) -> Result<LocalMessage>;
    fn create_message(&self, folder: FolderId, email: &ParsedEmail, flags: FlagBits)
        -> Result<ItemId>;
    fn set_flags(&self, id: ItemId, flags: FlagBits) -> Result<()>;
    fn delete_item(&self, id: ItemId) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::{UidRange, UidSet};

    #[test]
    fn uid_set_as_sequence_set() {
        assert_eq!(UidSet(vec![]).to_string(), "");
        assert_eq!(UidSet(vec![4]).to_string(), "4");
        assert_eq!(UidSet(vec![3, 1, 2, 5, 7, 8]).to_string(), "1:3,5,7:8");
    }

    #[test]
    fn uid_range() {
        assert_eq!(UidRange::new(1, 42).to_string(), "1:42");
        assert_eq!(UidRange::from(43).to_string(), "43:*");
    }
}
