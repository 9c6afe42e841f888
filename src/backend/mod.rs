mod backend;
pub use self::backend::{
    Capability, Error, FetchedFlags, FetchedMessage, FetchedMessages, FolderId, FolderStatus,
    ItemId, ItemKind, LocalFolder, LocalMessage, LocalStore, RemoteFolderClient, Result,
    StoreMode, Uid, UidRange, UidSet,
};

pub mod memory;
pub use self::memory::{MemoryRemote, MemoryStore};

#[cfg(feature = "imap-backend")]
pub mod imap;
#[cfg(feature = "imap-backend")]
pub use self::imap::{ImapBackend, ImapConfig};

#[cfg(feature = "maildir-backend")]
pub mod id_mapper;
#[cfg(feature = "maildir-backend")]
pub use self::id_mapper::IdMapper;

#[cfg(feature = "maildir-backend")]
pub mod maildir;
#[cfg(feature = "maildir-backend")]
pub use self::maildir::{MaildirBackend, MaildirConfig};
