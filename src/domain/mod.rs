pub mod email;
pub use email::ParsedEmail;

pub mod flag;
pub use flag::{Flag, FlagBits, FlagTable, Flags};

pub mod folder;
pub use folder::{
    sync::{FolderSync, MailboxSync, SyncReport, SyncStatistics},
    Folder, FolderMapper, Folders,
};
