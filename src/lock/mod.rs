pub mod mailbox_lock;

pub use self::mailbox_lock::{Error, LockMode, MailboxLock, MailboxLockGuard, Result};
