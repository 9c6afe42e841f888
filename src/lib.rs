pub mod config;
pub use config::SyncConfig;

pub(crate) mod process;

pub mod lock;
pub use lock::{LockMode, MailboxLock, MailboxLockGuard};

pub mod backend;
pub use backend::*;

pub mod domain;
pub use domain::*;
