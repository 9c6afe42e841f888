use std::{io, result};
use thiserror::Error;

use crate::{backend, config, email, lock, ItemId};

/// Represents the class of a synchronization failure, which tells
/// the caller how to react to it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// A folder or a message vanished between check and use.
    NotFound,
    /// The remote side rejected a command. The pass should be retried
    /// on the next schedule.
    ProtocolFailure,
    /// A fetched message could not be parsed.
    ParseFailure,
    LockTimeout,
    LockCapacityExceeded,
    Interrupted,
    UnbalancedRelease,
    /// The tracking database or the local store failed.
    Storage,
    Config,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot lock synchronization of mailbox {1}")]
    LockMailboxSyncError(#[source] io::Error, String),
    #[error("cannot append local message {0} to remote folder {1}: no uid returned")]
    AppendWithoutUidError(ItemId, String),

    #[error(transparent)]
    ConfigError(#[from] config::Error),
    #[error(transparent)]
    CacheError(#[from] rusqlite::Error),
    #[error(transparent)]
    BackendError(#[from] backend::Error),
    #[error(transparent)]
    LockError(#[from] lock::Error),
    #[error(transparent)]
    ParseEmailError(#[from] email::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::LockMailboxSyncError(..) => ErrorKind::Storage,
            Self::AppendWithoutUidError(..) => ErrorKind::ProtocolFailure,
            Self::ConfigError(_) => ErrorKind::Config,
            Self::CacheError(_) => ErrorKind::Storage,
            Self::BackendError(err) if err.is_not_found() => ErrorKind::NotFound,
            Self::BackendError(err) if err.is_local() => ErrorKind::Storage,
            Self::BackendError(_) => ErrorKind::ProtocolFailure,
            Self::LockError(lock::Error::TimeoutError(..)) => ErrorKind::LockTimeout,
            Self::LockError(lock::Error::CapacityExceededError(..)) => {
                ErrorKind::LockCapacityExceeded
            }
            Self::LockError(lock::Error::InterruptedError(..)) => ErrorKind::Interrupted,
            Self::LockError(lock::Error::UnbalancedReleaseError(..)) => {
                ErrorKind::UnbalancedRelease
            }
            Self::ParseEmailError(_) => ErrorKind::ParseFailure,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

pub type Result<T> = result::Result<T, Error>;
