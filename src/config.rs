//! Config module.
//!
//! This module contains the representation of the synchronization
//! configuration of a mailbox.

use log::debug;
use std::{
    collections::HashMap,
    env, fs, io,
    num::ParseIntError,
    path::PathBuf,
    result,
    str::FromStr,
    time::Duration,
};
use thiserror::Error;

pub const DEFAULT_LOCK_TIMEOUT: u64 = 60;
pub const DEFAULT_LOCK_MAX_WAITERS: usize = 15;
pub const DEFAULT_DELETE_BATCH_SIZE: usize = 16;
pub const DEFAULT_LOCAL_ROOT: &str = "Imported";

pub const LOCK_TIMEOUT_ENV: &str = "MAILBOX_LOCK_TIMEOUT";
pub const LOCK_MAX_WAITERS_ENV: &str = "MAILBOX_LOCK_MAX_WAITERS";
pub const DELETE_BATCH_SIZE_ENV: &str = "MAILBOX_SYNC_DELETE_BATCH_SIZE";
pub const SYNC_DIR_ENV: &str = "MAILBOX_SYNC_DIR";

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot parse environment variable {1} with value {2:?}")]
    ParseEnvVarError(#[source] ParseIntError, String, String),
    #[error("cannot get XDG_DATA_HOME directory")]
    GetXdgDataDirError,
    #[error("cannot expand sync directory {1}")]
    ExpandSyncDirError(#[source] shellexpand::LookupError<env::VarError>, String),
    #[error("cannot create sync directory {1}")]
    CreateSyncDirError(#[source] io::Error, PathBuf),
}

pub type Result<T> = result::Result<T, Error>;

/// Represents the synchronization configuration of a mailbox.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct SyncConfig {
    /// Represents the name of the mailbox. It keys every row of the
    /// tracking database.
    pub name: String,
    /// Represents the directory holding the tracking database.
    pub sync_dir: Option<PathBuf>,
    /// Represents the local folder under which remote folders are
    /// mirrored. Local folders outside of it are not synchronized.
    pub local_root: Option<String>,
    /// Maps remote folder paths to custom local names (relative to
    /// the local root).
    pub folder_aliases: HashMap<String, String>,

    /// Represents the maximum time, in seconds, to wait for the
    /// mailbox lock.
    pub lock_timeout: Option<u64>,
    /// Represents the maximum number of acquirers allowed to wait
    /// for the mailbox lock.
    pub lock_max_waiters: Option<usize>,
    /// Represents the number of UIDs deleted per remote round trip.
    pub delete_batch_size: Option<usize>,
}

impl SyncConfig {
    pub fn new<N: ToString>(name: N) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Overrides the configuration with the values found in the
    /// environment.
    pub fn from_env(mut self) -> Result<Self> {
        if let Some(timeout) = parse_env_var(LOCK_TIMEOUT_ENV)? {
            self.lock_timeout = Some(timeout);
        }
        if let Some(max) = parse_env_var(LOCK_MAX_WAITERS_ENV)? {
            self.lock_max_waiters = Some(max);
        }
        if let Some(size) = parse_env_var(DELETE_BATCH_SIZE_ENV)? {
            self.delete_batch_size = Some(size);
        }
        if let Ok(dir) = env::var(SYNC_DIR_ENV) {
            self.sync_dir = Some(dir.into());
        }
        debug!("sync config from env: {:?}", self);
        Ok(self)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout.unwrap_or(DEFAULT_LOCK_TIMEOUT))
    }

    pub fn lock_max_waiters(&self) -> usize {
        self.lock_max_waiters.unwrap_or(DEFAULT_LOCK_MAX_WAITERS)
    }

    pub fn delete_batch_size(&self) -> usize {
        self.delete_batch_size
            .unwrap_or(DEFAULT_DELETE_BATCH_SIZE)
            .max(1)
    }

    pub fn local_root(&self) -> &str {
        self.local_root
            .as_deref()
            .unwrap_or(DEFAULT_LOCAL_ROOT)
            .trim_matches('/')
    }

    pub fn folder_alias(&self, remote_path: &str) -> Option<&str> {
        self.folder_aliases
            .iter()
            .find(|(remote, _)| remote.eq_ignore_ascii_case(remote_path))
            .map(|(_, local)| local.as_str())
    }

    /// Returns the sync directory, creating it if needed.
    pub fn sync_dir(&self) -> Result<PathBuf> {
        let dir = match &self.sync_dir {
            Some(dir) => {
                let dir = dir.to_string_lossy();
                shellexpand::full(&dir)
                    .map(|dir| PathBuf::from(dir.as_ref()))
                    .map_err(|err| Error::ExpandSyncDirError(err, dir.to_string()))?
            }
            None => dirs::data_dir()
                .ok_or(Error::GetXdgDataDirError)?
                .join("mailbox-sync"),
        };

        if !dir.is_dir() {
            fs::create_dir_all(&dir).map_err(|err| Error::CreateSyncDirError(err, dir.clone()))?;
        }

        Ok(dir)
    }

    pub fn tracking_db_path(&self) -> Result<PathBuf> {
        Ok(self.sync_dir()?.join("tracking.sqlite"))
    }
}

fn parse_env_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr<Err = ParseIntError>,
{
    match env::var(name) {
        Ok(val) => val
            .trim()
            .parse()
            .map(Some)
            .map_err(|err| Error::ParseEnvVarError(err, name.to_owned(), val)),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::SyncConfig;

    #[test]
    fn defaults() {
        let config = SyncConfig::new("account");

        assert_eq!(config.lock_timeout(), Duration::from_secs(60));
        assert_eq!(config.lock_max_waiters(), 15);
        assert_eq!(config.delete_batch_size(), 16);
        assert_eq!(config.local_root(), "Imported");
    }

    #[test]
    fn batch_size_is_never_zero() {
        let config = SyncConfig {
            delete_batch_size: Some(0),
            ..SyncConfig::default()
        };

        assert_eq!(config.delete_batch_size(), 1);
    }

    #[test]
    fn folder_alias_is_case_insensitive() {
        let mut config = SyncConfig::new("account");
        config
            .folder_aliases
            .insert("INBOX".into(), "Inbox".into());

        assert_eq!(config.folder_alias("inbox"), Some("Inbox"));
        assert_eq!(config.folder_alias("Sent"), None);
    }
}
