//! Folder mapper module.
//!
//! This module contains the mapping between remote folder paths and
//! local folder paths. Remote folders are mirrored under a local root
//! folder; local folders outside of this root are out of the sync
//! scope.

use crate::SyncConfig;

pub const DEFAULT_DELIM: &str = "/";

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FolderMapper {
    root: String,
    aliases: Vec<(String, String)>,
    delim: String,
}

impl FolderMapper {
    pub fn new(config: &SyncConfig) -> Self {
        let mut aliases: Vec<(String, String)> = config
            .folder_aliases
            .iter()
            .map(|(remote, local)| (remote.clone(), local.trim_matches('/').to_owned()))
            .collect();
        aliases.sort();

        Self {
            root: config.local_root().to_owned(),
            aliases,
            delim: DEFAULT_DELIM.to_owned(),
        }
    }

    /// Sets the delimiter used to build the remote path of local
    /// folders.
    pub fn with_delim<D: ToString>(mut self, delim: D) -> Self {
        let delim = delim.to_string();
        if !delim.is_empty() {
            self.delim = delim;
        }
        self
    }

    pub fn delim(&self) -> &str {
        &self.delim
    }

    /// Returns the absolute path of the local root folder.
    pub fn root_path(&self) -> String {
        format!("/{}", self.root)
    }

    /// Maps the given remote folder path to a local folder path.
    pub fn local_path(&self, remote_path: &str, delim: &str) -> String {
        let relative = match self
            .aliases
            .iter()
            .find(|(remote, _)| remote.eq_ignore_ascii_case(remote_path))
        {
            Some((_, local)) => local.clone(),
            None if delim.is_empty() || delim == "/" => remote_path.trim_matches('/').to_owned(),
            None => remote_path
                .split(delim)
                .filter(|segment| !segment.is_empty())
                .collect::<Vec<_>>()
                .join("/"),
        };

        if self.root.is_empty() {
            format!("/{}", relative)
        } else {
            format!("/{}/{}", self.root, relative)
        }
    }

    /// Maps the given local folder path to a remote folder path.
    /// Returns `None` if the local folder is outside of the sync
    /// scope.
    pub fn remote_path(&self, local_path: &str) -> Option<String> {
        let local_path = local_path.trim_matches('/');
        let relative = if self.root.is_empty() {
            local_path
        } else {
            local_path
                .strip_prefix(&self.root)?
                .strip_prefix('/')?
        };

        if relative.is_empty() {
            return None;
        }

        match self
            .aliases
            .iter()
            .find(|(_, local)| local.eq_ignore_ascii_case(relative))
        {
            Some((remote, _)) => Some(remote.clone()),
            None => Some(relative.split('/').collect::<Vec<_>>().join(&self.delim)),
        }
    }

    pub fn is_in_scope(&self, local_path: &str) -> bool {
        self.remote_path(local_path).is_some()
    }
}
