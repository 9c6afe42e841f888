//! Folders module.
//!
//! This module contains the representation of the email folders.

use std::ops;

use serde::Serialize;

use crate::Folder;

/// Represents the list of folders.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Folders(pub Vec<Folder>);

impl Folders {
    pub fn find(&self, name: &str) -> Option<&Folder> {
        self.iter().find(|folder| folder.name == name)
    }

    /// Returns the hierarchy delimiter of the first folder that has
    /// one.
    pub fn delim(&self) -> Option<&str> {
        self.iter()
            .map(|folder| folder.delim.as_str())
            .find(|delim| !delim.is_empty())
    }
}

impl ops::Deref for Folders {
    type Target = Vec<Folder>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl ops::DerefMut for Folders {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl FromIterator<Folder> for Folders {
    fn from_iter<T: IntoIterator<Item = Folder>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
