//! Folder module.
//!
//! This module contains the representation of a remote folder, as
//! returned by a folder listing.

use serde::Serialize;
use std::fmt;

/// Represents the folder.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Folder {
    /// Represents the folder hierarchie delimiter.
    pub delim: String,
    /// Represents the folder name, which is also its full path.
    pub name: String,
    /// Represents the folder ability to contain messages. Listing
    /// attributes like `\Noselect` make a folder unselectable.
    pub selectable: bool,
}

impl Folder {
    pub fn new<D: ToString, N: ToString>(delim: D, name: N) -> Self {
        Self {
            delim: delim.to_string(),
            name: name.to_string(),
            selectable: true,
        }
    }

    pub fn unselectable(mut self) -> Self {
        self.selectable = false;
        self
    }
}

impl fmt::Display for Folder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}
