use serde::Serialize;
use std::{collections::BTreeSet, fmt, ops};

use crate::Flag;

/// Represents the set of flags of a message, as exchanged with the
/// remote side.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct Flags(pub BTreeSet<Flag>);

impl Flags {
    pub fn clone_without_customs(&self) -> Self {
        Self::from_iter(
            self.iter()
                .filter(|f| !matches!(f, Flag::Custom(_)))
                .cloned(),
        )
    }

    /// Builds the parenthesized list used by STORE and APPEND
    /// commands.
    pub fn to_imap_query(&self) -> String {
        self.iter()
            .map(Flag::to_imap_query)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut glue = "";

        for flag in &self.0 {
            write!(f, "{glue}{flag}")?;
            glue = " ";
        }

        Ok(())
    }
}

impl ops::Deref for Flags {
    type Target = BTreeSet<Flag>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl ops::DerefMut for Flags {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<&str> for Flags {
    fn from(flags: &str) -> Self {
        Flags(
            flags
                .split_whitespace()
                .map(|flag| flag.trim().into())
                .collect(),
        )
    }
}

impl FromIterator<Flag> for Flags {
    fn from_iter<T: IntoIterator<Item = Flag>>(iter: T) -> Self {
        let mut flags = Flags::default();
        flags.extend(iter);
        flags
    }
}
