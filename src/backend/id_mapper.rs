//! Id mapper module.
//!
//! This module contains the representation of the maildir id
//! mapper. Maildir entries are addressed by unique file names, which
//! the id mapper maps to the integer ids the synchronization tracks.
//! The map is persisted next to the maildir so ids survive restarts.

use log::{debug, trace};
use std::{
    collections::{BTreeMap, HashMap},
    fs,
    io::{self, prelude::*},
    path::{Path, PathBuf},
    result,
};
use thiserror::Error;

pub const ID_MAPPER_FILE_NAME: &str = ".mailbox-sync-id-map";

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot parse id mapper line {0:?}")]
    ParseLineError(String),

    #[error("cannot open id mapper file {1}")]
    OpenIdMapFileError(#[source] io::Error, PathBuf),
    #[error("cannot write id mapper file {1}")]
    WriteIdMapFileError(#[source] io::Error, PathBuf),
    #[error("cannot read line from id mapper file")]
    ReadIdMapFileLineError(#[source] io::Error),
}

pub type Result<T> = result::Result<T, Error>;

#[derive(Debug, Default)]
pub struct IdMapper {
    /// Represents the path of the id mapper file.
    path: PathBuf,
    /// Represents the ids <=> keys map.
    ids: BTreeMap<u32, String>,
    keys: HashMap<String, u32>,
    /// Represents the last id given. Ids are never reused.
    last_id: u32,
}

impl IdMapper {
    /// Loads the id mapper file of the given directory. The first
    /// line holds the last id given, the next ones an id and its key
    /// separated by a space.
    pub fn new(dir: &Path) -> Result<Self> {
        let mut mapper = Self {
            path: dir.join(ID_MAPPER_FILE_NAME),
            ..Self::default()
        };

        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&mapper.path)
            .map_err(|err| Error::OpenIdMapFileError(err, mapper.path.clone()))?;

        for (i, line) in io::BufReader::new(file).lines().enumerate() {
            let line = line.map_err(Error::ReadIdMapFileLineError)?;
            if i == 0 {
                mapper.last_id = line
                    .trim()
                    .parse()
                    .map_err(|_| Error::ParseLineError(line.clone()))?;
                continue;
            }
            let (id, key) = line
                .split_once(' ')
                .and_then(|(id, key)| Some((id.parse::<u32>().ok()?, key)))
                .ok_or_else(|| Error::ParseLineError(line.clone()))?;
            mapper.keys.insert(key.to_owned(), id);
            mapper.ids.insert(id, key.to_owned());
        }

        debug!("loaded {} ids from {:?}", mapper.ids.len(), mapper.path);
        Ok(mapper)
    }

    pub fn id(&self, key: &str) -> Option<u32> {
        self.keys.get(key).copied()
    }

    pub fn key(&self, id: u32) -> Option<&str> {
        self.ids.get(&id).map(String::as_str)
    }

    /// Returns the id of the given key, giving it a new one if
    /// needed.
    pub fn get_or_insert(&mut self, key: &str) -> u32 {
        if let Some(id) = self.id(key) {
            return id;
        }
        self.last_id += 1;
        let id = self.last_id;
        trace!("mapping key {} to id {}", key, id);
        self.keys.insert(key.to_owned(), id);
        self.ids.insert(id, key.to_owned());
        id
    }

    /// Gives the key a new id, dropping the one it had.
    pub fn insert(&mut self, key: &str) -> u32 {
        if let Some(id) = self.keys.remove(key) {
            self.ids.remove(&id);
        }
        self.last_id += 1;
        let id = self.last_id;
        trace!("mapping key {} to new id {}", key, id);
        self.keys.insert(key.to_owned(), id);
        self.ids.insert(id, key.to_owned());
        id
    }

    /// Binds an existing id to another key. Any id previously bound
    /// to that key is dropped.
    pub fn rekey(&mut self, id: u32, key: &str) {
        if let Some(prev_id) = self.keys.remove(key) {
            self.ids.remove(&prev_id);
        }
        if let Some(prev_key) = self.ids.insert(id, key.to_owned()) {
            self.keys.remove(&prev_key);
        }
        self.keys.insert(key.to_owned(), id);
        self.last_id = self.last_id.max(id);
    }

    pub fn remove(&mut self, id: u32) -> Option<String> {
        let key = self.ids.remove(&id)?;
        self.keys.remove(&key);
        Some(key)
    }

    /// Removes every key starting with the given prefix.
    pub fn remove_prefixed(&mut self, prefix: &str) {
        let ids: Vec<u32> = self
            .ids
            .iter()
            .filter(|(_, key)| key.starts_with(prefix))
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            self.remove(id);
        }
    }

    /// Writes the whole map back to the id mapper file.
    pub fn save(&self) -> Result<()> {
        let mut entries = format!("{}\n", self.last_id);
        for (id, key) in &self.ids {
            entries.push_str(&format!("{} {}\n", id, key));
        }

        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)
            .map_err(|err| Error::OpenIdMapFileError(err, self.path.clone()))?
            .write_all(entries.as_bytes())
            .map_err(|err| Error::WriteIdMapFileError(err, self.path.clone()))?;

        Ok(())
    }
}
