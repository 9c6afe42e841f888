//! Memory store module.
//!
//! This module contains a local store keeping its folders and items
//! in memory. Folders and items share the same id sequence.

use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use crate::{
    backend::{Error, Result},
    FlagBits, FolderId, ItemId, ItemKind, LocalFolder, LocalMessage, LocalStore, ParsedEmail,
};

#[derive(Debug, Default)]
struct StoreState {
    folders: BTreeMap<FolderId, String>,
    items: BTreeMap<ItemId, LocalMessage>,
    last_id: u32,
}

impl StoreState {
    fn next_id(&mut self) -> u32 {
        self.last_id += 1;
        self.last_id
    }

    fn folder(&self, id: FolderId) -> Result<LocalFolder> {
        self.folders
            .get(&id)
            .map(|path| LocalFolder {
                id,
                path: path.clone(),
            })
            .ok_or_else(|| Error::FolderNotFoundError(id.to_string()))
    }

    fn insert_item(
        &mut self,
        folder: FolderId,
        kind: ItemKind,
        raw: Vec<u8>,
        flags: FlagBits,
    ) -> Result<ItemId> {
        self.folder(folder)?;
        let id = self.next_id();
        self.items.insert(
            id,
            LocalMessage {
                id,
                folder,
                kind,
                flags,
                raw,
            },
        );
        Ok(id)
    }
}

/// Represents the in-memory local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a message without parsing it.
    pub fn add_message(&self, folder: FolderId, raw: &[u8], flags: FlagBits) -> Result<ItemId> {
        self.state()
            .insert_item(folder, ItemKind::Message, raw.to_vec(), flags)
    }

    pub fn add_chat(&self, folder: FolderId, raw: &[u8]) -> Result<ItemId> {
        self.state()
            .insert_item(folder, ItemKind::Chat, raw.to_vec(), FlagBits::EMPTY)
    }

    /// Changes the path of a folder, keeping its id.
    pub fn rename_folder(&self, id: FolderId, path: &str) -> Result<()> {
        let mut state = self.state();
        if state.folders.values().any(|p| p == path) {
            return Err(Error::FolderAlreadyExistsError(path.to_owned()));
        }
        let entry = state
            .folders
            .get_mut(&id)
            .ok_or_else(|| Error::FolderNotFoundError(id.to_string()))?;
        *entry = path.to_owned();
        Ok(())
    }

    pub fn message_flags(&self, id: ItemId) -> Option<FlagBits> {
        self.state().items.get(&id).map(|item| item.flags)
    }
}

impl LocalStore for MemoryStore {
    fn list_folders(&self) -> Result<Vec<LocalFolder>> {
        Ok(self
            .state()
            .folders
            .iter()
            .map(|(id, path)| LocalFolder {
                id: *id,
                path: path.clone(),
            })
            .collect())
    }

    fn get_folder(&self, id: FolderId) -> Result<LocalFolder> {
        self.state().folder(id)
    }

    fn get_folder_by_path(&self, path: &str) -> Result<LocalFolder> {
        self.state()
            .folders
            .iter()
            .find(|(_, p)| p.as_str() == path)
            .map(|(id, path)| LocalFolder {
                id: *id,
                path: path.clone(),
            })
            .ok_or_else(|| Error::FolderNotFoundError(path.to_owned()))
    }

    fn create_folder(&self, path: &str) -> Result<LocalFolder> {
        let mut state = self.state();
        if state.folders.values().any(|p| p == path) {
            return Err(Error::FolderAlreadyExistsError(path.to_owned()));
        }
        let id = state.next_id();
        state.folders.insert(id, path.to_owned());
        Ok(LocalFolder {
            id,
            path: path.to_owned(),
        })
    }

    fn delete_folder(&self, id: FolderId) -> Result<()> {
        let mut state = self.state();
        state
            .folders
            .remove(&id)
            .ok_or_else(|| Error::FolderNotFoundError(id.to_string()))?;
        state.items.retain(|_, item| item.folder != id);
        Ok(())
    }

    fn empty_folder(&self, id: FolderId) -> Result<()> {
        let mut state = self.state();
        state.folder(id)?;
        state.items.retain(|_, item| item.folder != id);
        Ok(())
    }

    fn list_item_ids(&self, kind: ItemKind, folder: FolderId) -> Result<Vec<ItemId>> {
        let state = self.state();
        state.folder(folder)?;
        Ok(state
            .items
            .values()
            .filter(|item| item.folder == folder && item.kind == kind)
            .map(|item| item.id)
            .collect())
    }

    fn get_message(&self, id: ItemId) -> Result<LocalMessage> {
        self.state()
            .items
            .get(&id)
            .filter(|item| item.kind == ItemKind::Message)
            .cloned()
            .ok_or(Error::ItemNotFoundError(id))
    }

    fn create_message(
        &self,
        folder: FolderId,
        email: &ParsedEmail,
        flags: FlagBits,
    ) -> Result<ItemId> {
        self.state()
            .insert_item(folder, ItemKind::Message, email.raw().to_vec(), flags)
    }

    fn set_flags(&self, id: ItemId, flags: FlagBits) -> Result<()> {
        let mut state = self.state();
        let item = state
            .items
            .get_mut(&id)
            .ok_or(Error::ItemNotFoundError(id))?;
        item.flags = flags;
        Ok(())
    }

    fn delete_item(&self, id: ItemId) -> Result<()> {
        self.state()
            .items
            .remove(&id)
            .map(|_| ())
            .ok_or(Error::ItemNotFoundError(id))
    }
}

#[cfg(test)]
mod tests {
    use crate::{FlagBits, ItemKind, LocalStore};

    use super::MemoryStore;

    #[test]
    fn items_are_listed_by_kind() {
        let store = MemoryStore::new();
        let inbox = store.create_folder("/Imported/INBOX").unwrap();
        let msg = store.add_message(inbox.id, b"", FlagBits::SEEN).unwrap();
        let chat = store.add_chat(inbox.id, b"").unwrap();

        assert_eq!(
            store.list_item_ids(ItemKind::Message, inbox.id).unwrap(),
            vec![msg]
        );
        assert_eq!(
            store.list_item_ids(ItemKind::Chat, inbox.id).unwrap(),
            vec![chat]
        );
        assert!(store.get_message(chat).is_err());
    }

    #[test]
    fn delete_folder_deletes_items() {
        let store = MemoryStore::new();
        let inbox = store.create_folder("/Imported/INBOX").unwrap();
        let msg = store.add_message(inbox.id, b"", FlagBits::EMPTY).unwrap();

        assert!(store.create_folder("/Imported/INBOX").is_err());
        store.delete_folder(inbox.id).unwrap();
        assert!(store.get_message(msg).unwrap_err().is_not_found());
        assert!(store.get_folder_by_path("/Imported/INBOX").is_err());
    }
}
