//! Maildir backend module.
//!
//! This module contains the local store backed by a Maildir++
//! directory: every local folder is a subdirectory of the root
//! maildir, named after its path segments joined by dots.

use log::{debug, trace};
use std::{
    fs, io,
    path::PathBuf,
    result,
    sync::{Mutex, MutexGuard, PoisonError},
};
use thiserror::Error;

use crate::{
    backend, FlagBits, FolderId, IdMapper, ItemId, ItemKind, LocalFolder, LocalMessage,
    LocalStore, MaildirConfig, ParsedEmail,
};

use super::flags;

const FOLDER_KEY_PREFIX: &str = "folder:";
const ITEM_KEY_PREFIX: &str = "item:";

/// Holds the id of a folder inside its subdirectory, so that the id
/// follows the folder when the subdirectory gets renamed.
const FOLDER_ID_FILE_NAME: &str = ".mailbox-sync-folder-id";

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot create maildir root directory {1}")]
    CreateRootDirError(#[source] io::Error, PathBuf),
    #[error("cannot decode maildir subdirectory")]
    DecodeSubdirError(#[source] io::Error),
    #[error("cannot parse maildir subdirectory {0}")]
    ParseSubdirError(PathBuf),
    #[error("cannot create maildir subdirectory {1}")]
    CreateSubdirError(#[source] io::Error, String),
    #[error("cannot delete maildir subdirectory {1}")]
    DeleteAllDirError(#[source] io::Error, PathBuf),
    #[error("cannot read folder id file {1}")]
    ReadFolderIdError(#[source] io::Error, PathBuf),
    #[error("cannot write folder id file {1}")]
    WriteFolderIdError(#[source] io::Error, PathBuf),
    #[error("cannot decode maildir entry")]
    DecodeEntryError(#[source] io::Error),
    #[error("cannot read maildir entry {1}")]
    ReadEntryError(#[source] io::Error, PathBuf),
    #[error("cannot move maildir entry {1} from new to cur")]
    MoveNewToCurError(#[source] io::Error, String),
    #[error("cannot store maildir message with flags")]
    StoreWithFlagsError(#[source] maildir::MaildirError),
    #[error("cannot set flags of maildir entry {1}")]
    SetFlagsError(#[source] io::Error, String),
    #[error("cannot delete maildir entry {1}")]
    DelMsgError(#[source] io::Error, String),
}

impl Error {
    /// Returns `true` if the entry or the directory vanished from
    /// the disk.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::DeleteAllDirError(err, _)
            | Self::ReadEntryError(err, _)
            | Self::MoveNewToCurError(err, _)
            | Self::SetFlagsError(err, _)
            | Self::DelMsgError(err, _) => err.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

pub type Result<T> = result::Result<T, Error>;

/// Maps an absolute local folder path to its maildir subdirectory
/// name. Dots and percents inside segments are percent-encoded.
pub fn dirname_from_path(path: &str) -> Option<String> {
    let segments: Vec<String> = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| segment.replace('%', "%25").replace('.', "%2E"))
        .collect();

    if segments.is_empty() {
        None
    } else {
        Some(format!(".{}", segments.join(".")))
    }
}

/// Maps a maildir subdirectory name back to its absolute local
/// folder path.
pub fn path_from_dirname(dirname: &str) -> Option<String> {
    let name = dirname.strip_prefix('.').filter(|name| !name.is_empty())?;
    let segments: Vec<String> = name
        .split('.')
        .map(|segment| segment.replace("%2E", ".").replace("%25", "%"))
        .collect();
    Some(format!("/{}", segments.join("/")))
}

fn folder_key(dirname: &str) -> String {
    format!("{}{}", FOLDER_KEY_PREFIX, dirname)
}

fn item_prefix(folder: FolderId) -> String {
    format!("{}{}/", ITEM_KEY_PREFIX, folder)
}

/// Represents the maildir backend.
///
/// Folder ids are stored inside the subdirectories, the id mapper
/// only remembers where each folder was seen last. Item ids are bound
/// to their folder id and their maildir unique id.
pub struct MaildirBackend {
    mdir: maildir::Maildir,
    mapper: Mutex<IdMapper>,
}

impl MaildirBackend {
    pub fn new(config: &MaildirConfig) -> backend::Result<Self> {
        let mdir = maildir::Maildir::from(config.root_dir.clone());
        mdir.create_dirs()
            .map_err(|err| Error::CreateRootDirError(err, config.root_dir.clone()))?;
        let mapper = IdMapper::new(mdir.path())?;

        Ok(Self {
            mdir,
            mapper: Mutex::new(mapper),
        })
    }

    fn mapper(&self) -> MutexGuard<IdMapper> {
        self.mapper.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn subdir(&self, dirname: &str) -> maildir::Maildir {
        maildir::Maildir::from(self.mdir.path().join(dirname))
    }

    fn subdirs(&self) -> backend::Result<Vec<String>> {
        let mut dirnames = Vec::new();
        for entry in self.mdir.list_subdirs() {
            let dir = entry.map_err(Error::DecodeSubdirError)?;
            let dirname = dir
                .path()
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| Error::ParseSubdirError(dir.path().to_owned()))?
                .to_owned();
            dirnames.push(dirname);
        }
        Ok(dirnames)
    }

    fn read_folder_id(&self, dirname: &str) -> backend::Result<Option<FolderId>> {
        let path = self.mdir.path().join(dirname).join(FOLDER_ID_FILE_NAME);
        match fs::read_to_string(&path) {
            Ok(id) => Ok(id.trim().parse().ok()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Error::ReadFolderIdError(err, path).into()),
        }
    }

    fn write_folder_id(&self, dirname: &str, id: FolderId) -> backend::Result<()> {
        let path = self.mdir.path().join(dirname).join(FOLDER_ID_FILE_NAME);
        fs::write(&path, format!("{}\n", id)).map_err(|err| Error::WriteFolderIdError(err, path))?;
        Ok(())
    }

    /// Returns the id of the folder living in the given subdirectory,
    /// giving it a new one if it has none yet. A subdirectory holding
    /// the id of another existing subdirectory is a copy, and gets a
    /// new id as well.
    fn identify(&self, dirname: &str) -> backend::Result<FolderId> {
        let stored_id = self.read_folder_id(dirname)?;
        let mut mapper = self.mapper();

        if let Some(id) = stored_id {
            let last_seen = mapper
                .key(id)
                .and_then(|key| key.strip_prefix(FOLDER_KEY_PREFIX))
                .map(ToOwned::to_owned);

            match last_seen {
                Some(last_seen) if last_seen == dirname => return Ok(id),
                Some(last_seen) if self.read_folder_id(&last_seen)? == Some(id) => {
                    debug!("maildir folder {} is a copy of {}", dirname, last_seen);
                }
                last_seen => {
                    if let Some(last_seen) = last_seen {
                        debug!("maildir folder {} was renamed to {}", last_seen, dirname);
                    }
                    mapper.rekey(id, &folder_key(dirname));
                    mapper.save()?;
                    return Ok(id);
                }
            }
        }

        let id = mapper.insert(&folder_key(dirname));
        mapper.save()?;
        drop(mapper);

        trace!("identified maildir folder {} as {}", dirname, id);
        self.write_folder_id(dirname, id)?;
        Ok(id)
    }

    /// Returns the subdirectory of the given folder. When the folder
    /// is not where it was seen last, every subdirectory is checked.
    fn folder_dirname(&self, id: FolderId) -> backend::Result<String> {
        let last_seen = self
            .mapper()
            .key(id)
            .and_then(|key| key.strip_prefix(FOLDER_KEY_PREFIX))
            .map(ToOwned::to_owned);

        if let Some(dirname) = last_seen {
            if self.read_folder_id(&dirname)? == Some(id) {
                return Ok(dirname);
            }
        }

        for dirname in self.subdirs()? {
            if self.identify(&dirname)? == id {
                return Ok(dirname);
            }
        }

        Err(backend::Error::FolderNotFoundError(id.to_string()))
    }

    /// Returns the folder id and the maildir unique id of the given
    /// item.
    fn item_key(&self, id: ItemId) -> backend::Result<(FolderId, String)> {
        self.mapper()
            .key(id)
            .and_then(|key| key.strip_prefix(ITEM_KEY_PREFIX))
            .and_then(|key| key.split_once('/'))
            .and_then(|(folder, mid)| Some((folder.parse().ok()?, mid.to_owned())))
            .ok_or(backend::Error::ItemNotFoundError(id))
    }
}

impl LocalStore for MaildirBackend {
    fn list_folders(&self) -> backend::Result<Vec<LocalFolder>> {
        let mut folders = Vec::new();

        for dirname in self.subdirs()? {
            let path = path_from_dirname(&dirname)
                .ok_or_else(|| Error::ParseSubdirError(self.mdir.path().join(&dirname)))?;
            folders.push(LocalFolder {
                id: self.identify(&dirname)?,
                path,
            });
        }

        folders.sort_by_key(|folder| folder.id);
        trace!("maildir folders: {:?}", folders);
        Ok(folders)
    }

    fn get_folder(&self, id: FolderId) -> backend::Result<LocalFolder> {
        let dirname = self.folder_dirname(id)?;
        let path = path_from_dirname(&dirname)
            .ok_or_else(|| backend::Error::FolderNotFoundError(id.to_string()))?;
        Ok(LocalFolder { id, path })
    }

    fn get_folder_by_path(&self, path: &str) -> backend::Result<LocalFolder> {
        let dirname = dirname_from_path(path)
            .filter(|dirname| self.mdir.path().join(dirname).is_dir())
            .ok_or_else(|| backend::Error::FolderNotFoundError(path.to_owned()))?;
        Ok(LocalFolder {
            id: self.identify(&dirname)?,
            path: path.to_owned(),
        })
    }

    fn create_folder(&self, path: &str) -> backend::Result<LocalFolder> {
        debug!("creating maildir folder {}", path);

        let dirname = dirname_from_path(path)
            .ok_or_else(|| backend::Error::FolderNotFoundError(path.to_owned()))?;
        if self.mdir.path().join(&dirname).exists() {
            return Err(backend::Error::FolderAlreadyExistsError(path.to_owned()));
        }

        let subdir = self.subdir(&dirname);
        subdir
            .create_dirs()
            .map_err(|err| Error::CreateSubdirError(err, dirname.clone()))?;
        fs::File::create(subdir.path().join("maildirfolder"))
            .map_err(|err| Error::CreateSubdirError(err, dirname.clone()))?;

        Ok(LocalFolder {
            id: self.identify(&dirname)?,
            path: path.to_owned(),
        })
    }

    fn delete_folder(&self, id: FolderId) -> backend::Result<()> {
        let dirname = self.folder_dirname(id)?;
        let path = self.mdir.path().join(&dirname);
        debug!("deleting maildir folder {:?}", path);

        fs::remove_dir_all(&path).map_err(|err| Error::DeleteAllDirError(err, path.clone()))?;

        let mut mapper = self.mapper();
        mapper.remove(id);
        mapper.remove_prefixed(&item_prefix(id));
        mapper.save()?;
        Ok(())
    }

    fn empty_folder(&self, id: FolderId) -> backend::Result<()> {
        let dirname = self.folder_dirname(id)?;
        let subdir = self.subdir(&dirname);
        debug!("emptying maildir folder {:?}", subdir.path());

        let entries: Vec<_> = subdir.list_new().chain(subdir.list_cur()).collect();
        for entry in entries {
            let entry = entry.map_err(Error::DecodeEntryError)?;
            fs::remove_file(entry.path())
                .map_err(|err| Error::DelMsgError(err, entry.id().to_owned()))?;
        }

        let mut mapper = self.mapper();
        mapper.remove_prefixed(&item_prefix(id));
        mapper.save()?;
        Ok(())
    }

    fn list_item_ids(&self, kind: ItemKind, folder: FolderId) -> backend::Result<Vec<ItemId>> {
        let dirname = self.folder_dirname(folder)?;
        if kind != ItemKind::Message {
            return Ok(Vec::new());
        }

        let subdir = self.subdir(&dirname);

        // Flags can only be set on entries living in cur.
        for entry in subdir.list_new() {
            let entry = entry.map_err(Error::DecodeEntryError)?;
            subdir
                .move_new_to_cur(entry.id())
                .map_err(|err| Error::MoveNewToCurError(err, entry.id().to_owned()))?;
        }

        let mut mapper = self.mapper();
        let prefix = item_prefix(folder);
        let mut ids = Vec::new();
        for entry in subdir.list_cur() {
            let entry = entry.map_err(Error::DecodeEntryError)?;
            ids.push(mapper.get_or_insert(&format!("{}{}", prefix, entry.id())));
        }
        mapper.save()?;

        ids.sort_unstable();
        Ok(ids)
    }

    fn get_message(&self, id: ItemId) -> backend::Result<LocalMessage> {
        let (folder, mid) = self.item_key(id)?;
        let dirname = self.folder_dirname(folder).map_err(|err| {
            if err.is_not_found() {
                backend::Error::ItemNotFoundError(id)
            } else {
                err
            }
        })?;

        let entry = self
            .subdir(&dirname)
            .find(&mid)
            .ok_or(backend::Error::ItemNotFoundError(id))?;
        let raw =
            fs::read(entry.path()).map_err(|err| Error::ReadEntryError(err, entry.path().clone()))?;

        Ok(LocalMessage {
            id,
            folder,
            kind: ItemKind::Message,
            flags: flags::from_chars(entry.flags()),
            raw,
        })
    }

    fn create_message(
        &self,
        folder: FolderId,
        email: &ParsedEmail,
        flags: FlagBits,
    ) -> backend::Result<ItemId> {
        let dirname = self.folder_dirname(folder)?;
        let mid = self
            .subdir(&dirname)
            .store_cur_with_flags(email.raw(), &flags::to_normalized_string(flags))
            .map_err(Error::StoreWithFlagsError)?;
        debug!("stored maildir entry {} in {}", mid, dirname);

        let mut mapper = self.mapper();
        let id = mapper.get_or_insert(&format!("{}{}", item_prefix(folder), mid));
        mapper.save()?;
        Ok(id)
    }

    fn set_flags(&self, id: ItemId, flags: FlagBits) -> backend::Result<()> {
        let (folder, mid) = self.item_key(id)?;
        let dirname = self.folder_dirname(folder)?;
        self.subdir(&dirname)
            .set_flags(&mid, &flags::to_normalized_string(flags))
            .map_err(|err| Error::SetFlagsError(err, mid.clone()))?;
        Ok(())
    }

    fn delete_item(&self, id: ItemId) -> backend::Result<()> {
        let (folder, mid) = self.item_key(id)?;
        let dirname = self.folder_dirname(folder)?;
        self.subdir(&dirname)
            .delete(&mid)
            .map_err(|err| Error::DelMsgError(err, mid.clone()))?;

        let mut mapper = self.mapper();
        mapper.remove(id);
        mapper.save()?;
        Ok(())
    }
}
