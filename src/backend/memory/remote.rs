//! Memory remote module.
//!
//! This module contains a remote folder client keeping its folders
//! in memory. It behaves like an IMAP server with a single session,
//! and logs every command it receives.

use chrono::{DateTime, FixedOffset};
use log::trace;
use std::{
    collections::{BTreeMap, HashSet},
    sync::{Mutex, MutexGuard, PoisonError},
};

use crate::{
    backend::{Error, Result},
    Capability, FetchedFlags, FetchedMessage, FetchedMessages, Flag, Flags, Folder, FolderStatus,
    Folders, RemoteFolderClient, StoreMode, Uid, UidRange, UidSet,
};

#[derive(Clone, Debug)]
struct RemoteMessage {
    flags: Flags,
    internal_date: Option<DateTime<FixedOffset>>,
    body: Vec<u8>,
}

#[derive(Debug)]
struct RemoteMailbox {
    uid_validity: u32,
    uid_next: Uid,
    selectable: bool,
    messages: BTreeMap<Uid, RemoteMessage>,
}

impl RemoteMailbox {
    fn new(uid_validity: u32) -> Self {
        Self {
            uid_validity,
            uid_next: 1,
            selectable: true,
            messages: BTreeMap::new(),
        }
    }

    fn append(&mut self, msg: RemoteMessage) -> Uid {
        let uid = self.uid_next;
        self.uid_next += 1;
        self.messages.insert(uid, msg);
        uid
    }

    /// Resolves the given range the way IMAP servers do: `n:*` always
    /// contains the message with the highest UID.
    fn uids(&self, range: &UidRange) -> Vec<Uid> {
        match range.end {
            Some(end) => {
                let (lo, hi) = (range.start.min(end), range.start.max(end));
                self.messages.range(lo..=hi).map(|(uid, _)| *uid).collect()
            }
            None => {
                let uids: Vec<Uid> = self
                    .messages
                    .range(range.start..)
                    .map(|(uid, _)| *uid)
                    .collect();
                if uids.is_empty() {
                    self.messages.keys().next_back().copied().into_iter().collect()
                } else {
                    uids
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct RemoteState {
    mailboxes: BTreeMap<String, RemoteMailbox>,
    selected: Option<String>,
    /// Commands failing on a folder, by verb and folder path.
    rejected: HashSet<(&'static str, String)>,
    /// Folders another client creates right before our CREATE.
    created_concurrently: HashSet<String>,
    next_uid_validity: u32,
    commands: Vec<String>,
}

impl RemoteState {
    fn log(&mut self, cmd: String) {
        trace!("memory remote command: {}", cmd);
        self.commands.push(cmd);
    }

    fn check_rejected(&self, verb: &'static str, path: &str) -> Result<()> {
        if self.rejected.contains(&(verb, path.to_owned())) {
            return Err(Error::CommandFailedError(
                format!("{} {}", verb, path),
                String::from("server unavailable"),
            ));
        }
        Ok(())
    }

    fn mailbox_mut(&mut self, path: &str) -> Result<&mut RemoteMailbox> {
        self.mailboxes
            .get_mut(path)
            .ok_or_else(|| Error::FolderNotFoundError(path.to_owned()))
    }

    fn selected_mut(&mut self, cmd: &str) -> Result<&mut RemoteMailbox> {
        let path = self
            .selected
            .clone()
            .ok_or_else(|| Error::NoFolderSelectedError(cmd.to_owned()))?;
        self.mailbox_mut(&path)
    }

    fn next_uid_validity(&mut self) -> u32 {
        self.next_uid_validity += 1;
        self.next_uid_validity
    }
}

/// Represents the in-memory remote folder client.
#[derive(Debug)]
pub struct MemoryRemote {
    delim: String,
    uid_plus: bool,
    announce_uid_next: bool,
    state: Mutex<RemoteState>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self {
            delim: String::from("/"),
            uid_plus: true,
            announce_uid_next: true,
            state: Mutex::default(),
        }
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delim<D: ToString>(mut self, delim: D) -> Self {
        self.delim = delim.to_string();
        self
    }

    /// Enables or disables the UIDPLUS capability.
    pub fn with_uid_plus(mut self, uid_plus: bool) -> Self {
        self.uid_plus = uid_plus;
        self
    }

    /// Stops announcing the next UID on select.
    pub fn without_uid_next(mut self) -> Self {
        self.announce_uid_next = false;
        self
    }

    fn state(&self) -> MutexGuard<RemoteState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a folder without logging any command, and returns its
    /// UID validity.
    pub fn add_folder(&self, path: &str) -> u32 {
        let mut state = self.state();
        let uid_validity = state.next_uid_validity();
        state
            .mailboxes
            .entry(path.to_owned())
            .or_insert_with(|| RemoteMailbox::new(uid_validity))
            .uid_validity
    }

    pub fn add_unselectable_folder(&self, path: &str) {
        self.add_folder(path);
        if let Some(mbox) = self.state().mailboxes.get_mut(path) {
            mbox.selectable = false;
        }
    }

    /// Makes every SELECT of the given folder fail.
    pub fn reject_select(&self, path: &str) {
        self.state().rejected.insert(("SELECT", path.to_owned()));
    }

    /// Makes every CREATE of the given folder fail.
    pub fn reject_create(&self, path: &str) {
        self.state().rejected.insert(("CREATE", path.to_owned()));
    }

    /// Makes every APPEND to the given folder fail.
    pub fn reject_append(&self, path: &str) {
        self.state().rejected.insert(("APPEND", path.to_owned()));
    }

    /// Lets every command succeed again.
    pub fn accept_all(&self) {
        self.state().rejected.clear();
    }

    /// Makes the next CREATE of the given folder lose the race against
    /// another client: the folder gets created, but the command fails.
    pub fn create_concurrently(&self, path: &str) {
        self.state().created_concurrently.insert(path.to_owned());
    }

    pub fn has_folder(&self, path: &str) -> bool {
        self.state().mailboxes.contains_key(path)
    }

    pub fn folder_names(&self) -> Vec<String> {
        self.state().mailboxes.keys().cloned().collect()
    }

    /// Changes the UID validity of the given folder, as a server does
    /// when it renumbers the messages of a folder.
    pub fn set_uid_validity(&self, path: &str, uid_validity: u32) -> Result<()> {
        self.state().mailbox_mut(path)?.uid_validity = uid_validity;
        Ok(())
    }

    pub fn uid_validity(&self, path: &str) -> Result<u32> {
        Ok(self.state().mailbox_mut(path)?.uid_validity)
    }

    /// Delivers a message without logging any command.
    pub fn add_message(&self, path: &str, body: &[u8], flags: Flags) -> Result<Uid> {
        Ok(self.state().mailbox_mut(path)?.append(RemoteMessage {
            flags,
            internal_date: None,
            body: body.to_vec(),
        }))
    }

    pub fn set_message_flags(&self, path: &str, uid: Uid, flags: Flags) -> Result<()> {
        let mut state = self.state();
        let msg = state
            .mailbox_mut(path)?
            .messages
            .get_mut(&uid)
            .ok_or(Error::ItemNotFoundError(uid))?;
        msg.flags = flags;
        Ok(())
    }

    pub fn remove_message(&self, path: &str, uid: Uid) -> Result<()> {
        self.state()
            .mailbox_mut(path)?
            .messages
            .remove(&uid)
            .map(|_| ())
            .ok_or(Error::ItemNotFoundError(uid))
    }

    pub fn message_flags(&self, path: &str, uid: Uid) -> Option<Flags> {
        let state = self.state();
        let msg = state.mailboxes.get(path)?.messages.get(&uid)?;
        Some(msg.flags.clone())
    }

    pub fn message_body(&self, path: &str, uid: Uid) -> Option<Vec<u8>> {
        let state = self.state();
        let msg = state.mailboxes.get(path)?.messages.get(&uid)?;
        Some(msg.body.clone())
    }

    pub fn message_uids(&self, path: &str) -> Vec<Uid> {
        self.state()
            .mailboxes
            .get(path)
            .map(|mbox| mbox.messages.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Returns the commands received so far.
    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    /// Counts the commands received so far that start with the given
    /// prefix.
    pub fn count_commands(&self, prefix: &str) -> usize {
        self.state()
            .commands
            .iter()
            .filter(|cmd| cmd.starts_with(prefix))
            .count()
    }

    pub fn clear_commands(&self) {
        self.state().commands.clear()
    }

    fn matches(&self, pattern: &str, name: &str) -> bool {
        match pattern.chars().next() {
            None => name.is_empty(),
            Some('*') => (0..=name.len())
                .filter(|i| name.is_char_boundary(*i))
                .any(|i| self.matches(&pattern[1..], &name[i..])),
            Some('%') => (0..=name.len())
                .filter(|i| name.is_char_boundary(*i))
                .take_while(|i| !name[..*i].contains(&self.delim))
                .any(|i| self.matches(&pattern[1..], &name[i..])),
            Some(c) => name.starts_with(c) && self.matches(&pattern[c.len_utf8()..], &name[c.len_utf8()..]),
        }
    }
}

impl RemoteFolderClient for MemoryRemote {
    fn list(&self, pattern: &str) -> Result<Folders> {
        self.state().log(format!("LIST \"\" {}", pattern));
        let state = self.state();
        Ok(state
            .mailboxes
            .iter()
            .filter(|(name, _)| self.matches(pattern, name))
            .map(|(name, mbox)| Folder {
                delim: self.delim.clone(),
                name: name.clone(),
                selectable: mbox.selectable,
            })
            .collect())
    }

    fn select(&self, path: &str) -> Result<FolderStatus> {
        let mut state = self.state();
        state.log(format!("SELECT {}", path));
        state.check_rejected("SELECT", path)?;
        let mbox = state.mailbox_mut(path)?;
        if !mbox.selectable {
            return Err(Error::CommandFailedError(
                format!("SELECT {}", path),
                String::from("mailbox is not selectable"),
            ));
        }
        let status = FolderStatus {
            uid_validity: mbox.uid_validity,
            uid_next: Some(mbox.uid_next).filter(|_| self.announce_uid_next),
            exists: mbox.messages.len() as u32,
        };
        state.selected = Some(path.to_owned());
        Ok(status)
    }

    fn create(&self, path: &str) -> Result<()> {
        let mut state = self.state();
        state.log(format!("CREATE {}", path));
        state.check_rejected("CREATE", path)?;
        if state.created_concurrently.remove(path) {
            let uid_validity = state.next_uid_validity();
            state
                .mailboxes
                .insert(path.to_owned(), RemoteMailbox::new(uid_validity));
        }
        if state.mailboxes.contains_key(path) {
            return Err(Error::FolderAlreadyExistsError(path.to_owned()));
        }
        let uid_validity = state.next_uid_validity();
        state
            .mailboxes
            .insert(path.to_owned(), RemoteMailbox::new(uid_validity));
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let mut state = self.state();
        state.log(format!("RENAME {} {}", from, to));
        if state.mailboxes.contains_key(to) {
            return Err(Error::FolderAlreadyExistsError(to.to_owned()));
        }
        let mbox = state
            .mailboxes
            .remove(from)
            .ok_or_else(|| Error::FolderNotFoundError(from.to_owned()))?;
        state.mailboxes.insert(to.to_owned(), mbox);
        if state.selected.as_deref() == Some(from) {
            state.selected = Some(to.to_owned());
        }
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<()> {
        let mut state = self.state();
        state.log(format!("DELETE {}", path));
        state
            .mailboxes
            .remove(path)
            .ok_or_else(|| Error::FolderNotFoundError(path.to_owned()))?;
        if state.selected.as_deref() == Some(path) {
            state.selected = None;
        }
        Ok(())
    }

    fn fetch_flags(&self, range: &UidRange) -> Result<Vec<FetchedFlags>> {
        let mut state = self.state();
        let cmd = format!("UID FETCH {} (UID FLAGS)", range);
        state.log(cmd.clone());
        let mbox = state.selected_mut(&cmd)?;
        Ok(mbox
            .uids(range)
            .into_iter()
            .filter_map(|uid| {
                mbox.messages.get(&uid).map(|msg| FetchedFlags {
                    uid,
                    flags: msg.flags.clone(),
                })
            })
            .collect())
    }

    fn fetch_messages(&self, range: &UidRange) -> Result<FetchedMessages<'_>> {
        let mut state = self.state();
        let cmd = format!("UID FETCH {} (UID FLAGS INTERNALDATE BODY.PEEK[])", range);
        state.log(cmd.clone());
        let mbox = state.selected_mut(&cmd)?;
        let msgs: Vec<Result<FetchedMessage>> = mbox
            .uids(range)
            .into_iter()
            .filter_map(|uid| {
                mbox.messages.get(&uid).map(|msg| {
                    Ok(FetchedMessage {
                        uid,
                        flags: msg.flags.clone(),
                        internal_date: msg.internal_date,
                        body: msg.body.clone(),
                    })
                })
            })
            .collect();
        Ok(Box::new(msgs.into_iter()))
    }

    fn uid_store(&self, uids: &UidSet, mode: StoreMode, flags: &Flags) -> Result<()> {
        let mut state = self.state();
        let cmd = format!("UID STORE {} {} ({})", uids, mode, flags.to_imap_query());
        state.log(cmd.clone());
        let mbox = state.selected_mut(&cmd)?;
        for uid in uids.iter() {
            if let Some(msg) = mbox.messages.get_mut(uid) {
                match mode {
                    StoreMode::Add => msg.flags.extend(flags.iter().cloned()),
                    StoreMode::Remove => msg.flags.retain(|flag| !flags.contains(flag)),
                    StoreMode::Set => msg.flags = flags.clone(),
                }
            }
        }
        Ok(())
    }

    fn uid_expunge(&self, uids: &UidSet) -> Result<()> {
        let mut state = self.state();
        let cmd = format!("UID EXPUNGE {}", uids);
        state.log(cmd.clone());
        if !self.uid_plus {
            return Err(Error::CommandFailedError(cmd, String::from("UIDPLUS not supported")));
        }
        let mbox = state.selected_mut(&cmd)?;
        mbox.messages
            .retain(|uid, msg| !(uids.contains(*uid) && msg.flags.contains(&Flag::Deleted)));
        Ok(())
    }

    fn expunge(&self) -> Result<()> {
        let mut state = self.state();
        state.log(String::from("EXPUNGE"));
        let mbox = state.selected_mut("EXPUNGE")?;
        mbox.messages
            .retain(|_, msg| !msg.flags.contains(&Flag::Deleted));
        Ok(())
    }

    fn has_capability(&self, capability: Capability) -> Result<bool> {
        self.state().log(String::from("CAPABILITY"));
        Ok(match capability {
            Capability::UidPlus => self.uid_plus,
        })
    }

    fn append(&self, path: &str, email: &[u8], flags: &Flags) -> Result<Option<Uid>> {
        let mut state = self.state();
        state.log(format!("APPEND {} ({})", path, flags.to_imap_query()));
        state.check_rejected("APPEND", path)?;
        let uid = state.mailbox_mut(path)?.append(RemoteMessage {
            flags: flags.clone(),
            internal_date: None,
            body: email.to_vec(),
        });
        Ok(Some(uid))
    }
}
