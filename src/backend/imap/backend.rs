//! IMAP backend module.
//!
//! This module contains the remote folder client backed by an IMAP
//! session.

use imap_proto::NameAttribute;
use log::{debug, log_enabled, trace, Level};
use native_tls::{TlsConnector, TlsStream};
use std::{
    borrow::Cow,
    collections::VecDeque,
    io::{self, Read, Write},
    net::TcpStream,
    result,
    sync::{Mutex, MutexGuard},
};
use thiserror::Error;
use utf7_imap::{decode_utf7_imap as decode_utf7, encode_utf7_imap as encode_utf7};

use crate::{
    backend, Capability, FetchedFlags, FetchedMessage, FetchedMessages, Folder, FolderStatus,
    Folders, Flags, ImapConfig, ParsedEmail, RemoteFolderClient, StoreMode, Uid, UidRange,
    UidSet,
};

use super::{
    config,
    flags::{from_imap_flags, into_imap_flags},
};

#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot lock imap session: {0}")]
    LockSessionError(String),
    #[error("cannot get uid of message {0}")]
    GetUidError(u32),

    #[error("cannot create tls connector")]
    CreateTlsConnectorError(#[source] native_tls::Error),
    #[error("cannot connect to imap server")]
    ConnectImapServerError(#[source] imap::Error),
    #[error("cannot login to imap server")]
    LoginImapServerError(#[source] imap::Error),
    #[error("cannot close imap session")]
    CloseImapSessionError(#[source] imap::Error),
    #[error("cannot list mailboxes matching {1}")]
    ListMboxesError(#[source] imap::Error, String),
    #[error("cannot select mailbox {1}")]
    SelectMboxError(#[source] imap::Error, String),
    #[error("cannot create mailbox {1}")]
    CreateMboxError(#[source] imap::Error, String),
    #[error("cannot rename mailbox {1} to {2}")]
    RenameMboxError(#[source] imap::Error, String, String),
    #[error("cannot delete mailbox {1}")]
    DeleteMboxError(#[source] imap::Error, String),
    #[error("cannot search messages within range {1}")]
    SearchMsgsByRangeError(#[source] imap::Error, String),
    #[error("cannot fetch messages within range {1}")]
    FetchMsgsByRangeError(#[source] imap::Error, String),
    #[error("cannot store flags {1} of messages {2}")]
    StoreFlagsError(#[source] imap::Error, String, String),
    #[error("cannot expunge messages {1}")]
    UidExpungeError(#[source] imap::Error, String),
    #[error("cannot expunge selected mailbox")]
    ExpungeError(#[source] imap::Error),
    #[error("cannot get capabilities")]
    GetCapabilitiesError(#[source] imap::Error),
    #[error("cannot append message to mailbox {1}")]
    AppendMsgError(#[source] imap::Error, String),
    #[error("cannot search appended message {1}")]
    SearchAppendedMsgError(#[source] imap::Error, String),

    #[error(transparent)]
    ImapConfigError(#[from] config::Error),
}

pub type Result<T> = result::Result<T, Error>;

pub enum ImapSessionStream {
    Tls(TlsStream<TcpStream>),
    Tcp(TcpStream),
}

impl Read for ImapSessionStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tls(stream) => stream.read(buf),
            Self::Tcp(stream) => stream.read(buf),
        }
    }
}

impl Write for ImapSessionStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tls(stream) => stream.write(buf),
            Self::Tcp(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tls(stream) => stream.flush(),
            Self::Tcp(stream) => stream.flush(),
        }
    }
}

pub type ImapSession = imap::Session<ImapSessionStream>;

/// Number of message bodies fetched per UID FETCH command.
const FETCH_CHUNK_SIZE: usize = 64;

/// Represents the IMAP backend. It owns one session, message-level
/// commands applying to the mailbox selected last.
pub struct ImapBackend<'a> {
    imap_config: Cow<'a, ImapConfig>,
    session: Mutex<ImapSession>,
}

impl<'a> ImapBackend<'a> {
    pub fn new(imap_config: Cow<'a, ImapConfig>) -> Result<Self> {
        let session = Self::create_session(&imap_config)?;
        Ok(Self {
            imap_config,
            session: Mutex::new(session),
        })
    }

    fn create_session(config: &ImapConfig) -> Result<ImapSession> {
        let builder = TlsConnector::builder()
            .danger_accept_invalid_certs(config.insecure())
            .danger_accept_invalid_hostnames(config.insecure())
            .build()
            .map_err(Error::CreateTlsConnectorError)?;

        let mut client_builder = imap::ClientBuilder::new(&config.host, config.port);
        if config.starttls() {
            client_builder.starttls();
        }

        let client = if config.ssl() {
            client_builder.connect(|domain, tcp| {
                let connector = TlsConnector::connect(&builder, domain, tcp)?;
                Ok(ImapSessionStream::Tls(connector))
            })
        } else {
            client_builder.connect(|_, tcp| Ok(ImapSessionStream::Tcp(tcp)))
        }
        .map_err(Error::ConnectImapServerError)?;

        let mut session = client
            .login(&config.login, &config.passwd()?)
            .map_err(|res| Error::LoginImapServerError(res.0))?;
        session.debug = log_enabled!(Level::Trace);

        Ok(session)
    }

    pub fn config(&self) -> &ImapConfig {
        &self.imap_config
    }

    pub fn session(&self) -> Result<MutexGuard<ImapSession>> {
        self.session
            .lock()
            .map_err(|err| Error::LockSessionError(err.to_string()))
    }

    pub fn close_session(&self) -> Result<()> {
        self.session()?
            .close()
            .map_err(Error::CloseImapSessionError)
    }

    fn fetch_chunk(&self, uids: &UidSet) -> backend::Result<Vec<backend::Result<FetchedMessage>>> {
        let uids = uids.to_string();
        let fetches = self
            .session()?
            .uid_fetch(&uids, "(UID FLAGS INTERNALDATE BODY.PEEK[])")
            .map_err(|err| Error::FetchMsgsByRangeError(err, uids.clone()))?;

        Ok(fetches
            .iter()
            .map(|fetch| {
                let uid = fetch
                    .uid
                    .ok_or_else(|| backend::Error::from(Error::GetUidError(fetch.message)))?;
                Ok(FetchedMessage {
                    uid,
                    flags: from_imap_flags(fetch.flags()),
                    internal_date: fetch.internal_date(),
                    body: fetch.body().unwrap_or_default().to_vec(),
                })
            })
            .collect())
    }

    /// Finds the UID of an appended message, for servers that do
    /// not return it.
    fn find_appended_uid(
        session: &mut ImapSession,
        folder: &str,
        email: &[u8],
    ) -> Result<Option<Uid>> {
        let mbox = session
            .select(folder)
            .map_err(|err| Error::SelectMboxError(err, folder.to_owned()))?;

        let message_id = ParsedEmail::parse(email.to_vec())
            .ok()
            .and_then(|email| email.message_id);

        match message_id {
            Some(message_id) => {
                let query = format!("HEADER Message-ID {}", message_id);
                let uids = session
                    .uid_search(&query)
                    .map_err(|err| Error::SearchAppendedMsgError(err, message_id.clone()))?;
                Ok(uids.into_iter().max())
            }
            None => Ok(mbox.uid_next.map(|uid_next| uid_next.saturating_sub(1))),
        }
    }
}

impl RemoteFolderClient for ImapBackend<'_> {
    fn list(&self, pattern: &str) -> backend::Result<Folders> {
        let mut session = self.session()?;
        let pattern = encode_utf7(pattern.to_owned());
        let names = session
            .list(Some(""), Some(&pattern))
            .map_err(|err| Error::ListMboxesError(err, pattern.clone()))?;

        let folders = Folders::from_iter(names.iter().map(|name| Folder {
            delim: name.delimiter().unwrap_or_default().into(),
            name: decode_utf7(name.name().into()),
            selectable: !name
                .attributes()
                .iter()
                .any(|attr| matches!(attr, NameAttribute::NoSelect)),
        }));

        trace!("imap folders: {:?}", folders);
        Ok(folders)
    }

    fn select(&self, path: &str) -> backend::Result<FolderStatus> {
        let folder = encode_utf7(path.to_owned());
        let mbox = self
            .session()?
            .select(&folder)
            .map_err(|err| Error::SelectMboxError(err, folder.clone()))?;
        debug!("selected mailbox {}: {:?}", path, mbox);

        Ok(FolderStatus {
            uid_validity: mbox.uid_validity.unwrap_or_default(),
            uid_next: mbox.uid_next,
            exists: mbox.exists,
        })
    }

    fn create(&self, path: &str) -> backend::Result<()> {
        let folder = encode_utf7(path.to_owned());
        self.session()?
            .create(&folder)
            .map_err(|err| Error::CreateMboxError(err, folder.clone()))?;
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> backend::Result<()> {
        let from = encode_utf7(from.to_owned());
        let to = encode_utf7(to.to_owned());
        self.session()?
            .rename(&from, &to)
            .map_err(|err| Error::RenameMboxError(err, from.clone(), to.clone()))?;
        Ok(())
    }

    fn delete(&self, path: &str) -> backend::Result<()> {
        let folder = encode_utf7(path.to_owned());
        self.session()?
            .delete(&folder)
            .map_err(|err| Error::DeleteMboxError(err, folder.clone()))?;
        Ok(())
    }

    fn fetch_flags(&self, range: &UidRange) -> backend::Result<Vec<FetchedFlags>> {
        let range = range.to_string();
        let fetches = self
            .session()?
            .uid_fetch(&range, "(UID FLAGS)")
            .map_err(|err| Error::FetchMsgsByRangeError(err, range.clone()))?;

        let flags = fetches
            .iter()
            .map(|fetch| {
                Ok(FetchedFlags {
                    uid: fetch.uid.ok_or(Error::GetUidError(fetch.message))?,
                    flags: from_imap_flags(fetch.flags()),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(flags)
    }

    fn fetch_messages(&self, range: &UidRange) -> backend::Result<FetchedMessages<'_>> {
        let range = range.to_string();
        let mut uids: Vec<Uid> = self
            .session()?
            .uid_search(format!("UID {}", range))
            .map_err(|err| Error::SearchMsgsByRangeError(err, range.clone()))?
            .into_iter()
            .collect();
        uids.sort_unstable();
        debug!("fetching {} messages within range {}", uids.len(), range);

        Ok(Box::new(ChunkedFetch::new(uids, FETCH_CHUNK_SIZE, move |chunk: &UidSet| {
            self.fetch_chunk(chunk)
        })))
    }

    fn uid_store(&self, uids: &UidSet, mode: StoreMode, flags: &Flags) -> backend::Result<()> {
        let uids = uids.to_string();
        let query = format!("{} ({})", mode, flags.to_imap_query());
        self.session()?
            .uid_store(&uids, &query)
            .map_err(|err| Error::StoreFlagsError(err, query.clone(), uids.clone()))?;
        Ok(())
    }

    fn uid_expunge(&self, uids: &UidSet) -> backend::Result<()> {
        let uids = uids.to_string();
        self.session()?
            .uid_expunge(&uids)
            .map_err(|err| Error::UidExpungeError(err, uids.clone()))?;
        Ok(())
    }

    fn expunge(&self) -> backend::Result<()> {
        self.session()?.expunge().map_err(Error::ExpungeError)?;
        Ok(())
    }

    fn has_capability(&self, capability: Capability) -> backend::Result<bool> {
        let capabilities = self
            .session()?
            .capabilities()
            .map_err(Error::GetCapabilitiesError)?;
        Ok(capabilities.has_str(capability.as_str()))
    }

    fn append(&self, path: &str, email: &[u8], flags: &Flags) -> backend::Result<Option<Uid>> {
        let folder = encode_utf7(path.to_owned());
        let mut session = self.session()?;

        session
            .append(&folder, email)
            .flags(into_imap_flags(flags))
            .finish()
            .map_err(|err| Error::AppendMsgError(err, folder.clone()))?;

        Ok(Self::find_appended_uid(&mut session, &folder, email)?)
    }
}

/// Iterates over the messages of a set of UIDs, fetching their bodies
/// one chunk at a time.
struct ChunkedFetch<F> {
    uids: std::vec::IntoIter<Uid>,
    chunk_size: usize,
    fetch: F,
    fetched: VecDeque<backend::Result<FetchedMessage>>,
}

impl<F> ChunkedFetch<F>
where
    F: FnMut(&UidSet) -> backend::Result<Vec<backend::Result<FetchedMessage>>>,
{
    fn new(uids: Vec<Uid>, chunk_size: usize, fetch: F) -> Self {
        Self {
            uids: uids.into_iter(),
            chunk_size: chunk_size.max(1),
            fetch,
            fetched: VecDeque::new(),
        }
    }
}

impl<F> Iterator for ChunkedFetch<F>
where
    F: FnMut(&UidSet) -> backend::Result<Vec<backend::Result<FetchedMessage>>>,
{
    type Item = backend::Result<FetchedMessage>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(msg) = self.fetched.pop_front() {
                return Some(msg);
            }

            let chunk: UidSet = self.uids.by_ref().take(self.chunk_size).collect();
            if chunk.is_empty() {
                return None;
            }

            trace!("fetching message bodies {}", chunk);
            match (self.fetch)(&chunk) {
                Ok(msgs) => self.fetched.extend(msgs),
                Err(err) => {
                    self.uids = Vec::new().into_iter();
                    return Some(Err(err));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{backend, FetchedMessage, Flags, UidSet};

    use super::ChunkedFetch;

    fn msg(uid: u32) -> backend::Result<FetchedMessage> {
        Ok(FetchedMessage {
            uid,
            flags: Flags::default(),
            internal_date: None,
            body: Vec::new(),
        })
    }

    #[test]
    fn fetch_bodies_chunk_by_chunk() {
        let mut chunks = Vec::new();
        let uids: Vec<u32> = ChunkedFetch::new(vec![1, 2, 3, 5, 8], 2, |chunk: &UidSet| {
            chunks.push(chunk.to_string());
            // 3 was expunged in the meantime
            Ok(chunk.iter().filter(|uid| **uid != 3).map(|uid| msg(*uid)).collect())
        })
        .map(|msg| msg.unwrap().uid)
        .collect();

        assert_eq!(uids, vec![1, 2, 5, 8]);
        assert_eq!(chunks, vec!["1:2", "3,5", "8"]);
    }

    #[test]
    fn fetch_stops_after_a_failing_chunk() {
        let mut calls = 0;
        let results: Vec<_> = ChunkedFetch::new(vec![1, 2, 3], 1, |chunk: &UidSet| {
            calls += 1;
            if chunk.contains(2) {
                Err(backend::Error::CommandFailedError(
                    String::from("UID FETCH 2"),
                    String::from("server unavailable"),
                ))
            } else {
                Ok(chunk.iter().map(|uid| msg(*uid)).collect())
            }
        })
        .collect();

        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert_eq!(calls, 2);
    }
}
