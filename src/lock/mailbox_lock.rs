//! Mailbox lock module.
//!
//! This module contains the lock serializing every structural
//! mutation of a mailbox. It is a fair, reentrant read/write lock:
//!
//! - waiters are granted in strict arrival order, whatever their
//!   mode;
//! - the number of waiters is bounded, acquirers beyond the ceiling
//!   fail immediately instead of queueing;
//! - every owner keeps a stack of its acquisitions, so that
//!   [`MailboxLock::release`] does not need to know which mode to
//!   release;
//! - when the mailbox requires write access only, read holds are
//!   promoted into the same number of write holds.
//!
//! Ownership follows the calling thread.

use log::{error, trace, warn};
use std::{
    collections::{HashMap, VecDeque},
    fmt,
    marker::PhantomData,
    result,
    sync::{
        atomic::{AtomicBool, Ordering},
        Condvar, Mutex, MutexGuard, PoisonError,
    },
    thread::{self, ThreadId},
    time::{Duration, Instant},
};
use thiserror::Error;

use crate::{
    config::{DEFAULT_LOCK_MAX_WAITERS, DEFAULT_LOCK_TIMEOUT},
    SyncConfig,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot lock mailbox {0}: timed out after {1:?}")]
    TimeoutError(String, Duration),
    #[error("cannot lock mailbox {0}: too many waiters ({1})")]
    CapacityExceededError(String, usize),
    #[error("cannot lock mailbox {0}: lock state poisoned by a panicking owner")]
    InterruptedError(String),
    #[error("cannot release mailbox {0}: no matching acquisition")]
    UnbalancedReleaseError(String),
}

pub type Result<T> = result::Result<T, Error>;

type Owner = ThreadId;

/// Represents the lock mode.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LockMode {
    Read,
    Write,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "READ"),
            Self::Write => write!(f, "WRITE"),
        }
    }
}

#[derive(Debug)]
struct Waiter {
    ticket: u64,
    mode: LockMode,
}

#[derive(Debug, Default)]
struct State {
    readers: HashMap<Owner, usize>,
    writer: Option<(Owner, usize)>,
    queue: VecDeque<Waiter>,
    next_ticket: u64,
    stacks: HashMap<Owner, Vec<LockMode>>,
}

impl State {
    fn read_holds(&self, owner: Owner) -> usize {
        self.readers.get(&owner).copied().unwrap_or_default()
    }

    fn write_holds(&self, owner: Owner) -> usize {
        match self.writer {
            Some((writer, count)) if writer == owner => count,
            _ => 0,
        }
    }

    fn is_reentrant(&self, owner: Owner, mode: LockMode) -> bool {
        match mode {
            LockMode::Write => self.write_holds(owner) > 0,
            LockMode::Read => self.write_holds(owner) > 0 || self.read_holds(owner) > 0,
        }
    }

    fn is_compatible(&self, owner: Owner, mode: LockMode) -> bool {
        let writer_is_owner = self.writer.map_or(true, |(writer, _)| writer == owner);
        match mode {
            LockMode::Write => self.readers.is_empty() && writer_is_owner,
            LockMode::Read => writer_is_owner,
        }
    }

    /// Grants the lock without waiting. Only reentrant acquisitions
    /// may bypass the wait line.
    fn try_grant(&mut self, owner: Owner, mode: LockMode) -> bool {
        let granted = self.is_reentrant(owner, mode)
            || (self.queue.is_empty() && self.is_compatible(owner, mode));
        if granted {
            self.grant(owner, mode);
        }
        granted
    }

    fn grant(&mut self, owner: Owner, mode: LockMode) {
        match mode {
            LockMode::Write => {
                let count = self.write_holds(owner);
                self.writer = Some((owner, count + 1));
            }
            LockMode::Read => *self.readers.entry(owner).or_default() += 1,
        }
        self.stacks.entry(owner).or_default().push(mode);
    }

    fn ungrant(&mut self, owner: Owner, mode: LockMode) -> bool {
        match mode {
            LockMode::Write => match self.writer {
                Some((writer, 1)) if writer == owner => self.writer = None,
                Some((writer, count)) if writer == owner => self.writer = Some((owner, count - 1)),
                _ => return false,
            },
            LockMode::Read => match self.readers.get_mut(&owner) {
                Some(count) if *count > 1 => *count -= 1,
                Some(_) => {
                    self.readers.remove(&owner);
                }
                None => return false,
            },
        }
        true
    }

    fn pop(&mut self, owner: Owner) -> Option<LockMode> {
        let stack = self.stacks.get_mut(&owner)?;
        let mode = stack.pop();
        if stack.is_empty() {
            self.stacks.remove(&owner);
        }
        mode
    }

    /// Drops all the read holds of the given owner, returning how
    /// many there were.
    fn release_reads(&mut self, owner: Owner) -> usize {
        let count = self.readers.remove(&owner).unwrap_or_default();
        if let Some(stack) = self.stacks.get_mut(&owner) {
            stack.retain(|mode| *mode != LockMode::Read);
            if stack.is_empty() {
                self.stacks.remove(&owner);
            }
        }
        count
    }

    fn enqueue(&mut self, mode: LockMode) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.queue.push_back(Waiter { ticket, mode });
        ticket
    }

    fn dequeue(&mut self, ticket: u64) {
        self.queue.retain(|waiter| waiter.ticket != ticket);
    }

    fn is_next(&self, ticket: u64) -> bool {
        self.queue.front().map(|waiter| waiter.ticket) == Some(ticket)
    }
}

/// Represents the lock of a mailbox.
#[derive(Debug)]
pub struct MailboxLock {
    id: String,
    timeout: Duration,
    max_waiters: usize,
    requires_write: AtomicBool,
    state: Mutex<State>,
    cond: Condvar,
}

impl MailboxLock {
    pub fn new<I: ToString>(id: I) -> Self {
        Self {
            id: id.to_string(),
            timeout: Duration::from_secs(DEFAULT_LOCK_TIMEOUT),
            max_waiters: DEFAULT_LOCK_MAX_WAITERS,
            requires_write: AtomicBool::new(false),
            state: Mutex::new(State::default()),
            cond: Condvar::new(),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(&config.name)
            .with_timeout(config.lock_timeout())
            .with_max_waiters(config.lock_max_waiters())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_waiters(mut self, max_waiters: usize) -> Self {
        self.max_waiters = max_waiters;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Switches the mailbox to write-only access. Owners holding
    /// read locks are promoted on their next acquisition.
    pub fn set_requires_write(&self, requires_write: bool) {
        self.requires_write.store(requires_write, Ordering::SeqCst);
    }

    pub fn requires_write(&self) -> bool {
        self.requires_write.load(Ordering::SeqCst)
    }

    fn state(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| Error::InterruptedError(self.id.clone()))
    }

    /// Acquires the lock and returns a guard releasing it on drop.
    pub fn acquire(&self, mode: LockMode) -> Result<MailboxLockGuard<'_>> {
        self.lock(mode)?;
        Ok(MailboxLockGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }

    /// Acquires the lock. Every successful call must be balanced by a
    /// call to [`MailboxLock::release`].
    pub fn lock(&self, mode: LockMode) -> Result<()> {
        let owner = thread::current().id();

        // only the owner itself can change its own holds
        let (read_holds, write_holds) = {
            let state = self.state()?;
            (state.read_holds(owner), state.write_holds(owner))
        };

        if read_holds > 0 && write_holds == 0 {
            if self.requires_write() {
                trace!("LOCK READ (promotion pending)");
                self.state()?.grant(owner, LockMode::Read);
                return self.promote();
            }
            if mode == LockMode::Write {
                error!("read lock held before write on mailbox {}", self.id);
                debug_assert!(false, "read lock held before write");
            }
        }

        let mode = if self.requires_write() {
            LockMode::Write
        } else {
            mode
        };
        trace!("LOCK {mode}");

        let mut state = self.state()?;

        if state.try_grant(owner, mode) {
            drop(state);
            return self.promote_if_required();
        }

        let queue_len = state.queue.len();
        if queue_len >= self.max_waiters {
            // no stack trace here: once requests back up, every new
            // acquirer ends up in this branch
            trace!("too many waiters on mailbox {}: {}", self.id, queue_len);
            return Err(Error::CapacityExceededError(self.id.clone(), queue_len));
        }

        let ticket = state.enqueue(mode);
        let deadline = Instant::now() + self.timeout;

        loop {
            if state.is_next(ticket) && state.is_compatible(owner, mode) {
                state.dequeue(ticket);
                state.grant(owner, mode);
                drop(state);
                // the next waiter may be a compatible reader
                self.cond.notify_all();
                return self.promote_if_required();
            }

            let now = Instant::now();
            if now >= deadline {
                state.dequeue(ticket);
                drop(state);
                self.cond.notify_all();
                error!("cannot lock mailbox {}: timeout", self.id);
                return Err(Error::TimeoutError(self.id.clone(), self.timeout));
            }

            state = match self.cond.wait_timeout(state, deadline - now) {
                Ok((state, _)) => state,
                Err(poisoned) => {
                    let (mut state, _) = poisoned.into_inner();
                    state.dequeue(ticket);
                    drop(state);
                    self.cond.notify_all();
                    return Err(Error::InterruptedError(self.id.clone()));
                }
            };
        }
    }

    fn promote_if_required(&self) -> Result<()> {
        if self.requires_write() && !self.is_write_locked_by_current_owner() {
            // a writer switched the mailbox to write-only access
            // while this owner was waiting
            return self.promote();
        }
        Ok(())
    }

    /// Converts all the read holds of the current owner into the
    /// same number of write holds.
    pub fn promote(&self) -> Result<()> {
        let owner = thread::current().id();

        let count = {
            let mut state = self.state()?;
            if state.write_holds(owner) > 0 {
                debug_assert_eq!(state.read_holds(owner), 0, "promotion with write holds");
                return Ok(());
            }

            let count = state.release_reads(owner);
            if count == 0 {
                return Ok(());
            }
            trace!("PROMOTE {count} READ -> WRITE");

            if state.queue.is_empty() && state.is_compatible(owner, LockMode::Write) {
                for _ in 0..count {
                    state.grant(owner, LockMode::Write);
                }
                return Ok(());
            }

            count
        };

        self.cond.notify_all();

        for _ in 0..count {
            self.lock(LockMode::Write)?;
        }

        Ok(())
    }

    /// Releases the most recent acquisition of the current owner.
    pub fn try_release(&self) -> Result<LockMode> {
        let owner = thread::current().id();
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let mode = state
            .pop(owner)
            .ok_or_else(|| Error::UnbalancedReleaseError(self.id.clone()))?;
        trace!("RELEASE {mode}");

        if !state.ungrant(owner, mode) {
            return Err(Error::UnbalancedReleaseError(self.id.clone()));
        }

        drop(state);
        self.cond.notify_all();
        Ok(mode)
    }

    /// Releases the most recent acquisition of the current owner.
    ///
    /// Releasing without holding the lock is a no-op, so that error
    /// paths can release unconditionally.
    pub fn release(&self) {
        if let Err(err) = self.try_release() {
            if self.hold_count() == 0 {
                trace!("release when not locked?");
            } else {
                warn!("{err}");
                debug_assert!(false, "unbalanced release");
            }
        }
    }

    /// Returns the number of holds of the current owner.
    pub fn hold_count(&self) -> usize {
        let owner = thread::current().id();
        let state = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        state.read_holds(owner) + state.write_holds(owner)
    }

    pub fn is_write_locked_by_current_owner(&self) -> bool {
        let owner = thread::current().id();
        let state = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        state.write_holds(owner) > 0
    }

    /// Returns `true` if the current owner holds no lock.
    pub fn is_unlocked(&self) -> bool {
        self.hold_count() == 0
    }

    pub fn queue_length(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .queue
            .len()
    }

    pub fn has_queued(&self) -> bool {
        self.queue_length() > 0
    }

    /// Returns the mode of the waiter at the head of the line.
    pub fn next_waiter_mode(&self) -> Option<LockMode> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .queue
            .front()
            .map(|waiter| waiter.mode)
    }
}

/// Releases the mailbox lock on drop. The guard is bound to the
/// thread which acquired the lock.
#[derive(Debug)]
pub struct MailboxLockGuard<'a> {
    lock: &'a MailboxLock,
    _not_send: PhantomData<*const ()>,
}

impl Drop for MailboxLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release()
    }
}
