//! Memory backend module.
//!
//! This module contains the in-memory remote folder client and local
//! store. Both are handy to exercise a synchronization without any
//! server nor disk.

pub mod remote;
pub use remote::MemoryRemote;

pub mod store;
pub use store::MemoryStore;
