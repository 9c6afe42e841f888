//! Folder module.
//!
//! This module contains everything related to email folders.

pub mod folder;
pub use folder::*;

pub mod folders;
pub use folders::*;

pub mod mapper;
pub use mapper::*;

pub mod sync;
