//! Email module.
//!
//! This module contains everything related to emails.

pub mod email;
pub use email::*;
