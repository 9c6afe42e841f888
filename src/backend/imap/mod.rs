pub mod backend;
pub use backend::*;

pub mod config;
pub use config::ImapConfig;

pub mod flags;
