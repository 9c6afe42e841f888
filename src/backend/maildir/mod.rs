pub mod backend;
pub use backend::*;

pub mod config;
pub use config::MaildirConfig;

pub mod flags;
