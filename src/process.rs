//! Process module.
//!
//! This module contains cross platform helpers around the
//! `std::process` crate.

use log::debug;
use std::{env, io, process::Command, result, string};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot run command {1:?}")]
    RunCmdError(#[source] io::Error, String),
    #[error("cannot parse output of command {1:?}")]
    ParseCmdOutputError(#[source] string::FromUtf8Error, String),
    #[error("command {0:?} exited with status {1}")]
    CmdStatusError(String, i32),
}

pub type Result<T> = result::Result<T, Error>;

/// Runs the given command and returns the output as UTF8 string.
pub fn run(cmd: &str) -> Result<String> {
    debug!("running command: {}", cmd);

    let windows = cfg!(target_os = "windows")
        && env::var("MSYSTEM")
            .map(|env| !env.starts_with("MINGW"))
            .unwrap_or_default();

    let output = if windows {
        Command::new("cmd").args(["/C", cmd]).output()
    } else {
        Command::new("sh").arg("-c").arg(cmd).output()
    }
    .map_err(|err| Error::RunCmdError(err, cmd.to_owned()))?;

    if !output.status.success() {
        return Err(Error::CmdStatusError(
            cmd.to_owned(),
            output.status.code().unwrap_or(-1),
        ));
    }

    String::from_utf8(output.stdout).map_err(|err| Error::ParseCmdOutputError(err, cmd.to_owned()))
}

#[cfg(test)]
mod tests {
    #[cfg(unix)]
    #[test]
    fn run() {
        assert_eq!(super::run("echo password").unwrap(), "password\n");
        assert!(super::run("exit 3").is_err());
    }
}
