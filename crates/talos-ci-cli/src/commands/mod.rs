//! CLI subcommands

pub mod verify;

use std::fmt::Display;

use crate::{Error, Result};

/// Extension trait to convert errors with Display to CLI Error::CommandFailed.
pub(crate) trait CommandErrorExt<T> {
    /// Convert an error to `Error::CommandFailed` using its Display implementation.
    fn cmd_err(self) -> Result<T>;
}

impl<T, E: Display> CommandErrorExt<T> for std::result::Result<T, E> {
    fn cmd_err(self) -> Result<T> {
        self.map_err(|e| Error::command_failed(e.to_string()))
    }
}
