//! External converter binary — location and invocation.
//!
//! The converter is opaque: given an input and an output path it either writes the
//! output file and exits 0, or it fails.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

/// Name searched for on `PATH`.
pub const BINARY_NAME: &str = "ebook-convert";

/// Used when nothing is found on `PATH`.
pub const FALLBACK_PATH: &str = "/usr/bin/ebook-convert";

/// Extra flag passed on every invocation.
pub const PAGE_NUMBERS_FLAG: &str = "--pdf-page-numbers";

/// A resolved converter location.
#[derive(Debug, Clone)]
pub struct Converter {
    path: PathBuf,
}

impl Converter {
    /// Use an explicit path without any search.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Resolve once at startup: explicit override, then `PATH`, then the fixed fallback.
    pub fn locate(override_path: Option<PathBuf>) -> Self {
        if let Some(path) = override_path {
            return Self::at(path);
        }
        let search = std::env::var_os("PATH").unwrap_or_default();
        Self::at(search_path(&search, BINARY_NAME).unwrap_or_else(|| PathBuf::from(FALLBACK_PATH)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the resolved binary currently exists on disk.
    pub fn is_available(&self) -> bool {
        self.path.is_file()
    }

    /// Build the conversion command with stdout and stderr piped.
    pub fn command(&self, input: &Path, output: &Path) -> Command {
        let mut command = Command::new(&self.path);
        command
            .arg(input)
            .arg(output)
            .arg(PAGE_NUMBERS_FLAG)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

/// Find `name` in a `PATH`-style list of directories.
fn search_path(search: &OsStr, name: &str) -> Option<PathBuf> {
    std::env::split_paths(search)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}
