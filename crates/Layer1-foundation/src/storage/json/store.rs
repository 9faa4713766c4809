//! JSON config files
//!
//! Cache settings live in `cache.json` under one of two directories:
//! the user's config dir (`<config dir>/cachet/`) and the working project
//! (`<root>/.cachet/`). `CACHET_CONFIG_DIR` replaces the user directory.

use crate::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Overrides the user-level config directory
pub const CONFIG_DIR_ENV: &str = "CACHET_CONFIG_DIR";

/// Directory of JSON documents
#[derive(Debug, Clone)]
pub struct JsonStore {
    dir: PathBuf,
}

impl JsonStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// User-level settings
    pub fn global() -> Result<Self> {
        if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV) {
            return Ok(Self::new(dir));
        }
        dirs::config_dir()
            .map(|dir| Self::new(dir.join("cachet")))
            .ok_or_else(|| Error::Config("no user config directory on this platform".into()))
    }

    /// Settings checked into a project
    pub fn project(root: impl AsRef<Path>) -> Self {
        Self::new(root.as_ref().join(".cachet"))
    }

    pub fn current_project() -> Result<Self> {
        let cwd = std::env::current_dir()?;
        Ok(Self::project(cwd))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Read and decode `name`; a missing file is `Ok(None)`, a malformed one
    /// is a config error naming the file.
    pub fn load_optional<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.path(name);
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Write `value` as pretty JSON. The file is replaced atomically, so a
    /// concurrent reader sees either the old or the new document.
    pub fn save<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path(name);
        let staging = path.with_extension("json.tmp");
        std::fs::write(&staging, serde_json::to_vec_pretty(value)?)?;
        std::fs::rename(&staging, &path)?;
        Ok(())
    }
}
