//! Durable storage of profile records.
//!
//! Each profile is one JSON document named `<profile>.json` beneath a root
//! directory. Writes go to a temporary sibling first and are renamed into
//! place.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;

use super::NodeStore;

const RECORD_EXTENSION: &str = "json";
const TEMP_SUFFIX: &str = ".tmp";

/// Errors raised while loading or saving profile records.
#[derive(Debug, Error)]
pub enum ProfileStoreError {
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when a stored record cannot be decoded or encoded.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path of the offending record.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when a profile name cannot be used as a record name.
    #[error("invalid profile name '{name}': use ASCII letters, digits, '-', '_' or '.'")]
    InvalidName {
        /// Rejected profile name.
        name: String,
    },
}

/// Returns `true` when `name` is usable as a profile name.
#[must_use]
pub fn is_valid_profile_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
}

/// Persistence seam for [`NodeStore`] records.
pub trait ProfileStore: Send + Sync {
    /// Loads the record for `profile`, if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileStoreError`] when the record cannot be read or decoded.
    fn load(&self, profile: &str) -> Result<Option<NodeStore>, ProfileStoreError>;

    /// Writes `store`, replacing any previous record for the same profile.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileStoreError`] when encoding or writing fails.
    fn save(&self, store: &NodeStore) -> Result<(), ProfileStoreError>;

    /// Deletes the record for `profile`. Missing records are not an error.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileStoreError`] when the record cannot be removed.
    fn remove(&self, profile: &str) -> Result<(), ProfileStoreError>;

    /// Lists the names of all stored profiles in ascending order.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileStoreError`] when the root cannot be listed.
    fn list(&self) -> Result<Vec<String>, ProfileStoreError>;
}

/// Stores profile records as JSON files beneath a directory.
#[derive(Clone, Debug)]
pub struct FileProfileStore {
    root: Utf8PathBuf,
}

impl FileProfileStore {
    /// Creates a store rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding the records.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn file_name(profile: &str) -> Result<String, ProfileStoreError> {
        if !is_valid_profile_name(profile) {
            return Err(ProfileStoreError::InvalidName {
                name: profile.to_owned(),
            });
        }
        Ok(format!("{profile}.{RECORD_EXTENSION}"))
    }

    fn open_root(&self) -> Result<Option<Dir>, ProfileStoreError> {
        match Dir::open_ambient_dir(&self.root, ambient_authority()) {
            Ok(dir) => Ok(Some(dir)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_error(&self.root, &err)),
        }
    }

    fn create_root(&self) -> Result<Dir, ProfileStoreError> {
        Dir::create_ambient_dir_all(&self.root, ambient_authority())
            .map_err(|err| io_error(&self.root, &err))?;
        Dir::open_ambient_dir(&self.root, ambient_authority())
            .map_err(|err| io_error(&self.root, &err))
    }
}

fn io_error(path: &Utf8Path, err: &io::Error) -> ProfileStoreError {
    ProfileStoreError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

impl ProfileStore for FileProfileStore {
    fn load(&self, profile: &str) -> Result<Option<NodeStore>, ProfileStoreError> {
        let file_name = Self::file_name(profile)?;
        let path = self.root.join(&file_name);
        let Some(dir) = self.open_root()? else {
            return Ok(None);
        };

        let contents = match dir.read_to_string(&file_name) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_error(&path, &err)),
        };

        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|err| ProfileStoreError::Parse {
                path,
                message: err.to_string(),
            })
    }

    fn save(&self, store: &NodeStore) -> Result<(), ProfileStoreError> {
        let file_name = Self::file_name(store.profile())?;
        let path = self.root.join(&file_name);
        let rendered =
            serde_json::to_string_pretty(store).map_err(|err| ProfileStoreError::Parse {
                path: path.clone(),
                message: err.to_string(),
            })?;

        let dir = self.create_root()?;
        let temp_name = format!("{file_name}{TEMP_SUFFIX}");
        dir.write(&temp_name, rendered)
            .map_err(|err| io_error(&path, &err))?;
        dir.rename(&temp_name, &dir, &file_name)
            .map_err(|err| io_error(&path, &err))
    }

    fn remove(&self, profile: &str) -> Result<(), ProfileStoreError> {
        let file_name = Self::file_name(profile)?;
        let Some(dir) = self.open_root()? else {
            return Ok(());
        };
        match dir.remove_file(&file_name) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_error(&self.root.join(&file_name), &err)),
        }
    }

    fn list(&self) -> Result<Vec<String>, ProfileStoreError> {
        let Some(dir) = self.open_root()? else {
            return Ok(Vec::new());
        };
        let entries = dir
            .entries()
            .map_err(|err| io_error(&self.root, &err))?;

        let mut profiles = Vec::new();
        for entry in entries {
            let dir_entry = entry.map_err(|err| io_error(&self.root, &err))?;
            let name = dir_entry
                .file_name()
                .map_err(|err| io_error(&self.root, &err))?;
            if let Some(profile) = name
                .strip_suffix(RECORD_EXTENSION)
                .and_then(|stem| stem.strip_suffix('.'))
                && is_valid_profile_name(profile)
            {
                profiles.push(profile.to_owned());
            }
        }
        profiles.sort();
        Ok(profiles)
    }
}
