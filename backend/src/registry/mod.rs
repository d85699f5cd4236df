//! Rules Registry - versioned storage of uploaded matrix CSVs
//!
//! Layout under the storage root:
//!
//! ```text
//! <root>/
//! ├── meta.json          VersionMetadata
//! └── versions/
//!     ├── v1.csv
//!     └── v2.csv
//! ```

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::NamedTempFile;

use crate::api::logs::log_warning;
use crate::error::{RegistryError, RegistryResult};
use crate::models::{UploadRecord, VersionMetadata};

/// Default storage root (relative to current dir)
pub const DEFAULT_RULES_DIR: &str = "data/rules";

/// Default number of history entries kept in `meta.json`
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// History entries returned by [`RulesRegistry::active_info`]
pub const ACTIVE_INFO_HISTORY: usize = 10;

const VERSIONS_DIR: &str = "versions";
const META_FILE: &str = "meta.json";
const TEMP_PREFIX: &str = "__tmp_";

/// Something that may know the path of the active matrix version.
///
/// The loader only needs this much of the registry, and must work
/// before any upload ever happened.
pub trait ActiveVersionSource {
    fn active_version_path(&self) -> Option<PathBuf>;
}

/// Source with no registry behind it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRegistry;

impl ActiveVersionSource for NoRegistry {
    fn active_version_path(&self) -> Option<PathBuf> {
        None
    }
}

/// Summary returned by the "active rules" query.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActiveRulesInfo {
    pub active_version: Option<u64>,
    pub latest_version: u64,
    pub history: Vec<UploadRecord>,
}

/// On-disk catalog of matrix versions.
#[derive(Debug, Clone)]
pub struct RulesRegistry {
    root: PathBuf,
    versions_dir: PathBuf,
    meta_path: PathBuf,
    history_limit: usize,
}

impl RulesRegistry {
    /// Create a registry rooted at `root`. Nothing is touched on disk yet.
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            versions_dir: root.join(VERSIONS_DIR),
            meta_path: root.join(META_FILE),
            root,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    /// Cap the number of retained history entries.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn versions_dir(&self) -> &Path {
        &self.versions_dir
    }

    /// Create the directory tree and a default `meta.json` if missing.
    pub fn ensure_storage(&self) -> RegistryResult<()> {
        fs::create_dir_all(&self.versions_dir)?;
        if !self.meta_path.exists() {
            self.write_metadata(&VersionMetadata::default())?;
        }
        Ok(())
    }

    /// Load metadata, creating storage with defaults if absent.
    pub fn read_metadata(&self) -> RegistryResult<VersionMetadata> {
        self.ensure_storage()?;
        let content = fs::read_to_string(&self.meta_path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Replace `meta.json` through a temporary file and a rename.
    pub fn write_metadata(&self, meta: &VersionMetadata) -> RegistryResult<()> {
        fs::create_dir_all(&self.root)?;
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        tmp.write_all(serde_json::to_string_pretty(meta)?.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.meta_path).map_err(|e| RegistryError::Persist {
            path: self.meta_path.clone(),
            source: e.error,
        })?;
        Ok(())
    }

    /// File name of a stored version.
    pub fn version_file_name(version: u64) -> String {
        format!("v{}.csv", version)
    }

    /// Location of a stored version. Pure, no IO.
    pub fn version_file_path(&self, version: u64) -> PathBuf {
        self.versions_dir.join(Self::version_file_name(version))
    }

    /// Fresh temporary file next to the version files.
    ///
    /// Its name never matches `v{N}.csv`; dropping it deletes it.
    pub fn temp_upload_file(&self, version: u64) -> RegistryResult<NamedTempFile> {
        fs::create_dir_all(&self.versions_dir)?;
        let file = tempfile::Builder::new()
            .prefix(&format!("{}v{}_", TEMP_PREFIX, version))
            .suffix(".csv")
            .tempfile_in(&self.versions_dir)?;
        Ok(file)
    }

    /// Move a validated temporary file to its final version path.
    pub fn commit_version_file(&self, tmp: NamedTempFile, version: u64) -> RegistryResult<PathBuf> {
        let path = self.version_file_path(version);
        tmp.persist(&path).map_err(|e| RegistryError::Persist {
            path: path.clone(),
            source: e.error,
        })?;
        Ok(path)
    }

    /// Record `record` as the active version and persist the metadata.
    ///
    /// Only call this once the version file has been validated and committed.
    pub fn activate(&self, meta: &mut VersionMetadata, record: UploadRecord) -> RegistryResult<()> {
        meta.latest_version = meta.latest_version.max(record.version);
        meta.active_version = Some(record.version);
        meta.history.insert(0, record);
        meta.history.truncate(self.history_limit);
        self.write_metadata(meta)
    }

    /// Active/latest version and the most recent uploads.
    pub fn active_info(&self) -> RegistryResult<ActiveRulesInfo> {
        let meta = self.read_metadata()?;
        Ok(ActiveRulesInfo {
            active_version: meta.active_version,
            latest_version: meta.latest_version,
            history: meta.history.into_iter().take(ACTIVE_INFO_HISTORY).collect(),
        })
    }
}

impl Default for RulesRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_RULES_DIR)
    }
}

impl ActiveVersionSource for RulesRegistry {
    fn active_version_path(&self) -> Option<PathBuf> {
        let meta = match self.read_metadata() {
            Ok(meta) => meta,
            Err(e) => {
                log_warning(format!("Ignoring rules registry: {}", e));
                return None;
            }
        };
        let path = self.version_file_path(meta.active_version?);
        if path.exists() {
            Some(path)
        } else {
            log_warning(format!("Active rules file missing: {}", path.display()));
            None
        }
    }
}
