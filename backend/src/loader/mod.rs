//! Startup matrix loader.
//!
//! Resolution order:
//! 1. the active registry version, if its file exists
//! 2. the configured default CSV
//! 3. any `*.csv` in the configured data directory
//!
//! Failure here is fatal: there is no earlier matrix to fall back to.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::api::logs::{log_info, log_success};
use crate::error::{LoaderError, LoaderResult};
use crate::models::Matrix;
use crate::parser;
use crate::registry::ActiveVersionSource;
use crate::store::MatrixStore;

/// Default CSV used when no version is active.
pub const DEFAULT_MATRIX_CSV: &str = "data/matrix.csv";

/// Directory scanned as a last resort.
pub const DEFAULT_DATA_DIR: &str = "data";

/// Where the bootstrap matrix came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatrixSource {
    ActiveVersion(PathBuf),
    DefaultFile(PathBuf),
    Discovered(PathBuf),
}

impl MatrixSource {
    pub fn path(&self) -> &Path {
        match self {
            MatrixSource::ActiveVersion(p) | MatrixSource::DefaultFile(p) | MatrixSource::Discovered(p) => p.as_path(),
        }
    }
}

impl fmt::Display for MatrixSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            MatrixSource::ActiveVersion(_) => "active version",
            MatrixSource::DefaultFile(_) => "default file",
            MatrixSource::Discovered(_) => "data directory",
        };
        write!(f, "{} {}", kind, self.path().display())
    }
}

/// Bootstrap loader configuration.
#[derive(Debug, Clone)]
pub struct MatrixLoader {
    default_csv: PathBuf,
    data_dir: PathBuf,
}

impl MatrixLoader {
    pub fn new(default_csv: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            default_csv: default_csv.into(),
            data_dir: data_dir.into(),
        }
    }

    /// Pick the file to load, without reading it.
    pub fn resolve(&self, registry: &dyn ActiveVersionSource) -> LoaderResult<MatrixSource> {
        if let Some(path) = registry.active_version_path() {
            return Ok(MatrixSource::ActiveVersion(path));
        }
        if self.default_csv.is_file() {
            return Ok(MatrixSource::DefaultFile(self.default_csv.clone()));
        }
        if let Some(path) = find_csv(&self.data_dir) {
            return Ok(MatrixSource::Discovered(path));
        }

        Err(LoaderError::NoMatrixSource {
            searched: vec![
                "active registry version".to_string(),
                self.default_csv.display().to_string(),
                self.data_dir.join("*.csv").display().to_string(),
            ],
        })
    }

    /// Resolve, parse and install the bootstrap matrix.
    pub fn load(&self, registry: &dyn ActiveVersionSource, store: &MatrixStore) -> LoaderResult<Arc<Matrix>> {
        let source = self.resolve(registry)?;
        log_info(format!("Loading matrix from {}", source));

        let matrix = load_matrix_from_path(source.path())?;
        log_success(format!(
            "Matrix loaded: {} countries, {} categories",
            matrix.countries.len(),
            matrix.categories.len()
        ));

        Ok(store.set(matrix))
    }
}

impl Default for MatrixLoader {
    fn default() -> Self {
        Self::new(DEFAULT_MATRIX_CSV, DEFAULT_DATA_DIR)
    }
}

/// Read and parse a matrix CSV file.
pub fn load_matrix_from_path(path: &Path) -> LoaderResult<Matrix> {
    let bytes = fs::read(path).map_err(|source| LoaderError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parser::parse(&bytes).map_err(|source| LoaderError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// First `*.csv` file (by name) directly inside `dir`.
fn find_csv(dir: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    let mut candidates: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("csv"))
        })
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}
