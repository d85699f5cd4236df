//! Upload and activation of a new rules matrix.
//!
//! The candidate CSV is written to a temporary file, parsed, and only then
//! renamed to `v{N}.csv`, recorded in the registry and swapped into the
//! store. A rejected upload leaves the registry and the store untouched.
//!
//! Uploads are serialized: two concurrent calls never compute the same
//! candidate version.

use std::fs;
use std::io::Write;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;

use crate::api::logs::{log_error, log_info, log_success};
use crate::error::{UploadError, UploadResult};
use crate::models::{UploadRecord, VersionMetadata};
use crate::parser;
use crate::registry::RulesRegistry;
use crate::store::MatrixStore;

/// An uploaded file as received from the HTTP layer.
#[derive(Debug, Clone)]
pub struct RulesUpload {
    pub original_name: String,
    pub mime_type: String,
    pub content: Vec<u8>,
}

/// Outcome of a successful upload.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActivationResult {
    pub message: String,
    pub active_version: u64,
    pub latest_version: u64,
    pub countries_count: usize,
}

/// Validates uploads and commits them as the active version.
///
/// Cheap to clone; clones share the registry lock.
#[derive(Debug, Clone)]
pub struct UploadWorkflow {
    registry: RulesRegistry,
    store: MatrixStore,
    lock: Arc<Mutex<()>>,
}

impl UploadWorkflow {
    pub fn new(registry: RulesRegistry, store: MatrixStore) -> Self {
        Self {
            registry,
            store,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn registry(&self) -> &RulesRegistry {
        &self.registry
    }

    /// Validate `upload` and, if it parses, make it the active matrix.
    pub fn upload_and_activate(&self, upload: RulesUpload) -> UploadResult<ActivationResult> {
        if !has_csv_extension(&upload.original_name) {
            log_error(format!("Rejected upload {}: not a .csv file", upload.original_name));
            return Err(UploadError::bad_extension(&upload.original_name));
        }

        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut meta = self.registry.read_metadata()?;
        let version = meta.latest_version + 1;
        log_info(format!(
            "Validating {} ({} bytes) as v{}",
            upload.original_name,
            upload.content.len(),
            version
        ));

        let mut tmp = self.registry.temp_upload_file(version)?;
        tmp.write_all(&upload.content)?;
        tmp.flush()?;

        let matrix = match fs::read(tmp.path()).map(|bytes| parser::parse(&bytes)) {
            Ok(Ok(matrix)) => matrix,
            Ok(Err(e)) => {
                log_error(format!("CSV validation failed: {}", e));
                // Dropping the temporary file deletes it.
                drop(tmp);
                return Err(UploadError::invalid_csv(&e));
            }
            Err(e) => return Err(e.into()),
        };

        self.registry.commit_version_file(tmp, version)?;

        let countries_count = matrix.countries.len();
        let record = UploadRecord {
            version,
            stored_filename: RulesRegistry::version_file_name(version),
            uploaded_at: Utc::now(),
            original_name: upload.original_name,
            mime_type: upload.mime_type,
            countries_count,
        };
        self.activate_committed(&mut meta, record)?;

        self.store.set(matrix);
        log_success(format!(
            "Rules v{} active: {} countries",
            version, countries_count
        ));

        Ok(ActivationResult {
            message: format!("Rules uploaded and activated as v{}.", version),
            active_version: version,
            latest_version: meta.latest_version,
            countries_count,
        })
    }

    /// Record an already committed version file. If the metadata cannot be
    /// written, the file is removed so no unrecorded `v{N}.csv` remains.
    fn activate_committed(&self, meta: &mut VersionMetadata, record: UploadRecord) -> UploadResult<()> {
        let version = record.version;
        if let Err(e) = self.registry.activate(meta, record) {
            let path = self.registry.version_file_path(version);
            log_error(format!("Activation of v{} failed: {}", version, e));
            if let Err(rm) = fs::remove_file(&path) {
                log_error(format!("Could not remove {}: {}", path.display(), rm));
            }
            return Err(e.into());
        }
        Ok(())
    }
}

fn has_csv_extension(name: &str) -> bool {
    name.to_lowercase().ends_with(".csv")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParseError;
    use tempfile::tempdir;

    const V1: &str = ";;FR;DE\nMeldepflichtige Entsendetätigkeit;;Ja;\n";
    const V2: &str = ";;FR;DE;PL\nMeldepflichtige Entsendetätigkeit;;Ja;Ja;Ja\n";

    fn upload(name: &str, content: &str) -> RulesUpload {
        RulesUpload {
            original_name: name.into(),
            mime_type: "text/csv".into(),
            content: content.as_bytes().to_vec(),
        }
    }

    fn versions_dir_entries(workflow: &UploadWorkflow) -> Vec<String> {
        let mut names: Vec<_> = fs::read_dir(workflow.registry().versions_dir())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_successful_upload_activates() {
        let dir = tempdir().unwrap();
        let store = MatrixStore::new();
        let workflow = UploadWorkflow::new(RulesRegistry::new(dir.path()), store.clone());

        let result = workflow.upload_and_activate(upload("Matrix.CSV", V1)).unwrap();
        assert_eq!(result.active_version, 1);
        assert_eq!(result.latest_version, 1);
        assert_eq!(result.countries_count, 2);
        assert_eq!(result.message, "Rules uploaded and activated as v1.");

        let meta = workflow.registry().read_metadata().unwrap();
        assert_eq!(meta.active_version, Some(1));
        assert_eq!(meta.history.len(), 1);
        assert_eq!(meta.history[0].stored_filename, "v1.csv");
        assert_eq!(meta.history[0].original_name, "Matrix.CSV");
        assert_eq!(meta.history[0].countries_count, 2);

        assert_eq!(versions_dir_entries(&workflow), vec!["v1.csv"]);
        assert_eq!(store.get().unwrap().countries.len(), 2);
    }

    #[test]
    fn test_second_upload_advances_by_one() {
        let dir = tempdir().unwrap();
        let store = MatrixStore::new();
        let workflow = UploadWorkflow::new(RulesRegistry::new(dir.path()), store.clone());

        workflow.upload_and_activate(upload("a.csv", V1)).unwrap();
        let result = workflow.upload_and_activate(upload("b.csv", V2)).unwrap();

        assert_eq!(result.active_version, 2);
        assert_eq!(result.latest_version, 2);
        assert_eq!(store.get().unwrap().countries.len(), 3);
        assert_eq!(versions_dir_entries(&workflow), vec!["v1.csv", "v2.csv"]);
    }

    #[test]
    fn test_invalid_upload_keeps_previous_version() {
        let dir = tempdir().unwrap();
        let store = MatrixStore::new();
        let workflow = UploadWorkflow::new(RulesRegistry::new(dir.path()), store.clone());
        workflow.upload_and_activate(upload("a.csv", V1)).unwrap();
        let before = store.get().unwrap();

        let err = workflow
            .upload_and_activate(upload("broken.csv", ";;FR;FR\nKat;;x;y\n"))
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "CSV validation failed. Keeping previous active rules."
        );
        assert_eq!(
            err.reason(),
            Some(ParseError::DuplicateCountry("FR".into()).to_string().as_str())
        );

        let meta = workflow.registry().read_metadata().unwrap();
        assert_eq!(meta.active_version, Some(1));
        assert_eq!(meta.latest_version, 1);
        assert_eq!(meta.history.len(), 1);
        assert!(Arc::ptr_eq(&before, &store.get().unwrap()));
        // No temporary leftovers, no v2.csv.
        assert_eq!(versions_dir_entries(&workflow), vec!["v1.csv"]);
    }

    #[test]
    fn test_rejected_version_number_is_reused() {
        let dir = tempdir().unwrap();
        let workflow = UploadWorkflow::new(RulesRegistry::new(dir.path()), MatrixStore::new());

        assert!(workflow.upload_and_activate(upload("bad.csv", ";;FR\nKat;;\n")).is_err());
        let result = workflow.upload_and_activate(upload("good.csv", V1)).unwrap();
        assert_eq!(result.active_version, 1);
    }

    #[test]
    fn test_extension_checked_before_disk_write() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("rules");
        let workflow = UploadWorkflow::new(RulesRegistry::new(&root), MatrixStore::new());

        let err = workflow.upload_and_activate(upload("rules.xlsx", V1)).unwrap_err();
        assert_eq!(err.to_string(), "Only .csv files are allowed.");
        assert_eq!(err.details()["originalName"], "rules.xlsx");
        assert!(!root.exists());
    }

    #[test]
    fn test_concurrent_uploads_get_distinct_versions() {
        let dir = tempdir().unwrap();
        let workflow = UploadWorkflow::new(RulesRegistry::new(dir.path()), MatrixStore::new());

        let handles: Vec<_> = (0..6)
            .map(|i| {
                let workflow = workflow.clone();
                std::thread::spawn(move || {
                    workflow
                        .upload_and_activate(upload(&format!("m{}.csv", i), V1))
                        .unwrap()
                        .active_version
                })
            })
            .collect();

        let mut versions: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        versions.sort();
        assert_eq!(versions, vec![1, 2, 3, 4, 5, 6]);

        let meta = workflow.registry().read_metadata().unwrap();
        assert_eq!(meta.latest_version, 6);
        assert_eq!(meta.history.len(), 6);
    }

    #[test]
    fn test_failed_activation_removes_committed_file() {
        let dir = tempdir().unwrap();
        let registry = RulesRegistry::new(dir.path());
        fs::create_dir_all(registry.versions_dir()).unwrap();
        fs::write(registry.version_file_path(1), V1).unwrap();
        // meta.json as a non-empty directory makes the metadata rename fail.
        fs::create_dir_all(dir.path().join("meta.json").join("blocked")).unwrap();

        let store = MatrixStore::new();
        let workflow = UploadWorkflow::new(registry, store.clone());
        let mut meta = VersionMetadata::default();
        let record = UploadRecord {
            version: 1,
            stored_filename: RulesRegistry::version_file_name(1),
            uploaded_at: Utc::now(),
            original_name: "a.csv".into(),
            mime_type: "text/csv".into(),
            countries_count: 2,
        };

        let err = workflow.activate_committed(&mut meta, record).unwrap_err();
        assert!(matches!(err, UploadError::Registry(_)));
        assert!(!workflow.registry().version_file_path(1).exists());
        assert!(versions_dir_entries(&workflow).is_empty());
        assert!(!store.is_loaded());
    }
}
