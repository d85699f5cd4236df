//! In-memory holder of the active rules matrix.
//!
//! Readers take an `Arc` snapshot; a replacement swaps the pointer, so an
//! evaluation already holding a snapshot keeps seeing the old matrix in full.

use std::sync::{Arc, RwLock};

use crate::error::StoreError;
use crate::models::Matrix;

/// Shared cell holding the currently active matrix.
///
/// Cheap to clone; clones share the same cell.
#[derive(Debug, Clone, Default)]
pub struct MatrixStore {
    current: Arc<RwLock<Option<Arc<Matrix>>>>,
}

impl MatrixStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store already holding `matrix`.
    pub fn with_matrix(matrix: Matrix) -> Self {
        let store = Self::new();
        store.set(matrix);
        store
    }

    /// Snapshot of the active matrix.
    pub fn get(&self) -> Result<Arc<Matrix>, StoreError> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        guard.clone().ok_or(StoreError::NotLoaded)
    }

    /// Replace the active matrix and return the installed snapshot.
    pub fn set(&self, matrix: Matrix) -> Arc<Matrix> {
        let matrix = Arc::new(matrix);
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(Arc::clone(&matrix));
        matrix
    }

    pub fn is_loaded(&self) -> bool {
        self.get().is_ok()
    }
}
