//! # Postcheck - posted-worker notification rules
//!
//! Postcheck answers one question for a planned business trip: does the
//! destination country require a posting notification? The answer comes from
//! a country x category matrix maintained as a `;`-delimited CSV, uploaded
//! and versioned at runtime.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   CSV File  │────▶│   Parser    │────▶│ MatrixStore │────▶│  Evaluation │
//! │  (upload)   │     │  (validate) │     │ (hot swap)  │     │  (decision) │
//! └─────────────┘     └─────────────┘     └─────────────┘     └─────────────┘
//!        │                                       ▲
//!        ▼                                       │
//! ┌─────────────┐                         ┌─────────────┐
//! │  Registry   │────────────────────────▶│   Loader    │
//! │ (versions/) │                         │ (bootstrap) │
//! └─────────────┘                         └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use postcheck::{MatrixLoader, MatrixStore, RulesRegistry, evaluate_current};
//!
//! let store = MatrixStore::new();
//! let registry = RulesRegistry::new("data/rules");
//! MatrixLoader::default().load(&registry, &store)?;
//!
//! let decision = evaluate_current(&store, request)?;
//! println!("notification required: {}", decision.requires_notification);
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Error types per concern
//! - [`models`] - Matrix and registry models
//! - [`parser`] - CSV matrix parsing
//! - [`store`] - Active matrix holder
//! - [`registry`] - Versioned rules storage
//! - [`loader`] - Startup matrix selection
//! - [`upload`] - Validated upload and hot reload
//! - [`evaluation`] - Notification decision
//! - [`config`] - Environment configuration
//! - [`api`] - HTTP API server

// Core modules
pub mod error;
pub mod models;
pub mod config;

// Matrix
pub mod parser;
pub mod store;

// Versioning
pub mod registry;
pub mod loader;
pub mod upload;

// Decision
pub mod evaluation;

// HTTP API
pub mod api;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    ConfigError,
    EvaluationError,
    LoaderError,
    ParseError,
    RegistryError,
    ServerError,
    StoreError,
    UploadError,
};

// =============================================================================
// Re-exports - Models
// =============================================================================

pub use models::{
    CategoryEntry,
    Country,
    CountryData,
    Matrix,
    UploadRecord,
    VersionMetadata,
};

// =============================================================================
// Re-exports - Matrix
// =============================================================================

pub use parser::{country_label, parse, parse_str};
pub use store::MatrixStore;

// =============================================================================
// Re-exports - Versioning
// =============================================================================

pub use registry::{ActiveRulesInfo, ActiveVersionSource, NoRegistry, RulesRegistry};
pub use loader::{load_matrix_from_path, MatrixLoader, MatrixSource};
pub use upload::{ActivationResult, RulesUpload, UploadWorkflow};

// =============================================================================
// Re-exports - Evaluation
// =============================================================================

pub use evaluation::{duration_days, evaluate, evaluate_current, Decision, EvaluationRequest};

pub use config::Config;

// Server
pub mod server {
    pub use crate::api::server::{router, start_server, AppState};
}
