//! HTTP API module.
//!
//! Thin axum layer over the store, the evaluation engine and the upload
//! workflow, plus the operator log stream.

pub mod logs;
pub mod server;
pub mod types;

pub use server::{router, start_server, AppState};
pub use types::*;
pub use logs::*;
