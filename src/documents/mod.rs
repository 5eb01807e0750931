//! Document upload and indexing.

pub mod loader;
pub mod service;

pub use service::{DocumentService, IngestOptions, UploadedFile};
