//! # Export error taxonomy
//!
//! Everything that can go wrong with a request, split by where it surfaces:
//! the first three fail before any body byte and turn into the JSON error
//! envelope; the last two happen mid-stream, truncate the chunked body, and
//! mark the request `[Failed]` in the access log.

use masq_core::plan::PlanError;
use masq_core::rules::BindError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    /// A descriptor file is absent from the request workspace.
    #[error("request configuration not found: {0}")]
    ConfigMissing(String),

    /// A descriptor failed to parse or failed semantic validation
    /// (planner or rule binder).
    #[error("request configuration malformed: {0}")]
    ConfigMalformed(String),

    /// Connecting, preparing, or counting against the target failed.
    #[error("database unavailable: {0}")]
    DatabaseUnavailable(String),

    /// A reader's paged query failed mid-stream.
    #[error("query failed: {0}")]
    Query(String),

    /// The response body channel closed under the serializer
    /// (client disconnected).
    #[error("export stream write failed: client disconnected")]
    SerializerWrite,
}

impl From<PlanError> for ExportError {
    fn from(err: PlanError) -> Self {
        Self::ConfigMalformed(err.to_string())
    }
}

impl From<BindError> for ExportError {
    fn from(err: BindError) -> Self {
        Self::ConfigMalformed(err.to_string())
    }
}
