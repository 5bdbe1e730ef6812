//! Validated, size-bounded metadata.
//!
//! Callers attach context to transactions and reservations through a fixed
//! set of known fields rather than a free-form blob. Unknown fields are
//! rejected at deserialization and oversized values are rejected at the
//! boundary by [`Metadata::validate`].

use serde::{Deserialize, Serialize};

use crate::{LedgerError, Result};

/// Maximum length of any single metadata field, in bytes.
pub const MAX_METADATA_FIELD_BYTES: usize = 256;

/// Bounded, schema-validated context attached to ledger records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Metadata {
    /// The service that originated the operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Caller-side request identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// Caller-side session identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Free-form note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Metadata {
    /// Set the originating service.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Set the request identifier.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Set the session identifier.
    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Set a free-form note.
    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Validate field sizes.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Validation` if any field exceeds
    /// [`MAX_METADATA_FIELD_BYTES`].
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("source", &self.source),
            ("request_id", &self.request_id),
            ("session_id", &self.session_id),
            ("note", &self.note),
        ] {
            if let Some(v) = value {
                if v.len() > MAX_METADATA_FIELD_BYTES {
                    return Err(LedgerError::Validation(format!(
                        "metadata field `{name}` exceeds {MAX_METADATA_FIELD_BYTES} bytes"
                    )));
                }
            }
        }
        Ok(())
    }
}
