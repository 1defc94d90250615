//! CLI output: error mapping from domain errors to stable CLI surface.

use crate::error::AmbitError;

/// Map domain errors to a string for CLI output.
///
/// Configuration errors already carry a user-facing message, so their
/// category prefix is dropped.
pub fn map_error(e: &AmbitError) -> String {
    match e {
        AmbitError::Configuration(inner) => inner.to_string(),
        other => other.to_string(),
    }
}
