//! Error classification port.

use crate::domain::models::ErrorClassification;

/// Maps a failure message onto the error taxonomy.
///
/// Implementations must be total: anything they do not recognise is
/// [`ErrorClassification::unknown`].
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, message: &str) -> ErrorClassification;
}
