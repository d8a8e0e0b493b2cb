//! Error classification and recording.
//!
//! [`ErrorRecorder::record_error`] is called from failure paths, so it must
//! never fail itself: storage problems while recording are logged and
//! swallowed, and the caller keeps handling its original error.

use std::fmt::Display;
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    truncate_error_message, ErrorClassification, ErrorDetails, ErrorHistoryEntry, ErrorType,
    SubordinateFlow,
};
use crate::domain::ports::{ErrorClassifier, FlowStore};

/// Default number of entries kept in a master flow's error history.
pub const DEFAULT_ERROR_HISTORY_LIMIT: usize = 10;

/// Case-insensitive substring rules; the first matching rule wins.
const RULES: [(&str, ErrorType); 6] = [
    ("timeout", ErrorType::TransientIo),
    ("connection", ErrorType::TransientIo),
    ("invalid", ErrorType::Validation),
    ("validation", ErrorType::Validation),
    ("permission", ErrorType::Permission),
    ("denied", ErrorType::Permission),
];

/// Classifier matching well-known words in the failure message.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubstringErrorClassifier;

impl ErrorClassifier for SubstringErrorClassifier {
    fn classify(&self, message: &str) -> ErrorClassification {
        let lowered = message.to_lowercase();
        RULES
            .iter()
            .find(|(needle, _)| lowered.contains(needle))
            .map_or_else(ErrorClassification::unknown, |(_, error_type)| {
                ErrorClassification::of(*error_type)
            })
    }
}

/// Persists classified errors onto flows.
pub struct ErrorRecorder<S: FlowStore, C: ErrorClassifier = SubstringErrorClassifier> {
    store: Arc<S>,
    classifier: C,
    history_limit: usize,
}

impl<S: FlowStore> ErrorRecorder<S, SubstringErrorClassifier> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_classifier(store, SubstringErrorClassifier, DEFAULT_ERROR_HISTORY_LIMIT)
    }
}

impl<S: FlowStore, C: ErrorClassifier> ErrorRecorder<S, C> {
    pub fn with_classifier(store: Arc<S>, classifier: C, history_limit: usize) -> Self {
        Self {
            store,
            classifier,
            history_limit: history_limit.max(1),
        }
    }

    pub fn classifier(&self) -> &C {
        &self.classifier
    }

    /// Record a failure against a subordinate flow and its master.
    ///
    /// `phase` defaults to the flow's current phase. Never returns an error.
    pub async fn record_error(
        &self,
        flow: &SubordinateFlow,
        error: &(dyn Display + Sync),
        phase: Option<&str>,
        error_code: Option<&str>,
    ) {
        let raw = error.to_string();
        let classification = self.classifier.classify(&raw);
        let phase = phase.map(str::to_string).or_else(|| flow.current_phase.clone());

        match self
            .persist(flow, truncate_error_message(&raw), phase.clone(), error_code, classification)
            .await
        {
            Ok(retry_count) => info!(
                flow_id = %flow.id,
                master_flow_id = %flow.master_flow_id,
                phase = phase.as_deref().unwrap_or("-"),
                error_type = %classification.error_type,
                retryable = classification.is_retryable,
                retry_count,
                "recorded flow error"
            ),
            Err(e) => error!(
                flow_id = %flow.id,
                master_flow_id = %flow.master_flow_id,
                original_error = %raw,
                error = %e,
                "failed to record flow error"
            ),
        }
    }

    async fn persist(
        &self,
        flow: &SubordinateFlow,
        message: String,
        phase: Option<String>,
        error_code: Option<&str>,
        classification: ErrorClassification,
    ) -> DomainResult<u32> {
        let details = ErrorDetails::new(error_code.map(str::to_string), classification);
        let tenant = &flow.tenant;

        let mut tx = self.store.begin().await?;
        let mut master = self
            .store
            .lock_master(&mut tx, tenant, flow.master_flow_id)
            .await?
            .ok_or(DomainError::FlowNotFound(flow.master_flow_id))?;
        let mut locked = self
            .store
            .lock_subordinate(&mut tx, tenant, flow.id)
            .await?
            .ok_or(DomainError::SubordinateNotFound(flow.id))?;

        locked.error_message = Some(message.clone());
        locked.error_phase.clone_from(&phase);
        locked.error_details = Some(details.clone());
        locked.touch();
        self.store.update_subordinate(&mut tx, &locked).await?;

        let entry = ErrorHistoryEntry {
            timestamp: Utc::now(),
            phase,
            error: message,
            details,
            retry_count: 0,
        };
        let retry_count = master.push_error(entry, self.history_limit);
        self.store.update_master(&mut tx, &master).await?;

        self.store.commit(tx).await?;
        Ok(retry_count)
    }
}
