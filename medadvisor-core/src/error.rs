// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Engine error types
//!
//! All errors are `Clone` so a single failed execution can be delivered to
//! every caller waiting on the same cache key.

use crate::graph::Entity;
use crate::intent::{Intent, IntentTag};
use serde::Serialize;
use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Why a slot could not be bound to a query parameter
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SlotBindingError {
    /// Required slot absent from the intent
    #[error("missing required slot '{slot}'")]
    Missing { slot: String },

    /// Slot value has the wrong shape
    #[error("slot '{slot}' expected {expected}, got {actual}")]
    InvalidType {
        slot: String,
        expected: String,
        actual: String,
    },

    /// Slot value failed a template constraint
    #[error("slot '{slot}' is invalid: {reason}")]
    Validation { slot: String, reason: String },

    /// No graph entity matches the mention
    #[error("no entity matches '{text}' for slot '{slot}'")]
    UnknownEntity { slot: String, text: String },

    /// More than one graph entity matches the mention
    #[error("'{text}' for slot '{slot}' matches {} entities", candidates.len())]
    AmbiguousEntity {
        slot: String,
        text: String,
        candidates: Vec<Entity>,
    },

    /// The entity lookup itself failed
    #[error("entity lookup for slot '{slot}' failed: {message}")]
    LookupFailed { slot: String, message: String },
}

impl SlotBindingError {
    pub fn slot(&self) -> &str {
        match self {
            SlotBindingError::Missing { slot }
            | SlotBindingError::InvalidType { slot, .. }
            | SlotBindingError::Validation { slot, .. }
            | SlotBindingError::UnknownEntity { slot, .. }
            | SlotBindingError::AmbiguousEntity { slot, .. }
            | SlotBindingError::LookupFailed { slot, .. } => slot,
        }
    }
}

/// Coarse error category, stable for logs and CLI exit handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Intent,
    Template,
    SlotBinding,
    Timeout,
    Execution,
    Shape,
    Config,
}

/// Errors surfaced by the query engine
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Classifier confidence below threshold or nothing matched
    #[error("could not determine intent (confidence {confidence:.2})")]
    UnresolvedIntent { question: String, confidence: f32 },

    /// Two or more intents tied for the top score
    #[error("question is ambiguous between {}", describe_candidates(candidates))]
    AmbiguousIntent { candidates: Vec<Intent> },

    /// No template registered for the intent tag
    #[error("no query template for intent {intent}")]
    NoTemplateForIntent { intent: IntentTag },

    /// Slot could not be bound
    #[error("slot binding failed for {intent}: {source}")]
    SlotBinding {
        intent: IntentTag,
        #[source]
        source: SlotBindingError,
    },

    /// Every attempt exceeded the per-attempt timeout
    #[error("query {template_id} timed out after {attempts} attempt(s) of {timeout_ms}ms")]
    QueryTimeout {
        template_id: String,
        timeout_ms: u64,
        attempts: u32,
    },

    /// Store rejected or failed the query
    #[error("query {template_id} failed after {attempts} attempt(s): {message}")]
    QueryExecution {
        template_id: String,
        message: String,
        transient: bool,
        attempts: u32,
    },

    /// Returned columns do not match the template declaration
    #[error("result shape mismatch for {template_id}: {detail}")]
    ResultShapeMismatch { template_id: String, detail: String },

    /// A row is missing a non-nullable column or has a bad value
    #[error("malformed row {row} for {template_id}: column '{column}' {detail}")]
    MalformedRow {
        template_id: String,
        row: usize,
        column: String,
        detail: String,
    },

    /// Invalid configuration or template definition
    #[error("configuration error: {0}")]
    Config(String),
}

fn describe_candidates(candidates: &[Intent]) -> String {
    candidates
        .iter()
        .map(|c| c.tag.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::UnresolvedIntent { .. } | EngineError::AmbiguousIntent { .. } => {
                ErrorKind::Intent
            }
            EngineError::NoTemplateForIntent { .. } => ErrorKind::Template,
            EngineError::SlotBinding { .. } => ErrorKind::SlotBinding,
            EngineError::QueryTimeout { .. } => ErrorKind::Timeout,
            EngineError::QueryExecution { .. } => ErrorKind::Execution,
            EngineError::ResultShapeMismatch { .. } | EngineError::MalformedRow { .. } => {
                ErrorKind::Shape
            }
            EngineError::Config(_) => ErrorKind::Config,
        }
    }

    /// Whether the caller can recover by asking a clarifying question
    /// or retrying later, as opposed to a defect in templates or data.
    pub fn is_recoverable(&self) -> bool {
        match self {
            EngineError::UnresolvedIntent { .. }
            | EngineError::AmbiguousIntent { .. }
            | EngineError::SlotBinding { .. }
            | EngineError::QueryTimeout { .. } => true,
            EngineError::QueryExecution { transient, .. } => *transient,
            EngineError::NoTemplateForIntent { .. }
            | EngineError::ResultShapeMismatch { .. }
            | EngineError::MalformedRow { .. }
            | EngineError::Config(_) => false,
        }
    }

    pub fn slot_binding(intent: IntentTag, source: SlotBindingError) -> Self {
        EngineError::SlotBinding { intent, source }
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(e: toml::de::Error) -> Self {
        EngineError::Config(e.to_string())
    }
}
