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

//! Graph store collaborator interfaces
//!
//! The engine talks to the knowledge graph through two narrow seams:
//! [`GraphStore`] runs one read-only parameterized query, and
//! [`GraphVersionSource`] reports the logical data version that the ETL
//! pipeline bumps after every committed load batch.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Bound query parameters, in name order
pub type QueryParams = BTreeMap<String, serde_json::Value>;

/// Raw tabular response from the store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreResponse {
    pub columns: Vec<String>,
    #[serde(default)]
    pub records: Vec<Vec<serde_json::Value>>,
}

impl StoreResponse {
    pub fn new(columns: Vec<String>, records: Vec<Vec<serde_json::Value>>) -> Self {
        Self { columns, records }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreErrorKind {
    /// Connection loss, leader switch, deadlock; worth retrying
    Transient,
    /// Syntax error, constraint violation; retrying cannot help
    Deterministic,
}

#[derive(Debug, Clone, Error)]
#[error("{kind:?} store error: {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn deterministic(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Deterministic,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == StoreErrorKind::Transient
    }
}

/// Read-only access to the knowledge graph
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Run one read-only query. The store is read-consistent within a call.
    async fn run_query(
        &self,
        query_text: &str,
        params: &QueryParams,
        timeout: Duration,
    ) -> Result<StoreResponse, StoreError>;
}

/// Logical graph data version, incremented after each committed load batch
#[async_trait]
pub trait GraphVersionSource: Send + Sync {
    async fn current_version(&self) -> Result<u64, StoreError>;
}

/// In-process version counter the ETL side bumps directly.
#[derive(Debug, Clone, Default)]
pub struct SharedGraphVersion {
    version: Arc<AtomicU64>,
}

impl SharedGraphVersion {
    pub fn new(initial: u64) -> Self {
        Self {
            version: Arc::new(AtomicU64::new(initial)),
        }
    }

    /// Record a committed load batch; returns the new version
    pub fn bump(&self) -> u64 {
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn set(&self, version: u64) {
        self.version.store(version, Ordering::SeqCst);
    }

    pub fn get(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GraphVersionSource for SharedGraphVersion {
    async fn current_version(&self) -> Result<u64, StoreError> {
        Ok(self.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shared_version_bump() {
        let version = SharedGraphVersion::new(4);
        let handle = version.clone();

        assert_eq!(handle.bump(), 5);
        assert_eq!(version.current_version().await.unwrap(), 5);

        version.set(42);
        assert_eq!(handle.get(), 42);
    }

    #[test]
    fn test_store_error_kind() {
        assert!(StoreError::transient("connection reset").is_transient());
        assert!(!StoreError::deterministic("syntax error").is_transient());
    }
}
