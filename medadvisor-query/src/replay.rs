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

//! Replay store
//!
//! A [`GraphStore`] that answers from recorded responses in a JSON fixture.
//! Used by the CLI for offline runs and by integration tests.
//!
//! ```json
//! {
//!   "graph_version": 3,
//!   "entities": [
//!     {"kind": "medication", "id": "med-metformin", "name": "Metformin",
//!      "synonyms": ["glucophage"]}
//!   ],
//!   "responses": [
//!     {"query_contains": "HAS_DOSE",
//!      "params": {"medication_id": "med-metformin"},
//!      "columns": ["medication_id", "medication", "..."],
//!      "records": [["med-metformin", "Metformin", "..."]]}
//!   ]
//! }
//! ```

use crate::entity::CatalogEntityResolver;
use crate::store::{
    GraphStore, GraphVersionSource, QueryParams, SharedGraphVersion, StoreError, StoreResponse,
};
use async_trait::async_trait;
use medadvisor_core::{EngineError, Entity, EntityKind, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureEntity {
    pub kind: EntityKind,
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub synonyms: Vec<String>,
}

/// A recorded store answer, selected by query fragment and parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedResponse {
    pub query_contains: String,
    /// Parameters that must match exactly; others are ignored
    #[serde(default)]
    pub params: QueryParams,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub records: Vec<Vec<serde_json::Value>>,
}

impl RecordedResponse {
    fn matches(&self, query_text: &str, params: &QueryParams) -> bool {
        query_text.contains(&self.query_contains)
            && self
                .params
                .iter()
                .all(|(name, expected)| params.get(name) == Some(expected))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayFixture {
    #[serde(default)]
    pub graph_version: u64,
    #[serde(default)]
    pub entities: Vec<FixtureEntity>,
    #[serde(default)]
    pub responses: Vec<RecordedResponse>,
}

impl ReplayFixture {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("Failed to read fixture {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            EngineError::Config(format!("Failed to parse fixture {}: {}", path.display(), e))
        })
    }

    /// Entity catalog built from the fixture's entities
    pub fn catalog(&self) -> CatalogEntityResolver {
        let mut catalog = CatalogEntityResolver::new();
        for e in &self.entities {
            catalog.insert(
                Entity::new(e.kind, e.id.clone(), e.name.clone()),
                e.synonyms.clone(),
            );
        }
        catalog
    }
}

/// In-memory store replaying fixture responses
pub struct ReplayGraphStore {
    responses: Vec<RecordedResponse>,
    version: SharedGraphVersion,
    calls: AtomicUsize,
}

impl ReplayGraphStore {
    pub fn new(fixture: &ReplayFixture) -> Self {
        Self {
            responses: fixture.responses.clone(),
            version: SharedGraphVersion::new(fixture.graph_version),
            calls: AtomicUsize::new(0),
        }
    }

    /// Queries answered so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Handle for simulating ETL loads
    pub fn version_handle(&self) -> SharedGraphVersion {
        self.version.clone()
    }
}

#[async_trait]
impl GraphStore for ReplayGraphStore {
    async fn run_query(
        &self,
        query_text: &str,
        params: &QueryParams,
        _timeout: Duration,
    ) -> std::result::Result<StoreResponse, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        match self.responses.iter().find(|r| r.matches(query_text, params)) {
            Some(recorded) => Ok(StoreResponse::new(
                recorded.columns.clone(),
                recorded.records.clone(),
            )),
            None => {
                tracing::debug!("No recorded response, replaying empty result");
                Ok(StoreResponse::default())
            }
        }
    }
}

#[async_trait]
impl GraphVersionSource for ReplayGraphStore {
    async fn current_version(&self) -> std::result::Result<u64, StoreError> {
        Ok(self.version.get())
    }
}
