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

//! MedAdvisor query planning, execution and caching
//!
//! Turns a patient's question into a bound graph query, runs it against the
//! medication knowledge graph, memoizes the result, and hands back
//! citation-ready facts.
//!
//! ```text
//! question ─► IntentResolver ─► TemplateLibrary ─► QueryBuilder ─► BoundQuery
//!                                                                     │
//!               ┌──────────────── ResultCache (single flight) ◄──────┘
//!               │ miss
//!               ▼
//!          QueryExecutor ─► GraphStore        ResultSet ─► FactAssembler ─► facts
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! let advisor = MedAdvisor::builder(EngineConfig::load(None)?)
//!     .store(store.clone())
//!     .version_source(store)
//!     .build()?;
//!
//! let answer = advisor.answer_facts("How should I take Metformin?", None).await?;
//! for fact in &answer.facts {
//!     println!("{} {:?}", fact.statement, fact.source_ids());
//! }
//! ```

pub mod builder;
pub mod cache;
pub mod engine;
pub mod entity;
pub mod executor;
pub mod facts;
pub mod intent;
pub mod neo4j;
pub mod replay;
pub mod store;
pub mod template;

pub use builder::{canonical_text, BoundQuery, CacheKey, QueryBuilder};
pub use cache::{CacheEntry, CacheStats, CachedResult, ResultCache};
pub use engine::{Answer, MedAdvisor, MedAdvisorBuilder, QueryPlan};
pub use entity::{
    fulltext_query, CatalogEntityResolver, EntityLookup, EntityResolver, GraphEntityResolver,
};
pub use executor::{coerce_response, QueryExecutor};
pub use facts::{citation_report, CitationReport, FactAssembler};
pub use intent::{IntentClassifier, IntentResolver, Resolution};
pub use neo4j::Neo4jHttpStore;
pub use replay::{FixtureEntity, RecordedResponse, ReplayFixture, ReplayGraphStore};
pub use store::{
    GraphStore, GraphVersionSource, QueryParams, SharedGraphVersion, StoreError, StoreErrorKind,
    StoreResponse,
};
pub use template::{
    builtin_templates, ColumnKind, ColumnSpec, QueryTemplate, SlotSpec, SlotType, TemplateLibrary,
};
