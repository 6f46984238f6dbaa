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

//! MedAdvisor Core
//!
//! Shared data model for the medication Q&A query engine: graph references,
//! typed result rows, intents, grounded facts, errors and configuration.
//!
//! The query pipeline itself lives in `medadvisor-query`.

pub mod config;
pub mod error;
pub mod fact;
pub mod graph;
pub mod intent;
pub mod resilience;

pub use config::{
    AmbiguityPolicy, CacheConfig, EngineConfig, ExecutorConfig, IntentConfig, Neo4jConfig,
    RetryConfig,
};
pub use error::{EngineError, ErrorKind, Result, SlotBindingError};
pub use fact::Fact;
pub use graph::{Entity, EntityKind, EntityRef, RelationKind, RelationRef, ResultSet, Row, Value};
pub use intent::{ConversationContext, Intent, IntentTag, SlotValue, TimeUnit, Turn};
pub use resilience::RetryPolicy;
