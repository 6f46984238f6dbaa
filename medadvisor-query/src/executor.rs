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

//! Query Executor
//!
//! Runs a [`BoundQuery`] against the graph store with a per-attempt
//! deadline, retries transient failures with exponential backoff, and
//! checks the returned shape against the template's declared columns.
//!
//! Retry rules:
//!
//! | outcome                 | retried | surfaced as                  |
//! |-------------------------|---------|------------------------------|
//! | transient store error   | yes     | `QueryExecution{transient}`  |
//! | attempt deadline        | yes     | `QueryTimeout`               |
//! | deterministic error     | no      | `QueryExecution`             |
//! | column/shape mismatch   | no      | `ResultShapeMismatch`        |

use crate::builder::BoundQuery;
use crate::store::{GraphStore, StoreResponse};
use crate::template::{ColumnKind, QueryTemplate};
use medadvisor_core::{
    EngineError, EntityRef, ExecutorConfig, RelationRef, Result, ResultSet, RetryPolicy, Row, Value,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

enum Failure {
    Timeout,
    Transient(String),
}

pub struct QueryExecutor {
    store: Arc<dyn GraphStore>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl QueryExecutor {
    pub fn new(store: Arc<dyn GraphStore>, config: &ExecutorConfig) -> Self {
        Self {
            store,
            timeout: config.timeout(),
            retry: RetryPolicy::from(&config.retry),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Execute one read-only query, retrying transient failures
    pub async fn execute(&self, query: &BoundQuery) -> Result<ResultSet> {
        let template = &query.template;
        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_failure = Failure::Timeout;

        for attempt in 0..max_attempts {
            if attempt > 0 {
                let delay = self.retry.delay_for_attempt(attempt - 1);
                tracing::debug!(
                    template_id = %template.id,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying query"
                );
                tokio::time::sleep(delay).await;
            }

            let started = Instant::now();
            let call = self
                .store
                .run_query(&template.query_text, &query.params, self.timeout);

            match tokio::time::timeout(self.timeout, call).await {
                Ok(Ok(response)) => {
                    let result = coerce_response(template, response)?;
                    tracing::debug!(
                        template_id = %template.id,
                        rows = result.len(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        attempts = attempt + 1,
                        "Query executed"
                    );
                    return Ok(result);
                }
                Ok(Err(e)) if e.is_transient() => {
                    tracing::warn!(
                        template_id = %template.id,
                        attempt = attempt + 1,
                        error = %e.message,
                        "Transient store error"
                    );
                    last_failure = Failure::Transient(e.message);
                }
                Ok(Err(e)) => {
                    tracing::warn!(template_id = %template.id, error = %e.message, "Query failed");
                    return Err(EngineError::QueryExecution {
                        template_id: template.id.clone(),
                        message: e.message,
                        transient: false,
                        attempts: attempt + 1,
                    });
                }
                Err(_) => {
                    tracing::warn!(
                        template_id = %template.id,
                        attempt = attempt + 1,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Query attempt timed out"
                    );
                    last_failure = Failure::Timeout;
                }
            }
        }

        Err(match last_failure {
            Failure::Timeout => EngineError::QueryTimeout {
                template_id: template.id.clone(),
                timeout_ms: self.timeout.as_millis() as u64,
                attempts: max_attempts,
            },
            Failure::Transient(message) => EngineError::QueryExecution {
                template_id: template.id.clone(),
                message,
                transient: true,
                attempts: max_attempts,
            },
        })
    }
}

/// Validate the store response against the template and type every cell
pub fn coerce_response(template: &QueryTemplate, response: StoreResponse) -> Result<ResultSet> {
    let declared = template.column_names();
    let mismatch = |detail: String| EngineError::ResultShapeMismatch {
        template_id: template.id.clone(),
        detail,
    };

    // Neo4j omits column names when nothing matched
    if response.columns.is_empty() && response.records.is_empty() {
        return Ok(ResultSet::new(template.id.clone(), declared, Vec::new()));
    }

    if response.columns != declared {
        return Err(mismatch(format!(
            "expected columns {:?}, got {:?}",
            declared, response.columns
        )));
    }

    let mut rows = Vec::with_capacity(response.records.len());
    for (index, record) in response.records.into_iter().enumerate() {
        if record.len() != template.columns.len() {
            return Err(mismatch(format!(
                "record {} has {} values, expected {}",
                index,
                record.len(),
                template.columns.len()
            )));
        }

        let mut row = Row::new();
        for (spec, raw) in template.columns.iter().zip(record) {
            let value = coerce_value(spec.kind, raw)
                .map_err(|detail| mismatch(format!("record {} column '{}': {}", index, spec.name, detail)))?;
            row.insert(spec.name.clone(), value);
        }
        rows.push(row);
    }

    Ok(ResultSet::new(template.id.clone(), declared, rows))
}

fn coerce_value(kind: ColumnKind, raw: serde_json::Value) -> std::result::Result<Value, String> {
    use serde_json::Value as Json;

    if raw.is_null() {
        return Ok(Value::Null);
    }

    match (kind, raw) {
        (ColumnKind::Text, Json::String(s)) => Ok(Value::Text(s)),
        (ColumnKind::Text, Json::Number(n)) => Ok(Value::Text(n.to_string())),
        (ColumnKind::Text, Json::Bool(b)) => Ok(Value::Text(b.to_string())),
        (ColumnKind::Number, Json::Number(n)) => n
            .as_f64()
            .map(Value::Number)
            .ok_or_else(|| format!("number {} out of range", n)),
        (ColumnKind::Bool, Json::Bool(b)) => Ok(Value::Bool(b)),
        (ColumnKind::TextList, Json::Array(items)) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Json::Null => {}
                    Json::String(s) => values.push(Value::Text(s)),
                    Json::Number(n) => values.push(Value::Text(n.to_string())),
                    other => return Err(format!("list element {} is not text", other)),
                }
            }
            Ok(Value::List(values))
        }
        (ColumnKind::Entity(kind), Json::String(id)) => Ok(Value::Entity(EntityRef::new(kind, id))),
        (ColumnKind::Entity(kind), Json::Number(id)) => {
            Ok(Value::Entity(EntityRef::new(kind, id.to_string())))
        }
        (ColumnKind::Relation(kind), Json::String(id)) => {
            Ok(Value::Relation(RelationRef::new(kind, id)))
        }
        (ColumnKind::Relation(kind), Json::Number(id)) => {
            Ok(Value::Relation(RelationRef::new(kind, id.to_string())))
        }
        (kind, other) => Err(format!("cannot read {} as {:?}", other, kind)),
    }
}
