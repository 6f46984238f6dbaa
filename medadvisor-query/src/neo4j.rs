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

//! Neo4j HTTP adapter
//!
//! Implements [`GraphStore`] and [`GraphVersionSource`] over the Neo4j
//! transactional HTTP endpoint (`POST /db/{database}/tx/commit`). Every
//! request is sent with `access-mode: READ` so the server rejects writes.

use crate::store::{GraphStore, GraphVersionSource, QueryParams, StoreError, StoreResponse};
use async_trait::async_trait;
use medadvisor_core::{EngineError, Neo4jConfig, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const VERSION_QUERY: &str =
    "MATCH (v:GraphVersion) RETURN coalesce(max(v.version), 0) AS version";

/// Connection-pooled client for one Neo4j database
pub struct Neo4jHttpStore {
    client: reqwest::Client,
    endpoint: String,
    username: String,
    password: Option<String>,
    /// Deadline for version reads, which have no caller-supplied timeout
    version_timeout: Duration,
}

impl Neo4jHttpStore {
    pub fn new(config: &Neo4jConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| EngineError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: commit_endpoint(&config.uri, &config.database),
            username: config.username.clone(),
            password: config.password.clone(),
            version_timeout: Duration::from_secs(2),
        })
    }

    pub fn with_version_timeout(mut self, timeout: Duration) -> Self {
        self.version_timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn commit_endpoint(uri: &str, database: &str) -> String {
    format!("{}/db/{}/tx/commit", uri.trim_end_matches('/'), database)
}

#[derive(Serialize)]
struct CommitRequest<'a> {
    statements: [Statement<'a>; 1],
}

#[derive(Serialize)]
struct Statement<'a> {
    statement: &'a str,
    parameters: &'a QueryParams,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    errors: Vec<Neo4jError>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    data: Vec<DataRow>,
}

#[derive(Debug, Deserialize)]
struct DataRow {
    row: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Neo4jError {
    code: String,
    #[serde(default)]
    message: String,
}

/// Map a commit response body to rows or a classified error
fn parse_commit_response(body: CommitResponse) -> std::result::Result<StoreResponse, StoreError> {
    if let Some(error) = body.errors.into_iter().next() {
        let message = format!("{}: {}", error.code, error.message);
        return Err(if error.code.contains("TransientError") {
            StoreError::transient(message)
        } else {
            StoreError::deterministic(message)
        });
    }

    let Some(result) = body.results.into_iter().next() else {
        return Ok(StoreResponse::default());
    };

    Ok(StoreResponse::new(
        result.columns,
        result.data.into_iter().map(|d| d.row).collect(),
    ))
}

fn classify_transport_error(error: &reqwest::Error) -> StoreError {
    if error.is_timeout() || error.is_connect() || error.is_request() {
        StoreError::transient(error.to_string())
    } else {
        StoreError::deterministic(error.to_string())
    }
}

#[async_trait]
impl GraphStore for Neo4jHttpStore {
    async fn run_query(
        &self,
        query_text: &str,
        params: &QueryParams,
        timeout: Duration,
    ) -> std::result::Result<StoreResponse, StoreError> {
        let body = CommitRequest {
            statements: [Statement {
                statement: query_text,
                parameters: params,
            }],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.username, self.password.as_deref())
            .header("access-mode", "READ")
            .json(&body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(StoreError::transient(format!("Neo4j returned {}", status)));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(StoreError::deterministic(format!(
                "Neo4j returned {}: {}",
                status, text
            )));
        }

        let body: CommitResponse = response
            .json()
            .await
            .map_err(|e| StoreError::deterministic(format!("invalid Neo4j response: {}", e)))?;

        parse_commit_response(body)
    }
}

#[async_trait]
impl GraphVersionSource for Neo4jHttpStore {
    async fn current_version(&self) -> std::result::Result<u64, StoreError> {
        let response = self
            .run_query(VERSION_QUERY, &QueryParams::new(), self.version_timeout)
            .await?;

        let version = decode_version(&response)?;
        tracing::trace!(graph_version = version, "Read graph version");
        Ok(version)
    }
}

/// A graph with no `GraphVersion` node reads as 0 through `coalesce`;
/// anything else that is not a non-negative integer is an error.
fn decode_version(response: &StoreResponse) -> std::result::Result<u64, StoreError> {
    response
        .records
        .first()
        .and_then(|record| record.first())
        .and_then(|value| value.as_u64())
        .ok_or_else(|| StoreError::deterministic("GraphVersion.version is not a non-negative integer"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> std::result::Result<StoreResponse, StoreError> {
        parse_commit_response(serde_json::from_value(value).unwrap())
    }

    #[test]
    fn test_endpoint() {
        assert_eq!(
            commit_endpoint("http://localhost:7474/", "neo4j"),
            "http://localhost:7474/db/neo4j/tx/commit"
        );

        let store = Neo4jHttpStore::new(&Neo4jConfig::default()).unwrap();
        assert!(store.endpoint().ends_with("/db/neo4j/tx/commit"));
    }

    #[test]
    fn test_parse_rows() {
        let response = parse(json!({
            "results": [{
                "columns": ["medication_id", "medication"],
                "data": [
                    {"row": ["4:abc:1", "Metformin"], "meta": [null, null]},
                    {"row": ["4:abc:2", "Lisinopril"], "meta": [null, null]}
                ]
            }],
            "errors": []
        }))
        .unwrap();

        assert_eq!(response.columns, vec!["medication_id", "medication"]);
        assert_eq!(response.records.len(), 2);
        assert_eq!(response.records[1][1], json!("Lisinopril"));
    }

    #[test]
    fn test_parse_errors() {
        let transient = parse(json!({
            "results": [],
            "errors": [{
                "code": "Neo.TransientError.Transaction.LockClientStopped",
                "message": "stopped"
            }]
        }))
        .unwrap_err();
        assert!(transient.is_transient());

        let syntax = parse(json!({
            "results": [],
            "errors": [{"code": "Neo.ClientError.Statement.SyntaxError", "message": "bad"}]
        }))
        .unwrap_err();
        assert!(!syntax.is_transient());
        assert!(syntax.message.contains("SyntaxError"));
    }

    #[test]
    fn test_parse_empty_results() {
        let response = parse(json!({"results": [], "errors": []})).unwrap();
        assert!(response.columns.is_empty());
        assert!(response.records.is_empty());
    }

    #[test]
    fn test_decode_version() {
        let version = |value: serde_json::Value| {
            decode_version(&parse(json!({
                "results": [{"columns": ["version"], "data": [{"row": [value]}]}],
                "errors": []
            }))
            .unwrap())
        };

        assert_eq!(version(json!(7)).unwrap(), 7);
        assert_eq!(version(json!(0)).unwrap(), 0);

        for bad in [json!(2.5), json!("3"), json!(-1), json!(null)] {
            let err = version(bad).unwrap_err();
            assert!(!err.is_transient());
            assert!(err.message.contains("GraphVersion.version"));
        }

        let empty = parse(json!({"results": [], "errors": []})).unwrap();
        assert!(decode_version(&empty).is_err());
    }

    #[test]
    fn test_request_body_shape() {
        let mut params = QueryParams::new();
        params.insert("medication_id".into(), json!("4:abc:1"));
        let body = CommitRequest {
            statements: [Statement {
                statement: "MATCH (m) RETURN m",
                parameters: &params,
            }],
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["statements"][0]["parameters"]["medication_id"], "4:abc:1");
    }
}
