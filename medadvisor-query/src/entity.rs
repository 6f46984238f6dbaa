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

//! Entity resolution
//!
//! Maps a free-text mention ("glucophage", "metformin hcl") to a canonical
//! graph entity. Two implementations ship with the crate:
//!
//! - [`CatalogEntityResolver`]: in-memory names and synonyms
//! - [`GraphEntityResolver`]: fuzzy full-text lookup against the graph store

use crate::builder::canonical_text;
use crate::store::{GraphStore, QueryParams, StoreError};
use async_trait::async_trait;
use medadvisor_core::{Entity, EntityKind, Neo4jConfig};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of resolving one mention
#[derive(Debug, Clone, PartialEq)]
pub enum EntityLookup {
    Found(Entity),
    /// Several plausible matches, best first
    Candidates(Vec<Entity>),
    NotFound,
}

#[async_trait]
pub trait EntityResolver: Send + Sync {
    async fn resolve_entity_name(
        &self,
        kind: EntityKind,
        text: &str,
    ) -> Result<EntityLookup, StoreError>;
}

#[derive(Debug, Clone)]
struct CatalogEntry {
    entity: Entity,
    /// Canonical name plus synonyms, lower-cased
    names: Vec<String>,
}

/// Resolver over an in-memory catalog of entities and synonyms.
///
/// Exact name/synonym matches win; otherwise a unique substring match is
/// accepted and several substring matches come back as candidates.
#[derive(Debug, Clone, Default)]
pub struct CatalogEntityResolver {
    entries: Vec<CatalogEntry>,
}

impl CatalogEntityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity: Entity, synonyms: &[&str]) -> Self {
        self.insert(entity, synonyms.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn insert(&mut self, entity: Entity, synonyms: Vec<String>) {
        let mut names = vec![canonical_text(&entity.name)];
        names.extend(synonyms.iter().map(|s| canonical_text(s)));
        names.retain(|n| !n.is_empty());
        names.dedup();
        self.entries.push(CatalogEntry { entity, names });
    }

    /// Display names and synonyms of every entity of `kind`
    pub fn names(&self, kind: EntityKind) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.entity.kind == kind)
            .flat_map(|e| e.names.iter().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn lookup(&self, kind: EntityKind, text: &str) -> EntityLookup {
        let text = canonical_text(text);
        if text.is_empty() {
            return EntityLookup::NotFound;
        }
        let of_kind = || self.entries.iter().filter(move |e| e.entity.kind == kind);

        let exact: Vec<&CatalogEntry> = of_kind().filter(|e| e.names.contains(&text)).collect();
        if !exact.is_empty() {
            return collapse(exact);
        }

        if text.chars().count() < 3 {
            return EntityLookup::NotFound;
        }
        let partial: Vec<&CatalogEntry> = of_kind()
            .filter(|e| {
                e.names
                    .iter()
                    .any(|n| n.contains(text.as_str()) || contains_word(&text, n))
            })
            .collect();
        collapse(partial)
    }
}

fn collapse(matches: Vec<&CatalogEntry>) -> EntityLookup {
    let mut entities: Vec<Entity> = Vec::new();
    for entry in matches {
        if !entities.iter().any(|e| e.id == entry.entity.id) {
            entities.push(entry.entity.clone());
        }
    }
    match entities.len() {
        0 => EntityLookup::NotFound,
        1 => EntityLookup::Found(entities.remove(0)),
        _ => {
            entities.sort_by(|a, b| a.name.len().cmp(&b.name.len()).then_with(|| a.name.cmp(&b.name)));
            EntityLookup::Candidates(entities)
        }
    }
}

/// `needle` occurs in `haystack` as whole words
fn contains_word(haystack: &str, needle: &str) -> bool {
    haystack
        .match_indices(needle)
        .any(|(begin, _)| {
            let end = begin + needle.len();
            let before = haystack[..begin].chars().next_back();
            let after = haystack[end..].chars().next();
            before.map_or(true, |c| !c.is_alphanumeric()) && after.map_or(true, |c| !c.is_alphanumeric())
        })
}

#[async_trait]
impl EntityResolver for CatalogEntityResolver {
    async fn resolve_entity_name(
        &self,
        kind: EntityKind,
        text: &str,
    ) -> Result<EntityLookup, StoreError> {
        Ok(self.lookup(kind, text))
    }
}

const FULLTEXT_QUERY: &str = r#"
CALL db.index.fulltext.queryNodes($index, $fulltextQuery, {limit: $limit})
YIELD node, score
RETURN elementId(node) AS id, node.name AS name, score
ORDER BY score DESC"#;

/// Resolver backed by the graph's full-text indexes.
///
/// Each word of the mention gets `~2` fuzziness, so small misspellings
/// ("metformine") still resolve.
pub struct GraphEntityResolver {
    store: Arc<dyn GraphStore>,
    indexes: HashMap<EntityKind, String>,
    limit: usize,
    timeout: Duration,
}

impl GraphEntityResolver {
    pub fn new(store: Arc<dyn GraphStore>, config: &Neo4jConfig, timeout: Duration) -> Self {
        let mut indexes = HashMap::new();
        indexes.insert(EntityKind::Medication, config.fulltext_index.clone());
        indexes.insert(EntityKind::Diagnosis, "diagnosis_fulltext".to_string());
        indexes.insert(EntityKind::Advice, "advice_fulltext".to_string());

        Self {
            store,
            indexes,
            limit: config.candidate_limit,
            timeout,
        }
    }

    pub fn with_index(mut self, kind: EntityKind, index: impl Into<String>) -> Self {
        self.indexes.insert(kind, index.into());
        self
    }
}

#[async_trait]
impl EntityResolver for GraphEntityResolver {
    async fn resolve_entity_name(
        &self,
        kind: EntityKind,
        text: &str,
    ) -> Result<EntityLookup, StoreError> {
        let Some(index) = self.indexes.get(&kind) else {
            return Ok(EntityLookup::NotFound);
        };
        let query = fulltext_query(text);
        if query.is_empty() {
            return Ok(EntityLookup::NotFound);
        }

        let mut params = QueryParams::new();
        params.insert("index".into(), index.clone().into());
        params.insert("fulltextQuery".into(), query.into());
        params.insert("limit".into(), self.limit.into());

        let response = self.store.run_query(FULLTEXT_QUERY, &params, self.timeout).await?;

        let id_col = response.columns.iter().position(|c| c == "id");
        let name_col = response.columns.iter().position(|c| c == "name");
        let (Some(id_col), Some(name_col)) = (id_col, name_col) else {
            return Err(StoreError::deterministic(
                "full-text lookup returned unexpected columns",
            ));
        };

        let mut candidates: Vec<Entity> = response
            .records
            .iter()
            .filter_map(|record| {
                let id = record.get(id_col)?.as_str()?;
                let name = record.get(name_col)?.as_str().unwrap_or(id);
                Some(Entity::new(kind, id, name))
            })
            .collect();

        let wanted = canonical_text(text);
        if let Some(exact) = candidates.iter().find(|e| canonical_text(&e.name) == wanted) {
            return Ok(EntityLookup::Found(exact.clone()));
        }

        Ok(match candidates.len() {
            0 => EntityLookup::NotFound,
            1 => EntityLookup::Found(candidates.remove(0)),
            _ => EntityLookup::Candidates(candidates),
        })
    }
}

/// Build a Lucene query: special characters stripped, `~2` per word, ANDed
pub fn fulltext_query(input: &str) -> String {
    const LUCENE_SPECIAL: &[char] = &[
        '+', '-', '&', '|', '!', '(', ')', '{', '}', '[', ']', '^', '"', '~', '*', '?', ':', '\\',
        '/',
    ];
    let cleaned: String = input
        .chars()
        .map(|c| if LUCENE_SPECIAL.contains(&c) { ' ' } else { c })
        .collect();

    cleaned
        .split_whitespace()
        .map(|word| format!("{}~2", word))
        .collect::<Vec<_>>()
        .join(" AND ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreResponse;
    use parking_lot::Mutex;

    fn catalog() -> CatalogEntityResolver {
        CatalogEntityResolver::new()
            .with_entity(Entity::new(EntityKind::Medication, "m1", "Metformin"), &["Glucophage"])
            .with_entity(Entity::new(EntityKind::Medication, "m2", "Metoprolol"), &[])
            .with_entity(Entity::new(EntityKind::Medication, "m3", "Insulin Glargine"), &["lantus"])
            .with_entity(Entity::new(EntityKind::Diagnosis, "d1", "Type 2 Diabetes"), &["diabetes"])
    }

    #[tokio::test]
    async fn test_catalog_exact_and_synonym() {
        let c = catalog();
        let found = c.resolve_entity_name(EntityKind::Medication, " GLUCOPHAGE ").await.unwrap();
        assert!(matches!(found, EntityLookup::Found(ref e) if e.id == "m1"));

        let dx = c.resolve_entity_name(EntityKind::Diagnosis, "diabetes").await.unwrap();
        assert!(matches!(dx, EntityLookup::Found(ref e) if e.id == "d1"));

        // kind is respected
        let wrong_kind = c.resolve_entity_name(EntityKind::Diagnosis, "metformin").await.unwrap();
        assert_eq!(wrong_kind, EntityLookup::NotFound);
    }

    #[tokio::test]
    async fn test_catalog_partial_matches() {
        let c = catalog();
        let unique = c.resolve_entity_name(EntityKind::Medication, "glargine").await.unwrap();
        assert!(matches!(unique, EntityLookup::Found(ref e) if e.id == "m3"));

        let longer = c
            .resolve_entity_name(EntityKind::Medication, "metformin hydrochloride")
            .await
            .unwrap();
        assert!(matches!(longer, EntityLookup::Found(ref e) if e.id == "m1"));

        let prefix = c.resolve_entity_name(EntityKind::Medication, "meto").await.unwrap();
        assert!(matches!(prefix, EntityLookup::Found(ref e) if e.id == "m2"));

        let ambiguous = c.resolve_entity_name(EntityKind::Medication, "met").await.unwrap();
        match ambiguous {
            EntityLookup::Candidates(c) => {
                let ids: Vec<_> = c.iter().map(|e| e.id.as_str()).collect();
                assert_eq!(ids, vec!["m1", "m2"]);
            }
            other => panic!("expected candidates, got {:?}", other),
        }

        let none = c.resolve_entity_name(EntityKind::Medication, "xyzocillin").await.unwrap();
        assert_eq!(none, EntityLookup::NotFound);
    }

    #[test]
    fn test_fulltext_query() {
        assert_eq!(fulltext_query("metformin hydrochloride"), "metformin~2 AND hydrochloride~2");
        assert_eq!(fulltext_query("co-trimoxazole (oral)"), "co~2 AND trimoxazole~2 AND oral~2");
        assert_eq!(fulltext_query("  ?! "), "");
    }

    struct FixedStore {
        response: StoreResponse,
        seen: Mutex<Vec<QueryParams>>,
    }

    #[async_trait]
    impl GraphStore for FixedStore {
        async fn run_query(
            &self,
            _query_text: &str,
            params: &QueryParams,
            _timeout: Duration,
        ) -> Result<StoreResponse, StoreError> {
            self.seen.lock().push(params.clone());
            Ok(self.response.clone())
        }
    }

    #[tokio::test]
    async fn test_graph_resolver_prefers_exact_name() {
        let store = Arc::new(FixedStore {
            response: StoreResponse::new(
                vec!["id".into(), "name".into(), "score".into()],
                vec![
                    vec!["4:abc:1".into(), "Metformin ER".into(), 3.1.into()],
                    vec!["4:abc:2".into(), "Metformin".into(), 2.9.into()],
                ],
            ),
            seen: Mutex::new(Vec::new()),
        });
        let resolver =
            GraphEntityResolver::new(store.clone(), &Neo4jConfig::default(), Duration::from_secs(1));

        let found = resolver
            .resolve_entity_name(EntityKind::Medication, "metformin")
            .await
            .unwrap();
        assert!(matches!(found, EntityLookup::Found(ref e) if e.id == "4:abc:2"));

        let seen = store.seen.lock();
        assert_eq!(seen[0]["index"], "medication_fulltext");
        assert_eq!(seen[0]["fulltextQuery"], "metformin~2");
        assert_eq!(seen[0]["limit"], 3);
    }

    #[tokio::test]
    async fn test_graph_resolver_candidates() {
        let store = Arc::new(FixedStore {
            response: StoreResponse::new(
                vec!["id".into(), "name".into(), "score".into()],
                vec![
                    vec!["a".into(), "Metoprolol Tartrate".into(), 2.0.into()],
                    vec!["b".into(), "Metoprolol Succinate".into(), 1.8.into()],
                ],
            ),
            seen: Mutex::new(Vec::new()),
        });
        let resolver = GraphEntityResolver::new(store, &Neo4jConfig::default(), Duration::from_secs(1));

        let result = resolver
            .resolve_entity_name(EntityKind::Medication, "metoprolol")
            .await
            .unwrap();
        assert!(matches!(result, EntityLookup::Candidates(ref c) if c.len() == 2));

        let unsupported = resolver
            .resolve_entity_name(EntityKind::Schedule, "twice daily")
            .await
            .unwrap();
        assert_eq!(unsupported, EntityLookup::NotFound);
    }
}
