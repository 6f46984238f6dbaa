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

//! Fact Assembler and Citation Tracker
//!
//! Turns a validated [`ResultSet`] into citation-ready [`Fact`]s. Assembly
//! is a pure function of the result set and the bound query, so running it
//! twice yields identical fact lists (including fact ids).

use crate::builder::BoundQuery;
use crate::template::QueryTemplate;
use medadvisor_core::{EngineError, EntityRef, Fact, RelationRef, Result, ResultSet, Row, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, Default)]
pub struct FactAssembler;

impl FactAssembler {
    pub fn new() -> Self {
        Self
    }

    /// Build facts from a result set produced by `query`
    pub fn assemble(&self, result: &ResultSet, query: &BoundQuery) -> Result<Vec<Fact>> {
        let template = &query.template;

        if result.template_id != template.id {
            return Err(EngineError::ResultShapeMismatch {
                template_id: template.id.clone(),
                detail: format!("result set belongs to template {}", result.template_id),
            });
        }

        for (index, row) in result.rows.iter().enumerate() {
            check_row(template, index, row)?;
        }

        let facts = match &template.grouping_column {
            Some(column) => grouped_facts(template, column, &result.rows),
            None => result
                .rows
                .iter()
                .map(|row| {
                    let statement = QueryTemplate::render(&template.statement, row);
                    build_fact(&template.id, statement, std::slice::from_ref(row))
                })
                .collect(),
        };

        tracing::debug!(
            template_id = %template.id,
            rows = result.len(),
            facts = facts.len(),
            "Assembled facts"
        );

        Ok(facts)
    }
}

fn check_row(template: &QueryTemplate, index: usize, row: &Row) -> Result<()> {
    for column in template.columns.iter().filter(|c| !c.nullable) {
        let detail = match row.get(&column.name) {
            None => "is missing",
            Some(Value::Null) => "is null",
            Some(_) => continue,
        };
        return Err(EngineError::MalformedRow {
            template_id: template.id.clone(),
            row: index,
            column: column.name.clone(),
            detail: detail.to_string(),
        });
    }
    Ok(())
}

fn grouped_facts(template: &QueryTemplate, column: &str, rows: &[Row]) -> Vec<Fact> {
    // (group value, member rows) in first-appearance order
    let mut groups: Vec<(String, Vec<Row>)> = Vec::new();
    for row in rows {
        let key = row.get(column).map(Value::render).unwrap_or_default();
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(row.clone()),
            None => groups.push((key, vec![row.clone()])),
        }
    }

    groups
        .into_iter()
        .map(|(_, members)| {
            let header = QueryTemplate::render(&template.statement, &members[0]);
            let statement = match &template.detail {
                Some(detail) => {
                    let lines: Vec<String> = members
                        .iter()
                        .map(|row| QueryTemplate::render(detail, row))
                        .collect();
                    format!("{} {}", header, lines.join("; "))
                }
                None => header,
            };
            build_fact(&template.id, statement, &members)
        })
        .collect()
}

fn build_fact(template_id: &str, statement: String, rows: &[Row]) -> Fact {
    let mut entities: Vec<EntityRef> = Vec::new();
    let mut relations: Vec<RelationRef> = Vec::new();

    for row in rows {
        for value in row.values.values() {
            collect_refs(value, &mut entities, &mut relations);
        }
    }

    let mut hasher = blake3::Hasher::new();
    hasher.update(template_id.as_bytes());
    hasher.update(b"|");
    hasher.update(statement.as_bytes());
    for id in entities.iter().map(|e| &e.id).chain(relations.iter().map(|r| &r.id)) {
        hasher.update(b"|");
        hasher.update(id.as_bytes());
    }
    let id = hex::encode(&hasher.finalize().as_bytes()[..16]);

    Fact {
        id,
        statement,
        entities,
        relations,
        source_rows: rows.to_vec(),
    }
}

fn collect_refs(value: &Value, entities: &mut Vec<EntityRef>, relations: &mut Vec<RelationRef>) {
    match value {
        Value::Entity(e) if !entities.contains(e) => entities.push(e.clone()),
        Value::Relation(r) if !relations.contains(r) => relations.push(r.clone()),
        Value::List(items) => {
            for item in items {
                collect_refs(item, entities, relations);
            }
        }
        _ => {}
    }
}

/// Outcome of checking a generator's citations against retrieved facts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitationReport {
    /// Distinct ids the generator cited
    pub cited: usize,
    /// Cited ids backed by a retrieved fact
    pub supported: usize,
    /// supported / cited, 0.0 when nothing was cited
    pub precision: f64,
    pub unsupported: Vec<String>,
}

impl CitationReport {
    pub fn is_fully_supported(&self) -> bool {
        self.cited > 0 && self.unsupported.is_empty()
    }
}

/// Citation precision of `cited` ids against the facts actually retrieved
pub fn citation_report<I, S>(cited: I, facts: &[Fact]) -> CitationReport
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let retrieved: BTreeSet<&str> = facts.iter().flat_map(|f| f.source_ids()).collect();
    let cited: BTreeSet<String> = cited
        .into_iter()
        .map(|id| id.as_ref().trim().to_string())
        .filter(|id| !id.is_empty())
        .collect();

    let unsupported: Vec<String> = cited
        .iter()
        .filter(|id| !retrieved.contains(id.as_str()))
        .cloned()
        .collect();
    let supported = cited.len() - unsupported.len();
    let precision = if cited.is_empty() {
        0.0
    } else {
        supported as f64 / cited.len() as f64
    };

    CitationReport {
        cited: cited.len(),
        supported,
        precision,
        unsupported,
    }
}
