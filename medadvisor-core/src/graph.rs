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

//! Graph data model
//!
//! Typed references to nodes and edges of the medication knowledge graph,
//! plus the row/result-set shapes that flow out of the query executor.
//!
//! ```text
//! (Patient)-[:TAKES]->(Medication)-[:HAS_DOSE]->(Dose)
//!                         │
//!                         ├─[:HAS_SCHEDULE]->(Schedule)
//!                         ├─[:INTERACTS_WITH]-(Medication)
//!                         └─[:CONTRAINDICATES]->(Diagnosis)
//! (Patient)-[:RECEIVED_ADVICE]->(Advice)-[:ABOUT_MEDICATION]->(Medication)
//! (Patient)-[:HAS_DIAGNOSIS]->(Diagnosis)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Node label in the knowledge graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Patient,
    Medication,
    Dose,
    Schedule,
    Interaction,
    Advice,
    Diagnosis,
}

impl EntityKind {
    /// Graph label as written in Cypher
    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::Patient => "Patient",
            EntityKind::Medication => "Medication",
            EntityKind::Dose => "Dose",
            EntityKind::Schedule => "Schedule",
            EntityKind::Interaction => "Interaction",
            EntityKind::Advice => "Advice",
            EntityKind::Diagnosis => "Diagnosis",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Relationship type in the knowledge graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationKind {
    Takes,
    HasDose,
    HasSchedule,
    InteractsWith,
    Contraindicates,
    HasDiagnosis,
    ReceivedAdvice,
    AboutMedication,
}

impl RelationKind {
    pub fn label(&self) -> &'static str {
        match self {
            RelationKind::Takes => "TAKES",
            RelationKind::HasDose => "HAS_DOSE",
            RelationKind::HasSchedule => "HAS_SCHEDULE",
            RelationKind::InteractsWith => "INTERACTS_WITH",
            RelationKind::Contraindicates => "CONTRAINDICATES",
            RelationKind::HasDiagnosis => "HAS_DIAGNOSIS",
            RelationKind::ReceivedAdvice => "RECEIVED_ADVICE",
            RelationKind::AboutMedication => "ABOUT_MEDICATION",
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Stable, graph-native reference to a node
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: String,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

/// Stable, graph-native reference to a directed edge
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelationRef {
    pub kind: RelationKind,
    pub id: String,
}

impl RelationRef {
    pub fn new(kind: RelationKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

/// A resolved node with its display name.
///
/// Identity is immutable; attributes are owned by the ETL pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub kind: EntityKind,
    pub name: String,
}

impl Entity {
    pub fn new(kind: EntityKind, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            name: name.into(),
        }
    }

    pub fn to_ref(&self) -> EntityRef {
        EntityRef::new(self.kind, self.id.clone())
    }
}

/// Typed cell value of a result row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Text(String),
    Number(f64),
    Bool(bool),
    Entity(EntityRef),
    Relation(RelationRef),
    List(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Human-readable rendering used in fact statements
    pub fn render(&self) -> String {
        match self {
            Value::Null => "not specified".to_string(),
            Value::Text(s) => s.clone(),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Entity(e) => e.id.clone(),
            Value::Relation(r) => r.id.clone(),
            Value::List(items) if items.is_empty() => "none".to_string(),
            Value::List(items) => items
                .iter()
                .map(Value::render)
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<EntityRef> for Value {
    fn from(e: EntityRef) -> Self {
        Value::Entity(e)
    }
}

impl From<RelationRef> for Value {
    fn from(r: RelationRef) -> Self {
        Value::Relation(r)
    }
}

/// One result row: output column name -> typed value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub values: BTreeMap<String, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(column.into(), value.into());
        self
    }

    pub fn insert(&mut self, column: impl Into<String>, value: Value) {
        self.values.insert(column.into(), value);
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }
}

/// Ordered rows returned for one bound query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    /// Template the rows were produced by
    pub template_id: String,
    /// Declared output columns, in order
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    /// When the store produced these rows
    pub generated_at: DateTime<Utc>,
}

impl ResultSet {
    pub fn new(template_id: impl Into<String>, columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self {
            template_id: template_id.into(),
            columns,
            rows,
            generated_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_render() {
        assert_eq!(Value::Null.render(), "not specified");
        assert_eq!(Value::Number(500.0).render(), "500");
        assert_eq!(Value::Number(2.5).render(), "2.5");
        assert_eq!(
            Value::List(vec!["Metformin".into(), "Lisinopril".into()]).render(),
            "Metformin, Lisinopril"
        );
        assert_eq!(Value::List(vec![]).render(), "none");
    }

    #[test]
    fn test_row_builder() {
        let row = Row::new()
            .with("medication", "Metformin")
            .with("medication_id", EntityRef::new(EntityKind::Medication, "med-1"));

        assert_eq!(row.get("medication").and_then(Value::as_text), Some("Metformin"));
        assert!(matches!(row.get("medication_id"), Some(Value::Entity(_))));
        assert!(row.get("dose").is_none());
    }

    #[test]
    fn test_relation_labels() {
        assert_eq!(RelationKind::InteractsWith.label(), "INTERACTS_WITH");
        let json = serde_json::to_string(&RelationKind::HasSchedule).unwrap();
        assert_eq!(json, "\"HAS_SCHEDULE\"");
    }

    #[test]
    fn test_value_serialization() {
        let value = Value::Entity(EntityRef::new(EntityKind::Dose, "dose-7"));
        let json = serde_json::to_string(&value).unwrap();
        let restored: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, value);
    }
}
