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

//! Query Template Library
//!
//! A process-wide catalog of versioned, parameterized Cypher templates, one
//! per [`IntentTag`]. The library is validated once at construction and is
//! read-only afterwards, so it can be shared across tasks behind an `Arc`
//! without locking.
//!
//! Each template declares:
//! - the slots it binds (type, required flag, Cypher parameter name)
//! - the exact ordered output columns, so the executor can check result
//!   shape without inspecting the query text
//! - how rows render into fact statements (`{column}` placeholders), and
//!   optionally a grouping column that folds several rows into one fact

use medadvisor_core::{EngineError, EntityKind, IntentTag, RelationKind, Result, Row};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Expected type of a slot and its validation rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SlotType {
    /// Medication mention; must resolve to a known Medication entity
    Medication,
    /// One or more medication mentions, resolved then sorted
    MedicationList { min: usize, max: usize },
    /// Patient business identifier such as `P001`
    PatientId,
    /// Case-insensitive free text
    Text,
    /// Diagnosis mention; must resolve to a known Diagnosis entity
    Diagnosis,
    /// Relative time window, normalized to whole days
    TimeWindow,
}

impl SlotType {
    /// Entity kind the slot must resolve to, if any
    pub fn entity_kind(&self) -> Option<EntityKind> {
        match self {
            SlotType::Medication | SlotType::MedicationList { .. } => Some(EntityKind::Medication),
            SlotType::Diagnosis => Some(EntityKind::Diagnosis),
            SlotType::PatientId | SlotType::Text | SlotType::TimeWindow => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotSpec {
    pub name: String,
    pub slot_type: SlotType,
    pub required: bool,
    /// Cypher parameter the canonical value binds to
    pub param: String,
}

impl SlotSpec {
    pub fn required(name: &str, slot_type: SlotType, param: &str) -> Self {
        Self {
            name: name.to_string(),
            slot_type,
            required: true,
            param: param.to_string(),
        }
    }

    pub fn optional(name: &str, slot_type: SlotType, param: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, slot_type, param)
        }
    }
}

/// Declared type of an output column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "of", rename_all = "snake_case")]
pub enum ColumnKind {
    Text,
    Number,
    Bool,
    TextList,
    /// Graph-native node id
    Entity(EntityKind),
    /// Graph-native edge id
    Relation(RelationKind),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: ColumnKind,
    #[serde(default)]
    pub nullable: bool,
}

impl ColumnSpec {
    pub fn new(name: &str, kind: ColumnKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            nullable: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// Immutable, versioned query definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryTemplate {
    pub id: String,
    pub version: u32,
    pub intent: IntentTag,
    pub query_text: String,
    pub slots: Vec<SlotSpec>,
    pub columns: Vec<ColumnSpec>,
    /// Rows sharing this column's value fold into one fact
    #[serde(default)]
    pub grouping_column: Option<String>,
    /// Fact statement; for grouped templates, the group header
    pub statement: String,
    /// Per-row text appended to a grouped statement
    #[serde(default)]
    pub detail: Option<String>,
}

impl QueryTemplate {
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn slot(&self, name: &str) -> Option<&SlotSpec> {
        self.slots.iter().find(|s| s.name == name)
    }

    /// Substitute `{column}` placeholders with rendered row values
    pub fn render(text: &str, row: &Row) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find('}') {
                Some(close) if is_identifier(&after[..close]) => {
                    let name = &after[..close];
                    match row.get(name) {
                        Some(value) => out.push_str(&value.render()),
                        None => out.push_str("not specified"),
                    }
                    rest = &after[close + 1..];
                }
                _ => {
                    out.push('{');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }

    /// Check internal consistency; called once when the library loads
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(EngineError::Config(format!("template {}: {}", self.id, msg)));

        if self.id.trim().is_empty() {
            return Err(EngineError::Config("template with empty id".into()));
        }
        if self.columns.is_empty() {
            return fail("declares no output columns".into());
        }

        let mut column_names = BTreeSet::new();
        for column in &self.columns {
            if !column_names.insert(column.name.as_str()) {
                return fail(format!("duplicate column '{}'", column.name));
            }
        }
        if !self
            .columns
            .iter()
            .any(|c| matches!(c.kind, ColumnKind::Entity(_) | ColumnKind::Relation(_)) && !c.nullable)
        {
            return fail("needs a non-nullable entity or relation column for citations".into());
        }

        let mut slot_names = BTreeSet::new();
        let mut declared_params = BTreeSet::new();
        for slot in &self.slots {
            if !slot_names.insert(slot.name.as_str()) {
                return fail(format!("duplicate slot '{}'", slot.name));
            }
            if !declared_params.insert(slot.param.as_str()) {
                return fail(format!("parameter '{}' bound by two slots", slot.param));
            }
            if let SlotType::MedicationList { min, max } = slot.slot_type {
                if min == 0 || min > max {
                    return fail(format!("slot '{}' has invalid bounds {}..={}", slot.name, min, max));
                }
            }
        }

        let param_re = Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)")
            .map_err(|e| EngineError::Config(e.to_string()))?;
        let used_params: BTreeSet<&str> = param_re
            .captures_iter(&self.query_text)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();

        if let Some(p) = used_params.difference(&declared_params).next() {
            return fail(format!("query uses undeclared parameter ${}", p));
        }
        if let Some(p) = declared_params.difference(&used_params).next() {
            return fail(format!("slot parameter ${} is never used", p));
        }

        for text in std::iter::once(&self.statement).chain(self.detail.iter()) {
            for name in placeholders(text) {
                if !column_names.contains(name) {
                    return fail(format!("render placeholder {{{}}} is not a column", name));
                }
            }
        }

        if let Some(group) = &self.grouping_column {
            if !column_names.contains(group.as_str()) {
                return fail(format!("grouping column '{}' is not declared", group));
            }
        }

        Ok(())
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn placeholders(text: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) if is_identifier(&after[..close]) => {
                names.push(&after[..close]);
                rest = &after[close + 1..];
            }
            _ => rest = after,
        }
    }
    names
}

/// Catalog of templates keyed by intent tag
#[derive(Debug, Clone)]
pub struct TemplateLibrary {
    templates: HashMap<IntentTag, Arc<QueryTemplate>>,
}

impl TemplateLibrary {
    /// Library with the built-in v1 templates
    pub fn builtin() -> Result<Self> {
        Self::from_templates(builtin_templates())
    }

    /// Validate and index templates; at most one per intent tag
    pub fn from_templates(templates: Vec<QueryTemplate>) -> Result<Self> {
        let mut by_intent = HashMap::new();
        let mut ids = BTreeSet::new();

        for template in templates {
            template.validate()?;
            if !ids.insert(template.id.clone()) {
                return Err(EngineError::Config(format!(
                    "duplicate template id {}",
                    template.id
                )));
            }
            let intent = template.intent;
            if by_intent.insert(intent, Arc::new(template)).is_some() {
                return Err(EngineError::Config(format!(
                    "more than one template for intent {}",
                    intent
                )));
            }
        }

        tracing::debug!(templates = by_intent.len(), "Template library loaded");
        Ok(Self {
            templates: by_intent,
        })
    }

    pub fn lookup(&self, intent: IntentTag) -> Result<Arc<QueryTemplate>> {
        self.templates
            .get(&intent)
            .cloned()
            .ok_or(EngineError::NoTemplateForIntent { intent })
    }

    pub fn get_by_id(&self, id: &str) -> Option<Arc<QueryTemplate>> {
        self.templates.values().find(|t| t.id == id).cloned()
    }

    /// All templates in intent order
    pub fn templates(&self) -> Vec<Arc<QueryTemplate>> {
        let mut all: Vec<_> = self.templates.values().cloned().collect();
        all.sort_by_key(|t| t.intent);
        all
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

const SEVERITY_ORDER: &str = "CASE i.severity \
    WHEN 'severe' THEN 1 WHEN 'moderate' THEN 2 WHEN 'mild' THEN 3 ELSE 4 END";

/// The built-in v1 template set
pub fn builtin_templates() -> Vec<QueryTemplate> {
    use ColumnKind::{Entity, Relation, Text, TextList};
    use EntityKind as E;
    use RelationKind as R;

    vec![
        QueryTemplate {
            id: "dosage_lookup_v1".into(),
            version: 1,
            intent: IntentTag::DosageLookup,
            query_text: r#"
MATCH (m:Medication)
WHERE elementId(m) = $medication_id
  AND ($patient_id IS NULL
       OR EXISTS { MATCH (:Patient {patient_id: $patient_id})-[:TAKES]->(m) })
OPTIONAL MATCH (m)-[:HAS_DOSE]->(d:Dose)
OPTIONAL MATCH (m)-[:HAS_SCHEDULE]->(s:Schedule)
RETURN elementId(m) AS medication_id,
       m.name AS medication,
       elementId(d) AS dose_id,
       coalesce(d.amount, m.dosage) AS dose,
       elementId(s) AS schedule_id,
       s.frequency AS frequency,
       s.instructions AS instructions
ORDER BY dose, frequency
LIMIT 20"#
                .into(),
            slots: vec![
                SlotSpec::required("medication", SlotType::Medication, "medication_id"),
                SlotSpec::optional("patient", SlotType::PatientId, "patient_id"),
            ],
            columns: vec![
                ColumnSpec::new("medication_id", Entity(E::Medication)),
                ColumnSpec::new("medication", Text),
                ColumnSpec::new("dose_id", Entity(E::Dose)).nullable(),
                ColumnSpec::new("dose", Text).nullable(),
                ColumnSpec::new("schedule_id", Entity(E::Schedule)).nullable(),
                ColumnSpec::new("frequency", Text).nullable(),
                ColumnSpec::new("instructions", Text).nullable(),
            ],
            grouping_column: Some("medication_id".into()),
            statement: "How to take {medication}:".into(),
            detail: Some("{dose} {frequency}, instructions: {instructions}".into()),
        },
        QueryTemplate {
            id: "interaction_check_v1".into(),
            version: 1,
            intent: IntentTag::InteractionCheck,
            query_text: format!(
                r#"
MATCH (m1:Medication)-[i:INTERACTS_WITH]-(m2:Medication)
WHERE elementId(m1) IN $medication_ids
  AND (size($medication_ids) = 1
       OR (elementId(m2) IN $medication_ids AND elementId(m1) < elementId(m2)))
RETURN elementId(m1) AS medication_id,
       m1.name AS medication,
       elementId(i) AS interaction_id,
       elementId(m2) AS interacting_id,
       m2.name AS interacting_drug,
       i.severity AS severity,
       i.description AS description
ORDER BY {}, medication, interacting_drug
LIMIT 10"#,
                SEVERITY_ORDER
            ),
            slots: vec![SlotSpec::required(
                "medications",
                SlotType::MedicationList { min: 1, max: 5 },
                "medication_ids",
            )],
            columns: vec![
                ColumnSpec::new("medication_id", Entity(E::Medication)),
                ColumnSpec::new("medication", Text),
                ColumnSpec::new("interaction_id", Relation(R::InteractsWith)),
                ColumnSpec::new("interacting_id", Entity(E::Medication)),
                ColumnSpec::new("interacting_drug", Text),
                ColumnSpec::new("severity", Text).nullable(),
                ColumnSpec::new("description", Text).nullable(),
            ],
            grouping_column: None,
            statement: "{medication} interacts with {interacting_drug} (severity: {severity}): {description}"
                .into(),
            detail: None,
        },
        QueryTemplate {
            id: "discharge_instructions_v1".into(),
            version: 1,
            intent: IntentTag::DischargeInstructions,
            query_text: r#"
MATCH (p:Patient {patient_id: $patient_id})-[:RECEIVED_ADVICE]->(a:Advice)
WHERE $topic IS NULL OR toLower(a.category) = $topic
OPTIONAL MATCH (a)-[:ABOUT_MEDICATION]->(m:Medication)
RETURN elementId(a) AS advice_id,
       a.text AS advice,
       a.category AS category,
       collect(m.name) AS related_medications
ORDER BY category, advice"#
                .into(),
            slots: vec![
                SlotSpec::required("patient", SlotType::PatientId, "patient_id"),
                SlotSpec::optional("topic", SlotType::Text, "topic"),
            ],
            columns: vec![
                ColumnSpec::new("advice_id", Entity(E::Advice)),
                ColumnSpec::new("advice", Text),
                ColumnSpec::new("category", Text).nullable(),
                ColumnSpec::new("related_medications", TextList),
            ],
            grouping_column: Some("category".into()),
            statement: "Discharge advice ({category}):".into(),
            detail: Some("{advice} [medications: {related_medications}]".into()),
        },
        QueryTemplate {
            id: "drug_info_v1".into(),
            version: 1,
            intent: IntentTag::DrugInfo,
            query_text: r#"
MATCH (m:Medication)
WHERE elementId(m) = $medication_id
RETURN elementId(m) AS medication_id,
       m.name AS medication,
       m.drugbank_id AS drugbank_id,
       m.description AS description,
       m.indication AS indication,
       m.mechanism AS mechanism
LIMIT 1"#
                .into(),
            slots: vec![SlotSpec::required(
                "medication",
                SlotType::Medication,
                "medication_id",
            )],
            columns: vec![
                ColumnSpec::new("medication_id", Entity(E::Medication)),
                ColumnSpec::new("medication", Text),
                ColumnSpec::new("drugbank_id", Text).nullable(),
                ColumnSpec::new("description", Text).nullable(),
                ColumnSpec::new("indication", Text).nullable(),
                ColumnSpec::new("mechanism", Text).nullable(),
            ],
            grouping_column: None,
            statement: "{medication} ({drugbank_id}): {description} Used for: {indication}. Mechanism: {mechanism}."
                .into(),
            detail: None,
        },
        QueryTemplate {
            id: "patient_medications_v1".into(),
            version: 1,
            intent: IntentTag::PatientMedications,
            query_text: r#"
MATCH (p:Patient {patient_id: $patient_id})-[t:TAKES]->(m:Medication)
WHERE $since_days IS NULL
   OR date(t.start_date) >= date() - duration({days: $since_days})
OPTIONAL MATCH (m)-[:HAS_SCHEDULE]->(s:Schedule)
RETURN elementId(p) AS patient_ref,
       elementId(t) AS takes_id,
       elementId(m) AS medication_id,
       m.name AS medication,
       m.dosage AS dose,
       s.frequency AS frequency
ORDER BY medication"#
                .into(),
            slots: vec![
                SlotSpec::required("patient", SlotType::PatientId, "patient_id"),
                SlotSpec::optional("since", SlotType::TimeWindow, "since_days"),
            ],
            columns: vec![
                ColumnSpec::new("patient_ref", Entity(E::Patient)),
                ColumnSpec::new("takes_id", Relation(R::Takes)),
                ColumnSpec::new("medication_id", Entity(E::Medication)),
                ColumnSpec::new("medication", Text),
                ColumnSpec::new("dose", Text).nullable(),
                ColumnSpec::new("frequency", Text).nullable(),
            ],
            grouping_column: None,
            statement: "You are taking {medication} ({dose}, {frequency})".into(),
            detail: None,
        },
        QueryTemplate {
            id: "contraindication_check_v1".into(),
            version: 1,
            intent: IntentTag::ContraindicationCheck,
            query_text: r#"
MATCH (m:Medication)-[c:CONTRAINDICATES]->(d:Diagnosis)
WHERE elementId(m) = $medication_id AND elementId(d) = $diagnosis_id
RETURN elementId(m) AS medication_id,
       m.name AS medication,
       elementId(c) AS contraindication_id,
       elementId(d) AS diagnosis_id,
       d.name AS diagnosis,
       c.severity AS severity,
       c.reason AS reason
LIMIT 10"#
                .into(),
            slots: vec![
                SlotSpec::required("medication", SlotType::Medication, "medication_id"),
                SlotSpec::required("diagnosis", SlotType::Diagnosis, "diagnosis_id"),
            ],
            columns: vec![
                ColumnSpec::new("medication_id", Entity(E::Medication)),
                ColumnSpec::new("medication", Text),
                ColumnSpec::new("contraindication_id", Relation(R::Contraindicates)),
                ColumnSpec::new("diagnosis_id", Entity(E::Diagnosis)),
                ColumnSpec::new("diagnosis", Text),
                ColumnSpec::new("severity", Text).nullable(),
                ColumnSpec::new("reason", Text).nullable(),
            ],
            grouping_column: None,
            statement: "{medication} is contraindicated with {diagnosis} (severity: {severity}): {reason}"
                .into(),
            detail: None,
        },
    ]
}
