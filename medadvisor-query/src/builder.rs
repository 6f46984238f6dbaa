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

//! Query Builder
//!
//! Binds an intent's slots into a template, producing a [`BoundQuery`] whose
//! [`CacheKey`] depends only on semantic content. Canonicalization happens
//! before hashing:
//!
//! - whitespace trimmed and collapsed, free text lower-cased
//! - patient ids upper-cased
//! - medication and diagnosis mentions replaced by canonical entity ids
//! - list slots resolved, sorted and de-duplicated
//! - time windows normalized to whole days
//!
//! Slots the template does not declare are ignored and never reach the key.

use crate::entity::{EntityLookup, EntityResolver};
use crate::store::QueryParams;
use crate::template::{QueryTemplate, SlotSpec, SlotType};
use medadvisor_core::{EngineError, EntityKind, Intent, Result, SlotBindingError, SlotValue, TimeUnit};
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

const MAX_TEXT_LEN: usize = 200;
const MAX_PATIENT_ID_LEN: usize = 64;

/// Deterministic hash of a bound query's semantic content
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    hash: [u8; 32],
}

impl CacheKey {
    /// Hash template identity plus every declared parameter in name order
    pub fn compute(template: &QueryTemplate, params: &QueryParams) -> Self {
        let mut hasher = blake3::Hasher::new();

        hasher.update(template.id.as_bytes());
        hasher.update(b"|");
        hasher.update(&template.version.to_le_bytes());
        hasher.update(b"|");

        // QueryParams is a BTreeMap, so iteration is already name-ordered
        for (name, value) in params {
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(value.to_string().as_bytes());
            hasher.update(b";");
        }

        Self {
            hash: *hasher.finalize().as_bytes(),
        }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.hash
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.hash)
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for CacheKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// A template with concrete, canonical parameter values
#[derive(Debug, Clone)]
pub struct BoundQuery {
    pub template: Arc<QueryTemplate>,
    pub params: QueryParams,
    pub cache_key: CacheKey,
}

impl BoundQuery {
    pub fn template_id(&self) -> &str {
        &self.template.id
    }
}

/// Binds intents into templates, resolving entity mentions on the way
pub struct QueryBuilder {
    resolver: Arc<dyn EntityResolver>,
}

impl QueryBuilder {
    pub fn new(resolver: Arc<dyn EntityResolver>) -> Self {
        Self { resolver }
    }

    pub async fn build(&self, intent: &Intent, template: Arc<QueryTemplate>) -> Result<BoundQuery> {
        let mut params = QueryParams::new();

        for spec in &template.slots {
            let value = match intent.slot(&spec.name) {
                Some(value) => self.bind_slot(spec, value).await,
                None if spec.required => Err(SlotBindingError::Missing {
                    slot: spec.name.clone(),
                }),
                None => Ok(serde_json::Value::Null),
            }
            .map_err(|source| EngineError::slot_binding(intent.tag, source))?;

            params.insert(spec.param.clone(), value);
        }

        let cache_key = CacheKey::compute(&template, &params);
        tracing::debug!(
            template_id = %template.id,
            cache_key = %cache_key,
            "Bound query"
        );

        Ok(BoundQuery {
            template,
            params,
            cache_key,
        })
    }

    async fn bind_slot(
        &self,
        spec: &SlotSpec,
        value: &SlotValue,
    ) -> std::result::Result<serde_json::Value, SlotBindingError> {
        match spec.slot_type {
            SlotType::Medication | SlotType::Diagnosis => {
                let text = expect_text(spec, value)?;
                let kind = spec.slot_type.entity_kind().unwrap_or(EntityKind::Medication);
                let id = self.resolve_id(spec, kind, &text).await?;
                Ok(serde_json::Value::String(id))
            }
            SlotType::MedicationList { min, max } => {
                let mentions = match value {
                    SlotValue::List(items) => items.clone(),
                    SlotValue::Text(text) => vec![text.clone()],
                    other => return Err(invalid_type(spec, "list of medications", other)),
                };

                let mut ids = Vec::with_capacity(mentions.len());
                for mention in &mentions {
                    let text = canonical_text(mention);
                    if text.is_empty() {
                        continue;
                    }
                    ids.push(self.resolve_id(spec, EntityKind::Medication, &text).await?);
                }
                ids.sort();
                ids.dedup();

                if ids.len() < min || ids.len() > max {
                    return Err(SlotBindingError::Validation {
                        slot: spec.name.clone(),
                        reason: format!(
                            "expected {} to {} distinct medications, got {}",
                            min,
                            max,
                            ids.len()
                        ),
                    });
                }
                Ok(serde_json::Value::Array(
                    ids.into_iter().map(serde_json::Value::String).collect(),
                ))
            }
            SlotType::PatientId => {
                let SlotValue::Text(raw) = value else {
                    return Err(invalid_type(spec, "text", value));
                };
                let id = raw.trim().to_uppercase();
                let valid = !id.is_empty()
                    && id.len() <= MAX_PATIENT_ID_LEN
                    && id
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
                if !valid {
                    return Err(SlotBindingError::Validation {
                        slot: spec.name.clone(),
                        reason: format!("'{}' is not a valid patient id", raw.trim()),
                    });
                }
                Ok(serde_json::Value::String(id))
            }
            SlotType::Text => {
                let text = expect_text(spec, value)?;
                Ok(serde_json::Value::String(text))
            }
            SlotType::TimeWindow => {
                let SlotValue::TimeWindow { amount, unit } = value else {
                    return Err(invalid_type(spec, "time window", value));
                };
                if *amount == 0 {
                    return Err(SlotBindingError::Validation {
                        slot: spec.name.clone(),
                        reason: "time window must be positive".into(),
                    });
                }
                Ok(serde_json::Value::from(window_days(*amount, *unit)))
            }
        }
    }

    async fn resolve_id(
        &self,
        spec: &SlotSpec,
        kind: EntityKind,
        text: &str,
    ) -> std::result::Result<String, SlotBindingError> {
        let lookup = self
            .resolver
            .resolve_entity_name(kind, text)
            .await
            .map_err(|e| SlotBindingError::LookupFailed {
                slot: spec.name.clone(),
                message: e.to_string(),
            })?;

        match lookup {
            EntityLookup::Found(entity) => Ok(entity.id),
            EntityLookup::Candidates(mut candidates) if candidates.len() == 1 => {
                Ok(candidates.remove(0).id)
            }
            EntityLookup::Candidates(candidates) if !candidates.is_empty() => {
                Err(SlotBindingError::AmbiguousEntity {
                    slot: spec.name.clone(),
                    text: text.to_string(),
                    candidates,
                })
            }
            EntityLookup::Candidates(_) | EntityLookup::NotFound => {
                tracing::debug!(slot = %spec.name, text, "Entity not found");
                Err(SlotBindingError::UnknownEntity {
                    slot: spec.name.clone(),
                    text: text.to_string(),
                })
            }
        }
    }
}

fn expect_text(spec: &SlotSpec, value: &SlotValue) -> std::result::Result<String, SlotBindingError> {
    let SlotValue::Text(raw) = value else {
        return Err(invalid_type(spec, "text", value));
    };
    let text = canonical_text(raw);
    if text.is_empty() {
        return Err(SlotBindingError::Validation {
            slot: spec.name.clone(),
            reason: "value is empty".into(),
        });
    }
    if text.chars().count() > MAX_TEXT_LEN {
        return Err(SlotBindingError::Validation {
            slot: spec.name.clone(),
            reason: format!("value longer than {} characters", MAX_TEXT_LEN),
        });
    }
    Ok(text)
}

fn invalid_type(spec: &SlotSpec, expected: &str, actual: &SlotValue) -> SlotBindingError {
    SlotBindingError::InvalidType {
        slot: spec.name.clone(),
        expected: expected.to_string(),
        actual: actual.shape().to_string(),
    }
}

/// Trim, collapse internal whitespace, lower-case
pub fn canonical_text(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn window_days(amount: u32, unit: TimeUnit) -> u64 {
    let amount = u64::from(amount);
    match unit {
        TimeUnit::Hours => amount.div_ceil(24),
        TimeUnit::Days => amount,
        TimeUnit::Weeks => amount * 7,
        TimeUnit::Months => amount * 30,
    }
}
