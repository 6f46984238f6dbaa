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

//! Grounded fact type

use crate::graph::{EntityRef, RelationRef, Row};
use serde::{Deserialize, Serialize};

/// Atomic, citable statement derived from one or more result rows.
///
/// Every fact carries at least one entity or relation reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    /// Content hash of statement plus references; stable across runs
    pub id: String,
    pub statement: String,
    pub entities: Vec<EntityRef>,
    #[serde(default)]
    pub relations: Vec<RelationRef>,
    /// Rows this fact was derived from
    #[serde(default)]
    pub source_rows: Vec<Row>,
}

impl Fact {
    /// Graph ids a generator may cite for this fact
    pub fn source_ids(&self) -> Vec<&str> {
        self.entities
            .iter()
            .map(|e| e.id.as_str())
            .chain(self.relations.iter().map(|r| r.id.as_str()))
            .collect()
    }

    pub fn cites(&self, id: &str) -> bool {
        self.source_ids().contains(&id)
    }

    pub fn has_provenance(&self) -> bool {
        !self.entities.is_empty() || !self.relations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EntityKind, RelationKind};

    #[test]
    fn test_source_ids() {
        let fact = Fact {
            id: "f1".into(),
            statement: "Warfarin interacts with Aspirin".into(),
            entities: vec![
                EntityRef::new(EntityKind::Medication, "med-warfarin"),
                EntityRef::new(EntityKind::Medication, "med-aspirin"),
            ],
            relations: vec![RelationRef::new(RelationKind::InteractsWith, "rel-9")],
            source_rows: vec![],
        };

        assert_eq!(fact.source_ids(), vec!["med-warfarin", "med-aspirin", "rel-9"]);
        assert!(fact.cites("rel-9"));
        assert!(!fact.cites("med-metformin"));
        assert!(fact.has_provenance());
    }
}
