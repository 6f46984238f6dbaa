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

//! CacheKey canonicalization properties

use medadvisor_core::{Entity, EntityKind, Intent, IntentTag, SlotValue};
use medadvisor_query::{BoundQuery, CatalogEntityResolver, QueryBuilder, TemplateLibrary};
use proptest::prelude::*;
use std::sync::Arc;

fn builder() -> QueryBuilder {
    QueryBuilder::new(Arc::new(
        CatalogEntityResolver::new()
            .with_entity(
                Entity::new(EntityKind::Medication, "med-warfarin", "Warfarin"),
                &["coumadin"],
            )
            .with_entity(
                Entity::new(EntityKind::Medication, "med-aspirin", "Aspirin"),
                &[],
            )
            .with_entity(
                Entity::new(EntityKind::Medication, "med-ibuprofen", "Ibuprofen"),
                &[],
            ),
    ))
}

fn bind(intent: Intent) -> BoundQuery {
    let template = TemplateLibrary::builtin()
        .unwrap()
        .lookup(intent.tag)
        .unwrap();
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
        .block_on(builder().build(&intent, template))
        .unwrap()
}

/// Randomize letter case and pad with whitespace
fn surface_form(name: &'static str) -> impl Strategy<Value = String> {
    (
        proptest::collection::vec(any::<bool>(), name.len()),
        "[ \t]{0,3}",
        "[ \t]{0,3}",
    )
        .prop_map(move |(upper, lead, trail)| {
            let body: String = name
                .chars()
                .zip(upper)
                .map(|(c, u)| if u { c.to_ascii_uppercase() } else { c.to_ascii_lowercase() })
                .collect();
            format!("{}{}{}", lead, body, trail)
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn dosage_key_ignores_surface_form(name in surface_form("warfarin")) {
        let canonical = bind(
            Intent::new(IntentTag::DosageLookup, 0.9)
                .with_slot("medication", SlotValue::text("Warfarin")),
        );
        let variant = bind(
            Intent::new(IntentTag::DosageLookup, 0.9)
                .with_slot("medication", SlotValue::text(name)),
        );
        prop_assert_eq!(canonical.cache_key, variant.cache_key);
        prop_assert_eq!(canonical.params, variant.params);
    }

    #[test]
    fn interaction_key_ignores_list_order(
        a in surface_form("aspirin"),
        b in surface_form("coumadin"),
        c in surface_form("ibuprofen"),
        rotate in 0usize..3,
    ) {
        let mut meds = vec![a, b, c];
        meds.rotate_left(rotate);

        let canonical = bind(
            Intent::new(IntentTag::InteractionCheck, 0.9)
                .with_slot("medications", SlotValue::list(["Warfarin", "Aspirin", "Ibuprofen"])),
        );
        let variant = bind(
            Intent::new(IntentTag::InteractionCheck, 0.9)
                .with_slot("medications", SlotValue::list(meds)),
        );
        prop_assert_eq!(canonical.cache_key, variant.cache_key);
    }
}

#[test]
fn different_medications_have_different_keys() {
    let warfarin = bind(
        Intent::new(IntentTag::DosageLookup, 0.9).with_slot("medication", SlotValue::text("Warfarin")),
    );
    let aspirin = bind(
        Intent::new(IntentTag::DosageLookup, 0.9).with_slot("medication", SlotValue::text("Aspirin")),
    );
    assert_ne!(warfarin.cache_key, aspirin.cache_key);

    let drug_info = bind(
        Intent::new(IntentTag::DrugInfo, 0.9).with_slot("medication", SlotValue::text("Warfarin")),
    );
    assert_ne!(warfarin.cache_key, drug_info.cache_key);
}
