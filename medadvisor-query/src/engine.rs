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

//! MedAdvisor engine
//!
//! Wires the pipeline together behind one entry point,
//! [`MedAdvisor::answer_facts`]. The engine is constructed explicitly from
//! configuration plus collaborator handles and holds no ambient state; the
//! result cache is the only mutable structure shared between requests.

use crate::builder::{BoundQuery, CacheKey, QueryBuilder};
use crate::cache::{CacheStats, ResultCache};
use crate::entity::{EntityResolver, GraphEntityResolver};
use crate::executor::QueryExecutor;
use crate::facts::FactAssembler;
use crate::intent::{IntentClassifier, IntentResolver, Resolution};
use crate::store::{GraphStore, GraphVersionSource, QueryParams};
use crate::template::TemplateLibrary;
use medadvisor_core::{
    AmbiguityPolicy, ConversationContext, EngineConfig, EngineError, Fact, Intent, Result,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Facts retrieved for one question
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub facts: Vec<Fact>,
    pub intent: Intent,
    pub cache_hit: bool,
    pub cache_key: CacheKey,
    pub template_id: String,
}

impl Answer {
    /// True when the query ran and matched nothing
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }
}

/// What `answer_facts` would run, without running it
#[derive(Debug, Clone, Serialize)]
pub struct QueryPlan {
    pub intent: Intent,
    pub template_id: String,
    pub template_version: u32,
    pub query_text: String,
    pub params: QueryParams,
    pub cache_key: CacheKey,
}

pub struct MedAdvisor {
    resolver: IntentResolver,
    classifier: Option<Arc<dyn IntentClassifier>>,
    library: Arc<TemplateLibrary>,
    builder: QueryBuilder,
    cache: ResultCache,
    executor: Arc<QueryExecutor>,
    assembler: FactAssembler,
    confidence_threshold: f32,
    ambiguity: AmbiguityPolicy,
}

impl MedAdvisor {
    pub fn builder(config: EngineConfig) -> MedAdvisorBuilder {
        MedAdvisorBuilder::new(config)
    }

    /// Answer one question with grounded facts.
    ///
    /// Cache check strictly precedes execution, which strictly precedes the
    /// cache store. An empty fact list means the query matched nothing; every
    /// failure is returned as a typed error.
    pub async fn answer_facts(
        &self,
        question: &str,
        context: Option<&ConversationContext>,
    ) -> Result<Answer> {
        let started = Instant::now();
        let (intent, bound) = self.bind(question, context).await?;

        let executor = self.executor.clone();
        let query = bound.clone();
        let cached = self
            .cache
            .get_or_compute(&bound, move || async move { executor.execute(&query).await })
            .await?;

        let facts = self.assembler.assemble(&cached.result, &bound)?;

        tracing::info!(
            intent = %intent.tag,
            template_id = %bound.template.id,
            cache_key = ?bound.cache_key,
            cache_hit = cached.cache_hit,
            facts = facts.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Answered question"
        );

        Ok(Answer {
            facts,
            intent,
            cache_hit: cached.cache_hit,
            cache_key: bound.cache_key,
            template_id: bound.template.id.clone(),
        })
    }

    /// Resolve and bind a question without touching the cache or store
    pub async fn plan(
        &self,
        question: &str,
        context: Option<&ConversationContext>,
    ) -> Result<QueryPlan> {
        let (intent, bound) = self.bind(question, context).await?;
        Ok(QueryPlan {
            intent,
            template_id: bound.template.id.clone(),
            template_version: bound.template.version,
            query_text: bound.template.query_text.clone(),
            params: bound.params,
            cache_key: bound.cache_key,
        })
    }

    async fn bind(
        &self,
        question: &str,
        context: Option<&ConversationContext>,
    ) -> Result<(Intent, BoundQuery)> {
        let intent = self.resolve_intent(question, context).await?;
        let template = self.library.lookup(intent.tag)?;
        let bound = self.builder.build(&intent, template).await?;
        Ok((intent, bound))
    }

    async fn resolve_intent(
        &self,
        question: &str,
        context: Option<&ConversationContext>,
    ) -> Result<Intent> {
        let resolution = match self.resolver.resolve(question, context) {
            Ok(resolution) => resolution,
            Err(unresolved @ EngineError::UnresolvedIntent { .. }) => {
                match self.classify(question, context).await? {
                    Some(intent) => Resolution::Resolved(intent),
                    None => return Err(unresolved),
                }
            }
            Err(e) => return Err(e),
        };

        match resolution {
            Resolution::Resolved(intent) => Ok(intent),
            Resolution::Ambiguous(candidates) => match self.ambiguity {
                AmbiguityPolicy::Reject => Err(EngineError::AmbiguousIntent { candidates }),
                AmbiguityPolicy::PickTop => {
                    candidates
                        .into_iter()
                        .next()
                        .ok_or_else(|| EngineError::UnresolvedIntent {
                            question: question.to_string(),
                            confidence: 0.0,
                        })
                }
            },
        }
    }

    /// Consult the external classifier, keeping only confident answers
    async fn classify(
        &self,
        question: &str,
        context: Option<&ConversationContext>,
    ) -> Result<Option<Intent>> {
        let Some(classifier) = &self.classifier else {
            return Ok(None);
        };

        let intent = classifier.classify(question, context).await?;
        Ok(intent.filter(|i| {
            let confident = i.confidence >= self.confidence_threshold;
            if !confident {
                tracing::debug!(
                    intent = %i.tag,
                    confidence = i.confidence,
                    "Discarding low-confidence classifier output"
                );
            }
            confident
        }))
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn templates(&self) -> &TemplateLibrary {
        &self.library
    }
}

/// Builder for [`MedAdvisor`]
pub struct MedAdvisorBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn GraphStore>>,
    version: Option<Arc<dyn GraphVersionSource>>,
    entities: Option<Arc<dyn EntityResolver>>,
    classifier: Option<Arc<dyn IntentClassifier>>,
    library: Option<TemplateLibrary>,
    medications: Vec<String>,
    diagnoses: Vec<String>,
}

impl MedAdvisorBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            store: None,
            version: None,
            entities: None,
            classifier: None,
            library: None,
            medications: Vec::new(),
            diagnoses: Vec::new(),
        }
    }

    pub fn store(mut self, store: Arc<dyn GraphStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn version_source(mut self, version: Arc<dyn GraphVersionSource>) -> Self {
        self.version = Some(version);
        self
    }

    /// Defaults to full-text lookup against the store
    pub fn entity_resolver(mut self, resolver: Arc<dyn EntityResolver>) -> Self {
        self.entities = Some(resolver);
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn IntentClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Defaults to the built-in templates
    pub fn templates(mut self, library: TemplateLibrary) -> Self {
        self.library = Some(library);
        self
    }

    /// Names the intent resolver's keyword fallback can spot in free text
    pub fn vocabulary(mut self, medications: Vec<String>, diagnoses: Vec<String>) -> Self {
        self.medications = medications;
        self.diagnoses = diagnoses;
        self
    }

    pub fn build(self) -> Result<MedAdvisor> {
        self.config.validate()?;

        let store = self
            .store
            .ok_or_else(|| EngineError::Config("MedAdvisor needs a graph store".into()))?;
        let version = self
            .version
            .ok_or_else(|| EngineError::Config("MedAdvisor needs a graph version source".into()))?;

        let library = match self.library {
            Some(library) => library,
            None => TemplateLibrary::builtin()?,
        };
        let entities = self.entities.unwrap_or_else(|| {
            Arc::new(GraphEntityResolver::new(
                store.clone(),
                &self.config.neo4j,
                self.config.executor.timeout(),
            ))
        });

        let resolver = IntentResolver::new(&self.config.intent)?
            .with_vocabulary(self.medications, self.diagnoses);

        tracing::info!(
            templates = library.len(),
            cache_enabled = self.config.cache.enabled,
            cache_max_entries = self.config.cache.max_entries,
            timeout_ms = self.config.executor.timeout_ms,
            "MedAdvisor engine ready"
        );

        Ok(MedAdvisor {
            resolver,
            classifier: self.classifier,
            library: Arc::new(library),
            builder: QueryBuilder::new(entities),
            cache: ResultCache::new(&self.config.cache, version),
            executor: Arc::new(QueryExecutor::new(store, &self.config.executor)),
            assembler: FactAssembler::new(),
            confidence_threshold: self.config.intent.confidence_threshold,
            ambiguity: self.config.intent.ambiguity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::CatalogEntityResolver;
    use crate::store::{SharedGraphVersion, StoreError, StoreResponse};
    use async_trait::async_trait;
    use medadvisor_core::{Entity, EntityKind, ErrorKind, IntentTag, SlotValue};
    use std::time::Duration;

    struct EmptyStore;

    #[async_trait]
    impl GraphStore for EmptyStore {
        async fn run_query(
            &self,
            _query_text: &str,
            _params: &QueryParams,
            _timeout: Duration,
        ) -> std::result::Result<StoreResponse, StoreError> {
            Ok(StoreResponse::default())
        }
    }

    struct FixedClassifier(Intent);

    #[async_trait]
    impl IntentClassifier for FixedClassifier {
        async fn classify(
            &self,
            _question: &str,
            _context: Option<&ConversationContext>,
        ) -> Result<Option<Intent>> {
            Ok(Some(self.0.clone()))
        }
    }

    fn catalog() -> Arc<CatalogEntityResolver> {
        Arc::new(
            CatalogEntityResolver::new()
                .with_entity(
                    Entity::new(EntityKind::Medication, "med-metformin", "Metformin"),
                    &[],
                )
                .with_entity(
                    Entity::new(EntityKind::Medication, "med-aspirin", "Aspirin"),
                    &[],
                ),
        )
    }

    fn engine(config: EngineConfig) -> MedAdvisorBuilder {
        MedAdvisor::builder(config)
            .store(Arc::new(EmptyStore))
            .version_source(Arc::new(SharedGraphVersion::new(1)))
            .entity_resolver(catalog())
    }

    #[test]
    fn test_builder_requires_store() {
        let result = MedAdvisor::builder(EngineConfig::default())
            .version_source(Arc::new(SharedGraphVersion::new(1)))
            .build();
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[tokio::test]
    async fn test_plan_does_not_execute() {
        let advisor = engine(EngineConfig::default()).build().unwrap();
        let plan = advisor.plan("How should I take Metformin?", None).await.unwrap();

        assert_eq!(plan.template_id, "dosage_lookup_v1");
        assert_eq!(plan.params["medication_id"], "med-metformin");
        assert_eq!(advisor.cache_stats().computations, 0);
    }

    #[tokio::test]
    async fn test_ambiguity_policy() {
        let question = "How should I take Metformin and Aspirin?";

        let rejecting = engine(EngineConfig::default()).build().unwrap();
        let err = rejecting.answer_facts(question, None).await.unwrap_err();
        assert!(matches!(err, EngineError::AmbiguousIntent { ref candidates } if candidates.len() == 2));
        assert_eq!(err.kind(), ErrorKind::Intent);

        let mut config = EngineConfig::default();
        config.intent.ambiguity = AmbiguityPolicy::PickTop;
        let picking = engine(config).build().unwrap();
        let answer = picking.answer_facts(question, None).await.unwrap();
        assert_eq!(answer.intent.tag, IntentTag::DosageLookup);
        assert!(answer.is_empty());
    }

    #[tokio::test]
    async fn test_classifier_fallback() {
        let intent = Intent::new(IntentTag::DrugInfo, 0.8)
            .with_slot("medication", SlotValue::text("metformin"));
        let advisor = engine(EngineConfig::default())
            .classifier(Arc::new(FixedClassifier(intent)))
            .build()
            .unwrap();

        let plan = advisor.plan("tell me a story", None).await.unwrap();
        assert_eq!(plan.template_id, "drug_info_v1");
    }

    #[tokio::test]
    async fn test_low_confidence_classifier_is_ignored() {
        let intent = Intent::new(IntentTag::DrugInfo, 0.2)
            .with_slot("medication", SlotValue::text("metformin"));
        let advisor = engine(EngineConfig::default())
            .classifier(Arc::new(FixedClassifier(intent)))
            .build()
            .unwrap();

        let err = advisor.answer_facts("tell me a story", None).await.unwrap_err();
        assert!(matches!(err, EngineError::UnresolvedIntent { .. }));
    }
}
