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

//! Intent Resolver
//!
//! Maps a free-text patient question (plus a short conversation window) to
//! an [`Intent`]: a tag from the closed [`IntentTag`] set and the slots the
//! query template needs.
//!
//! Resolution is deterministic. Phrase patterns are tried first and carry
//! high confidence; a keyword-scoring fallback covers looser phrasings at
//! lower confidence. Anything stochastic (an LLM classifier, say) sits
//! behind [`IntentClassifier`] and is consulted by the engine only after
//! this resolver gives up.
//!
//! ## Example Questions
//!
//! - "How should I take Metformin?"
//! - "Can I take warfarin with aspirin?"
//! - "Can I take ibuprofen if I have kidney disease?"
//! - "What medications have I been taking in the last 2 weeks?"
//! - "What are my discharge instructions about diet?"

use async_trait::async_trait;
use medadvisor_core::{
    ConversationContext, EngineError, Intent, IntentConfig, IntentTag, Result, SlotValue, TimeUnit,
};
use regex::Regex;

/// Confidence assigned to keyword-fallback matches
const FALLBACK_CONFIDENCE: f32 = 0.6;

/// Mentions that refer back to an earlier medication
const PRONOUNS: &[&str] = &[
    "it", "this", "that", "them", "these", "those", "one", "medication", "medicine", "drug",
    "pill", "this medication", "that medication", "this medicine", "that medicine",
    "this drug", "that drug", "these medications", "those medications",
];

/// Outcome of a successful resolution
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved(Intent),
    /// Ranked candidates, best first; the caller decides how to disambiguate
    Ambiguous(Vec<Intent>),
}

impl Resolution {
    pub fn candidates(&self) -> &[Intent] {
        match self {
            Resolution::Resolved(intent) => std::slice::from_ref(intent),
            Resolution::Ambiguous(candidates) => candidates,
        }
    }
}

/// External, possibly stochastic intent classifier.
///
/// Treated as an opaque service: its output is re-checked against the
/// confidence threshold and never participates in deterministic caching
/// guarantees beyond the intent it returns.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(
        &self,
        question: &str,
        context: Option<&ConversationContext>,
    ) -> Result<Option<Intent>>;
}

struct PhrasePattern {
    regex: Regex,
    intent: IntentTag,
    confidence: f32,
}

/// Raw mentions pulled from one question, before slot assembly
#[derive(Debug, Clone)]
struct Extraction {
    tag: IntentTag,
    confidence: f32,
    medications: Vec<String>,
    diagnosis: Option<String>,
    topic: Option<String>,
}

impl Extraction {
    fn new(tag: IntentTag, confidence: f32) -> Self {
        Self {
            tag,
            confidence,
            medications: Vec::new(),
            diagnosis: None,
            topic: None,
        }
    }
}

/// Deterministic question-to-intent resolver
pub struct IntentResolver {
    phrases: Vec<PhrasePattern>,
    keywords: Vec<(IntentTag, Vec<&'static str>)>,
    separators: Regex,
    trailing: Regex,
    patient_id: Regex,
    window_numeric: Regex,
    window_named: Regex,
    medications: Vec<String>,
    diagnoses: Vec<String>,
    confidence_threshold: f32,
    history_window: usize,
}

fn pattern(re: &str) -> Result<Regex> {
    Regex::new(re).map_err(|e| EngineError::Config(format!("invalid pattern {}: {}", re, e)))
}

impl IntentResolver {
    pub fn new(config: &IntentConfig) -> Result<Self> {
        let keywords = vec![
            (
                IntentTag::DosageLookup,
                vec!["dose", "dosage", "dosing", "how to take", "how often", "how much", "when to take", "schedule", "mg"],
            ),
            (
                IntentTag::InteractionCheck,
                vec!["interact", "interaction", "together", "mix", "combine", "at the same time"],
            ),
            (
                IntentTag::DischargeInstructions,
                vec!["discharge", "instructions", "advice", "after leaving", "follow-up", "going home"],
            ),
            (
                IntentTag::DrugInfo,
                vec!["used for", "what is", "mechanism", "information", "how does", "drugbank", "indication"],
            ),
            (
                IntentTag::PatientMedications,
                vec!["my medications", "my meds", "my medicines", "am i taking", "prescribed", "medication list"],
            ),
            (
                IntentTag::ContraindicationCheck,
                vec!["contraindicat", "if i have", "with my condition", "diagnosed", "safe for someone"],
            ),
        ];

        Ok(Self {
            phrases: Self::build_phrases()?,
            keywords,
            separators: pattern(
                r"(?i)\s*(?:,|;|&|\+|\btogether with\b|\binteracts? with\b|\band\b|\bwith\b|\bor\b|\bplus\b)\s*",
            )?,
            trailing: pattern(
                r"(?i)\s+(?:together|at the same time|safely|now|today|every day|daily)$",
            )?,
            patient_id: pattern(r"(?i)\b(?:patient\s+)?(p\d{3,})\b")?,
            window_numeric: pattern(
                r"(?i)\b(?:last|past|previous)\s+(\d+)\s+(hours?|days?|weeks?|months?)\b",
            )?,
            window_named: pattern(r"(?i)\b(?:this|last|past)\s+(day|week|month)\b")?,
            medications: Vec::new(),
            diagnoses: Vec::new(),
            confidence_threshold: config.confidence_threshold,
            history_window: config.history_window,
        })
    }

    /// Known medication and diagnosis names used by the keyword fallback
    pub fn with_vocabulary<M, D>(mut self, medications: M, diagnoses: D) -> Self
    where
        M: IntoIterator<Item = String>,
        D: IntoIterator<Item = String>,
    {
        self.medications = normalize_vocabulary(medications);
        self.diagnoses = normalize_vocabulary(diagnoses);
        self
    }

    fn build_phrases() -> Result<Vec<PhrasePattern>> {
        // Order matters: earlier patterns win.
        let specs: &[(&str, IntentTag, f32)] = &[
            // "Can I take ibuprofen if I have kidney disease"
            (
                r"(?i)^(?:can|could|should|may)\s+i\s+(?:take|use)\s+(?P<med>.+?)\s+(?:if|when|since|while|because)\s+i\s+(?:have|had|am diagnosed with|suffer from)\s+(?P<diag>.+)$",
                IntentTag::ContraindicationCheck,
                0.9,
            ),
            (
                r"(?i)^is\s+it\s+safe\s+(?:for\s+me\s+)?to\s+(?:take|use)\s+(?P<med>.+?)\s+(?:if|when|since|while|because)\s+i\s+(?:have|had|am diagnosed with|suffer from)\s+(?P<diag>.+)$",
                IntentTag::ContraindicationCheck,
                0.9,
            ),
            (
                r"(?i)^(?:is|are)\s+(?P<med>.+?)\s+contraindicated\s+(?:for|with|in)\s+(?:patients\s+with\s+|people\s+with\s+)?(?P<diag>.+)$",
                IntentTag::ContraindicationCheck,
                0.9,
            ),
            // "What medications have I been taking"
            (
                r"(?i)^what\s+(?:medications?|meds|medicines?|drugs|pills|prescriptions)\s+(?:am\s+i|do\s+i|have\s+i\s+been|was\s+i|did\s+i)\s+(?:taking|on|take|prescribed|started|get)\b",
                IntentTag::PatientMedications,
                0.9,
            ),
            (
                r"(?i)^(?:list|show)\s+(?:me\s+)?(?:all\s+)?(?:of\s+)?my\s+(?:medications?|meds|medicines?|prescriptions)\b",
                IntentTag::PatientMedications,
                0.9,
            ),
            // "What are my discharge instructions about diet"
            (
                r"(?i)\bdischarge\s+(?:instructions|advice|plan|notes|summary)(?:\s+(?:about|for|on|regarding)\s+(?P<topic>.+))?$",
                IntentTag::DischargeInstructions,
                0.9,
            ),
            (
                r"(?i)^what\s+(?:advice|instructions)\s+(?:did|was|were)\s+i\s+(?:get|given|receive)(?:\s+(?:about|for|on|regarding)\s+(?P<topic>.+))?$",
                IntentTag::DischargeInstructions,
                0.85,
            ),
            // "How should I take Metformin"
            (
                r"(?i)^how\s+(?:should|do|often\s+should|often\s+do|often\s+can)\s+i\s+(?:take|use)\s+(?P<med>.+)$",
                IntentTag::DosageLookup,
                0.9,
            ),
            (
                r"(?i)^what(?:'s|\s+is)\s+(?:the|my)\s+(?:dose|dosage|dosing|schedule)\s+(?:of|for)\s+(?P<med>.+)$",
                IntentTag::DosageLookup,
                0.9,
            ),
            (
                r"(?i)^how\s+(?:much|many)\s+(?P<med>.+?)\s+(?:should|do|can)\s+i\s+take$",
                IntentTag::DosageLookup,
                0.85,
            ),
            (
                r"(?i)^when\s+(?:should|do)\s+i\s+take\s+(?P<med>.+)$",
                IntentTag::DosageLookup,
                0.85,
            ),
            // "Can I take warfarin with aspirin"
            (
                r"(?i)^(?:can|could|should|may)\s+i\s+(?:take|mix|combine|use)\s+(?P<meds>.+?\s+(?:with|and|together\s+with|plus)\s+.+)$",
                IntentTag::InteractionCheck,
                0.9,
            ),
            (
                r"(?i)^(?:does|do)\s+(?P<meds>.+?\s+interact\s+with\s+.+)$",
                IntentTag::InteractionCheck,
                0.9,
            ),
            (
                r"(?i)\binteractions?\s+(?:between|among|of|for|with)\s+(?P<meds>.+)$",
                IntentTag::InteractionCheck,
                0.85,
            ),
            (
                r"(?i)^is\s+it\s+safe\s+to\s+(?:take|mix|combine)\s+(?P<meds>.+)$",
                IntentTag::InteractionCheck,
                0.85,
            ),
            // "What is lisinopril used for"
            (
                r"(?i)^what\s+(?:is|are)\s+(?P<med>.+?)\s+(?:used|prescribed|taken|given)\s+for$",
                IntentTag::DrugInfo,
                0.9,
            ),
            (
                r"(?i)^(?:tell\s+me\s+about|what\s+do\s+you\s+know\s+about|(?:give\s+me\s+)?information\s+(?:on|about))\s+(?P<med>.+)$",
                IntentTag::DrugInfo,
                0.85,
            ),
            (
                r"(?i)^how\s+does\s+(?P<med>.+?)\s+work$",
                IntentTag::DrugInfo,
                0.85,
            ),
        ];

        specs
            .iter()
            .map(|(re, intent, confidence)| {
                Ok(PhrasePattern {
                    regex: pattern(re)?,
                    intent: *intent,
                    confidence: *confidence,
                })
            })
            .collect()
    }

    /// Resolve a question to an intent
    pub fn resolve(
        &self,
        question: &str,
        context: Option<&ConversationContext>,
    ) -> Result<Resolution> {
        let normalized = normalize_question(question);
        let mut extractions = self.extract(&normalized);

        let top = extractions.first().map(|e| e.confidence).unwrap_or(0.0);
        if extractions.is_empty() || top < self.confidence_threshold {
            tracing::debug!(question = %normalized, confidence = top, "Intent unresolved");
            return Err(EngineError::UnresolvedIntent {
                question: question.to_string(),
                confidence: top,
            });
        }

        for extraction in &mut extractions {
            self.borrow_from_history(extraction, context);
        }

        let patient = self
            .patient_id
            .captures(&normalized)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_uppercase())
            .or_else(|| context.and_then(|c| c.patient_id.clone()));
        let window = self.extract_window(&normalized);

        let mut intents = Vec::new();
        for extraction in extractions {
            intents.extend(assemble_intents(extraction, patient.as_deref(), window.as_ref()));
        }

        match intents.len() {
            1 => {
                let intent = intents.remove(0);
                tracing::debug!(intent = %intent.tag, confidence = intent.confidence, "Intent resolved");
                Ok(Resolution::Resolved(intent))
            }
            _ => {
                tracing::debug!(candidates = intents.len(), "Intent ambiguous");
                Ok(Resolution::Ambiguous(intents))
            }
        }
    }

    /// Phrase patterns first, then keyword fallback. Fallback ties return
    /// every tied tag in `IntentTag::ALL` order.
    fn extract(&self, question: &str) -> Vec<Extraction> {
        for phrase in &self.phrases {
            if let Some(caps) = phrase.regex.captures(question) {
                let mut extraction = Extraction::new(phrase.intent, phrase.confidence);
                if let Some(m) = caps.name("med").or_else(|| caps.name("meds")) {
                    extraction.medications = self.split_mentions(m.as_str());
                }
                extraction.diagnosis = caps
                    .name("diag")
                    .map(|m| clean_mention(m.as_str()))
                    .filter(|s| !s.is_empty());
                extraction.topic = caps
                    .name("topic")
                    .map(|m| clean_mention(m.as_str()))
                    .filter(|s| !s.is_empty());
                return vec![extraction];
            }
        }

        self.match_keywords(question)
    }

    fn match_keywords(&self, question: &str) -> Vec<Extraction> {
        let lower = question.to_lowercase();
        let scores: Vec<(IntentTag, usize)> = self
            .keywords
            .iter()
            .map(|(tag, words)| (*tag, words.iter().filter(|w| lower.contains(*w)).count()))
            .collect();

        let best = scores.iter().map(|(_, s)| *s).max().unwrap_or(0);
        if best == 0 {
            return Vec::new();
        }

        let medications = find_mentions(&lower, &self.medications);
        let diagnosis = find_mentions(&lower, &self.diagnoses).into_iter().next();

        scores
            .into_iter()
            .filter(|(_, s)| *s == best)
            .map(|(tag, _)| {
                let mut extraction = Extraction::new(tag, FALLBACK_CONFIDENCE);
                extraction.medications = medications.clone();
                extraction.diagnosis = diagnosis.clone();
                extraction
            })
            .collect()
    }

    fn split_mentions(&self, text: &str) -> Vec<String> {
        let text = self.trailing.replace(text.trim(), "");
        let mut mentions: Vec<String> = Vec::new();
        for part in self.separators.split(&text) {
            let mention = clean_mention(part);
            if mention.is_empty() {
                continue;
            }
            if !mentions.iter().any(|m| m.eq_ignore_ascii_case(&mention)) {
                mentions.push(mention);
            }
        }
        mentions
    }

    /// Replace pronoun mentions (or fill a missing one) from recent turns
    fn borrow_from_history(
        &self,
        extraction: &mut Extraction,
        context: Option<&ConversationContext>,
    ) {
        let needs_medication = !matches!(
            extraction.tag,
            IntentTag::DischargeInstructions | IntentTag::PatientMedications
        );
        if !needs_medication {
            return;
        }

        let has_pronoun = extraction.medications.iter().any(|m| is_pronoun(m));
        if !has_pronoun && !extraction.medications.is_empty() {
            return;
        }

        let earlier = context.and_then(|ctx| {
            ctx.recent(self.history_window).find_map(|turn| {
                let previous = normalize_question(&turn.question);
                self.extract(&previous)
                    .into_iter()
                    .next()
                    .map(|e| e.medications)
                    .filter(|meds| !meds.is_empty() && !meds.iter().any(|m| is_pronoun(m)))
            })
        });

        let Some(earlier) = earlier else {
            extraction.medications.retain(|m| !is_pronoun(m));
            return;
        };

        let mut merged: Vec<String> = Vec::new();
        let mut substituted = false;
        for mention in extraction.medications.drain(..) {
            if is_pronoun(&mention) {
                if !substituted {
                    merged.extend(earlier.iter().cloned());
                    substituted = true;
                }
            } else {
                merged.push(mention);
            }
        }
        if !substituted {
            merged.extend(earlier);
        }
        merged.dedup_by(|a, b| a.eq_ignore_ascii_case(b));
        extraction.medications = merged;
    }

    fn extract_window(&self, question: &str) -> Option<SlotValue> {
        if let Some(caps) = self.window_numeric.captures(question) {
            let amount: u32 = caps.get(1)?.as_str().parse().ok()?;
            let unit = TimeUnit::parse(caps.get(2)?.as_str())?;
            return Some(SlotValue::TimeWindow { amount, unit });
        }
        let caps = self.window_named.captures(question)?;
        let unit = TimeUnit::parse(caps.get(1)?.as_str())?;
        Some(SlotValue::TimeWindow { amount: 1, unit })
    }
}

/// Expand one extraction into intents. A single-medication intent with
/// several mentions becomes one candidate per mention, in mention order.
fn assemble_intents(
    extraction: Extraction,
    patient: Option<&str>,
    window: Option<&SlotValue>,
) -> Vec<Intent> {
    let mut base = Intent::new(extraction.tag, extraction.confidence);
    if let Some(patient) = patient {
        base = base.with_slot("patient", SlotValue::text(patient));
    }
    if let Some(window) = window {
        base = base.with_slot("since", window.clone());
    }
    if let Some(diagnosis) = &extraction.diagnosis {
        base = base.with_slot("diagnosis", SlotValue::text(diagnosis.clone()));
    }
    if let Some(topic) = &extraction.topic {
        base = base.with_slot("topic", SlotValue::text(topic.clone()));
    }

    match extraction.tag {
        IntentTag::InteractionCheck => {
            if !extraction.medications.is_empty() {
                base = base.with_slot("medications", SlotValue::List(extraction.medications));
            }
            vec![base]
        }
        IntentTag::DosageLookup | IntentTag::DrugInfo | IntentTag::ContraindicationCheck => {
            if extraction.medications.is_empty() {
                return vec![base];
            }
            extraction
                .medications
                .into_iter()
                .map(|med| base.clone().with_slot("medication", SlotValue::Text(med)))
                .collect()
        }
        IntentTag::DischargeInstructions | IntentTag::PatientMedications => vec![base],
    }
}

fn normalize_question(question: &str) -> String {
    question
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(|c: char| matches!(c, '?' | '!' | '.'))
        .trim()
        .to_string()
}

fn clean_mention(text: &str) -> String {
    let mut mention = text
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '?' | '!' | '.' | ','))
        .trim();
    loop {
        let lower = mention.to_lowercase();
        let stripped = ["my ", "the ", "a ", "an ", "some ", "your "]
            .iter()
            .find(|p| lower.starts_with(*p))
            .map(|p| mention[p.len()..].trim_start());
        match stripped {
            Some(rest) => mention = rest,
            None => break,
        }
    }
    mention.to_string()
}

fn is_pronoun(mention: &str) -> bool {
    let lower = mention.to_lowercase();
    PRONOUNS.contains(&lower.as_str())
}

fn normalize_vocabulary<I: IntoIterator<Item = String>>(names: I) -> Vec<String> {
    let mut names: Vec<String> = names
        .into_iter()
        .map(|n| n.trim().to_lowercase())
        .filter(|n| !n.is_empty())
        .collect();
    names.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    names.dedup();
    names
}

/// Vocabulary names occurring in `text` on word boundaries, in text order
fn find_mentions(text: &str, vocabulary: &[String]) -> Vec<String> {
    let mut hits: Vec<(usize, usize, &String)> = Vec::new();
    for name in vocabulary {
        let mut start = 0;
        while let Some(pos) = text[start..].find(name.as_str()) {
            let begin = start + pos;
            let end = begin + name.len();
            let before_ok = text[..begin]
                .chars()
                .next_back()
                .map_or(true, |c| !c.is_alphanumeric());
            let after_ok = text[end..].chars().next().map_or(true, |c| !c.is_alphanumeric());
            if before_ok && after_ok && !hits.iter().any(|(b, e, _)| begin < *e && end > *b) {
                hits.push((begin, end, name));
            }
            start = end;
        }
    }
    hits.sort_by_key(|(begin, _, _)| *begin);
    hits.into_iter().map(|(_, _, name)| name.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> IntentResolver {
        IntentResolver::new(&IntentConfig::default()).unwrap()
    }

    fn resolved(resolution: Resolution) -> Intent {
        match resolution {
            Resolution::Resolved(intent) => intent,
            Resolution::Ambiguous(c) => panic!("unexpected ambiguity: {:?}", c),
        }
    }

    #[test]
    fn test_dosage_lookup() {
        let intent = resolved(resolver().resolve("How should I take Metformin?", None).unwrap());
        assert_eq!(intent.tag, IntentTag::DosageLookup);
        assert_eq!(intent.slot("medication"), Some(&SlotValue::text("Metformin")));
        assert!(intent.confidence >= 0.9);
    }

    #[test]
    fn test_interaction_check_lists_both_medications() {
        let intent = resolved(
            resolver()
                .resolve("Can I take warfarin and aspirin together?", None)
                .unwrap(),
        );
        assert_eq!(intent.tag, IntentTag::InteractionCheck);
        assert_eq!(
            intent.slot("medications"),
            Some(&SlotValue::list(["warfarin", "aspirin"]))
        );
    }

    #[test]
    fn test_contraindication_precedes_interaction() {
        let intent = resolved(
            resolver()
                .resolve("can I take ibuprofen if I have chronic kidney disease", None)
                .unwrap(),
        );
        assert_eq!(intent.tag, IntentTag::ContraindicationCheck);
        assert_eq!(intent.slot("medication"), Some(&SlotValue::text("ibuprofen")));
        assert_eq!(
            intent.slot("diagnosis"),
            Some(&SlotValue::text("chronic kidney disease"))
        );
    }

    #[test]
    fn test_patient_medications_with_window() {
        let intent = resolved(
            resolver()
                .resolve("What medications have I been taking in the last 2 weeks? I'm P001", None)
                .unwrap(),
        );
        assert_eq!(intent.tag, IntentTag::PatientMedications);
        assert_eq!(intent.slot("patient"), Some(&SlotValue::text("P001")));
        assert_eq!(
            intent.slot("since"),
            Some(&SlotValue::TimeWindow {
                amount: 2,
                unit: TimeUnit::Weeks
            })
        );
    }

    #[test]
    fn test_discharge_topic_and_context_patient() {
        let ctx = ConversationContext::for_patient("P042");
        let intent = resolved(
            resolver()
                .resolve("What are my discharge instructions about diet?", Some(&ctx))
                .unwrap(),
        );
        assert_eq!(intent.tag, IntentTag::DischargeInstructions);
        assert_eq!(intent.slot("topic"), Some(&SlotValue::text("diet")));
        assert_eq!(intent.slot("patient"), Some(&SlotValue::text("P042")));
    }

    #[test]
    fn test_pronoun_borrows_previous_medication() {
        let mut ctx = ConversationContext::default();
        ctx.push_turn("What is lisinopril used for?", "It lowers blood pressure.");

        let intent = resolved(resolver().resolve("How should I take it?", Some(&ctx)).unwrap());
        assert_eq!(intent.tag, IntentTag::DosageLookup);
        assert_eq!(intent.slot("medication"), Some(&SlotValue::text("lisinopril")));
    }

    #[test]
    fn test_pronoun_without_history_drops_slot() {
        let intent = resolved(resolver().resolve("How should I take it?", None).unwrap());
        assert!(intent.slot("medication").is_none());
    }

    #[test]
    fn test_multiple_medications_for_single_medication_intent_is_ambiguous() {
        let resolution = resolver()
            .resolve("How should I take metformin and lisinopril?", None)
            .unwrap();
        let Resolution::Ambiguous(candidates) = resolution else {
            panic!("expected ambiguity");
        };
        let meds: Vec<_> = candidates
            .iter()
            .map(|c| c.slot("medication").cloned())
            .collect();
        assert_eq!(
            meds,
            vec![
                Some(SlotValue::text("metformin")),
                Some(SlotValue::text("lisinopril"))
            ]
        );
    }

    #[test]
    fn test_keyword_fallback_uses_vocabulary() {
        let resolver = resolver().with_vocabulary(
            vec!["Metformin".to_string(), "Warfarin".to_string()],
            Vec::new(),
        );
        let intent = resolved(
            resolver
                .resolve("metformin dosage for adults", None)
                .unwrap(),
        );
        assert_eq!(intent.tag, IntentTag::DosageLookup);
        assert_eq!(intent.confidence, FALLBACK_CONFIDENCE);
        assert_eq!(intent.slot("medication"), Some(&SlotValue::text("metformin")));
    }

    #[test]
    fn test_unresolved_below_threshold() {
        let err = resolver().resolve("What's the weather like?", None).unwrap_err();
        assert!(matches!(err, EngineError::UnresolvedIntent { .. }));

        let strict = IntentResolver::new(&IntentConfig {
            confidence_threshold: 0.7,
            ..IntentConfig::default()
        })
        .unwrap();
        let err = strict.resolve("metformin dosage please", None).unwrap_err();
        assert!(matches!(
            err,
            EngineError::UnresolvedIntent { confidence, .. } if confidence == FALLBACK_CONFIDENCE
        ));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let r = resolver();
        let q = "Does warfarin interact with ibuprofen?";
        assert_eq!(r.resolve(q, None).unwrap(), r.resolve(q, None).unwrap());
    }

    #[test]
    fn test_find_mentions_respects_word_boundaries() {
        let vocab = normalize_vocabulary(vec!["aspirin".to_string(), "asa".to_string()]);
        assert_eq!(
            find_mentions("is aspirin like asa or basal insulin", &vocab),
            vec!["aspirin", "asa"]
        );
    }
}
