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

//! Intent and slot types
//!
//! An [`Intent`] is created per incoming question and discarded after the
//! turn. The tag set is closed so template dispatch is checked for
//! exhaustiveness at compile time.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Classified purpose of a patient question
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentTag {
    /// "How should I take Metformin?"
    DosageLookup,
    /// "Can I take warfarin with aspirin?"
    InteractionCheck,
    /// "What are my discharge instructions?"
    DischargeInstructions,
    /// "What is lisinopril used for?"
    DrugInfo,
    /// "What medications am I taking?"
    PatientMedications,
    /// "Can I take ibuprofen if I have kidney disease?"
    ContraindicationCheck,
}

impl IntentTag {
    pub const ALL: [IntentTag; 6] = [
        IntentTag::DosageLookup,
        IntentTag::InteractionCheck,
        IntentTag::DischargeInstructions,
        IntentTag::DrugInfo,
        IntentTag::PatientMedications,
        IntentTag::ContraindicationCheck,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentTag::DosageLookup => "DOSAGE_LOOKUP",
            IntentTag::InteractionCheck => "INTERACTION_CHECK",
            IntentTag::DischargeInstructions => "DISCHARGE_INSTRUCTIONS",
            IntentTag::DrugInfo => "DRUG_INFO",
            IntentTag::PatientMedications => "PATIENT_MEDICATIONS",
            IntentTag::ContraindicationCheck => "CONTRAINDICATION_CHECK",
        }
    }
}

impl fmt::Display for IntentTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time unit for time-window slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Hours,
    Days,
    Weeks,
    Months,
}

impl TimeUnit {
    /// Parse a unit word ("day", "weeks", "mo", ...)
    pub fn parse(word: &str) -> Option<Self> {
        match word.trim().to_lowercase().trim_end_matches('s') {
            "hour" | "hr" | "h" => Some(TimeUnit::Hours),
            "day" | "d" => Some(TimeUnit::Days),
            "week" | "wk" | "w" => Some(TimeUnit::Weeks),
            "month" | "mo" => Some(TimeUnit::Months),
            _ => None,
        }
    }
}

/// Extracted slot value, before canonicalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SlotValue {
    Text(String),
    List(Vec<String>),
    TimeWindow { amount: u32, unit: TimeUnit },
}

impl SlotValue {
    pub fn text(s: impl Into<String>) -> Self {
        SlotValue::Text(s.into())
    }

    pub fn list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SlotValue::List(items.into_iter().map(Into::into).collect())
    }

    /// Short name of the value shape, for error messages
    pub fn shape(&self) -> &'static str {
        match self {
            SlotValue::Text(_) => "text",
            SlotValue::List(_) => "list",
            SlotValue::TimeWindow { .. } => "time_window",
        }
    }
}

/// Intent tag plus extracted slots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub tag: IntentTag,
    #[serde(default)]
    pub slots: BTreeMap<String, SlotValue>,
    /// Classification confidence (0.0 - 1.0)
    pub confidence: f32,
}

impl Intent {
    pub fn new(tag: IntentTag, confidence: f32) -> Self {
        Self {
            tag,
            slots: BTreeMap::new(),
            confidence,
        }
    }

    pub fn with_slot(mut self, name: impl Into<String>, value: SlotValue) -> Self {
        self.slots.insert(name.into(), value);
        self
    }

    pub fn slot(&self, name: &str) -> Option<&SlotValue> {
        self.slots.get(name)
    }
}

/// One earlier question/answer exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub question: String,
    #[serde(default)]
    pub answer: String,
}

/// Short conversation window supplied with a question
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    /// Patient the conversation is about, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,
    /// Oldest first
    #[serde(default)]
    pub turns: Vec<Turn>,
}

impl ConversationContext {
    pub fn for_patient(patient_id: impl Into<String>) -> Self {
        Self {
            patient_id: Some(patient_id.into()),
            turns: Vec::new(),
        }
    }

    pub fn push_turn(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        self.turns.push(Turn {
            question: question.into(),
            answer: answer.into(),
        });
    }

    /// The most recent `window` turns, newest first
    pub fn recent(&self, window: usize) -> impl Iterator<Item = &Turn> {
        self.turns.iter().rev().take(window)
    }
}
