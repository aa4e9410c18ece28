//! Rule-driven classification into (route tag, priority, confidence).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::RoutingRules;
use crate::pipeline::fields::MetadataRecord;

const SEED_CONFIDENCE: f32 = 0.2;
const PRIORITY_MATCH_CONFIDENCE: f32 = 0.6;
const ROUTE_MATCH_CONFIDENCE: f32 = 0.8;

/// Handling priority. P1 is the most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    P1,
    P2,
    P3,
}

impl Priority {
    pub const LOWEST: Priority = Priority::P3;

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::P1 => "P1",
            Self::P2 => "P2",
            Self::P3 => "P3",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub route_tag: String,
    pub priority: Priority,
    pub confidence: f32,
}

/// Applies one fixed set of routing rules. Stateless between calls.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: RoutingRules,
}

impl Classifier {
    pub fn new(rules: &RoutingRules) -> Self {
        Self {
            rules: rules.clone(),
        }
    }

    pub fn rules(&self) -> &RoutingRules {
        &self.rules
    }

    /// Classify `text`, optionally aided by extracted fields.
    ///
    /// Each step can only raise the confidence. For both priority lists and
    /// route rules the last matching entry in configured order wins.
    pub fn classify(&self, text: &str, metadata: Option<&MetadataRecord>) -> Classification {
        let lower = text.to_lowercase();
        let mut route_tag = self.rules.fallback_tag.clone();
        let mut priority = Priority::LOWEST;
        let mut confidence = SEED_CONFIDENCE;

        if let Some(record) = metadata {
            if let Some(tag) = self
                .rules
                .document_type_routes
                .get(&record.document_type.value)
            {
                route_tag = tag.clone();
                confidence = confidence.max(record.document_type.confidence);
            }
        }

        for (level, keywords) in &self.rules.priorities {
            if contains_any(&lower, keywords) {
                priority = *level;
                confidence = confidence.max(PRIORITY_MATCH_CONFIDENCE);
            }
        }

        for rule in &self.rules.keyword_routes {
            if contains_any(&lower, &rule.keywords) {
                route_tag = rule.tag.clone();
                confidence = confidence.max(ROUTE_MATCH_CONFIDENCE);
            }
        }

        tracing::debug!(
            route_tag = %route_tag,
            priority = %priority,
            confidence,
            "Classified document"
        );

        Classification {
            route_tag,
            priority,
            confidence,
        }
    }
}

/// Case-insensitive substring test. Empty keywords never match.
fn contains_any(lower_text: &str, keywords: &[String]) -> bool {
    keywords
        .iter()
        .filter(|k| !k.trim().is_empty())
        .any(|k| lower_text.contains(&k.to_lowercase()))
}
