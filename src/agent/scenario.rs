//! Question classification into a closed set of scenarios.
//!
//! Regex-based, no model involved. Patterns are tried from the most specific
//! signal to the least; anything ambiguous falls through to
//! [`Scenario::ConceptExploration`], the most conservative mode.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::concept::normalize;

/// What kind of graph work a question asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Scenario {
    /// "What is X?" / "Tell me about X": resolve and describe one concept.
    ConceptExploration { focus: String },
    /// "How is X related to Y?": search for connecting paths.
    PathFinding { source: String, target: String },
    /// "What does wikidata say about X?": link X with a registered endpoint.
    Federation { focus: String, remote: String },
    /// "Does X treat Y?": validate an assertion.
    Validation { claim: String },
}

impl std::fmt::Display for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConceptExploration { focus } => write!(f, "concept exploration of \"{focus}\""),
            Self::PathFinding { source, target } => {
                write!(f, "path finding from \"{source}\" to \"{target}\"")
            }
            Self::Federation { focus, remote } => {
                write!(f, "federation of \"{focus}\" with {remote}")
            }
            Self::Validation { claim } => write!(f, "validation of \"{claim}\""),
        }
    }
}

// ── Regex patterns ──────────────────────────────────────────────────────

/// "path/connection/relationship between X and Y", "link from X to Y"
static RE_BETWEEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:paths?|connections?|relationships?|relations?|links?)\s+(?:between|from)\s+(.+?)\s+(?:and|to)\s+(.+)$",
    )
    .unwrap()
});

/// "how is X related to Y", "how are X and Y connected"
static RE_HOW_RELATED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^how\s+(?:is|are|was|were|do|does)\s+(.+?)\s+(?:related|connected|linked)\s+(?:to|with)\s+(.+)$",
    )
    .unwrap()
});

static RE_HOW_AND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^how\s+(?:are|were)\s+(.+?)\s+and\s+(.+?)\s+(?:related|connected|linked)$").unwrap()
});

/// "X connected to Y" anywhere; rejected when X is only question words.
static RE_CONNECTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:is|are|was|were)?\s*(.+?)\s+(?:connected|related|linked)\s+(?:to|with)\s+(.+)$")
        .unwrap()
});

static RE_FEDERATION_CUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:federat\w*|external|remote|other\s+(?:graphs?|sources?|stores?)|across\s+(?:graphs|sources|endpoints|stores))\b",
    )
    .unwrap()
});

static RE_VALIDATION_LEAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:is\s+it\s+true\s+that|(?:verify|validate|prove|check)(?:\s+that)?|is|are|does|do|did|can|was|were)\s+(.+)$",
    )
    .unwrap()
});

static RE_EXPLORATION_LEAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:what\s+do\s+you\s+know\s+about|tell\s+me\s+about|what\s+(?:is|are|was|were)|who\s+(?:is|are|was|were)|describe|explain|show(?:\s+me)?)\s+(.+)$",
    )
    .unwrap()
});

/// Words stripped around an endpoint mention when extracting the focus.
static RE_ENDPOINT_FILLER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:what\s+does|what\s+do|say|says|about|according\s+to|in|from|on|with|using|via|federat\w*|external|remote|across|other|graphs?|sources?|stores?|endpoints?|link|query)\b",
    )
    .unwrap()
});

/// Classify `question`. `endpoints` are the registered federation endpoint names.
pub fn classify(question: &str, endpoints: &[String]) -> Scenario {
    let text = strip_question_suffix(question);
    let scenario = classify_stripped(text, endpoints);
    tracing::debug!(question = text, scenario = %scenario, "classified question");
    scenario
}

fn classify_stripped(text: &str, endpoints: &[String]) -> Scenario {
    if let Some((source, target)) = path_endpoints(text) {
        return Scenario::PathFinding { source, target };
    }

    if let Some(remote) = mentioned_endpoint(text, endpoints) {
        let focus = federation_focus(text, &remote);
        if !normalize(&focus).is_empty() {
            return Scenario::Federation { focus, remote };
        }
    }

    if let Some(caps) = RE_VALIDATION_LEAD.captures(text) {
        let claim = caps[1].trim();
        if is_assertion(claim) {
            return Scenario::Validation {
                claim: claim.to_string(),
            };
        }
    }

    Scenario::ConceptExploration {
        focus: exploration_focus(text),
    }
}

/// Words that open a question about unknown entities rather than name one.
const INTERROGATIVES: &[&str] = &["which", "what", "who", "whom", "whose", "where", "when"];

/// A claim worth validating: at least three words, two of them content words,
/// and not an existential "there is/are ..." question.
fn is_assertion(claim: &str) -> bool {
    let first = claim.split_whitespace().next().unwrap_or_default();
    if first.eq_ignore_ascii_case("there") {
        return false;
    }
    claim.split_whitespace().count() >= 3 && normalize(claim).split_whitespace().count() >= 2
}

/// A path endpoint names something: it keeps a content word and does not
/// start with an interrogative.
fn is_endpoint(fragment: &str) -> bool {
    let first = fragment.split_whitespace().next().unwrap_or_default().to_lowercase();
    !INTERROGATIVES.contains(&first.as_str()) && !normalize(fragment).is_empty()
}

fn path_endpoints(text: &str) -> Option<(String, String)> {
    for re in [&*RE_BETWEEN, &*RE_HOW_RELATED, &*RE_HOW_AND, &*RE_CONNECTED] {
        if let Some(caps) = re.captures(text) {
            let source = caps[1].trim();
            let target = caps[2].trim();
            if is_endpoint(source) && is_endpoint(target) {
                return Some((source.to_string(), target.to_string()));
            }
        }
    }
    None
}

/// An endpoint named in the text, or the only endpoint when the text asks for
/// federation without naming one.
fn mentioned_endpoint(text: &str, endpoints: &[String]) -> Option<String> {
    let lower = text.to_lowercase();
    let named = endpoints.iter().find(|name| {
        lower
            .split(|c: char| !c.is_alphanumeric() && c != '_' && c != '-')
            .any(|word| word == name.to_lowercase())
    });
    if let Some(name) = named {
        return Some(name.clone());
    }
    if endpoints.len() == 1 && RE_FEDERATION_CUE.is_match(text) {
        return Some(endpoints[0].clone());
    }
    None
}

fn federation_focus(text: &str, remote: &str) -> String {
    let without_remote: String = text
        .split_whitespace()
        .filter(|w| !w.trim_matches(|c: char| !c.is_alphanumeric()).eq_ignore_ascii_case(remote))
        .collect::<Vec<_>>()
        .join(" ");
    let stripped = RE_ENDPOINT_FILLER.replace_all(&without_remote, " ");
    exploration_focus(&stripped.split_whitespace().collect::<Vec<_>>().join(" "))
}

fn exploration_focus(text: &str) -> String {
    match RE_EXPLORATION_LEAD.captures(text) {
        Some(caps) => caps[1].trim().to_string(),
        None => text.trim().to_string(),
    }
}

fn strip_question_suffix(s: &str) -> &str {
    s.trim().trim_end_matches(['?', '.', '!']).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints() -> Vec<String> {
        vec!["wikidata".to_string()]
    }

    #[test]
    fn what_is_explores() {
        assert_eq!(
            classify("What is Paris?", &endpoints()),
            Scenario::ConceptExploration {
                focus: "Paris".into()
            }
        );
        assert_eq!(
            classify("tell me about the Eiffel Tower", &[]),
            Scenario::ConceptExploration {
                focus: "the Eiffel Tower".into()
            }
        );
    }

    #[test]
    fn relationship_questions_find_paths() {
        assert_eq!(
            classify("How is DrugX related to DiseaseY?", &[]),
            Scenario::PathFinding {
                source: "DrugX".into(),
                target: "DiseaseY".into()
            }
        );
        assert_eq!(
            classify("What is the connection between Paris and Berlin?", &[]),
            Scenario::PathFinding {
                source: "Paris".into(),
                target: "Berlin".into()
            }
        );
        assert_eq!(
            classify("How are aspirin and headache connected?", &[]),
            Scenario::PathFinding {
                source: "aspirin".into(),
                target: "headache".into()
            }
        );
    }

    #[test]
    fn question_words_alone_are_not_a_path_source() {
        assert_eq!(
            classify("What is connected to Paris?", &[]),
            Scenario::ConceptExploration {
                focus: "connected to Paris".into()
            }
        );
    }

    #[test]
    fn named_endpoint_federates() {
        assert_eq!(
            classify("What does wikidata say about Paris?", &endpoints()),
            Scenario::Federation {
                focus: "Paris".into(),
                remote: "wikidata".into()
            }
        );
    }

    #[test]
    fn federation_cue_needs_a_single_endpoint() {
        assert_eq!(
            classify("Find Paris in external sources", &endpoints()),
            Scenario::Federation {
                focus: "Find Paris".into(),
                remote: "wikidata".into()
            }
        );
        let two = vec!["wikidata".to_string(), "dbpedia".to_string()];
        assert!(matches!(
            classify("Find Paris in external sources", &two),
            Scenario::ConceptExploration { .. }
        ));
        assert!(matches!(
            classify("Find Paris in external sources", &[]),
            Scenario::ConceptExploration { .. }
        ));
    }

    #[test]
    fn yes_no_claims_validate() {
        assert_eq!(
            classify("Does DrugX treat DiseaseY?", &[]),
            Scenario::Validation {
                claim: "DrugX treat DiseaseY".into()
            }
        );
        assert_eq!(
            classify("Is it true that Paris is the capital of France?", &[]),
            Scenario::Validation {
                claim: "Paris is the capital of France".into()
            }
        );
    }

    #[test]
    fn existential_questions_explore() {
        assert!(matches!(
            classify("Are there drugs for cancer?", &[]),
            Scenario::ConceptExploration { .. }
        ));
        assert!(matches!(
            classify("Is there a cure for the flu?", &[]),
            Scenario::ConceptExploration { .. }
        ));
    }

    #[test]
    fn claims_need_two_content_words() {
        assert!(matches!(
            classify("Is the one for me?", &[]),
            Scenario::ConceptExploration { .. }
        ));
        assert!(matches!(
            classify("Does aspirin inhibit COX1?", &[]),
            Scenario::Validation { .. }
        ));
    }

    #[test]
    fn interrogative_source_is_not_a_path_endpoint() {
        assert!(matches!(
            classify("Which drugs are related to aspirin?", &[]),
            Scenario::ConceptExploration { .. }
        ));
        assert!(matches!(
            classify("Who is connected to Paris?", &[]),
            Scenario::ConceptExploration { .. }
        ));
        assert_eq!(
            classify("Is aspirin related to headache?", &[]),
            Scenario::PathFinding {
                source: "aspirin".into(),
                target: "headache".into()
            }
        );
    }

    #[test]
    fn short_yes_no_questions_fall_back_to_exploration() {
        assert_eq!(
            classify("Is Paris?", &[]),
            Scenario::ConceptExploration {
                focus: "Is Paris".into()
            }
        );
    }
}
