//! Knowledge graph access: data model, structured queries, stores and traversals.
//!
//! The core never mutates the graph. It builds [`query::Query`] values, hands them
//! to a [`sparql::GraphStore`] through the [`executor::QueryExecutor`], and turns the
//! resulting rows into [`Entity`] and [`Relation`] snapshots.
//!
//! - **Stores** ([`sparql`]): embedded oxigraph and remote SPARQL endpoints
//! - **Neighborhoods** ([`neighborhood`]): 1-hop relations by direction
//! - **Paths** ([`path`], [`traverse`]): shortest-path search and bounded expansion
//! - **Schema** ([`schema`]): class and property structure around entities

pub mod executor;
pub mod neighborhood;
pub mod path;
pub mod query;
pub mod schema;
pub mod scope;
pub mod sparql;
pub mod traverse;

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use query::{Pattern, Row, Term};

/// Well-known vocabulary IRIs.
pub mod vocab {
    pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
    pub const RDFS_LABEL: &str = "http://www.w3.org/2000/01/rdf-schema#label";
    pub const RDFS_SUBCLASS_OF: &str = "http://www.w3.org/2000/01/rdf-schema#subClassOf";
    pub const RDFS_DOMAIN: &str = "http://www.w3.org/2000/01/rdf-schema#domain";
    pub const RDFS_RANGE: &str = "http://www.w3.org/2000/01/rdf-schema#range";
    pub const RDFS_CLASS: &str = "http://www.w3.org/2000/01/rdf-schema#Class";
    pub const OWL_CLASS: &str = "http://www.w3.org/2002/07/owl#Class";
    pub const OWL_SAME_AS: &str = "http://www.w3.org/2002/07/owl#sameAs";
    pub const SKOS_PREF_LABEL: &str = "http://www.w3.org/2004/02/skos/core#prefLabel";
    pub const SKOS_ALT_LABEL: &str = "http://www.w3.org/2004/02/skos/core#altLabel";
    pub const SKOS_EXACT_MATCH: &str = "http://www.w3.org/2004/02/skos/core#exactMatch";
    pub const SKOS_CLOSE_MATCH: &str = "http://www.w3.org/2004/02/skos/core#closeMatch";
}

/// A graph node identified by its IRI.
///
/// Equality, hashing and ordering use the IRI only; the label is presentation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Global identifier.
    pub iri: String,
    /// Human-readable label, when the store has one.
    pub label: Option<String>,
}

impl Entity {
    /// Create an unlabeled entity.
    pub fn new(iri: impl Into<String>) -> Self {
        Self {
            iri: iri.into(),
            label: None,
        }
    }

    /// Attach a label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// The last path or fragment segment of the IRI.
    pub fn local_name(&self) -> &str {
        self.iri
            .rsplit(['/', '#'])
            .find(|s| !s.is_empty())
            .unwrap_or(&self.iri)
    }

    /// Label if known, otherwise the local name.
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or_else(|| self.local_name())
    }

    /// Keep `self`'s identity but take `other`'s label when `self` has none.
    pub(crate) fn merge_label(&mut self, other: &Entity) {
        if self.label.is_none() {
            self.label = other.label.clone();
        }
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.iri == other.iri
    }
}

impl Eq for Entity {}

impl Hash for Entity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.iri.hash(state);
    }
}

impl PartialOrd for Entity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.iri.cmp(&other.iri)
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_label())
    }
}

/// A directed edge (source, predicate, target) read from the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Relation {
    /// Subject of the triple.
    pub source: Entity,
    /// Predicate of the triple.
    pub predicate: Entity,
    /// Object of the triple.
    pub target: Entity,
}

impl Relation {
    pub fn new(source: Entity, predicate: Entity, target: Entity) -> Self {
        Self {
            source,
            predicate,
            target,
        }
    }

    /// Whether `entity` is the source or the target.
    pub fn touches(&self, entity: &Entity) -> bool {
        self.source == *entity || self.target == *entity
    }

    /// The endpoint opposite `entity`, if the relation touches it.
    pub fn other_end(&self, entity: &Entity) -> Option<&Entity> {
        if self.source == *entity {
            Some(&self.target)
        } else if self.target == *entity {
            Some(&self.source)
        } else {
            None
        }
    }
}

impl std::fmt::Display for Relation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -{}-> {}", self.source, self.predicate, self.target)
    }
}

/// Which edges around an entity to consider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Edges where the entity is the subject.
    Outgoing,
    /// Edges where the entity is the object.
    Incoming,
    /// Both of the above.
    Both,
}

impl Direction {
    pub fn includes_outgoing(self) -> bool {
        matches!(self, Self::Outgoing | Self::Both)
    }

    pub fn includes_incoming(self) -> bool {
        matches!(self, Self::Incoming | Self::Both)
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Outgoing => write!(f, "outgoing"),
            Self::Incoming => write!(f, "incoming"),
            Self::Both => write!(f, "both"),
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "outgoing" | "out" => Ok(Self::Outgoing),
            "incoming" | "in" => Ok(Self::Incoming),
            "both" => Ok(Self::Both),
            other => Err(format!("unknown direction \"{other}\" (outgoing, incoming, both)")),
        }
    }
}

/// `OPTIONAL { ?var rdfs:label ?varLabel }`
pub(crate) fn label_pattern(var: &str) -> Pattern {
    Pattern::Optional(vec![Pattern::triple(
        Term::var(var),
        Term::iri(vocab::RDFS_LABEL),
        Term::var(format!("{var}Label")),
    )])
}

/// The entity bound to `var`, labeled from `{var}Label` when bound.
pub(crate) fn entity_from_row(row: &Row, var: &str) -> Option<Entity> {
    let iri = row.iri(var)?;
    let entity = Entity::new(iri);
    Some(match row.text(&format!("{var}Label")) {
        Some(label) => entity.with_label(label),
        None => entity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_identity_ignores_label() {
        let a = Entity::new("http://ex.org/Paris").with_label("Paris");
        let b = Entity::new("http://ex.org/Paris").with_label("Paname");
        assert_eq!(a, b);

        let mut set = std::collections::HashSet::new();
        set.insert(a);
        assert!(!set.insert(b));
    }

    #[test]
    fn display_label_falls_back_to_local_name() {
        assert_eq!(Entity::new("http://ex.org/people/Ada").display_label(), "Ada");
        assert_eq!(Entity::new("http://ex.org/onto#Person").display_label(), "Person");
        assert_eq!(Entity::new("http://ex.org/x/").display_label(), "x");
    }

    #[test]
    fn relation_other_end() {
        let a = Entity::new("http://ex.org/a");
        let b = Entity::new("http://ex.org/b");
        let p = Entity::new("http://ex.org/p");
        let rel = Relation::new(a.clone(), p, b.clone());
        assert_eq!(rel.other_end(&a), Some(&b));
        assert_eq!(rel.other_end(&b), Some(&a));
        assert!(rel.other_end(&Entity::new("http://ex.org/c")).is_none());
    }

    #[test]
    fn entity_from_row_reads_label_column() {
        let row = Row::new()
            .with("o", query::Value::iri("http://ex.org/b"))
            .with("oLabel", query::Value::literal("Bee"));
        let e = entity_from_row(&row, "o").unwrap();
        assert_eq!(e.label.as_deref(), Some("Bee"));
        assert!(entity_from_row(&row, "oLabel").is_none());
    }

    #[test]
    fn direction_parses() {
        assert_eq!("Both".parse::<Direction>().unwrap(), Direction::Both);
        assert_eq!("out".parse::<Direction>().unwrap(), Direction::Outgoing);
        assert!("sideways".parse::<Direction>().is_err());
    }
}
