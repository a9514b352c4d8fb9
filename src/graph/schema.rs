//! Schema context: the classes, class hierarchy and property signatures
//! surrounding a set of entities.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::QueryError;

use super::executor::QueryExecutor;
use super::query::{Filter, Pattern, Query, Term};
use super::{Entity, entity_from_row, label_pattern, vocab};

/// A declared domain or range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "classes", rename_all = "lowercase")]
pub enum Bound {
    /// No declaration in the store.
    Unknown,
    Declared(BTreeSet<Entity>),
}

impl Bound {
    fn from_set(set: BTreeSet<Entity>) -> Self {
        if set.is_empty() {
            Self::Unknown
        } else {
            Self::Declared(set)
        }
    }
}

impl std::fmt::Display for Bound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Declared(classes) => {
                let names: Vec<&str> = classes.iter().map(Entity::display_label).collect();
                write!(f, "{}", names.join(" | "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySchema {
    pub property: Entity,
    pub domain: Bound,
    pub range: Bound,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaContext {
    pub classes: BTreeSet<Entity>,
    /// `(subclass, superclass)` pairs.
    pub class_hierarchy: BTreeSet<(Entity, Entity)>,
    pub properties: Vec<PropertySchema>,
}

impl SchemaContext {
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty() && self.properties.is_empty()
    }

    /// Direct superclasses of `class`.
    pub fn superclasses<'a>(&'a self, class: &'a Entity) -> impl Iterator<Item = &'a Entity> {
        self.class_hierarchy
            .iter()
            .filter(move |(sub, _)| sub == class)
            .map(|(_, sup)| sup)
    }
}

/// A class and how many distinct instances it has.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassSummary {
    pub class: Entity,
    pub instances: usize,
}

/// Builds [`SchemaContext`]s from the store.
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    executor: QueryExecutor,
    hierarchy_depth: usize,
}

impl SchemaBuilder {
    pub fn new(executor: QueryExecutor) -> Self {
        Self {
            executor,
            hierarchy_depth: 3,
        }
    }

    /// How many `rdfs:subClassOf` levels to walk upward.
    pub fn with_hierarchy_depth(mut self, depth: usize) -> Self {
        self.hierarchy_depth = depth;
        self
    }

    pub fn build(&self, entities: &[Entity]) -> Result<SchemaContext, QueryError> {
        if entities.is_empty() {
            return Ok(SchemaContext::default());
        }
        let iris: Vec<String> = entities.iter().map(|e| e.iri.clone()).collect();
        let mut classes = EntitySet::default();

        // Entities that are classes themselves.
        let is_class = Query::select(["e", "eLabel"])
            .distinct()
            .pattern(Pattern::values("e", iris.clone()))
            .pattern(Pattern::Union(vec![
                vec![type_is("e", vocab::RDFS_CLASS)],
                vec![type_is("e", vocab::OWL_CLASS)],
                vec![Pattern::triple(
                    Term::var("e"),
                    Term::iri(vocab::RDFS_SUBCLASS_OF),
                    Term::var("x"),
                )],
                vec![Pattern::triple(
                    Term::var("x"),
                    Term::iri(vocab::RDFS_SUBCLASS_OF),
                    Term::var("e"),
                )],
                vec![Pattern::triple(
                    Term::var("x"),
                    Term::iri(vocab::RDF_TYPE),
                    Term::var("e"),
                )],
            ]))
            .pattern(label_pattern("e"));
        for row in self.executor.execute(&is_class)? {
            if let Some(e) = entity_from_row(&row, "e") {
                classes.add(e);
            }
        }

        // Types of every entity.
        let types = Query::select(["type", "typeLabel"])
            .distinct()
            .pattern(Pattern::values("e", iris.clone()))
            .pattern(Pattern::triple(
                Term::var("e"),
                Term::iri(vocab::RDF_TYPE),
                Term::var("type"),
            ))
            .pattern(label_pattern("type"))
            .filter(Filter::IsIri("type".into()));
        for row in self.executor.execute(&types)? {
            if let Some(t) = entity_from_row(&row, "type") {
                classes.add(t);
            }
        }

        let seeds: Vec<String> = classes.iris();
        let mut hierarchy = BTreeSet::new();

        // Upward walk.
        let mut visited: HashSet<String> = seeds.iter().cloned().collect();
        let mut frontier = seeds.clone();
        for _ in 0..self.hierarchy_depth {
            if frontier.is_empty() {
                break;
            }
            let mut next = Vec::new();
            for (sub, sup) in self.subclass_pairs("sub", frontier)? {
                if visited.insert(sup.iri.clone()) {
                    next.push(sup.iri.clone());
                }
                classes.add(sub.clone());
                classes.add(sup.clone());
                hierarchy.insert((sub, sup));
            }
            frontier = next;
        }

        // Direct subclasses of the seed classes.
        if !seeds.is_empty() {
            for (sub, sup) in self.subclass_pairs("super", seeds)? {
                classes.add(sub.clone());
                classes.add(sup.clone());
                hierarchy.insert((sub, sup));
            }
        }

        let properties = self.properties(&iris, &classes.iris())?;
        let classes = classes.into_set();
        // Labels may have been learned after a pair was inserted.
        let class_hierarchy = hierarchy
            .into_iter()
            .map(|(sub, sup)| (relabel(&classes, sub), relabel(&classes, sup)))
            .collect();

        let context = SchemaContext {
            classes,
            class_hierarchy,
            properties,
        };
        tracing::debug!(
            entities = entities.len(),
            classes = context.classes.len(),
            properties = context.properties.len(),
            "built schema context"
        );
        Ok(context)
    }

    /// `rdfs:subClassOf` pairs with `bound` (`"sub"` or `"super"`) restricted to `iris`.
    fn subclass_pairs(
        &self,
        bound: &str,
        iris: Vec<String>,
    ) -> Result<Vec<(Entity, Entity)>, QueryError> {
        let free = if bound == "sub" { "super" } else { "sub" };
        let query = Query::select(["sub", "subLabel", "super", "superLabel"])
            .distinct()
            .pattern(Pattern::values(bound, iris))
            .pattern(Pattern::triple(
                Term::var("sub"),
                Term::iri(vocab::RDFS_SUBCLASS_OF),
                Term::var("super"),
            ))
            .pattern(label_pattern("sub"))
            .pattern(label_pattern("super"))
            .filter(Filter::IsIri(free.into()));
        Ok(self
            .executor
            .execute(&query)?
            .iter()
            .filter_map(|row| Some((entity_from_row(row, "sub")?, entity_from_row(row, "super")?)))
            .filter(|(sub, sup)| sub != sup)
            .collect())
    }

    fn properties(
        &self,
        entity_iris: &[String],
        class_iris: &[String],
    ) -> Result<Vec<PropertySchema>, QueryError> {
        let mut props = EntitySet::default();

        let used = Query::select(["p", "pLabel"])
            .distinct()
            .pattern(Pattern::values("e", entity_iris.iter().cloned()))
            .pattern(Pattern::Union(vec![
                vec![Pattern::triple(Term::var("e"), Term::var("p"), Term::var("o"))],
                vec![Pattern::triple(Term::var("s"), Term::var("p"), Term::var("e"))],
            ]))
            .pattern(label_pattern("p"));
        for row in self.executor.execute(&used)? {
            if let Some(p) = entity_from_row(&row, "p") {
                props.add(p);
            }
        }

        if !class_iris.is_empty() {
            let declared = Query::select(["p", "pLabel"])
                .distinct()
                .pattern(Pattern::values("c", class_iris.iter().cloned()))
                .pattern(Pattern::Union(vec![
                    vec![Pattern::triple(
                        Term::var("p"),
                        Term::iri(vocab::RDFS_DOMAIN),
                        Term::var("c"),
                    )],
                    vec![Pattern::triple(
                        Term::var("p"),
                        Term::iri(vocab::RDFS_RANGE),
                        Term::var("c"),
                    )],
                ]))
                .pattern(label_pattern("p"));
            for row in self.executor.execute(&declared)? {
                if let Some(p) = entity_from_row(&row, "p") {
                    props.add(p);
                }
            }
        }

        if props.is_empty() {
            return Ok(Vec::new());
        }
        let prop_iris = props.iris();
        let domains = self.bounds(&prop_iris, vocab::RDFS_DOMAIN)?;
        let ranges = self.bounds(&prop_iris, vocab::RDFS_RANGE)?;

        Ok(props
            .into_ordered()
            .into_iter()
            .map(|property| PropertySchema {
                domain: Bound::from_set(domains.get(&property.iri).cloned().unwrap_or_default()),
                range: Bound::from_set(ranges.get(&property.iri).cloned().unwrap_or_default()),
                property,
            })
            .collect())
    }

    fn bounds(
        &self,
        prop_iris: &[String],
        predicate: &str,
    ) -> Result<BTreeMap<String, BTreeSet<Entity>>, QueryError> {
        let query = Query::select(["p", "c", "cLabel"])
            .distinct()
            .pattern(Pattern::values("p", prop_iris.iter().cloned()))
            .pattern(Pattern::triple(
                Term::var("p"),
                Term::iri(predicate),
                Term::var("c"),
            ))
            .pattern(label_pattern("c"))
            .filter(Filter::IsIri("c".into()));
        let mut out: BTreeMap<String, BTreeSet<Entity>> = BTreeMap::new();
        for row in self.executor.execute(&query)? {
            if let (Some(p), Some(c)) = (row.iri("p"), entity_from_row(&row, "c")) {
                out.entry(p.to_string()).or_default().insert(c);
            }
        }
        Ok(out)
    }

    /// Classes with their distinct instance counts, most populated first.
    pub fn summary(&self, limit: usize) -> Result<Vec<ClassSummary>, QueryError> {
        let query = Query::select(["class"])
            .count_distinct("instance", "count")
            .pattern(Pattern::triple(
                Term::var("instance"),
                Term::iri(vocab::RDF_TYPE),
                Term::var("class"),
            ))
            .filter(Filter::IsIri("class".into()))
            .group_by("class")
            .order_by_desc("count")
            .order_by_asc("class")
            .limit(limit);
        let mut summary: Vec<ClassSummary> = self
            .executor
            .execute(&query)?
            .iter()
            .filter_map(|row| {
                Some(ClassSummary {
                    class: Entity::new(row.iri("class")?),
                    instances: row.text("count")?.parse().ok()?,
                })
            })
            .collect();

        if !summary.is_empty() {
            let labels = Query::select(["c", "cLabel"])
                .pattern(Pattern::values(
                    "c",
                    summary.iter().map(|s| s.class.iri.clone()),
                ))
                .pattern(Pattern::triple(
                    Term::var("c"),
                    Term::iri(vocab::RDFS_LABEL),
                    Term::var("cLabel"),
                ));
            let rows = self.executor.execute(&labels)?;
            for entry in &mut summary {
                if let Some(label) = rows
                    .iter()
                    .find(|r| r.iri("c") == Some(entry.class.iri.as_str()))
                    .and_then(|r| r.text("cLabel"))
                {
                    entry.class.label = Some(label.to_string());
                }
            }
        }
        Ok(summary)
    }
}

fn type_is(var: &str, class: &str) -> Pattern {
    Pattern::triple(Term::var(var), Term::iri(vocab::RDF_TYPE), Term::iri(class))
}

fn relabel(classes: &BTreeSet<Entity>, entity: Entity) -> Entity {
    classes.get(&entity).cloned().unwrap_or(entity)
}

/// Insertion-ordered entity set that fills in labels as they are learned.
#[derive(Default)]
struct EntitySet {
    order: Vec<Entity>,
    index: std::collections::HashMap<String, usize>,
}

impl EntitySet {
    fn add(&mut self, entity: Entity) {
        match self.index.get(&entity.iri) {
            Some(&i) => self.order[i].merge_label(&entity),
            None => {
                self.index.insert(entity.iri.clone(), self.order.len());
                self.order.push(entity);
            }
        }
    }

    fn iris(&self) -> Vec<String> {
        self.order.iter().map(|e| e.iri.clone()).collect()
    }

    fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn into_ordered(self) -> Vec<Entity> {
        self.order
    }

    fn into_set(self) -> BTreeSet<Entity> {
        self.order.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::graph::sparql::OxigraphStore;

    const ONTOLOGY: &str = r#"
        @prefix ex: <http://ex.org/> .
        @prefix rdf: <http://www.w3.org/1999/02/22-rdf-syntax-ns#> .
        @prefix rdfs: <http://www.w3.org/2000/01/rdf-schema#> .
        @prefix owl: <http://www.w3.org/2002/07/owl#> .

        ex:Thing a owl:Class .
        ex:Agent a owl:Class ; rdfs:subClassOf ex:Thing .
        ex:Person a owl:Class ; rdfs:subClassOf ex:Agent ; rdfs:label "Person" .
        ex:Student a owl:Class ; rdfs:subClassOf ex:Person .

        ex:knows rdfs:domain ex:Person ; rdfs:range ex:Person .
        ex:age rdfs:domain ex:Person .

        ex:ada a ex:Person ; ex:knows ex:bob ; ex:nickname "Countess" .
        ex:bob a ex:Person .
        ex:carl a ex:Student .
    "#;

    fn builder() -> SchemaBuilder {
        let store = OxigraphStore::in_memory().unwrap();
        store.load_turtle(ONTOLOGY).unwrap();
        SchemaBuilder::new(QueryExecutor::new(Arc::new(store)))
    }

    fn e(name: &str) -> Entity {
        Entity::new(format!("http://ex.org/{name}"))
    }

    #[test]
    fn empty_input_gives_empty_context() {
        assert!(builder().build(&[]).unwrap().is_empty());
    }

    #[test]
    fn types_and_hierarchy() {
        let ctx = builder().build(&[e("ada")]).unwrap();
        assert!(ctx.classes.contains(&e("Person")));
        assert!(ctx.classes.contains(&e("Agent")));
        assert!(ctx.classes.contains(&e("Thing")));
        assert!(ctx.class_hierarchy.contains(&(e("Person"), e("Agent"))));
        assert!(ctx.class_hierarchy.contains(&(e("Agent"), e("Thing"))));
        // direct subclass of a seed class
        assert!(ctx.class_hierarchy.contains(&(e("Student"), e("Person"))));
        let person = ctx.classes.get(&e("Person")).unwrap();
        assert_eq!(person.label.as_deref(), Some("Person"));
    }

    #[test]
    fn hierarchy_depth_limits_upward_walk() {
        let ctx = builder()
            .with_hierarchy_depth(1)
            .build(&[e("carl")])
            .unwrap();
        assert!(ctx.class_hierarchy.contains(&(e("Student"), e("Person"))));
        assert!(!ctx.class_hierarchy.contains(&(e("Agent"), e("Thing"))));
    }

    #[test]
    fn property_bounds() {
        let ctx = builder().build(&[e("ada")]).unwrap();
        let knows = ctx
            .properties
            .iter()
            .find(|p| p.property == e("knows"))
            .unwrap();
        assert!(matches!(&knows.domain, Bound::Declared(s) if s.contains(&e("Person"))));
        assert!(matches!(&knows.range, Bound::Declared(s) if s.contains(&e("Person"))));

        let age = ctx.properties.iter().find(|p| p.property == e("age")).unwrap();
        assert_eq!(age.range, Bound::Unknown);

        let nickname = ctx
            .properties
            .iter()
            .find(|p| p.property == e("nickname"))
            .unwrap();
        assert_eq!(nickname.domain, Bound::Unknown);
    }

    #[test]
    fn summary_orders_by_instance_count() {
        let summary = builder().summary(10).unwrap();
        let owl_class = summary
            .iter()
            .position(|s| s.class.iri == vocab::OWL_CLASS)
            .unwrap();
        let person = summary.iter().position(|s| s.class == e("Person")).unwrap();
        assert_eq!(summary[owl_class].instances, 4);
        assert_eq!(summary[person].instances, 2);
        assert!(owl_class < person);
        assert_eq!(summary[person].class.label.as_deref(), Some("Person"));
    }
}
