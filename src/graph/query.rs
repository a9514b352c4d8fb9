//! Structured graph queries and their tabular results.
//!
//! The core never concatenates SPARQL by hand: components build a [`Query`]
//! from patterns, filters and a limit, and stores render it with
//! [`Query::to_sparql`]. IRIs are always written in full, so no prefix
//! declarations are emitted.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

/// A term in a triple pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Term {
    /// A variable, stored without the leading `?`.
    Var(String),
    /// An absolute IRI.
    Iri(String),
    /// A plain or language-tagged literal.
    Literal {
        value: String,
        language: Option<String>,
    },
}

impl Term {
    pub fn var(name: impl Into<String>) -> Self {
        Self::Var(name.into().trim_start_matches('?').to_string())
    }

    pub fn iri(iri: impl Into<String>) -> Self {
        Self::Iri(iri.into())
    }

    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal {
            value: value.into(),
            language: None,
        }
    }

    fn render(&self, out: &mut String) {
        match self {
            Term::Var(name) => {
                let _ = write!(out, "?{name}");
            }
            Term::Iri(iri) => {
                let _ = write!(out, "<{}>", escape_iri(iri));
            }
            Term::Literal { value, language } => {
                let _ = write!(out, "\"{}\"", escape_literal(value));
                if let Some(lang) = language {
                    let _ = write!(out, "@{lang}");
                }
            }
        }
    }
}

/// A graph pattern inside the `WHERE` clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Pattern {
    /// `subject predicate object .`
    Triple {
        subject: Term,
        predicate: Term,
        object: Term,
    },
    /// `{ a } UNION { b } ...`
    Union(Vec<Vec<Pattern>>),
    /// `OPTIONAL { ... }`
    Optional(Vec<Pattern>),
    /// `VALUES ?var { <a> <b> }`
    Values { var: String, iris: Vec<String> },
    /// Pattern text supplied by a caller (exemplars, federation requests).
    /// The store validates it; a syntax error surfaces as `QueryMalformed`.
    Raw(String),
}

impl Pattern {
    pub fn triple(subject: Term, predicate: Term, object: Term) -> Self {
        Self::Triple {
            subject,
            predicate,
            object,
        }
    }

    pub fn values(var: impl Into<String>, iris: impl IntoIterator<Item = String>) -> Self {
        Self::Values {
            var: var.into().trim_start_matches('?').to_string(),
            iris: iris.into_iter().collect(),
        }
    }

    fn render(&self, out: &mut String, indent: usize) {
        let pad = "  ".repeat(indent);
        match self {
            Pattern::Triple {
                subject,
                predicate,
                object,
            } => {
                out.push_str(&pad);
                subject.render(out);
                out.push(' ');
                predicate.render(out);
                out.push(' ');
                object.render(out);
                out.push_str(" .\n");
            }
            Pattern::Union(branches) => {
                for (i, branch) in branches.iter().enumerate() {
                    out.push_str(&pad);
                    if i > 0 {
                        out.push_str("UNION ");
                    }
                    out.push_str("{\n");
                    for p in branch {
                        p.render(out, indent + 1);
                    }
                    out.push_str(&pad);
                    out.push_str("}\n");
                }
            }
            Pattern::Optional(inner) => {
                out.push_str(&pad);
                out.push_str("OPTIONAL {\n");
                for p in inner {
                    p.render(out, indent + 1);
                }
                out.push_str(&pad);
                out.push_str("}\n");
            }
            Pattern::Values { var, iris } => {
                let _ = write!(out, "{pad}VALUES ?{var} {{");
                for iri in iris {
                    let _ = write!(out, " <{}>", escape_iri(iri));
                }
                out.push_str(" }\n");
            }
            Pattern::Raw(text) => {
                for line in text.trim().lines() {
                    let _ = writeln!(out, "{pad}{}", line.trim());
                }
            }
        }
    }
}

/// A `FILTER` constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    /// `isIRI(?var)`
    IsIri(String),
    /// Case-insensitive label equality on the string value of `?var`.
    LabelEquals { var: String, text: String },
    /// Case-insensitive substring match on the string value of `?var`.
    LabelContains { var: String, text: String },
    /// `?var = <iri>`
    IriEquals { var: String, iri: String },
}

impl Filter {
    fn render(&self, out: &mut String) {
        match self {
            Filter::IsIri(var) => {
                let _ = writeln!(out, "  FILTER(isIRI(?{var}))");
            }
            Filter::LabelEquals { var, text } => {
                let _ = writeln!(
                    out,
                    "  FILTER(LCASE(STR(?{var})) = \"{}\")",
                    escape_literal(&text.to_lowercase())
                );
            }
            Filter::LabelContains { var, text } => {
                let _ = writeln!(
                    out,
                    "  FILTER(CONTAINS(LCASE(STR(?{var})), \"{}\"))",
                    escape_literal(&text.to_lowercase())
                );
            }
            Filter::IriEquals { var, iri } => {
                let _ = writeln!(out, "  FILTER(?{var} = <{}>)", escape_iri(iri));
            }
        }
    }
}

/// A projected expression in a SELECT clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Projection {
    Var(String),
    /// `(COUNT(DISTINCT ?var) AS ?alias)`
    CountDistinct { var: String, alias: String },
}

/// The query form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryForm {
    Select {
        projection: Vec<Projection>,
        distinct: bool,
    },
    Ask,
}

/// A structured request: form, patterns, filters and a result-size limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub form: QueryForm,
    pub patterns: Vec<Pattern>,
    pub filters: Vec<Filter>,
    pub group_by: Vec<String>,
    /// `(variable, descending)`
    pub order_by: Vec<(String, bool)>,
    pub limit: Option<usize>,
}

impl Query {
    /// A `SELECT` over the given variables (names with or without `?`).
    pub fn select<I, S>(vars: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            form: QueryForm::Select {
                projection: vars
                    .into_iter()
                    .map(|v| Projection::Var(v.into().trim_start_matches('?').to_string()))
                    .collect(),
                distinct: false,
            },
            patterns: Vec::new(),
            filters: Vec::new(),
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    /// `SELECT *`
    pub fn select_all() -> Self {
        Self::select(Vec::<String>::new())
    }

    /// An `ASK` query.
    pub fn ask() -> Self {
        Self {
            form: QueryForm::Ask,
            patterns: Vec::new(),
            filters: Vec::new(),
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn distinct(mut self) -> Self {
        if let QueryForm::Select { distinct, .. } = &mut self.form {
            *distinct = true;
        }
        self
    }

    pub fn count_distinct(mut self, var: &str, alias: &str) -> Self {
        if let QueryForm::Select { projection, .. } = &mut self.form {
            projection.push(Projection::CountDistinct {
                var: var.trim_start_matches('?').to_string(),
                alias: alias.trim_start_matches('?').to_string(),
            });
        }
        self
    }

    pub fn pattern(mut self, pattern: Pattern) -> Self {
        self.patterns.push(pattern);
        self
    }

    pub fn patterns(mut self, patterns: impl IntoIterator<Item = Pattern>) -> Self {
        self.patterns.extend(patterns);
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn group_by(mut self, var: &str) -> Self {
        self.group_by.push(var.trim_start_matches('?').to_string());
        self
    }

    pub fn order_by_desc(mut self, var: &str) -> Self {
        self.order_by
            .push((var.trim_start_matches('?').to_string(), true));
        self
    }

    pub fn order_by_asc(mut self, var: &str) -> Self {
        self.order_by
            .push((var.trim_start_matches('?').to_string(), false));
        self
    }

    /// Cap the number of rows. `usize::MAX` means no LIMIT clause.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = (limit != usize::MAX).then_some(limit);
        self
    }

    pub fn is_ask(&self) -> bool {
        matches!(self.form, QueryForm::Ask)
    }

    /// Render as SPARQL 1.1 query text.
    pub fn to_sparql(&self) -> String {
        let mut out = String::new();
        match &self.form {
            QueryForm::Ask => out.push_str("ASK {\n"),
            QueryForm::Select {
                projection,
                distinct,
            } => {
                out.push_str("SELECT ");
                if *distinct {
                    out.push_str("DISTINCT ");
                }
                if projection.is_empty() {
                    out.push('*');
                } else {
                    let rendered: Vec<String> = projection
                        .iter()
                        .map(|p| match p {
                            Projection::Var(v) => format!("?{v}"),
                            Projection::CountDistinct { var, alias } => {
                                format!("(COUNT(DISTINCT ?{var}) AS ?{alias})")
                            }
                        })
                        .collect();
                    out.push_str(&rendered.join(" "));
                }
                out.push_str(" WHERE {\n");
            }
        }
        for pattern in &self.patterns {
            pattern.render(&mut out, 1);
        }
        for filter in &self.filters {
            filter.render(&mut out);
        }
        out.push('}');
        if !self.group_by.is_empty() {
            let vars: Vec<String> = self.group_by.iter().map(|v| format!("?{v}")).collect();
            let _ = write!(out, "\nGROUP BY {}", vars.join(" "));
        }
        if !self.order_by.is_empty() {
            let keys: Vec<String> = self
                .order_by
                .iter()
                .map(|(v, desc)| {
                    if *desc {
                        format!("DESC(?{v})")
                    } else {
                        format!("?{v}")
                    }
                })
                .collect();
            let _ = write!(out, "\nORDER BY {}", keys.join(" "));
        }
        if let Some(limit) = self.limit {
            let _ = write!(out, "\nLIMIT {limit}");
        }
        out
    }
}

impl std::fmt::Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_sparql())
    }
}

/// Escape a string for use inside a double-quoted SPARQL literal.
pub fn escape_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out
}

/// Percent-encode the characters that may not appear inside `<...>`.
pub fn escape_iri(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' | '>' | '"' | '{' | '}' | '|' | '^' | '`' | '\\' | ' ' => {
                let _ = write!(out, "%{:02X}", c as u32);
            }
            c if c.is_control() => {
                let _ = write!(out, "%{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// A bound value in a result row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Value {
    Iri {
        value: String,
    },
    Literal {
        value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        datatype: Option<String>,
    },
    Blank {
        value: String,
    },
}

impl Value {
    pub fn iri(value: impl Into<String>) -> Self {
        Self::Iri {
            value: value.into(),
        }
    }

    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal {
            value: value.into(),
            language: None,
            datatype: None,
        }
    }

    /// The IRI, if this value is one.
    pub fn as_iri(&self) -> Option<&str> {
        match self {
            Value::Iri { value } => Some(value),
            _ => None,
        }
    }

    /// The lexical form of any value.
    pub fn lexical(&self) -> &str {
        match self {
            Value::Iri { value } | Value::Blank { value } | Value::Literal { value, .. } => value,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Iri { value } => write!(f, "<{value}>"),
            Value::Blank { value } => write!(f, "_:{value}"),
            Value::Literal {
                value, language, ..
            } => match language {
                Some(lang) => write!(f, "\"{value}\"@{lang}"),
                None => write!(f, "\"{value}\""),
            },
        }
    }
}

/// One solution: variable name (without `?`) to bound value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(BTreeMap<String, Value>);

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, var: impl Into<String>, value: Value) {
        self.0.insert(var.into(), value);
    }

    pub fn with(mut self, var: impl Into<String>, value: Value) -> Self {
        self.insert(var, value);
        self
    }

    pub fn get(&self, var: &str) -> Option<&Value> {
        self.0.get(var)
    }

    /// The IRI bound to `var`, if any.
    pub fn iri(&self, var: &str) -> Option<&str> {
        self.get(var).and_then(Value::as_iri)
    }

    /// The lexical form bound to `var`, if any.
    pub fn text(&self, var: &str) -> Option<&str> {
        self.get(var).map(Value::lexical)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copy every binding of `other` that this row does not already have.
    pub fn extend_from(&mut self, other: &Row) {
        for (k, v) in other.iter() {
            self.0.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// What a store returns for one query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResults {
    Solutions(Vec<Row>),
    Boolean(bool),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_renders_patterns_filters_and_limit() {
        let q = Query::select(["concept", "?label"])
            .distinct()
            .pattern(Pattern::triple(
                Term::var("concept"),
                Term::iri("http://www.w3.org/2000/01/rdf-schema#label"),
                Term::var("label"),
            ))
            .filter(Filter::LabelEquals {
                var: "label".into(),
                text: "Paris".into(),
            })
            .limit(5);

        let sparql = q.to_sparql();
        assert!(sparql.starts_with("SELECT DISTINCT ?concept ?label WHERE {"));
        assert!(sparql.contains("?concept <http://www.w3.org/2000/01/rdf-schema#label> ?label ."));
        assert!(sparql.contains("FILTER(LCASE(STR(?label)) = \"paris\")"));
        assert!(sparql.ends_with("LIMIT 5"));
    }

    #[test]
    fn unbounded_limit_renders_no_clause() {
        let q = Query::select(["s"])
            .pattern(Pattern::triple(Term::var("s"), Term::var("p"), Term::var("o")))
            .limit(usize::MAX);
        assert!(q.limit.is_none());
        assert!(!q.to_sparql().contains("LIMIT"));
    }

    #[test]
    fn ask_has_no_projection() {
        let q = Query::ask().pattern(Pattern::triple(
            Term::iri("http://ex.org/a"),
            Term::iri("http://ex.org/p"),
            Term::iri("http://ex.org/b"),
        ));
        assert!(q.is_ask());
        assert!(q.to_sparql().starts_with("ASK {"));
    }

    #[test]
    fn union_and_optional_nest() {
        let q = Query::select_all()
            .pattern(Pattern::Union(vec![
                vec![Pattern::Raw("?s ?p ?o".into())],
                vec![Pattern::Raw("?o ?p ?s".into())],
            ]))
            .pattern(Pattern::Optional(vec![Pattern::Raw("?s <http://ex.org/l> ?l".into())]));
        let sparql = q.to_sparql();
        assert!(sparql.contains("SELECT * WHERE"));
        assert!(sparql.contains("UNION {"));
        assert!(sparql.contains("OPTIONAL {"));
    }

    #[test]
    fn literals_and_iris_are_escaped() {
        assert_eq!(escape_literal("say \"hi\"\n"), "say \\\"hi\\\"\\n");
        assert_eq!(escape_iri("http://ex.org/a b>"), "http://ex.org/a%20b%3E");
    }

    #[test]
    fn grouping_and_ordering() {
        let q = Query::select(["class"])
            .count_distinct("instance", "count")
            .group_by("class")
            .order_by_desc("count");
        let sparql = q.to_sparql();
        assert!(sparql.contains("(COUNT(DISTINCT ?instance) AS ?count)"));
        assert!(sparql.contains("GROUP BY ?class"));
        assert!(sparql.contains("ORDER BY DESC(?count)"));
    }

    #[test]
    fn row_accessors() {
        let row = Row::new()
            .with("s", Value::iri("http://ex.org/a"))
            .with("l", Value::literal("A"));
        assert_eq!(row.iri("s"), Some("http://ex.org/a"));
        assert_eq!(row.iri("l"), None);
        assert_eq!(row.text("l"), Some("A"));
    }
}
