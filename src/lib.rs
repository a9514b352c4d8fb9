// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # grape-reason
//!
//! Question answering over RDF knowledge graphs with a traceable reasoning path.
//!
//! ## Architecture
//!
//! - **Graph access** (`graph`): structured queries, oxigraph and SPARQL stores,
//!   a retrying executor, neighborhoods, paths and schema
//! - **Grounding** (`concept`, `semantic`): fragment → entity resolution, exact,
//!   lexical and embedding-based
//! - **Exemplars** (`exemplar`): stored question/query pairs retrieved by similarity
//! - **Federation** (`federation`): named endpoints, alignments and joins across graphs
//! - **Proof** (`proof`): assertion validation by direct triple or connecting path
//! - **Narration** (`narrate`): every operation recorded into a [`narrate::ReasoningPath`]
//! - **Agent** (`agent`): scenario classification and the request state machine
//!
//! ## Library usage
//!
//! ```no_run
//! use grape_reason::engine::{Engine, EngineConfig};
//!
//! let engine = Engine::new(EngineConfig::default()).unwrap();
//! engine
//!     .load_turtle(r#"<http://example.org/Paris> <http://www.w3.org/2000/01/rdf-schema#label> "Paris" ."#)
//!     .unwrap();
//! engine.rebuild_semantic().unwrap();
//! let answer = engine.agent().answer("What is Paris?", None);
//! println!("{}", answer.answer_text);
//! ```

pub mod agent;
pub mod concept;
pub mod config;
pub mod engine;
pub mod error;
pub mod exemplar;
pub mod federation;
pub mod graph;
pub mod narrate;
pub mod proof;
pub mod semantic;
