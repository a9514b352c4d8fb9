//! grape CLI: question answering over RDF knowledge graphs.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;

use grape_reason::config::GrapeConfig;
use grape_reason::engine::Engine;
use grape_reason::graph::executor::CancelToken;
use grape_reason::graph::{Direction, Entity};
use grape_reason::narrate::ReasoningNarrator;
use grape_reason::proof::{Evidence, ProofPolicy};

#[derive(Parser)]
#[command(name = "grape", version, about = "Reasoning over RDF knowledge graphs")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Embedded store directory (overrides `store.path`).
    #[arg(long, global = true, conflicts_with = "endpoint")]
    store_path: Option<PathBuf>,

    /// Remote SPARQL endpoint used as the primary store (overrides `store.endpoint`).
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// RDF files loaded into the store before the command runs.
    #[arg(long = "data", global = true)]
    data: Vec<PathBuf>,

    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load RDF files into the store and show engine info.
    Load {
        /// Turtle, N-Triples, N-Quads, TriG or RDF/XML files.
        files: Vec<PathBuf>,
    },

    /// Show engine info and registered endpoints.
    Info,

    /// Answer a natural-language question.
    Ask {
        question: String,

        /// Restrict reasoning to the neighborhood of these entities (IRIs or labels).
        #[arg(long)]
        context: Vec<String>,

        /// Request deadline in seconds.
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Resolve text fragments to graph entities.
    Resolve {
        fragments: Vec<String>,

        #[arg(long, default_value = "5")]
        top_k: usize,
    },

    /// Show the 1-hop neighborhood of an entity.
    Expand {
        /// IRI or label.
        entity: String,

        /// outgoing, incoming or both.
        #[arg(long, default_value = "both")]
        direction: Direction,

        #[arg(long, default_value = "50")]
        limit: usize,
    },

    /// Find minimal paths between two entities.
    Paths {
        source: String,
        target: String,

        #[arg(long, default_value = "3")]
        max_hops: usize,
    },

    /// List entities reachable from a source.
    Reach {
        source: String,

        #[arg(long, default_value = "2")]
        max_hops: usize,
    },

    /// Show schema around entities, or the class summary when none are given.
    Schema {
        entities: Vec<String>,

        /// Classes listed in the summary.
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Validate a subject-predicate-object assertion.
    Validate {
        subject: String,
        predicate: String,
        object: String,

        #[arg(long, default_value = "3")]
        max_hops: usize,

        /// Only accept paths that use the asserted predicate.
        #[arg(long)]
        require_predicate: bool,
    },

    /// Retrieve stored example queries similar to a question.
    Examples {
        question: String,

        #[arg(long, default_value = "3")]
        top_k: usize,

        /// Print a few-shot prompt instead of a ranked list.
        #[arg(long)]
        prompt: bool,
    },

    /// Align an entity with a registered endpoint.
    Federate {
        entity: String,

        /// Endpoint name.
        #[arg(long)]
        remote: String,

        /// Also search the remote graph for paths to this entity.
        #[arg(long)]
        target: Option<String>,

        #[arg(long, default_value = "3")]
        max_hops: usize,
    },
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => GrapeConfig::load(path)?,
        None => GrapeConfig::default(),
    };
    if let Some(path) = &cli.store_path {
        config.store.path = Some(path.clone());
        config.store.endpoint = None;
    }
    if let Some(url) = &cli.endpoint {
        config.store.endpoint = Some(url.clone());
        config.store.path = None;
    }

    let engine = Engine::new(config.to_engine_config()?)?;
    if !cli.data.is_empty() {
        for file in &cli.data {
            engine.load_file(file)?;
        }
        engine.rebuild_semantic()?;
    }
    let json = cli.json;

    match cli.command {
        Commands::Load { files } => {
            if files.is_empty() {
                miette::bail!("no files given");
            }
            for file in &files {
                let quads = engine.load_file(file)?;
                println!("Loaded {} ({quads} quads in store)", file.display());
            }
            engine.rebuild_semantic()?;
            println!("{}", engine.info());
        }

        Commands::Info => {
            if json {
                let endpoints: Vec<_> = engine.registry().describe();
                return print_json(&endpoints);
            }
            println!("{}", engine.info());
            for (name, descriptor) in engine.registry().describe() {
                println!("  endpoint {name}: {descriptor}");
            }
        }

        Commands::Ask {
            question,
            context,
            timeout,
        } => {
            let context = context
                .iter()
                .map(|c| lookup(&engine, c))
                .collect::<Result<Vec<_>>>()?;
            let scope = (!context.is_empty()).then_some(context.as_slice());
            let agent = engine.agent();
            let answer = match timeout {
                Some(secs) => agent.answer_with_cancel(
                    &question,
                    scope,
                    CancelToken::with_timeout(Duration::from_secs(secs)),
                ),
                None => agent.answer(&question, scope),
            };

            if json {
                return print_json(&answer);
            }
            println!("{}", answer.answer_text);
            println!();
            println!("Scenario: {}", answer.scenario);
            println!("State:    {}", answer.state);
            println!("Confidence: {:.2}", answer.confidence);
            if let Some(failure) = &answer.failure {
                println!("Failure:  {:?}: {}", failure.kind, failure.message);
            }
            if !answer.reasoning_path.steps.is_empty() {
                println!("\nReasoning:");
                for step in &answer.reasoning_path.steps {
                    println!("  {}. [{}] {}", step.seq, step.operation, step.description);
                }
                println!("\n{}", ReasoningNarrator.summary(&answer.reasoning_path));
            }
            if let Some(query) = &answer.evidence_query {
                println!("\nEvidence query:\n{query}");
            }
        }

        Commands::Resolve { fragments, top_k } => {
            let resolutions = engine.resolver().resolve_many(&fragments[..], top_k)?;
            if json {
                return print_json(&resolutions);
            }
            for (fragment, resolution) in fragments.iter().zip(&resolutions) {
                println!("\"{fragment}\":");
                if resolution.is_empty() {
                    println!("  (no match)");
                }
                for m in &resolution.matches {
                    println!(
                        "  {} <{}> (confidence: {:.2}, {})",
                        m.entity.display_label(),
                        m.entity.iri,
                        m.confidence,
                        m.source
                    );
                }
            }
        }

        Commands::Expand {
            entity,
            direction,
            limit,
        } => {
            let entity = lookup(&engine, &entity)?;
            let hood = engine.expander().expand(&entity, direction, limit)?;
            if json {
                return print_json(&hood);
            }
            println!("{} ({} edges):", hood.center, hood.edges.len());
            for edge in &hood.edges {
                println!("  {edge}");
            }
        }

        Commands::Paths {
            source,
            target,
            max_hops,
        } => {
            let source = lookup(&engine, &source)?;
            let target = lookup(&engine, &target)?;
            let paths = engine.explorer().find_paths(&source, &target, max_hops)?;
            if json {
                return print_json(&paths);
            }
            if paths.is_empty() {
                println!("No path from {source} to {target} within {max_hops} hops.");
            }
            for (i, path) in paths.iter().enumerate() {
                println!("  {}. ({} hops) {path}", i + 1, path.len());
            }
        }

        Commands::Reach { source, max_hops } => {
            let source = lookup(&engine, &source)?;
            let reached = engine.explorer().reachable(&source, max_hops)?;
            if json {
                return print_json(&reached);
            }
            for r in &reached {
                println!("  depth {}: {}", r.depth, r.entity);
            }
        }

        Commands::Schema { entities, limit } => {
            if entities.is_empty() {
                let summary = engine.schema_builder().summary(limit)?;
                if json {
                    return print_json(&summary);
                }
                for c in &summary {
                    println!("  {} ({} instances)", c.class, c.instances);
                }
                return Ok(());
            }
            let entities = entities
                .iter()
                .map(|e| lookup(&engine, e))
                .collect::<Result<Vec<_>>>()?;
            let schema = engine.schema_builder().build(&entities)?;
            if json {
                return print_json(&schema);
            }
            println!("Classes:");
            for class in &schema.classes {
                let supers: Vec<String> =
                    schema.superclasses(class).map(|s| s.to_string()).collect();
                if supers.is_empty() {
                    println!("  {class}");
                } else {
                    println!("  {class} ⊑ {}", supers.join(", "));
                }
            }
            println!("Properties:");
            for p in &schema.properties {
                println!("  {}: {} -> {}", p.property, p.domain, p.range);
            }
        }

        Commands::Validate {
            subject,
            predicate,
            object,
            max_hops,
            require_predicate,
        } => {
            let subject = lookup(&engine, &subject)?;
            let predicate = lookup(&engine, &predicate)?;
            let object = lookup(&engine, &object)?;
            let mut prover = engine.proof_engine();
            if require_predicate {
                prover = prover.with_policy(ProofPolicy::RequirePredicate);
            }
            let validation = prover.validate_within(&subject, &predicate, &object, max_hops)?;
            if json {
                return print_json(&validation);
            }
            let verdict = match (&validation.holds, &validation.evidence) {
                (true, Evidence::Edge(_)) => "holds (direct triple)",
                (true, _) => "holds (connecting path)",
                (false, _) => "not supported",
            };
            println!("{subject} {predicate} {object}: {verdict}");
            for step in validation.steps() {
                println!("  {step}");
            }
        }

        Commands::Examples {
            question,
            top_k,
            prompt,
        } => {
            let retriever = engine.retriever();
            if prompt {
                println!("{}", retriever.few_shot_prompt(&question, top_k));
                return Ok(());
            }
            let ranked = retriever.retrieve(&question, top_k);
            if json {
                return print_json(&ranked);
            }
            for (i, ex) in ranked.iter().enumerate() {
                println!("  {}. [{:.2}] {}", i + 1, ex.score, ex.question);
                println!("     {}", ex.query.replace('\n', "\n     "));
            }
        }

        Commands::Federate {
            entity,
            remote,
            target,
            max_hops,
        } => {
            let entity = lookup(&engine, &entity)?;
            let connector = engine.connector();
            let alignments = connector.find_alignments(&entity, &remote)?;
            let paths = match &target {
                Some(t) => {
                    let target = lookup(&engine, t)?;
                    connector.cross_graph_paths(&entity, &target, &remote, max_hops)?
                }
                None => Vec::new(),
            };
            if json {
                return print_json(&serde_json::json!({
                    "alignments": alignments,
                    "paths": paths,
                }));
            }
            if alignments.is_empty() {
                println!("No alignments for {entity} in {remote}.");
            }
            for a in &alignments {
                println!(
                    "  {} {} {} (asserted in {:?})",
                    a.entity, a.property, a.aligned, a.found_in
                );
            }
            for p in &paths {
                println!("  via {}: {}", p.alignment.aligned, p.path);
            }
        }
    }

    Ok(())
}

/// An IRI is used as-is; anything else is resolved and the best match taken.
fn lookup(engine: &Engine, text: &str) -> Result<Entity> {
    if text.contains("://") || text.starts_with("urn:") {
        return Ok(Entity::new(text));
    }
    let resolution = engine.resolver().resolve(text, 1)?;
    match resolution.best() {
        Some(m) => Ok(m.entity.clone()),
        None => miette::bail!("no entity matches \"{text}\""),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).into_diagnostic()?);
    Ok(())
}
