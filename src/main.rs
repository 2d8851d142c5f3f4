//! attnflow CLI: attention pattern extraction and visualization tooling

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use attnflow_rs::{
    sample, service, ApiClient, Catalog, Extractor, HeadRegistry, ProcessResponse, ServiceConfig,
    Session,
};

#[derive(Parser)]
#[command(name = "attnflow")]
#[command(about = "Transformer attention flow extraction and visualization")]
#[command(version)]
struct Cli {
    /// Path to a catalog JSON file (built-in catalog when omitted)
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP extraction backend
    Serve {
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        #[arg(long, default_value_t = 8000)]
        port: u16,
    },
    /// Extract attention for a text and write the result as sample data
    Dump {
        /// Model ID from the catalog (e.g., "gpt2-small")
        #[arg(short, long, default_value = "gpt2-small")]
        model: String,
        /// Input text (the model's default text when omitted)
        #[arg(short, long)]
        text: Option<String>,
        /// Output directory for the sample file
        #[arg(short, long, default_value = "sample-data")]
        output: PathBuf,
    },
    /// Process a text and print the strongest visible edges
    Probe {
        /// Model ID from the catalog (e.g., "gpt2-small")
        #[arg(short, long, default_value = "gpt2-small")]
        model: String,
        /// Input text (the model's default text when omitted)
        #[arg(short, long)]
        text: Option<String>,
        /// Minimum edge weight to display
        #[arg(long, default_value_t = 0.4)]
        threshold: f32,
        /// How many edges to print
        #[arg(long, default_value_t = 20)]
        top: usize,
        /// Head selections like "9,6" or "9,:" (defaults to all heads)
        #[arg(short, long)]
        select: Vec<String>,
        /// Directory with sample data used when the backend is down
        #[arg(long, default_value = "sample-data")]
        sample_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let catalog = match &cli.catalog {
        Some(path) => Catalog::from_file(path)?,
        None => Catalog::builtin(),
    };

    match cli.command {
        Command::Serve { host, port } => serve(catalog, host, port),
        Command::Dump {
            model,
            text,
            output,
        } => dump(catalog, &model, text, &output),
        Command::Probe {
            model,
            text,
            threshold,
            top,
            select,
            sample_dir,
        } => probe(catalog, &model, text, threshold, top, &select, &sample_dir),
    }
}

fn serve(catalog: Catalog, host: String, port: u16) -> Result<()> {
    println!("=== attnflow backend ===");
    println!("Models: {}", catalog.model_ids().join(", "));
    println!("Listen: {host}:{port}");

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(service::run(ServiceConfig { host, port }, catalog))
}

fn dump(catalog: Catalog, model: &str, text: Option<String>, output: &PathBuf) -> Result<()> {
    let text = resolve_text(&catalog, model, text)?;

    info!("Loading model...");
    let extractor = Extractor::load(&catalog, model)?;
    info!("Extracting attention for {} chars of input", text.len());
    let (tokens, tensor) = extractor.extract(&text)?;

    let head_types = catalog.head_types(model);
    let model_info = catalog
        .get(model)
        .ok_or_else(|| anyhow::anyhow!("unknown model '{model}'"))?;
    let response = ProcessResponse::from_extraction(
        model_info.summary(),
        tokens,
        &tensor,
        Some(&head_types),
    );

    let path = sample::write_sample(output, &response)?;
    println!(
        "Wrote {} edges for {} tokens to {}",
        response.attention_patterns.len(),
        response.num_tokens,
        path.display()
    );
    Ok(())
}

fn probe(
    catalog: Catalog,
    model: &str,
    text: Option<String>,
    threshold: f32,
    top: usize,
    select: &[String],
    sample_dir: &PathBuf,
) -> Result<()> {
    let text = resolve_text(&catalog, model, text)?;

    let mut session = Session::new(catalog, ApiClient::from_env(), sample_dir, model)?;
    session.set_input_text(text);
    session.set_threshold(threshold);
    if !select.is_empty() {
        // Explicit selections replace the predefined groups
        *session.registry_mut() = HeadRegistry::new();
        for spec in select {
            session.add_selection(spec)?;
        }
    }

    session.process()?;
    let scene = session
        .scene()
        .ok_or_else(|| anyhow::anyhow!("no data after processing"))?;
    let data = session
        .data()
        .ok_or_else(|| anyhow::anyhow!("no data after processing"))?;

    println!("=== {} ===", data.model_name);
    println!("Tokens: {}", data.tokens.join(" | "));
    println!(
        "Edges:  {} visible of {} total (threshold {threshold})",
        scene.edges.len(),
        data.attention_patterns.len()
    );

    let mut edges = scene.edges.clone();
    edges.sort_by(|a, b| b.weight.total_cmp(&a.weight));
    for edge in edges.iter().take(top) {
        let src = data.tokens[edge.source.0 as usize].as_str();
        let dst = data.tokens[edge.target.0 as usize].as_str();
        println!(
            "L{:2} H{:2}  {:.3}  {:?} -> {:?}",
            edge.source_layer, edge.head, edge.weight, src, dst
        );
    }
    Ok(())
}

fn resolve_text(catalog: &Catalog, model: &str, text: Option<String>) -> Result<String> {
    match text {
        Some(text) => Ok(text),
        None => catalog
            .get(model)
            .map(|info| info.default_text.clone())
            .ok_or_else(|| anyhow::anyhow!("unknown model '{model}'")),
    }
}
