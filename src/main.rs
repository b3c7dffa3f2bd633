use anyhow::Context;
use clap::Parser;
use quadstore_http::sparql::EngineOptions;
use quadstore_http::{
    EndpointConfig, GraphName, HttpServer, NamedNode, Quad, RdfParser, RdfStore, SparqlEngine,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// SPARQL 1.1 Protocol endpoint over an in-memory quad store
#[derive(Parser, Debug)]
#[command(name = "quadstore-http", version, about)]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides the configuration file)
    #[arg(short, long)]
    address: Option<String>,

    /// Port (overrides the configuration file)
    #[arg(short, long)]
    port: Option<u16>,

    /// N-Quads (.nq) or TriG (.trig) file to load at startup, repeatable
    #[arg(short, long)]
    load: Vec<PathBuf>,

    /// Seed the store with a few example quads
    #[arg(long)]
    demo: bool,
}

fn demo_quads() -> anyhow::Result<Vec<Quad>> {
    (0..3)
        .map(|i| {
            Ok(Quad::new(
                NamedNode::new(format!("ex://s{i}"))?,
                NamedNode::new(format!("ex://p{i}"))?,
                NamedNode::new(format!("ex://o{i}"))?,
                GraphName::DefaultGraph,
            ))
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EndpointConfig::from_yaml_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => EndpointConfig::default(),
    };
    if let Some(address) = args.address {
        config.address = address;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    let store = RdfStore::new();
    for path in &args.load {
        let quads = RdfParser::parse_file(path).with_context(|| format!("failed to load {}", path.display()))?;
        let inserted = store.extend(quads).await;
        info!("Loaded {} quads from {}", inserted, path.display());
    }
    if args.demo {
        let inserted = store.extend(demo_quads()?).await;
        info!("Seeded {} demo quads", inserted);
    }

    let engine = SparqlEngine::with_options(
        store,
        EngineOptions {
            union_default_graph: config.union_default_graph,
        },
    );

    info!("Quadstore HTTP v{}", quadstore_http::version());
    HttpServer::new(Arc::new(engine), config)
        .start()
        .await
        .context("server error")?;

    Ok(())
}
