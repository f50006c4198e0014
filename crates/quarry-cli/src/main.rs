//! Quarry Command-Line Client
//!
//! Runs JSON request documents against a schema and a sled data directory.

mod executor;
mod formatter;

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use formatter::OutputFormat;
use quarry_core::{Engine, EngineConfig, SchemaBundle, SchemaRegistry, SledStore, SledStoreConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Quarry Command-Line Client
#[derive(Parser, Debug)]
#[command(name = "quarry")]
#[command(version, about = "Run declarative reads and writes against a Quarry store")]
pub struct Args {
    /// Schema bundle (JSON)
    #[arg(short = 's', long)]
    pub schema: PathBuf,

    /// Data directory
    #[arg(short = 'd', long, default_value = "./quarry_data")]
    pub data: PathBuf,

    /// Use a temporary store that is discarded on exit
    #[arg(long)]
    pub temporary: bool,

    /// Execute a single request given inline
    #[arg(short = 'c', long)]
    pub command: Option<String>,

    /// Execute the request in a file (stdin when neither this nor --command is given)
    #[arg(short = 'f', long)]
    pub file: Option<PathBuf>,

    /// Print the plan instead of executing
    #[arg(long)]
    pub explain: bool,

    /// Output format
    #[arg(long, default_value = "table", value_enum)]
    pub format: OutputFormat,

    /// Maximum relation depth for reads and cascades
    #[arg(long, default_value_t = quarry_core::config::DEFAULT_MAX_DEPTH)]
    pub max_depth: usize,

    /// Upper bound on `take`
    #[arg(long)]
    pub max_take: Option<u64>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("quarry_cli=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let bundle = SchemaBundle::from_json(&std::fs::read_to_string(&args.schema)?)?;
    let registry = SchemaRegistry::from_bundle(bundle)?;

    let store_config = if args.temporary {
        SledStoreConfig::temporary()
    } else {
        SledStoreConfig::new(&args.data)
    };
    let store = SledStore::open(store_config)?;

    let mut config = EngineConfig::default().with_max_depth(args.max_depth);
    if let Some(max) = args.max_take {
        config = config.with_max_take(max);
    }
    let engine = Engine::with_config(Arc::new(registry), store, config)?;
    info!(
        entities = engine.registry().entity_names().len(),
        recovered = engine.storage().was_recovered(),
        "engine ready"
    );

    let input = match (&args.command, &args.file) {
        (Some(command), _) => command.clone(),
        (None, Some(file)) => std::fs::read_to_string(file)?,
        (None, None) => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };

    let formatter = formatter::create_formatter(args.format);
    let output = executor::execute(&engine, &input, &*formatter, args.explain).await?;
    println!("{}", output);
    Ok(())
}
