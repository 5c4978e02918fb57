//! Schema Resolver CLI
//!
//! Resolves schema documents and validates concrete documents against them.

use std::path::Path;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use arbor_schemas::fetcher::file_uri;
use arbor_schemas::{
    base_context, load_and_validate, load_schema, DefaultFetcher, Loader, ValidationError,
};

#[derive(Parser)]
#[command(name = "schema-resolver")]
#[command(about = "Resolve schema documents and validate documents against them")]
struct Cli {
    /// Print one line per error instead of the full tree
    #[arg(long)]
    print_oneline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a document with the built-in schema-definition vocabulary and
    /// print the result as JSON
    Resolve {
        /// Path or URL of the document
        document: String,
    },

    /// Load a schema and validate a document against it
    Validate {
        /// Path or URL of the schema
        schema: String,
        /// Path or URL of the document
        document: String,
        /// Treat unknown fields as errors
        #[arg(long)]
        strict: bool,
        /// Treat undeclared extension fields as errors
        #[arg(long)]
        strict_foreign_properties: bool,
        /// Do not fetch $schemas extension vocabularies
        #[arg(long)]
        skip_schemas: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        match e.downcast_ref::<ValidationError>() {
            Some(v) if cli.print_oneline => eprintln!("{}", v.one_line()),
            Some(v) => eprintln!("{}", v.pretty()),
            None => eprintln!("Error: {}", e),
        }
        std::process::exit(1);
    }
}

/// Command-line references may be plain paths; URLs pass through.
fn as_uri(reference: &str) -> String {
    if reference.contains("://") {
        return reference.to_string();
    }
    let path = Path::new(reference);
    let abs = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().unwrap_or_default().join(path)
    };
    file_uri(&abs.display().to_string())
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Resolve { document } => {
            let mut loader = Loader::new(&base_context())?;
            let (resolved, _metadata) = loader.resolve(&as_uri(document))?;
            println!("{}", serde_json::to_string_pretty(&resolved.to_json())?);
            Ok(())
        }
        Commands::Validate {
            schema,
            document,
            strict,
            strict_foreign_properties,
            skip_schemas,
        } => {
            let mut schema_doc = if *skip_schemas {
                arbor_schemas::compiler::load_schema_with(
                    &as_uri(schema),
                    Box::new(DefaultFetcher::new()),
                    Box::new(DefaultFetcher::new()),
                    true,
                )?
            } else {
                load_schema(&as_uri(schema))?
            };
            load_and_validate(
                &mut schema_doc,
                &as_uri(document),
                *strict,
                *strict_foreign_properties,
            )?;
            println!("{} is valid", document);
            Ok(())
        }
    }
}
