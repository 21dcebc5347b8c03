#![allow(clippy::doc_markdown)]
//! `EdgeStore` CLI - poke a sharded edge store from the command line.
//!
//! Usage:
//!   `edgestore gen-gid --colo 5`
//!   `edgestore add --edge-type 7 --gid1 21474836481 --gid2 21474836482 --data hello`
//!   `edgestore query --edge-type 7 --gid1 21474836481`

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use edgestore_core::{Edge, Gid, IndexQuery, IndexSpec, StoreConfig, StoreRegistry};

#[derive(Parser)]
#[command(name = "edgestore")]
#[command(author, version, about = "EdgeStore CLI - sharded edge store")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "edgestore.toml", env = "EDGESTORE_CONFIG")]
    config: PathBuf,

    /// Logical database name (overrides the configured default)
    #[arg(long)]
    dbname: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Allocate a fresh gid
    GenGid {
        /// Explicit colocation id
        #[arg(long)]
        colo: Option<u32>,

        /// Inherit the colocation of this gid
        #[arg(long)]
        sibling: Option<Gid>,
    },

    /// Add or overwrite an edge
    Add {
        /// Edge schema tag
        #[arg(long)]
        edge_type: u32,

        /// Parent gid
        #[arg(long)]
        gid1: Gid,

        /// Child gid
        #[arg(long)]
        gid2: Gid,

        /// Payload encoding tag
        #[arg(long, default_value_t = 0)]
        encoding: u32,

        /// Payload, taken verbatim from the argument
        #[arg(long, default_value = "")]
        data: String,

        /// Index entry as `indextype:value` (repeatable)
        #[arg(long = "index")]
        indices: Vec<String>,

        /// Unique index entry as `indextype:value` (repeatable)
        #[arg(long = "unique-index")]
        unique_indices: Vec<String>,

        /// Replace the edge when the primary key already exists
        #[arg(long)]
        overwrite: bool,
    },

    /// Fetch a single edge
    Get {
        #[arg(long)]
        edge_type: u32,

        #[arg(long)]
        gid1: Gid,

        #[arg(long)]
        gid2: Gid,

        /// Constrain to an index range as `indextype:start:end`
        #[arg(long)]
        index: Option<String>,
    },

    /// Delete an edge
    Delete {
        #[arg(long)]
        edge_type: u32,

        #[arg(long)]
        gid1: Gid,

        #[arg(long)]
        gid2: Gid,

        /// Index types whose entries should be removed (repeatable)
        #[arg(long = "index-type")]
        index_types: Vec<u32>,
    },

    /// List edges by parent, colocation, or index range
    Query {
        #[arg(long)]
        edge_type: u32,

        /// Scope to one parent gid
        #[arg(long)]
        gid1: Option<Gid>,

        /// Scope to one colocation
        #[arg(long)]
        colo: Option<u32>,

        /// Index range as `indextype:start:end`
        #[arg(long)]
        index: Option<String>,
    },

    /// Count live edges under a parent
    Count {
        #[arg(long)]
        edge_type: u32,

        #[arg(long)]
        gid1: Gid,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        StoreConfig::load_from_path(&cli.config)
            .with_context(|| format!("failed to load {}", cli.config.display()))?
    } else {
        StoreConfig::default()
    };

    let registry = StoreRegistry::new(config)?;
    let store = match cli.dbname.as_deref() {
        Some(dbname) => registry.get(dbname)?,
        None => registry.default_store()?,
    };

    match cli.command {
        Commands::GenGid { colo, sibling } => {
            let gid = store.generate_gid(sibling, colo)?;
            println!("{gid}");
        }

        Commands::Add {
            edge_type,
            gid1,
            gid2,
            encoding,
            data,
            indices,
            unique_indices,
            overwrite,
        } => {
            let mut specs = Vec::new();
            for raw in &indices {
                specs.push(parse_index_spec(raw)?);
            }
            for raw in &unique_indices {
                specs.push(parse_index_spec(raw)?.unique());
            }

            let outcome =
                store.add(edge_type, gid1, gid2, encoding, data.as_bytes(), &specs, overwrite)?;
            if outcome.overwritten {
                println!("overwritten at revision {}", outcome.edge.revision);
            } else {
                println!("added at revision {}", outcome.edge.revision);
            }
        }

        Commands::Get {
            edge_type,
            gid1,
            gid2,
            index,
        } => {
            let index = index.as_deref().map(parse_index_query).transpose()?;
            match store.get(edge_type, gid1, gid2, index.as_ref())? {
                Some(edge) => print_edge(&edge),
                None => println!("not found"),
            }
        }

        Commands::Delete {
            edge_type,
            gid1,
            gid2,
            index_types,
        } => {
            let deleted = store.delete(edge_type, gid1, gid2, &index_types)?;
            println!("{}", if deleted { "deleted" } else { "not found" });
        }

        Commands::Query {
            edge_type,
            gid1,
            colo,
            index,
        } => {
            let index = index.as_deref().map(parse_index_query).transpose()?;
            let edges = store.query(edge_type, index.as_ref(), gid1, colo)?;
            for edge in &edges {
                print_edge(edge);
            }
            println!("{} edge(s)", edges.len());
        }

        Commands::Count { edge_type, gid1 } => {
            println!("{}", store.count(edge_type, gid1)?);
        }
    }

    Ok(())
}

/// Parses `indextype:value` into an index entry.
fn parse_index_spec(raw: &str) -> anyhow::Result<IndexSpec> {
    let Some((index_type, value)) = raw.split_once(':') else {
        bail!("expected indextype:value, got '{raw}'");
    };
    let index_type = index_type
        .parse()
        .with_context(|| format!("bad index type in '{raw}'"))?;
    Ok(IndexSpec::new(index_type, value))
}

/// Parses `indextype:start:end` into an index range query.
fn parse_index_query(raw: &str) -> anyhow::Result<IndexQuery> {
    let mut parts = raw.splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(index_type), Some(start), Some(end)) => {
            let index_type = index_type
                .parse()
                .with_context(|| format!("bad index type in '{raw}'"))?;
            Ok(IndexQuery::new(index_type, start, end))
        }
        _ => bail!("expected indextype:start:end, got '{raw}'"),
    }
}

fn print_edge(edge: &Edge) {
    println!(
        "edgetype={} gid1={} gid2={} revision={} encoding={} data={}",
        edge.edge_type,
        edge.gid1,
        edge.gid2,
        edge.revision,
        edge.encoding,
        String::from_utf8_lossy(&edge.data),
    );
}
