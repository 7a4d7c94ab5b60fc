//! # ES Remapper CLI (`remap`)
//!
//! The `remap` binary inspects an Elasticsearch cluster and runs remaps:
//! copying an index into a new index with a different mapping, then moving
//! an alias over once the copy is verified.
//!
//! ## Usage
//!
//! ```bash
//! remap --config ./config/remap.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `remap check` | Verify the cluster is reachable |
//! | `remap indices` | List indices and their aliases |
//! | `remap aliases <index>` | List the aliases of one index |
//! | `remap pipelines` | List ingest pipelines |
//! | `remap mapping show <index>` | Print an index mapping |
//! | `remap mapping fmt <file>` | Re-format a mapping file |
//! | `remap pipeline test <id> --index <index>` | Dry-run a pipeline on one document |
//! | `remap run ...` | Run a remap |
//! | `remap alias move ...` | Move or add aliases by hand |
//!
//! ## Examples
//!
//! ```bash
//! # Save the current mapping, edit it, and remap into a new index
//! remap mapping show products --out products.json
//! remap run --source products --target products_v2 --mapping products.json
//!
//! # Same, but swap the live alias when done and stream JSON progress
//! remap run --source products --mapping products.json \
//!     --move-alias products-live --progress json
//!
//! # Recover from a failed alias swap
//! remap alias move --from products --to products_v2 --alias products-live
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use es_remapper::progress::ProgressMode;
use es_remapper::remap::RunArgs;
use es_remapper::{alias, catalog, config, logging, pipeline, remap, schema};

/// ES Remapper: change the mapping of a live Elasticsearch index.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/remap.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "remap",
    about = "ES Remapper: change the mapping of a live Elasticsearch index",
    version,
    long_about = "ES Remapper creates a new index with the mapping you provide, copies every \
    document into it with a server-side reindex (optionally through an ingest pipeline), verifies \
    the copy, restores index settings, and atomically moves an alias to the new index."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/remap.toml`. Connection, remap defaults,
    /// index settings and logging are read from this file.
    #[arg(long, global = true, default_value = "./config/remap.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Check that the cluster is reachable with the configured credentials.
    Check,

    /// List indices (system indices excluded) with their aliases.
    Indices {
        /// Index name pattern; `*` is a wildcard.
        #[arg(long, default_value = "*")]
        pattern: String,
    },

    /// List the aliases attached to an index.
    Aliases {
        /// Index name.
        index: String,
    },

    /// List ingest pipelines.
    Pipelines {
        /// Only pipelines whose id starts with this prefix.
        #[arg(long, default_value = "")]
        pattern: String,
    },

    /// Inspect or format index mappings.
    Mapping {
        #[command(subcommand)]
        action: MappingAction,
    },

    /// Try out ingest pipelines.
    Pipeline {
        #[command(subcommand)]
        action: PipelineAction,
    },

    /// Copy an index into a new index with a new mapping.
    ///
    /// Creates the target, tunes it for bulk loading, reindexes, verifies
    /// that every document was copied, restores refresh and replica
    /// settings, and optionally moves an alias. The target is never deleted
    /// on failure. Ctrl-C stops waiting on the copy task.
    Run {
        /// Index to copy from.
        #[arg(long)]
        source: String,

        /// Index to create. Defaults to the source name plus `remap.target_suffix`.
        #[arg(long)]
        target: Option<String>,

        /// Mapping file (JSON) for the target index.
        #[arg(long)]
        mapping: PathBuf,

        /// Delete the target first if it already exists.
        #[arg(long, overrides_with = "no_replace")]
        replace: bool,

        /// Fail if the target already exists.
        #[arg(long, overrides_with = "replace")]
        no_replace: bool,

        /// Ingest pipeline applied to every document while copying.
        #[arg(long)]
        pipeline: Option<String>,

        /// Documents per reindex batch.
        #[arg(long)]
        batch_size: Option<u32>,

        /// Number of reindex slices.
        #[arg(long)]
        slices: Option<u32>,

        /// Copy at most this many documents. Negative means no limit.
        #[arg(long, allow_negative_numbers = true)]
        max_docs: Option<i64>,

        /// Alias to move from the source to the target after the copy.
        #[arg(long)]
        move_alias: Option<String>,

        /// Extra alias to add to the target after the copy.
        #[arg(long)]
        new_alias: Option<String>,

        /// Progress output. Defaults to `human` on a terminal, `off` otherwise.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Manage aliases outside of a run.
    Alias {
        #[command(subcommand)]
        action: AliasAction,
    },
}

#[derive(Subcommand)]
enum MappingAction {
    /// Print the mapping of an index (4-space indented JSON).
    Show {
        /// Index name.
        index: String,

        /// Write to this file instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Parse a mapping file and print it re-formatted. Needs no cluster.
    Fmt {
        /// Mapping file.
        path: PathBuf,
    },
}

#[derive(Subcommand)]
enum PipelineAction {
    /// Run a pipeline on one sample document without writing anything.
    Test {
        /// Pipeline id.
        pipeline: String,

        /// Index to take the sample document from.
        #[arg(long)]
        index: String,
    },
}

#[derive(Subcommand)]
enum AliasAction {
    /// Move an alias from one index to another in one atomic request.
    ///
    /// This is also how to finish a run that failed at the alias-swap stage.
    Move {
        /// Index the alias currently points to.
        #[arg(long)]
        from: String,

        /// Index the alias should point to.
        #[arg(long)]
        to: String,

        /// Alias to move.
        #[arg(long)]
        alias: Option<String>,

        /// Additional alias to add to `--to`.
        #[arg(long)]
        new_alias: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Formatting a local file needs no cluster; config is optional.
    if let Commands::Mapping {
        action: MappingAction::Fmt { path },
    } = &cli.command
    {
        let cfg = config::load_config(&cli.config).unwrap_or_else(|_| config::Config::minimal());
        logging::init(&cfg.logging)?;
        schema::run_mapping_fmt(path)?;
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging)?;

    match cli.command {
        Commands::Check => {
            catalog::run_check(&cfg).await?;
        }
        Commands::Indices { pattern } => {
            catalog::run_indices(&cfg, &pattern).await?;
        }
        Commands::Aliases { index } => {
            catalog::run_aliases(&cfg, &index).await?;
        }
        Commands::Pipelines { pattern } => {
            catalog::run_pipelines(&cfg, &pattern).await?;
        }
        Commands::Mapping { action } => match action {
            MappingAction::Show { index, out } => {
                schema::run_mapping_show(&cfg, &index, out).await?;
            }
            MappingAction::Fmt { path } => {
                schema::run_mapping_fmt(&path)?;
            }
        },
        Commands::Pipeline {
            action: PipelineAction::Test { pipeline, index },
        } => {
            pipeline::run_pipeline_test(&cfg, &pipeline, &index).await?;
        }
        Commands::Run {
            source,
            target,
            mapping,
            replace,
            no_replace,
            pipeline,
            batch_size,
            slices,
            max_docs,
            move_alias,
            new_alias,
            progress,
        } => {
            let replace = match (replace, no_replace) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            let args = RunArgs {
                source,
                target,
                mapping,
                replace,
                pipeline,
                batch_size,
                slices,
                max_docs,
                move_alias,
                new_alias,
                progress,
            };
            remap::run_remap(&cfg, args).await?;
        }
        Commands::Alias {
            action:
                AliasAction::Move {
                    from,
                    to,
                    alias,
                    new_alias,
                },
        } => {
            alias::run_alias_move(&cfg, &from, &to, alias.as_deref(), new_alias.as_deref())
                .await?;
        }
    }

    Ok(())
}
