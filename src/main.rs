use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use csv::ReaderBuilder;
use prettytable::{Cell, Row, Table};
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tessera::btree::{BPlusTree, BTreeError, GenericKey, IntegerComparator};
use tessera::config::{ConfigError, EngineConfig};
use tessera::engine::StorageEngine;
use tessera::file::RowId;

/// Maintenance tool for tessera index files
#[derive(Debug, Parser)]
#[command(name = "tessera", version)]
struct Cli {
    /// JSON engine config; the database path on the command line wins
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Buffer pool frames
    #[arg(long, global = true)]
    pool_size: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create and format a database file
    Init { db: PathBuf },
    /// Bulk insert `key,page,slot` rows into an integer-keyed index
    Load {
        db: PathBuf,
        #[arg(long)]
        index: u32,
        #[arg(long)]
        csv: PathBuf,
        /// The first CSV row is a header
        #[arg(long)]
        header: bool,
    },
    /// Look up one key
    Get {
        db: PathBuf,
        #[arg(long)]
        index: u32,
        #[arg(allow_negative_numbers = true)]
        key: i64,
    },
    /// Print entries in key order
    Scan {
        db: PathBuf,
        #[arg(long)]
        index: u32,
        /// Start at the first key not less than this one
        #[arg(long, allow_negative_numbers = true)]
        from: Option<i64>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Remove one key
    Remove {
        db: PathBuf,
        #[arg(long)]
        index: u32,
        #[arg(allow_negative_numbers = true)]
        key: i64,
    },
    /// Verify the tree structure and print its shape
    Check {
        db: PathBuf,
        #[arg(long)]
        index: u32,
    },
    /// Print the tree level by level
    Dump {
        db: PathBuf,
        #[arg(long)]
        index: u32,
    },
    /// List registered indexes
    Indexes { db: PathBuf },
}

#[derive(Debug, Error)]
enum CliError {
    #[error("{0}")]
    Tree(#[from] BTreeError),

    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Index {0} does not exist")]
    UnknownIndex(u32),
}

type CliResult<T> = Result<T, CliError>;

const KEY_SIZE: usize = 8;

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> CliResult<()> {
    let Cli {
        config,
        pool_size,
        command,
    } = cli;
    let open = |db: &Path| -> CliResult<StorageEngine> {
        let mut config = match &config {
            Some(path) => EngineConfig::from_json_file(path)?,
            None => EngineConfig::default(),
        };
        config.db_file = db.to_path_buf();
        if let Some(pool_size) = pool_size {
            config.pool_size = pool_size;
        }
        config.key_size = KEY_SIZE;
        Ok(StorageEngine::open(config)?)
    };

    match command {
        Command::Init { db } => {
            let engine = open(&db)?;
            println!("initialised {}", db.display());
            engine.close()?;
        }

        Command::Load {
            db,
            index,
            csv: csv_path,
            header,
        } => {
            let engine = open(&db)?;
            let mut tree = engine.open_index(index, IntegerComparator::i64())?;

            let mut reader = ReaderBuilder::new()
                .has_headers(header)
                .trim(csv::Trim::All)
                .from_path(&csv_path)?;
            let (mut inserted, mut duplicates) = (0usize, 0usize);
            for record in reader.deserialize::<(i64, u32, u32)>() {
                let (key, page_id, slot_num) = record?;
                if tree.insert(&encode_key(key)?, RowId::new(page_id, slot_num))? {
                    inserted += 1;
                } else {
                    duplicates += 1;
                }
            }

            info!(event = "cli.load", index, inserted, duplicates);
            println!("inserted {}, duplicates {}", inserted, duplicates);
            drop(tree);
            engine.close()?;
        }

        Command::Get { db, index, key } => {
            let engine = open(&db)?;
            let tree = existing_index(&engine, index)?;
            match tree.get_value(&encode_key(key)?)? {
                Some(rid) => println!("{} -> ({}, {})", key, rid.page_id, rid.slot_num),
                None => println!("{} not found", key),
            }
        }

        Command::Scan {
            db,
            index,
            from,
            limit,
        } => {
            let engine = open(&db)?;
            let tree = existing_index(&engine, index)?;
            let iter = match from {
                Some(from) => tree.begin_at(&encode_key(from)?)?,
                None => tree.begin()?,
            };
            for entry in iter.take(limit.unwrap_or(usize::MAX)) {
                let (key, rid) = entry?;
                println!("{}\t{}\t{}", render_key(&key), rid.page_id, rid.slot_num);
            }
        }

        Command::Remove { db, index, key } => {
            let engine = open(&db)?;
            let mut tree = existing_index(&engine, index)?;
            if tree.remove(&encode_key(key)?)? {
                println!("removed {}", key);
            } else {
                println!("{} not found", key);
            }
            drop(tree);
            engine.close()?;
        }

        Command::Check { db, index } => {
            let engine = open(&db)?;
            let tree = existing_index(&engine, index)?;
            let stats = tree.check()?;

            let root = tree
                .root_page_id()
                .map_or_else(|| "-".to_string(), |id| id.to_string());

            let mut table = Table::new();
            table.add_row(text_row(&["index", "root", "height", "internal pages", "leaf pages", "entries"]));
            table.add_row(text_row(&[
                &index.to_string(),
                &root,
                &stats.height.to_string(),
                &stats.internal_pages.to_string(),
                &stats.leaf_pages.to_string(),
                &stats.entries.to_string(),
            ]));
            table.printstd();
        }

        Command::Dump { db, index } => {
            let engine = open(&db)?;
            let tree = existing_index(&engine, index)?;
            print!("{}", tree.dump_with(render_key)?);
        }

        Command::Indexes { db } => {
            let engine = open(&db)?;
            let mut table = Table::new();
            table.add_row(text_row(&["index", "root"]));
            for index in engine.index_ids()? {
                let root = engine
                    .index_root(index)?
                    .map_or_else(|| "-".to_string(), |id| id.to_string());
                table.add_row(text_row(&[&index.to_string(), &root]));
            }
            table.printstd();
        }
    }
    Ok(())
}

fn existing_index(engine: &StorageEngine, index: u32) -> CliResult<BPlusTree<IntegerComparator>> {
    if !engine.index_ids()?.contains(&index) {
        return Err(CliError::UnknownIndex(index));
    }
    Ok(engine.open_index(index, IntegerComparator::i64())?)
}

fn encode_key(key: i64) -> CliResult<Vec<u8>> {
    Ok(GenericKey::from_i64(key, KEY_SIZE)?.into_bytes())
}

fn render_key(key: &[u8]) -> String {
    GenericKey::to_i64(key).map_or_else(|| format!("{:02x?}", key), |v| v.to_string())
}

fn text_row(cells: &[&str]) -> Row {
    Row::new(cells.iter().map(|text| Cell::new(text)).collect())
}
