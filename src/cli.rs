use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "icpc-scrape",
    version,
    about = "Local ICPC standings scraping and query tooling"
)]
pub struct Cli {
    /// Increase log verbosity (-v = debug, -vv = trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Scrape(ScrapeArgs),
    Query(QueryArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ScrapeArgs {
    /// Contest years to scrape, in order
    pub years: Vec<u32>,

    #[arg(long, default_value = ".cache/icpc")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    /// Run against an in-memory store, committing nothing
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// Delete all previously scraped rankings and regions first
    #[arg(long, default_value_t = false)]
    pub clear: bool,

    /// Also scrape the region-mapping table of each year
    #[arg(long, default_value_t = false)]
    pub regions: bool,

    /// Region overrides as TAB-separated "region<TAB>university" lines,
    /// read from a file or from stdin when "-"
    #[arg(long)]
    pub regions_from: Option<String>,

    /// Keep repaired pages in an on-disk cache keyed by URL
    #[arg(long, default_value_t = false)]
    pub cache_pages: bool,

    /// Parse pages as served, skipping the per-year markup repairs
    #[arg(long, default_value_t = false)]
    pub no_repair: bool,
}

#[derive(Args, Debug, Clone)]
pub struct QueryArgs {
    #[arg(long, default_value = ".cache/icpc")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    /// Raw SQL, executed in order against the store
    #[arg(required = true)]
    pub queries: Vec<String>,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = ".cache/icpc")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,
}

impl ScrapeArgs {
    pub fn db_path(&self) -> PathBuf {
        resolve_db_path(&self.cache_root, self.db_path.as_ref())
    }
}

impl QueryArgs {
    pub fn db_path(&self) -> PathBuf {
        resolve_db_path(&self.cache_root, self.db_path.as_ref())
    }
}

impl StatusArgs {
    pub fn db_path(&self) -> PathBuf {
        resolve_db_path(&self.cache_root, self.db_path.as_ref())
    }
}

fn resolve_db_path(cache_root: &PathBuf, db_path: Option<&PathBuf>) -> PathBuf {
    db_path
        .cloned()
        .unwrap_or_else(|| cache_root.join("icpc.sqlite"))
}
