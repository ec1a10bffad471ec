//! CLI surface, logging initialization, and the two opaque collaborator
//! loaders (bot blacklist, topic assignment) that feed the rest of the
//! pipeline.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use clap::{ArgAction, Args, Parser, Subcommand};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Parser)]
#[command(name = "negapedia-preprocess", version, about = "Turns a full-history Wikipedia dump into a topic-classified, conflict-annotated CSV dataset.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Runs the preprocessing pipeline end to end.
    #[command(alias = "process")]
    Run(RunArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the MediaWiki XML export (optionally .zst or .bz2 compressed).
    pub dump: PathBuf,

    /// Directory the three CSV files are written into.
    pub output_dir: PathBuf,

    /// Language edition code, e.g. "en".
    pub language: String,

    /// JSON file mapping user id to bot display name.
    #[arg(long)]
    pub bot_blacklist: PathBuf,

    /// JSON file mapping article id to topic id, plus the article namespace.
    #[arg(long)]
    pub topic_assignment: PathBuf,

    /// Similarity neighbors kept per article.
    #[arg(long, default_value_t = crate::bipartite::DEFAULT_TOP_K)]
    pub top_k: usize,

    /// Drop bot-authored rows from revisions.csv (serial numbering is kept).
    #[arg(long)]
    pub filter_bots: bool,

    /// Override the external sort binary; defaults to "sort" on PATH.
    #[arg(long)]
    pub sort_path: Option<PathBuf>,

    /// Memory budget passed to the external sort as `-S`.
    #[arg(long)]
    pub sort_memory: Option<String>,

    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,
}

/// Initializes `tracing` once at startup. `RUST_LOG` always wins; otherwise
/// verbosity climbs from `warn` at `-v 0` to `trace` at `-v 3+`.
pub fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[derive(Debug, Deserialize)]
struct BotBlacklistFile(HashMap<u32, String>);

/// `userID -> name` mapping loaded from JSON, populated before the pipeline
/// starts and treated as read-only thereafter.
pub struct BotBlacklist {
    ids: FxHashSet<u32>,
}

impl BotBlacklist {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let file: BotBlacklistFile = serde_json::from_str(&raw)
            .map_err(|e| Error::InputFormat(format!("bot blacklist {}: {e}", path.display())))?;
        Ok(Self {
            ids: file.0.into_keys().collect(),
        })
    }

    pub fn is_bot(&self, user_id: u32) -> bool {
        self.ids.contains(&user_id)
    }
}

#[derive(Debug, Deserialize)]
struct TopicAssignmentFile {
    /// `articleID -> topicID`.
    assignments: HashMap<u32, u32>,
    /// Namespace descriptor: the full set of valid article ids.
    articles: Vec<u32>,
}

/// `articleID -> topicID` mapping plus the article namespace, loaded from
/// JSON. Assignments referencing an id outside the article namespace are
/// dropped at load time, per the topic-assignment interface contract.
pub struct TopicAssignment {
    assignments: FxHashMap<u32, u32>,
    articles: FxHashSet<u32>,
}

impl TopicAssignment {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let file: TopicAssignmentFile = serde_json::from_str(&raw).map_err(|e| {
            Error::InputFormat(format!("topic assignment {}: {e}", path.display()))
        })?;

        let articles: FxHashSet<u32> = file.articles.into_iter().collect();
        let assignments = file
            .assignments
            .into_iter()
            .filter(|(article_id, _)| articles.contains(article_id))
            .collect();

        Ok(Self {
            assignments,
            articles,
        })
    }

    pub fn topic_for(&self, article_id: u32) -> Option<u32> {
        self.assignments.get(&article_id).copied()
    }

    pub fn is_article(&self, id: u32) -> bool {
        self.articles.contains(&id)
    }

    /// Every topic id referenced by at least one assignment, sorted
    /// ascending for a deterministic membership set -- the pages stream's
    /// actual topics-before-articles ordering comes from dump arrival order
    /// in `pipeline.rs`, not from this method.
    pub fn topic_ids_in_order(&self) -> Vec<u32> {
        let mut seen = FxHashSet::default();
        let mut ordered = Vec::new();
        for &topic_id in self.assignments.values() {
            if seen.insert(topic_id) {
                ordered.push(topic_id);
            }
        }
        ordered.sort_unstable();
        ordered
    }
}
