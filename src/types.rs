//! Core data model: pages, topics, revisions, and similarity edges.
//!
//! These types are pure data -- no I/O, no threading -- so they can be shared
//! freely between the analyzer, projector, and exporter without synchronization.

use chrono::{DateTime, Utc};
use compact_str::CompactString;

/// Sentinel `UserID` used for anonymous edits, matching the dump reader's
/// contributor-less revision marker.
pub const ANONYMOUS_USER_ID: u32 = u32::MAX;

/// A 31-character MediaWiki content hash, or absent for revisions whose hash
/// was missing or malformed.
pub type Sha1Hash = CompactString;

/// A page as it will be written to `pages.csv`. Topics are pages with
/// `topic_id == id`.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub id: u32,
    pub title: CompactString,
    pub abstract_text: CompactString,
    pub topic_id: u32,
}

impl Page {
    pub fn is_topic(&self) -> bool {
        self.topic_id == self.id
    }
}

/// A fully annotated revision, ready for `revisions.csv`.
#[derive(Debug, Clone, PartialEq)]
pub struct Revision {
    pub page_id: u32,
    pub serial_id: u32,
    pub user_id: Option<u32>,
    pub is_bot: bool,
    pub weight: f64,
    pub diff: f64,
    pub is_revert: u32,
    pub is_reverted: bool,
    pub timestamp: DateTime<Utc>,
    pub sha1: Option<Sha1Hash>,
}

/// A single top-K similarity edge discovered by the bipartite projector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityEdge {
    pub page_a: u32,
    pub page_b: u32,
    pub weight: f64,
}

/// The result of running the revision analyzer over one article: its
/// annotated revisions plus the per-user weight map handed to the projector.
#[derive(Debug, Clone)]
pub struct AnalyzedArticle {
    pub page: Page,
    pub revisions: Vec<Revision>,
    /// `userID -> weight in [0, 100]`.
    pub user_weights: rustc_hash::FxHashMap<u32, f64>,
}

/// The similarity neighbors chosen for one article.
#[derive(Debug, Clone, PartialEq)]
pub struct VertexLinks {
    pub from: u32,
    pub to: Vec<u32>,
}
