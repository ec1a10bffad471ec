// SPDX-License-Identifier: MPL-2.0
//! # negapedia-preprocessor
//!
//! A streaming preprocessor that turns a full-history Wikipedia XML dump into
//! a topic-classified, conflict-annotated CSV dataset: one row per page, one
//! row per revision (with bot/revert/reverted annotations and a size delta),
//! and a top-K article-similarity graph derived from shared editors.
//!
//! ## Pipeline
//!
//! ```text
//! dump reader -> revision analyzer -> CSV exporter (pages.csv, revisions.csv)
//!                                  \-> bipartite projector -> external sort
//!                                                          -> CSV exporter (socialjumps.csv)
//! ```
//!
//! [`dump`] parses the MediaWiki export lazily, one page at a time.
//! [`analyzer`] turns one page's raw revisions into annotated [`types::Revision`]
//! rows plus a per-user weight map. [`bipartite`] folds those weight maps into
//! an article-similarity graph and extracts each article's top-K neighbors,
//! delegating the intermediate sort to [`extsort`]. [`csv_export`] fans the
//! three resulting streams out to their files. [`fail`] carries the first
//! error across every worker thread and cancels the run. [`config`] is the
//! CLI surface plus the bot-blacklist/topic-assignment loaders, and
//! [`pipeline`] wires all of the above together.

pub mod analyzer;
pub mod bipartite;
pub mod config;
pub mod csv_export;
pub mod dump;
pub mod error;
pub mod extsort;
pub mod fail;
pub mod pipeline;
pub mod types;
