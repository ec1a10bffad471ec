//! Orchestration: wires the dump reader, analyzer, bipartite projector, and
//! CSV exporter into the end-to-end `run` entry point the CLI calls.
//!
//! The dump is read twice (two independent [`crate::dump::DumpParser`]
//! instances over the same path): the first pass picks out topic pages only,
//! satisfying the pages-stream ordering rule (topics before articles, in the
//! order they appear in the dump); the second pass picks out every article
//! assigned to a topic. A single `seen` set spans both passes so a page
//! repeated anywhere in the dump only ever contributes its first occurrence.

use std::collections::HashSet;

use rustc_hash::FxHashMap;

use crate::analyzer;
use crate::bipartite::{self, DegreeFilter};
use crate::config::{BotBlacklist, RunArgs, TopicAssignment};
use crate::csv_export::CsvWriters;
use crate::dump::{self, DumpParser, RawPage};
use crate::error::{Error, Result};
use crate::extsort::SortConfig;
use crate::fail::FailureCoordinator;
use crate::types::{AnalyzedArticle, Page};

type EdgeSender = crossbeam_channel::Sender<(u32, FxHashMap<u32, f64>)>;

pub fn run(args: &RunArgs) -> Result<()> {
    let fail = FailureCoordinator::new();

    let bot_blacklist = BotBlacklist::load(&args.bot_blacklist)?;
    let topic_assignment = TopicAssignment::load(&args.topic_assignment)?;

    std::fs::create_dir_all(&args.output_dir)
        .map_err(|e| Error::io(args.output_dir.as_path(), e))?;
    let tmp_dir = tempfile::TempDir::new().map_err(|e| Error::io("<tempdir>", e))?;

    let csv_writers = CsvWriters::spawn(&args.output_dir, args.filter_bots, fail.clone());

    let (bipartite_tx, bipartite_rx) =
        crossbeam_channel::bounded::<(u32, FxHashMap<u32, f64>)>(4096);
    let ingest_fail = fail.clone();
    let ingest_handle = std::thread::spawn(move || {
        let mut filter = DegreeFilter::new();
        let mut collected = Vec::new();
        while let Ok((article_id, weights)) = bipartite_rx.recv() {
            if ingest_fail.is_cancelled() {
                break;
            }
            filter.observe(&weights);
            collected.push((article_id, weights));
        }
        (filter, collected)
    });

    let mut seen = HashSet::new();
    let ingest_result = (|| -> Result<()> {
        ingest_topics(
            args,
            &topic_assignment,
            &bot_blacklist,
            &csv_writers,
            &bipartite_tx,
            &mut seen,
            &fail,
        )?;
        ingest_articles(
            args,
            &topic_assignment,
            &bot_blacklist,
            &csv_writers,
            &bipartite_tx,
            &mut seen,
            &fail,
        )
    })();

    drop(bipartite_tx);
    let (filter, collected) = ingest_handle
        .join()
        .unwrap_or_else(|_| (DegreeFilter::new(), Vec::new()));

    if let Err(e) = ingest_result {
        let first = fail.fail(e);
        let _ = csv_writers.finish();
        return Err(first);
    }

    let surviving_users = filter.finish();
    let edges = bipartite::build_edges(
        collected.iter().map(|(id, weights)| (*id, weights)),
        &surviving_users,
    );

    let mut sort_config = SortConfig::new(tmp_dir.path());
    if let Some(path) = &args.sort_path {
        sort_config.sort_path = path.clone();
    }
    sort_config.memory_budget = args.sort_memory.clone();

    let top_k_result = (|| -> Result<()> {
        let sorted = crate::extsort::sort_edges(edges, &sort_config, &fail)?;
        let workers = 10 * std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let links = bipartite::project_top_k(sorted, args.top_k, workers, &fail)?;
        for vertex_links in links {
            if csv_writers.socialjumps_tx.send(vertex_links).is_err() {
                return Err(Error::Cancelled);
            }
        }
        Ok(())
    })();

    let finish_result = csv_writers.finish();

    top_k_result?;
    finish_result?;
    fail.into_result()
}

fn ingest_topics(
    args: &RunArgs,
    topic_assignment: &TopicAssignment,
    bot_blacklist: &BotBlacklist,
    csv_writers: &CsvWriters,
    bipartite_tx: &EdgeSender,
    seen: &mut HashSet<u32>,
    fail: &FailureCoordinator,
) -> Result<()> {
    let topic_ids: HashSet<u32> = topic_assignment.topic_ids_in_order().into_iter().collect();
    if topic_ids.is_empty() {
        return Ok(());
    }

    let mut reader = DumpParser::new(dump::open_dump(&args.dump)?);
    while let Some(raw) = reader.next_page()? {
        if fail.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if !topic_ids.contains(&raw.id) || !seen.insert(raw.id) {
            continue;
        }
        let topic_id = raw.id;
        emit_article(raw, topic_id, csv_writers, bipartite_tx, bot_blacklist, fail)?;
    }
    Ok(())
}

fn ingest_articles(
    args: &RunArgs,
    topic_assignment: &TopicAssignment,
    bot_blacklist: &BotBlacklist,
    csv_writers: &CsvWriters,
    bipartite_tx: &EdgeSender,
    seen: &mut HashSet<u32>,
    fail: &FailureCoordinator,
) -> Result<()> {
    let mut reader = DumpParser::new(dump::open_dump(&args.dump)?);
    while let Some(raw) = reader.next_page()? {
        if fail.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if !seen.insert(raw.id) {
            continue;
        }
        let Some(topic_id) = topic_assignment.topic_for(raw.id) else {
            continue;
        };
        emit_article(raw, topic_id, csv_writers, bipartite_tx, bot_blacklist, fail)?;
    }
    Ok(())
}

fn emit_article(
    raw: RawPage,
    topic_id: u32,
    csv_writers: &CsvWriters,
    bipartite_tx: &EdgeSender,
    bot_blacklist: &BotBlacklist,
    fail: &FailureCoordinator,
) -> Result<()> {
    let Some(AnalyzedArticle {
        page,
        revisions,
        user_weights,
    }) = analyzer::analyze(raw, topic_id, |id| bot_blacklist.is_bot(id))
    else {
        return Ok(());
    };

    for revision in revisions {
        if fail.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if csv_writers.revisions_tx.send(revision).is_err() {
            return Err(Error::Cancelled);
        }
    }

    send_page_and_edges(page, user_weights, csv_writers, bipartite_tx, fail)
}

/// Sends the page record and its user-weight map to their respective
/// channels, non-deterministically picking whichever is ready first, until
/// both have gone through (or cancellation is observed).
fn send_page_and_edges(
    page: Page,
    user_weights: FxHashMap<u32, f64>,
    csv_writers: &CsvWriters,
    bipartite_tx: &EdgeSender,
    fail: &FailureCoordinator,
) -> Result<()> {
    let article_id = page.id;
    let mut page_slot = Some(page);
    let mut edge_slot = Some((article_id, user_weights));

    loop {
        if page_slot.is_none() && edge_slot.is_none() {
            return Ok(());
        }
        if fail.is_cancelled() {
            return Err(Error::Cancelled);
        }
        crossbeam_channel::select! {
            send(csv_writers.pages_tx, page_slot.clone().unwrap()) -> res if page_slot.is_some() => {
                if res.is_err() {
                    return Err(Error::Cancelled);
                }
                page_slot = None;
            },
            send(bipartite_tx, edge_slot.clone().unwrap()) -> res if edge_slot.is_some() => {
                if res.is_err() {
                    return Err(Error::Cancelled);
                }
                edge_slot = None;
            },
            default(std::time::Duration::from_millis(50)) => {},
        }
    }
}
