//! CSV exporter: fans the pipeline's three logical output streams -- pages,
//! revisions, and similarity jumps -- out to their own files, each on its own
//! writer thread behind a bounded channel.

use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use chrono::SecondsFormat;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::fail::FailureCoordinator;
use crate::types::{Page, Revision, VertexLinks};

/// Channel capacity for each of the three writer streams (§5).
const CHANNEL_CAPACITY: usize = 4096;

#[derive(Serialize)]
struct PageRow {
    id: u32,
    title: String,
    #[serde(rename = "abstract")]
    abstract_text: String,
    topicid: u32,
}

#[derive(Serialize)]
struct RevisionRow {
    pageid: u32,
    id: u32,
    userid: Option<u32>,
    isbot: bool,
    weight: f64,
    diff: f64,
    isrevert: u32,
    isreverted: bool,
    timestamp: String,
}

#[derive(Serialize)]
struct SocialJumpsRow {
    id: u32,
    socialjumps: String,
}

/// The three sender handles the rest of the pipeline feeds; dropping all
/// clones of a sender lets its writer thread finish and close its file.
pub struct CsvWriters {
    pub pages_tx: crossbeam_channel::Sender<Page>,
    pub revisions_tx: crossbeam_channel::Sender<Revision>,
    pub socialjumps_tx: crossbeam_channel::Sender<VertexLinks>,
    handles: Vec<JoinHandle<Result<()>>>,
}

impl CsvWriters {
    pub fn spawn(output_dir: &Path, filter_bots: bool, fail: FailureCoordinator) -> Self {
        let (pages_tx, pages_rx) = crossbeam_channel::bounded(CHANNEL_CAPACITY);
        let (revisions_tx, revisions_rx) = crossbeam_channel::bounded(CHANNEL_CAPACITY);
        let (socialjumps_tx, socialjumps_rx) = crossbeam_channel::bounded(CHANNEL_CAPACITY);

        let pages_path = output_dir.join("pages.csv");
        let revisions_path = output_dir.join("revisions.csv");
        let socialjumps_path = output_dir.join("socialjumps.csv");

        let pages_fail = fail.clone();
        let pages_handle = std::thread::spawn(move || {
            write_stream(&pages_path, pages_rx, &pages_fail, |w, page: Page| {
                w.serialize(PageRow {
                    id: page.id,
                    title: page.title.to_string(),
                    abstract_text: page.abstract_text.to_string(),
                    topicid: page.topic_id,
                })
            })
        });

        let revisions_fail = fail.clone();
        let revisions_handle = std::thread::spawn(move || {
            write_stream(
                &revisions_path,
                revisions_rx,
                &revisions_fail,
                move |w, rev: Revision| {
                    if filter_bots && rev.is_bot {
                        return Ok(());
                    }
                    w.serialize(RevisionRow {
                        pageid: rev.page_id,
                        id: rev.serial_id,
                        userid: rev.user_id,
                        isbot: rev.is_bot,
                        weight: rev.weight,
                        diff: rev.diff,
                        isrevert: rev.is_revert,
                        isreverted: rev.is_reverted,
                        timestamp: rev.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
                    })
                },
            )
        });

        let socialjumps_fail = fail.clone();
        let socialjumps_handle = std::thread::spawn(move || {
            write_stream(
                &socialjumps_path,
                socialjumps_rx,
                &socialjumps_fail,
                |w, links: VertexLinks| {
                    w.serialize(SocialJumpsRow {
                        id: links.from,
                        socialjumps: format_social_jumps(&links.to),
                    })
                },
            )
        });

        Self {
            pages_tx,
            revisions_tx,
            socialjumps_tx,
            handles: vec![pages_handle, revisions_handle, socialjumps_handle],
        }
    }

    /// Drops the sender handles (closing every writer's channel) and waits
    /// for all three writer threads, returning the first error encountered.
    pub fn finish(self) -> Result<()> {
        drop(self.pages_tx);
        drop(self.revisions_tx);
        drop(self.socialjumps_tx);

        let mut first_err = None;
        for handle in self.handles {
            let result = handle.join().unwrap_or_else(|_| {
                Err(Error::InvariantViolation("csv writer thread panicked".into()))
            });
            if let Err(e) = result {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn format_social_jumps(neighbors: &[u32]) -> String {
    let joined = neighbors
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    format!("{{{joined}}}")
}

fn write_stream<T, F>(
    path: &PathBuf,
    rx: crossbeam_channel::Receiver<T>,
    fail: &FailureCoordinator,
    mut serialize_row: F,
) -> Result<()>
where
    F: FnMut(&mut csv::Writer<std::io::BufWriter<std::fs::File>>, T) -> csv::Result<()>,
{
    let file = std::fs::File::create(path).map_err(|e| Error::io(path.clone(), e))?;
    let mut writer = csv::Writer::from_writer(std::io::BufWriter::new(file));

    while let Ok(row) = rx.recv() {
        if fail.is_cancelled() {
            break;
        }
        serialize_row(&mut writer, row).map_err(|e| Error::Io {
            path: path.clone(),
            source: std::io::Error::new(std::io::ErrorKind::Other, e),
        })?;
    }

    writer
        .flush()
        .map_err(|e| Error::io(path.clone(), e))?;
    Ok(())
}
