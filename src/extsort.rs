//! External sort bridge: orders the filtered bipartite edges by
//! `(article_id, user_id)` using the system `sort` utility, to bound memory
//! independently of the edge count; falls back to an in-memory sort when no
//! sort binary is available. The contract is the output order, not the
//! mechanism, so callers never need to know which path ran.

use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

use crate::bipartite::Edge;
use crate::error::{Error, Result};
use crate::fail::FailureCoordinator;

#[derive(Debug, Clone)]
pub struct SortConfig {
    pub sort_path: PathBuf,
    pub temp_dir: PathBuf,
    /// Memory budget passed to `sort -S`, e.g. `"1G"`.
    pub memory_budget: Option<String>,
}

impl SortConfig {
    pub fn new(temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            sort_path: PathBuf::from("sort"),
            temp_dir: temp_dir.into(),
            memory_budget: None,
        }
    }
}

/// Sorts `edges` by `(article_id, user_id)` ascending.
pub fn sort_edges(edges: Vec<Edge>, config: &SortConfig, fail: &FailureCoordinator) -> Result<Vec<Edge>> {
    match spawn_sort(config) {
        Ok(child) => run_subprocess_sort(child, edges, fail),
        Err(e) => {
            tracing::warn!(
                error = %e,
                path = %config.sort_path.display(),
                "external sort unavailable, falling back to in-memory sort"
            );
            Ok(in_memory_sort(edges))
        }
    }
}

fn in_memory_sort(mut edges: Vec<Edge>) -> Vec<Edge> {
    edges.sort_by(|a, b| (a.article_id, a.user_id).cmp(&(b.article_id, b.user_id)));
    edges
}

fn spawn_sort(config: &SortConfig) -> std::io::Result<Child> {
    Command::new(&config.sort_path)
        .arg("-k1,1n")
        .arg("-k2,2n")
        .arg("--temporary-directory")
        .arg(&config.temp_dir)
        .args(config.memory_budget.iter().flat_map(|m| ["-S", m]))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
}

/// Runs the feeder/reader/waiter thread triple described in the design: a
/// feeder writes `"A B W"` lines and closes stdin, a reader parses sorted
/// lines back into edges, and this thread collects the exit status. Either
/// side observing cancellation stops early; the subprocess is killed before
/// `wait()` if the run was cancelled mid-flight.
fn run_subprocess_sort(
    mut child: Child,
    edges: Vec<Edge>,
    fail: &FailureCoordinator,
) -> Result<Vec<Edge>> {
    let stdin = child.stdin.take().expect("piped stdin");
    let stdout = child.stdout.take().expect("piped stdout");
    let mut stderr = child.stderr.take().expect("piped stderr");

    let feed_fail = fail.clone();
    let feeder = std::thread::spawn(move || {
        let mut writer = BufWriter::new(stdin);
        for edge in &edges {
            if feed_fail.is_cancelled() {
                break;
            }
            if writeln!(writer, "{} {} {}", edge.article_id, edge.user_id, edge.weight).is_err() {
                break;
            }
        }
    });

    let stderr_reader = std::thread::spawn(move || {
        let mut buf = String::new();
        let _ = stderr.read_to_string(&mut buf);
        buf
    });

    let read_fail = fail.clone();
    let reader = std::thread::spawn(move || -> Result<Vec<Edge>> {
        let mut out = Vec::new();
        for line in BufReader::new(stdout).lines() {
            if read_fail.is_cancelled() {
                break;
            }
            let line = line.map_err(|e| Error::io(PathBuf::from("sort stdout"), e))?;
            out.push(parse_edge_line(&line)?);
        }
        Ok(out)
    });

    let _ = feeder.join();
    let sorted = reader.join().unwrap_or_else(|_| {
        Err(Error::Subprocess {
            program: "sort".into(),
            detail: "reader thread panicked".into(),
        })
    });
    let stderr_text = stderr_reader.join().unwrap_or_default();

    if fail.is_cancelled() {
        let _ = child.kill();
        let _ = child.wait();
        return Err(Error::Cancelled);
    }

    let status = child
        .wait()
        .map_err(|e| Error::io(PathBuf::from("sort"), e))?;

    if !status.success() {
        return Err(Error::Subprocess {
            program: "sort".into(),
            detail: stderr_text.trim().to_string(),
        });
    }

    sorted
}

fn parse_edge_line(line: &str) -> Result<Edge> {
    let mut fields = line.split_whitespace();
    let article_id = fields
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::InputFormat(format!("malformed sort output line: {line:?}")))?;
    let user_id = fields
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::InputFormat(format!("malformed sort output line: {line:?}")))?;
    let weight = fields
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::InputFormat(format!("malformed sort output line: {line:?}")))?;
    Ok(Edge {
        article_id,
        user_id,
        weight,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_line() {
        let edge = parse_edge_line("3 7 12.5").unwrap();
        assert_eq!(edge.article_id, 3);
        assert_eq!(edge.user_id, 7);
        assert_eq!(edge.weight, 12.5);
    }

    #[test]
    fn rejects_a_short_line() {
        assert!(parse_edge_line("3 7").is_err());
    }

    #[test]
    fn falls_back_to_in_memory_sort_when_binary_missing() {
        let fail = FailureCoordinator::new();
        let config = SortConfig {
            sort_path: PathBuf::from("/definitely/not/a/real/sort/binary"),
            temp_dir: std::env::temp_dir(),
            memory_budget: None,
        };
        let edges = vec![
            Edge { article_id: 2, user_id: 1, weight: 1.0 },
            Edge { article_id: 1, user_id: 2, weight: 1.0 },
            Edge { article_id: 1, user_id: 1, weight: 1.0 },
        ];
        let sorted = sort_edges(edges, &config, &fail).unwrap();
        assert_eq!(
            sorted.iter().map(|e| (e.article_id, e.user_id)).collect::<Vec<_>>(),
            vec![(1, 1), (1, 2), (2, 1)]
        );
    }
}
