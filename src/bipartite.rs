//! Bipartite projector: turns the per-article `UserWeightMap`s emitted by the
//! analyzer into an article<->article similarity graph, then extracts a
//! top-K neighbor list per article.
//!
//! Phase 1 (ingest/filter) and phase 3 (project/top-K) run in this process;
//! phase 2 (ordering the filtered edges) is delegated to [`crate::extsort`].
//! The projection itself -- folding shared editors into a weight between two
//! articles -- uses the standard shared-neighbor measure (sum of the smaller
//! of the two per-user weights over every user the pair of articles has in
//! common); nothing in the surrounding design pins down a different formula.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{Error, Result};
use crate::extsort;
use crate::fail::FailureCoordinator;
use crate::types::VertexLinks;

/// One edge of the article<->user bipartite graph, as handed to the external
/// sort.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    pub article_id: u32,
    pub user_id: u32,
    pub weight: f64,
}

/// Default top-K bound (§8).
pub const DEFAULT_TOP_K: usize = 10;

/// Percentile used to cap user degree (§4.3 phase 1).
const DEGREE_PERCENTILE: f64 = 0.997;

/// Phase 1: accumulates per-user page counts across every article's
/// `UserWeightMap`, then decides which users survive into the edge stream.
#[derive(Default)]
pub struct DegreeFilter {
    page_count: FxHashMap<u32, u32>,
}

impl DegreeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, user_weights: &FxHashMap<u32, f64>) {
        for &user_id in user_weights.keys() {
            *self.page_count.entry(user_id).or_insert(0) += 1;
        }
    }

    /// Computes the 99.7th-percentile degree and returns the set of users
    /// with `2 <= degree <= percentile`.
    pub fn finish(self) -> FxHashSet<u32> {
        let mut counts: Vec<u32> = self.page_count.values().copied().collect();
        counts.sort_unstable();
        let percentile = percentile_of(&counts, DEGREE_PERCENTILE);

        self.page_count
            .into_iter()
            .filter(|&(_, count)| count >= 2 && count <= percentile)
            .map(|(user_id, _)| user_id)
            .collect()
    }
}

fn percentile_of(sorted_counts: &[u32], pct: f64) -> u32 {
    if sorted_counts.is_empty() {
        return 0;
    }
    let rank = ((sorted_counts.len() as f64) * pct).ceil() as usize;
    let idx = rank.saturating_sub(1).min(sorted_counts.len() - 1);
    sorted_counts[idx]
}

/// Builds the full article<->user edge list for the users that survive
/// [`DegreeFilter::finish`].
pub fn build_edges<'a>(
    articles: impl Iterator<Item = (u32, &'a FxHashMap<u32, f64>)>,
    surviving_users: &FxHashSet<u32>,
) -> Vec<Edge> {
    let mut edges = Vec::new();
    for (article_id, user_weights) in articles {
        for (&user_id, &weight) in user_weights {
            if surviving_users.contains(&user_id) {
                edges.push(Edge {
                    article_id,
                    user_id,
                    weight,
                });
            }
        }
    }
    edges
}

/// Phase 3: given edges already ordered by `(article_id, user_id)` (the
/// external sort's postcondition), build the similarity graph and emit each
/// article's top-K neighbor list.
///
/// Runs the extraction across `workers` OS threads, matching the `W = 10 x
/// hardware-thread-count` sizing the design calls for; callers typically pass
/// `10 * std::thread::available_parallelism()`.
pub fn project_top_k(
    sorted_edges: Vec<Edge>,
    top_k: usize,
    workers: usize,
    fail: &FailureCoordinator,
) -> Result<Vec<VertexLinks>> {
    if sorted_edges.is_empty() {
        return Err(Error::InvariantViolation(
            "bipartite graph has no surviving edges".into(),
        ));
    }

    let graph = Arc::new(Graph::build(sorted_edges));
    let article_count = graph.new2old.len();

    let (id_tx, id_rx) = crossbeam_channel::bounded::<u32>(1024);
    let (out_tx, out_rx) = crossbeam_channel::bounded::<VertexLinks>(1024);

    std::thread::scope(|scope| {
        for _ in 0..workers.max(1) {
            let graph = Arc::clone(&graph);
            let id_rx = id_rx.clone();
            let out_tx = out_tx.clone();
            let fail = fail.clone();
            scope.spawn(move || {
                while let Ok(new_id) = id_rx.recv() {
                    if fail.is_cancelled() {
                        break;
                    }
                    let links = graph.top_k_for(new_id, top_k);
                    if out_tx.send(links).is_err() {
                        break;
                    }
                }
            });
        }
        drop(out_tx);
        drop(id_rx);

        // Feed ids from a dedicated thread so the id and result channels drain
        // concurrently -- with both bounded at 1024, feeding and draining on
        // the same thread would deadlock once the run grows past a couple of
        // thousand articles (workers block on a full out_tx, so they stop
        // draining id_rx, so the feeder below blocks on a full id_tx).
        let feed_fail = fail.clone();
        scope.spawn(move || {
            for new_id in 0..article_count as u32 {
                if feed_fail.is_cancelled() {
                    break;
                }
                if id_tx.send(new_id).is_err() {
                    break;
                }
            }
        });

        let mut results: Vec<VertexLinks> = out_rx.iter().collect();
        results.sort_unstable_by_key(|links| links.from);
        if fail.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(results)
    })
}

/// Read-only in-memory view of the filtered, sorted bipartite graph, shared
/// (`Arc`) across the top-K worker pool.
struct Graph {
    new2old: Vec<u32>,
    /// `new article id -> [(user_id, weight)]`, sorted edges grouped by
    /// article (no further sort needed -- the input is already grouped).
    article_users: Vec<Vec<(u32, f64)>>,
    user_articles: FxHashMap<u32, Vec<(u32, f64)>>,
}

impl Graph {
    fn build(sorted_edges: Vec<Edge>) -> Self {
        let mut new2old = Vec::new();
        let mut article_users: Vec<Vec<(u32, f64)>> = Vec::new();
        let mut old2new = FxHashMap::default();

        for edge in &sorted_edges {
            let new_id = *old2new.entry(edge.article_id).or_insert_with(|| {
                new2old.push(edge.article_id);
                article_users.push(Vec::new());
                (new2old.len() - 1) as u32
            });
            article_users[new_id as usize].push((edge.user_id, edge.weight));
        }

        let mut user_articles: FxHashMap<u32, Vec<(u32, f64)>> = FxHashMap::default();
        for (new_id, users) in article_users.iter().enumerate() {
            for &(user_id, weight) in users {
                user_articles
                    .entry(user_id)
                    .or_default()
                    .push((new_id as u32, weight));
            }
        }

        Self {
            new2old,
            article_users,
            user_articles,
        }
    }

    fn top_k_for(&self, new_id: u32, k: usize) -> VertexLinks {
        let mut similarity: FxHashMap<u32, f64> = FxHashMap::default();

        for &(user_id, weight_here) in &self.article_users[new_id as usize] {
            if let Some(neighbors) = self.user_articles.get(&user_id) {
                for &(neighbor_new_id, weight_there) in neighbors {
                    if neighbor_new_id == new_id {
                        continue;
                    }
                    let contribution = weight_here.min(weight_there);
                    *similarity.entry(neighbor_new_id).or_insert(0.0) += contribution;
                }
            }
        }

        let mut heap: BinaryHeap<std::cmp::Reverse<HeapEdge>> = BinaryHeap::with_capacity(k + 1);
        for (neighbor, weight) in similarity {
            let candidate = HeapEdge { weight, neighbor };
            if heap.len() < k {
                heap.push(std::cmp::Reverse(candidate));
            } else if let Some(std::cmp::Reverse(top)) = heap.peek() {
                if candidate.weight > top.weight {
                    heap.pop();
                    heap.push(std::cmp::Reverse(candidate));
                }
            }
        }

        let mut to: Vec<u32> = heap
            .into_iter()
            .map(|std::cmp::Reverse(e)| self.new2old[e.neighbor as usize])
            .collect();
        to.sort_unstable();

        VertexLinks {
            from: self.new2old[new_id as usize],
            to,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct HeapEdge {
    weight: f64,
    neighbor: u32,
}

impl PartialEq for HeapEdge {
    fn eq(&self, other: &Self) -> bool {
        self.weight == other.weight && self.neighbor == other.neighbor
    }
}
impl Eq for HeapEdge {}

impl PartialOrd for HeapEdge {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEdge {
    fn cmp(&self, other: &Self) -> Ordering {
        self.weight
            .partial_cmp(&other.weight)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.neighbor.cmp(&self.neighbor))
    }
}

/// Convenience entry point wiring phases 1-3 together: observe every
/// article's user-weight map, filter by degree, sort externally, then
/// project. Exists mainly so `pipeline.rs` has one call to make; unit tests
/// exercise the phases individually above `project_top_k`.
pub fn run(
    articles: &[(u32, FxHashMap<u32, f64>)],
    top_k: usize,
    workers: usize,
    sort_config: &extsort::SortConfig,
    fail: &FailureCoordinator,
) -> Result<Vec<VertexLinks>> {
    let mut filter = DegreeFilter::new();
    for (_, weights) in articles {
        filter.observe(weights);
    }
    let surviving = filter.finish();

    let edges = build_edges(
        articles.iter().map(|(id, weights)| (*id, weights)),
        &surviving,
    );
    let sorted = extsort::sort_edges(edges, sort_config, fail)?;
    project_top_k(sorted, top_k, workers, fail)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(a: u32, u: u32, w: f64) -> Edge {
        Edge {
            article_id: a,
            user_id: u,
            weight: w,
        }
    }

    #[test]
    fn degree_filter_drops_singletons_and_outliers() {
        let mut filter = DegreeFilter::new();
        let mut one_page = FxHashMap::default();
        one_page.insert(1u32, 5.0);
        filter.observe(&one_page);

        let mut two_pages_a = FxHashMap::default();
        two_pages_a.insert(2u32, 5.0);
        filter.observe(&two_pages_a);
        filter.observe(&two_pages_a);

        let surviving = filter.finish();
        assert!(!surviving.contains(&1));
        assert!(surviving.contains(&2));
    }

    #[test]
    fn top_k_keeps_the_largest_weights_sorted_by_neighbor() {
        // Article 1 shares one user each with articles 2..=13 at weights 1..12.
        let mut sorted_edges = Vec::new();
        for (i, w) in (2u32..=13).zip(1..=12) {
            sorted_edges.push(edge(1, i, w as f64));
            sorted_edges.push(edge(i, i, w as f64));
        }
        sorted_edges.sort_by_key(|e| (e.article_id, e.user_id));

        let fail = FailureCoordinator::new();
        let result = project_top_k(sorted_edges, 10, 2, &fail).unwrap();
        let article_1 = result.iter().find(|v| v.from == 1).unwrap();
        assert_eq!(article_1.to.len(), 10);
        assert!(article_1.to.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn empty_graph_is_invariant_violation() {
        let fail = FailureCoordinator::new();
        let err = project_top_k(Vec::new(), 10, 1, &fail).unwrap_err();
        assert!(matches!(err, Error::InvariantViolation(_)));
    }
}
