//! Revision analyzer: turns one article's raw revision sequence into the
//! annotated `Revision` rows the exporter writes, plus the per-user weight map
//! the bipartite projector consumes.
//!
//! One analyzer instance owns exactly one article: the SHA1-to-serial map and
//! the running weight state never cross article boundaries, so this type is
//! neither `Sync` nor shared -- each worker thread in the pool constructs a
//! fresh one per article.

use std::collections::HashMap;

use rustc_hash::FxHashMap;

use crate::dump::RawPage;
use crate::types::{AnalyzedArticle, Page, Revision};

const ABSTRACT_DISPLAY_CHARS: usize = 280;

/// Analyzes one raw page into an [`AnalyzedArticle`], or `None` if it has no
/// revisions (dropped per the dedup/empty-article rule).
///
/// `topic_id` is resolved by the caller from the topic assignment interface
/// before calling in; `is_bot` classifies a `UserID` against the bot
/// blacklist.
pub fn analyze(
    raw: RawPage,
    topic_id: u32,
    is_bot: impl Fn(u32) -> bool,
) -> Option<AnalyzedArticle> {
    if raw.revisions.is_empty() {
        return None;
    }

    let page_id = raw.id;
    let n = raw.revisions.len();
    let mut revisions = Vec::with_capacity(n);
    let mut is_revert = vec![0u32; n];
    let mut first_seen: HashMap<crate::types::Sha1Hash, usize> = HashMap::new();
    let mut prev_weight = 0.0_f64;

    for (s, raw_rev) in raw.revisions.into_iter().enumerate() {
        let weight = raw_rev.weight;
        let diff = weight - prev_weight;
        prev_weight = weight;

        let mut revert_count = 0u32;
        if let Some(sha1) = &raw_rev.sha1 {
            if sha1.len() == 31 {
                if let Some(&first) = first_seen.get(sha1) {
                    revert_count = (s - first - 1) as u32;
                }
                first_seen.insert(sha1.clone(), s);
            }
        }
        is_revert[s] = revert_count;

        revisions.push(Revision {
            page_id,
            serial_id: s as u32,
            user_id: raw_rev.user_id,
            is_bot: raw_rev.user_id.map(&is_bot).unwrap_or(false),
            weight,
            diff,
            is_revert: revert_count,
            is_reverted: true,
            timestamp: raw_rev.timestamp,
            sha1: raw_rev.sha1,
        });
    }

    propagate_reverted(&mut revisions, &is_revert);
    let user_weights = derive_user_weights(&revisions);

    let page = Page {
        id: page_id,
        title: raw.title,
        abstract_text: compact_str::CompactString::from(
            raw.abstract_snippet
                .chars()
                .take(ABSTRACT_DISPLAY_CHARS)
                .collect::<String>(),
        ),
        topic_id,
    };

    Some(AnalyzedArticle {
        page,
        revisions,
        user_weights,
    })
}

/// Walks backwards from the last serial, clearing `is_reverted` at every
/// landed index; the step size is `1 + IsRevert` at the current index, so a
/// revert that collapsed several revisions skips straight past the ones it
/// swallowed without visiting them.
fn propagate_reverted(revisions: &mut [Revision], is_revert: &[u32]) {
    if revisions.is_empty() {
        return;
    }
    let mut i = revisions.len() - 1;
    loop {
        revisions[i].is_reverted = false;
        let step = 1 + is_revert[i] as usize;
        if step > i {
            break;
        }
        i -= step;
    }
}

fn derive_user_weights(revisions: &[Revision]) -> FxHashMap<u32, f64> {
    let mut weights: FxHashMap<u32, f64> = FxHashMap::default();

    for rev in revisions {
        if rev.is_bot {
            continue;
        }
        let Some(user_id) = rev.user_id else {
            continue;
        };
        if user_id == crate::types::ANONYMOUS_USER_ID {
            continue;
        }

        let w = weights.entry(user_id).or_insert(0.0);
        if rev.is_revert > 0 || rev.is_reverted {
            *w = w.max(1.0);
        } else if rev.diff <= 100.0 {
            *w = w.max(10.0);
        } else if *w <= 10.0 {
            *w = (0.0_f64 + rev.diff / 10.0).min(100.0);
        } else {
            *w = (*w + rev.diff / 10.0).min(100.0);
        }
    }

    weights
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dump::RawRevision;
    use chrono::{TimeZone, Utc};
    use compact_str::CompactString;

    fn ts(secs: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn raw(id: u32, title: &str, revisions: Vec<RawRevision>) -> RawPage {
        RawPage {
            id,
            namespace: 0,
            title: CompactString::from(title),
            revisions,
            abstract_snippet: CompactString::default(),
        }
    }

    fn rev(user_id: u32, weight: f64, sha1: Option<&str>, t: i64) -> RawRevision {
        RawRevision {
            user_id: Some(user_id),
            timestamp: ts(t),
            sha1: sha1.map(CompactString::from),
            weight,
        }
    }

    const H: &str = "000000000000000000000000000000H";

    #[test]
    fn scenario_e1_revert_collapses_middle_revision() {
        let page = raw(
            1,
            "A",
            vec![
                rev(10, 3.0, Some(H), 0),
                rev(11, 4.0, None, 1),
                rev(10, 3.0, Some(H), 2),
            ],
        );
        let analyzed = analyze(page, 9, |_| false).unwrap();
        let rows = analyzed.revisions;
        assert_eq!(rows[0].diff, 3.0);
        assert_eq!(rows[0].is_revert, 0);
        assert!(!rows[0].is_reverted);

        assert_eq!(rows[1].diff, 1.0);
        assert_eq!(rows[1].is_revert, 0);
        assert!(rows[1].is_reverted);

        assert_eq!(rows[2].diff, -1.0);
        assert_eq!(rows[2].is_revert, 1);
        assert!(!rows[2].is_reverted);
    }

    #[test]
    fn scenario_e2_anonymous_and_bot_rows() {
        let mut page = raw(
            2,
            "B",
            vec![rev(0, 10.0, None, 0), rev(7, 20.0, None, 1), rev(5, 15.0, None, 2)],
        );
        page.revisions[0].user_id = None;
        let analyzed = analyze(page, 9, |id| id == 7).unwrap();
        assert_eq!(analyzed.revisions[0].user_id, None);
        assert!(analyzed.revisions[1].is_bot);
        assert!(!analyzed.revisions[2].is_bot);
    }

    #[test]
    fn scenario_e3_user_weight_resets_then_accumulates() {
        // Diffs +5, +200, -50: the first pins w at 10 (Diff <= 100), the
        // second resets and adds 20 (w <= 10 and Diff > 100), the third keeps
        // the running total since -50 <= 100 only raises the floor.
        let page = raw(
            3,
            "C",
            vec![
                rev(3, 5.0, None, 0),
                rev(3, 205.0, None, 1),
                rev(3, 155.0, None, 2),
            ],
        );
        let analyzed = analyze(page, 9, |_| false).unwrap();
        assert_eq!(analyzed.user_weights.get(&3), Some(&20.0));
    }

    #[test]
    fn single_revision_article_has_zero_revert_state() {
        let page = raw(4, "D", vec![rev(1, 42.0, None, 0)]);
        let analyzed = analyze(page, 9, |_| false).unwrap();
        assert_eq!(analyzed.revisions.len(), 1);
        assert_eq!(analyzed.revisions[0].diff, 42.0);
        assert_eq!(analyzed.revisions[0].is_revert, 0);
        assert!(!analyzed.revisions[0].is_reverted);
    }

    #[test]
    fn empty_article_is_dropped() {
        let page = raw(5, "E", vec![]);
        assert!(analyze(page, 9, |_| false).is_none());
    }

    #[test]
    fn short_sha1_never_triggers_revert_tracking() {
        let page = raw(
            6,
            "F",
            vec![rev(1, 10.0, Some("short"), 0), rev(1, 10.0, Some("short"), 1)],
        );
        let analyzed = analyze(page, 9, |_| false).unwrap();
        assert_eq!(analyzed.revisions[1].is_revert, 0);
    }

    proptest::proptest! {
        /// §8 round-trip property: `is_reverted` and `is_revert` are two views
        /// of the same collapse relationship, for any sequence of SHA1 hashes
        /// drawn from a small alphabet (so reverts happen by chance, the way
        /// real edit wars repeat a handful of prior revision texts).
        #[test]
        fn reverted_and_revert_are_mutually_consistent(
            shas in proptest::collection::vec(0u8..4, 1..40),
        ) {
            let revisions: Vec<RawRevision> = shas
                .iter()
                .enumerate()
                .map(|(i, &sha)| rev(1, (i + 1) as f64, Some(format!("{sha}aaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").as_str()), i as i64))
                .collect();
            let page = raw(1, "P", revisions);
            let analyzed = analyze(page, 9, |_| false).unwrap();
            let rows = &analyzed.revisions;

            for (i, row) in rows.iter().enumerate() {
                if row.is_revert > 0 {
                    let collapsed_start = i - row.is_revert as usize - 1;
                    let earlier = &rows[collapsed_start];
                    proptest::prop_assert_eq!(&earlier.sha1, &row.sha1);
                }
            }

            // Every serial is either a revert point or was swallowed by one;
            // walking the same backwards stride used by propagate_reverted
            // must land on exactly the set of `is_reverted = false` rows.
            let mut landed = vec![false; rows.len()];
            let mut i = rows.len() - 1;
            loop {
                landed[i] = true;
                let step = 1 + rows[i].is_revert as usize;
                if step > i {
                    break;
                }
                i -= step;
            }
            for (i, row) in rows.iter().enumerate() {
                proptest::prop_assert_eq!(row.is_reverted, !landed[i]);
            }
        }

        /// Serial ids are always a gapless, strictly increasing `0..n` run,
        /// regardless of how many reverts happen along the way.
        #[test]
        fn serial_ids_are_always_gapless(
            shas in proptest::collection::vec(0u8..4, 1..40),
        ) {
            let revisions: Vec<RawRevision> = shas
                .iter()
                .enumerate()
                .map(|(i, &sha)| rev(1, (i + 1) as f64, Some(format!("{sha}aaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").as_str()), i as i64))
                .collect();
            let page = raw(1, "P", revisions);
            let analyzed = analyze(page, 9, |_| false).unwrap();
            let serials: Vec<u32> = analyzed.revisions.iter().map(|r| r.serial_id).collect();
            let expected: Vec<u32> = (0..serials.len() as u32).collect();
            proptest::prop_assert_eq!(serials, expected);
        }
    }
}
