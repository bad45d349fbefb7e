//! Sibling location and construction.
//!
//! A sister search classifies candidate siblings as `Twin` (identical
//! span), `Little` (self contains the candidate), or `Big` (the candidate
//! contains self). Twins short-circuit; otherwise the scan continues
//! looking for a twin while retaining the best non-twin match.

use indexmap::IndexMap;

use crate::config::Config;
use crate::error::Error;
use crate::feature::{Feature, Segments};
use crate::forest::{Forest, NodeId};

/// How a candidate sibling relates to self by position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SisterMatch {
    Twin,
    Little,
    Big,
}

impl SisterMatch {
    fn rank(self) -> u8 {
        match self {
            Self::Twin => 0,
            Self::Little => 1,
            Self::Big => 2,
        }
    }
}

fn classify_span(self_span: (u32, u32), cand_span: (u32, u32)) -> Option<SisterMatch> {
    let (ss, se) = self_span;
    let (cs, ce) = cand_span;
    if ss == cs && se == ce {
        Some(SisterMatch::Twin)
    } else if cs >= ss && ce <= se {
        Some(SisterMatch::Little)
    } else if cs <= ss && ce >= se {
        Some(SisterMatch::Big)
    } else {
        None
    }
}

/// Classification when self and the candidate share multi-line-ness. Two
/// multi-line features are twins only when their segment spans agree;
/// equal bounds with different segmentation count as a covering match.
fn classify_nodes(node: &Feature, cand: &Feature, multiline: bool) -> Option<SisterMatch> {
    if multiline {
        if node.spans() == cand.spans() {
            return Some(SisterMatch::Twin);
        }
        match classify_span((node.start, node.end), (cand.start, cand.end)) {
            Some(SisterMatch::Twin) => Some(SisterMatch::Big),
            other => other,
        }
    } else {
        classify_span((node.start, node.end), (cand.start, cand.end))
    }
}

fn consider(best: &mut Option<(SisterMatch, NodeId)>, m: SisterMatch, cand: NodeId) {
    match best {
        Some((held, _)) if held.rank() <= m.rank() => {}
        _ => *best = Some((m, cand)),
    }
}

/// Find an existing sibling of one of the `alts` types matching self by
/// position, respecting multi-line coalescing on either side.
#[must_use]
pub fn find_sister(forest: &Forest, config: &Config, n: NodeId, alts: &[String]) -> Option<NodeId> {
    let node = forest.get(n);
    let parent = node.parent_id()?;
    let self_multi = config.is_multiline(&node.type_key);
    let mut best: Option<(SisterMatch, NodeId)> = None;

    for alt in alts {
        let alt_multi = config.is_multiline(alt);
        let siblings: Vec<NodeId> = forest
            .get(parent)
            .child_ids()
            .iter()
            .copied()
            .filter(|&c| c != n && forest.get(c).type_key == *alt)
            .collect();

        if self_multi == alt_multi {
            for cand in siblings {
                if let Some(m) = classify_nodes(node, forest.get(cand), self_multi) {
                    if m == SisterMatch::Twin {
                        return Some(cand);
                    }
                    consider(&mut best, m, cand);
                }
            }
        } else if self_multi {
            // Each segment of self must be covered by some single-line
            // sibling.
            let mut matched: Option<NodeId> = None;
            let mut all_covered = true;
            for (s, e) in node.spans() {
                let hit = siblings.iter().copied().find(|&c| {
                    let f = forest.get(c);
                    f.start <= s && f.end >= e
                });
                match hit {
                    Some(c) => {
                        matched.get_or_insert(c);
                    }
                    None => {
                        all_covered = false;
                        break;
                    }
                }
            }
            if all_covered && let Some(c) = matched {
                return Some(c);
            }
        } else {
            // Self is single-line, candidates are multi-line: at least one
            // segment of a candidate must match self.
            for cand in siblings {
                let mut cand_best: Option<SisterMatch> = None;
                for span in forest.get(cand).spans() {
                    if let Some(m) = classify_span((node.start, node.end), span)
                        && cand_best.is_none_or(|held| m.rank() < held.rank())
                    {
                        cand_best = Some(m);
                    }
                }
                if let Some(m) = cand_best {
                    if m == SisterMatch::Twin {
                        return Some(cand);
                    }
                    consider(&mut best, m, cand);
                }
            }
        }
    }

    best.map(|(_, cand)| cand)
}

fn position_clone(node: &Feature, ftype: &str) -> Feature {
    let mut out = Feature::bare(
        node.seq_name.clone(),
        ftype.to_string(),
        node.start,
        node.end,
        node.strand,
    );
    out.source = node.source.clone();
    out.score = node.score.clone();
    out.phase = node.phase;
    if let Some(seg) = &node.segments {
        out.segments = Some(Segments {
            starts: seg.starts.clone(),
            ends: seg.ends.clone(),
            scores: seg.scores.clone(),
            phases: seg.phases.clone(),
            attrs: IndexMap::new(),
        });
    }
    out
}

/// Construct a sibling of type `alt` mirroring self. When self and `alt`
/// agree on multi-line-ness the positions are cloned wholesale; a
/// multi-line self with a single-line `alt` yields one sibling per
/// segment. A single-line self cannot grow a multi-line sister.
pub fn make_sister(
    forest: &mut Forest,
    config: &Config,
    n: NodeId,
    alt: &str,
) -> Result<NodeId, Error> {
    let node = forest.get(n).clone();
    let parent = node.parent_id().unwrap_or(forest.root());
    let self_multi = config.is_multiline(&node.type_key);
    let alt_multi = config.is_multiline(alt);

    if !self_multi && alt_multi {
        return Err(Error::Validation(format!(
            "cannot make a multi-line {alt} sister for single-line {} '{}'",
            node.ftype, node.id
        )));
    }

    if self_multi == alt_multi {
        let mut sister = position_clone(&node, alt);
        let id = forest.mint_id(alt);
        sister.set_id(id.clone());
        sister.name = id;
        sister.minted_id = true;
        if let Some(pa) = node.parent_attr() {
            sister
                .attributes
                .insert("Parent".to_string(), pa.clone());
        }
        return forest.insert(sister, parent);
    }

    // Multi-line self, single-line alt: one sibling per segment.
    let mut first = None;
    for (s, e) in node.spans() {
        let mut sister = Feature::bare(node.seq_name.clone(), alt.to_string(), s, e, node.strand);
        sister.source = node.source.clone();
        let id = forest.mint_id(alt);
        sister.set_id(id.clone());
        sister.name = id;
        sister.minted_id = true;
        if let Some(pa) = node.parent_attr() {
            sister
                .attributes
                .insert("Parent".to_string(), pa.clone());
        }
        let sid = forest.insert(sister, parent)?;
        first.get_or_insert(sid);
    }
    first.ok_or_else(|| {
        Error::Validation(format!(
            "{} '{}' has no segments to mirror into a {alt} sister",
            node.ftype, node.id
        ))
    })
}

/// Clone self's positions under self as a new child of type `alt`.
pub fn make_child(forest: &mut Forest, n: NodeId, alt: &str) -> Result<NodeId, Error> {
    let node = forest.get(n).clone();
    let mut child = position_clone(&node, alt);
    let id = forest.mint_id(alt);
    child.set_id(id.clone());
    child.name = id;
    child.minted_id = true;
    child.set_parent_attr(&node.id);
    forest.insert(child, n)
}

/// Create one feature of `new_type` under `anchor` for every gap between
/// consecutive `child_type` descendants. Gaps are strictly interior,
/// `[prev.end + 1, next.start - 1]`; empty and overlapping neighbours
/// produce nothing.
pub fn fill_gaps(
    forest: &mut Forest,
    anchor: NodeId,
    child_type: &str,
    new_type: &str,
) -> Result<Vec<NodeId>, Error> {
    let kids = forest.by_type(anchor, &child_type.to_lowercase());
    let spans: Vec<(u32, u32)> = kids
        .iter()
        .map(|&k| {
            let f = forest.get(k);
            (f.start, f.end)
        })
        .collect();
    let anchor_feat = forest.get(anchor).clone();

    let mut made = Vec::new();
    for pair in spans.windows(2) {
        let prev_end = pair[0].1;
        let next_start = pair[1].0;
        if next_start <= prev_end + 1 {
            continue;
        }
        let mut gap = Feature::bare(
            anchor_feat.seq_name.clone(),
            new_type.to_string(),
            prev_end + 1,
            next_start - 1,
            anchor_feat.strand,
        );
        gap.source = anchor_feat.source.clone();
        let id = forest.mint_id(new_type);
        gap.set_id(id.clone());
        gap.name = id;
        gap.minted_id = true;
        if !anchor_feat.id.is_empty() {
            gap.set_parent_attr(&anchor_feat.id);
        }
        made.push(forest.insert(gap, anchor)?);
    }
    Ok(made)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forest::ROOT;
    use crate::strand::Strand;

    fn feat(ftype: &str, id: &str, start: u32, end: u32) -> Feature {
        let mut f = Feature::bare(
            "chr1".to_string(),
            ftype.to_string(),
            start,
            end,
            Strand::Forward,
        );
        f.set_id(id.to_string());
        f.name = id.to_string();
        f
    }

    fn multiline_feat(ftype: &str, id: &str, spans: &[(u32, u32)]) -> Feature {
        let mut f = feat(ftype, id, spans[0].0, spans[0].1);
        for &(s, e) in &spans[1..] {
            f.insert_segment(&feat(ftype, id, s, e));
        }
        f
    }

    #[test]
    fn classify_spans() {
        assert_eq!(classify_span((10, 50), (10, 50)), Some(SisterMatch::Twin));
        assert_eq!(classify_span((10, 50), (20, 40)), Some(SisterMatch::Little));
        assert_eq!(classify_span((20, 40), (10, 50)), Some(SisterMatch::Big));
        assert_eq!(classify_span((10, 50), (40, 80)), None);
    }

    #[test]
    fn twin_short_circuits_over_big() {
        let mut forest = Forest::new();
        let config = Config::new();
        let parent = forest.insert(feat("mRNA", "m1", 1, 100), ROOT).unwrap();
        forest.insert(feat("cds", "big", 1, 90), parent).unwrap();
        let twin = forest.insert(feat("cds", "twin", 10, 50), parent).unwrap();
        let exon = forest.insert(feat("exon", "e1", 10, 50), parent).unwrap();

        let found = find_sister(&forest, &config, exon, &["cds".to_string()]);
        assert_eq!(found, Some(twin));
    }

    #[test]
    fn little_preferred_over_big() {
        let mut forest = Forest::new();
        let config = Config::new();
        let parent = forest.insert(feat("mRNA", "m1", 1, 100), ROOT).unwrap();
        let big = forest.insert(feat("cds", "big", 1, 90), parent).unwrap();
        let little = forest.insert(feat("cds", "little", 20, 40), parent).unwrap();
        let exon = forest.insert(feat("exon", "e1", 10, 50), parent).unwrap();

        let found = find_sister(&forest, &config, exon, &["cds".to_string()]);
        assert_eq!(found, Some(little));
        let _ = big;
    }

    #[test]
    fn no_match_returns_none() {
        let mut forest = Forest::new();
        let config = Config::new();
        let parent = forest.insert(feat("mRNA", "m1", 1, 100), ROOT).unwrap();
        forest.insert(feat("cds", "c1", 60, 90), parent).unwrap();
        let exon = forest.insert(feat("exon", "e1", 10, 50), parent).unwrap();

        assert!(find_sister(&forest, &config, exon, &["cds".to_string()]).is_none());
    }

    #[test]
    fn multiline_twins_compare_segments() {
        let mut forest = Forest::new();
        let mut config = Config::new();
        config.multiline("cds").multiline("exon");
        let parent = forest.insert(feat("mRNA", "m1", 1, 400), ROOT).unwrap();
        let cds = forest
            .insert(multiline_feat("cds", "c1", &[(10, 80), (200, 300)]), parent)
            .unwrap();
        let exon = forest
            .insert(multiline_feat("exon", "e1", &[(10, 80), (200, 300)]), parent)
            .unwrap();

        assert_eq!(
            find_sister(&forest, &config, exon, &["cds".to_string()]),
            Some(cds)
        );
    }

    #[test]
    fn multiline_self_single_alt_needs_every_segment_covered() {
        let mut forest = Forest::new();
        let mut config = Config::new();
        config.multiline("cds");
        let parent = forest.insert(feat("mRNA", "m1", 1, 400), ROOT).unwrap();
        let cds = forest
            .insert(multiline_feat("cds", "c1", &[(10, 80), (200, 300)]), parent)
            .unwrap();
        let e1 = forest.insert(feat("exon", "e1", 10, 80), parent).unwrap();

        // Only the first segment is covered
        assert!(find_sister(&forest, &config, cds, &["exon".to_string()]).is_none());

        forest.insert(feat("exon", "e2", 190, 310), parent).unwrap();
        assert_eq!(
            find_sister(&forest, &config, cds, &["exon".to_string()]),
            Some(e1)
        );
    }

    #[test]
    fn single_self_multiline_alt_needs_one_segment_hit() {
        let mut forest = Forest::new();
        let mut config = Config::new();
        config.multiline("cds");
        let parent = forest.insert(feat("mRNA", "m1", 1, 400), ROOT).unwrap();
        let cds = forest
            .insert(multiline_feat("cds", "c1", &[(10, 80), (200, 300)]), parent)
            .unwrap();
        let exon = forest.insert(feat("exon", "e1", 200, 300), parent).unwrap();

        assert_eq!(
            find_sister(&forest, &config, exon, &["cds".to_string()]),
            Some(cds)
        );
    }

    #[test]
    fn make_sister_clones_positions() {
        let mut forest = Forest::new();
        let config = Config::new();
        let parent = forest.insert(feat("mRNA", "m1", 1, 100), ROOT).unwrap();
        let exon = forest.insert(feat("exon", "e1", 10, 50), parent).unwrap();
        forest.get_mut(exon).set_parent_attr("m1");

        let sid = make_sister(&mut forest, &config, exon, "cds").unwrap();
        let sister = forest.get(sid);
        assert_eq!(sister.ftype, "cds");
        assert_eq!((sister.start, sister.end), (10, 50));
        assert_eq!(sister.parent_id(), Some(parent));
        assert_eq!(sister.id, "cds___0");
        assert_eq!(
            sister.parent_attr().map(|v| v.first().to_string()),
            Some("m1".to_string())
        );
    }

    #[test]
    fn make_sister_multiline_to_single_splits_segments() {
        let mut forest = Forest::new();
        let mut config = Config::new();
        config.multiline("cds");
        let parent = forest.insert(feat("mRNA", "m1", 1, 400), ROOT).unwrap();
        let cds = forest
            .insert(multiline_feat("cds", "c1", &[(10, 80), (200, 300)]), parent)
            .unwrap();

        make_sister(&mut forest, &config, cds, "exon").unwrap();
        let exons = forest.by_type(parent, "exon");
        assert_eq!(exons.len(), 2);
        let spans: Vec<(u32, u32)> = exons
            .iter()
            .map(|&e| (forest.get(e).start, forest.get(e).end))
            .collect();
        assert_eq!(spans, vec![(10, 80), (200, 300)]);
    }

    #[test]
    fn make_sister_single_to_multiline_is_fatal() {
        let mut forest = Forest::new();
        let mut config = Config::new();
        config.multiline("cds");
        let parent = forest.insert(feat("mRNA", "m1", 1, 100), ROOT).unwrap();
        let exon = forest.insert(feat("exon", "e1", 10, 50), parent).unwrap();

        assert!(make_sister(&mut forest, &config, exon, "cds").is_err());
    }

    #[test]
    fn make_child_clones_under_self() {
        let mut forest = Forest::new();
        let mrna = forest.insert(feat("mRNA", "m1", 10, 50), ROOT).unwrap();
        let cid = make_child(&mut forest, mrna, "exon").unwrap();
        let child = forest.get(cid);
        assert_eq!(child.parent_id(), Some(mrna));
        assert_eq!((child.start, child.end), (10, 50));
        assert_eq!(
            child.parent_attr().map(|v| v.first().to_string()),
            Some("m1".to_string())
        );
    }

    #[test]
    fn fill_gaps_creates_interior_features() {
        let mut forest = Forest::new();
        let mrna = forest.insert(feat("mRNA", "m1", 10, 300), ROOT).unwrap();
        forest.insert(feat("exon", "e1", 10, 50), mrna).unwrap();
        forest.insert(feat("exon", "e2", 100, 150), mrna).unwrap();
        forest.insert(feat("exon", "e3", 151, 200), mrna).unwrap();
        forest.insert(feat("exon", "e4", 250, 300), mrna).unwrap();

        let introns = fill_gaps(&mut forest, mrna, "exon", "intron").unwrap();
        // e2/e3 touch, so only two gaps exist
        assert_eq!(introns.len(), 2);
        let spans: Vec<(u32, u32)> = introns
            .iter()
            .map(|&n| (forest.get(n).start, forest.get(n).end))
            .collect();
        assert_eq!(spans, vec![(51, 99), (201, 249)]);
        for &n in &introns {
            assert_eq!(forest.get(n).parent_id(), Some(mrna));
        }
    }

    #[test]
    fn fill_gaps_with_no_children_is_empty() {
        let mut forest = Forest::new();
        let mrna = forest.insert(feat("mRNA", "m1", 10, 300), ROOT).unwrap();
        assert!(fill_gaps(&mut forest, mrna, "exon", "intron").unwrap().is_empty());
    }
}
