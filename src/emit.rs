//! GFF3 emission: render features or subtrees back to text.

use std::fmt::Write;

use crate::error::Error;
use crate::feature::{AttrValue, Feature, Segments};
use crate::forest::{Forest, NodeId, ROOT};

/// Percent-encode the characters that would corrupt column 9.
fn encode_value(value: &str) -> String {
    value
        .replace('%', "%25")
        .replace(';', "%3B")
        .replace('=', "%3D")
}

fn render_attr(key: &str, value: &AttrValue, out: &mut Vec<String>) {
    let rendered = match value {
        AttrValue::Scalar(s) => encode_value(s),
        AttrValue::List(items) => items
            .iter()
            .map(|s| encode_value(s))
            .collect::<Vec<_>>()
            .join(","),
    };
    out.push(format!("{key}={rendered}"));
}

/// Internal bookkeeping keys never reach column 9.
fn hidden(key: &str) -> bool {
    key.starts_with('_') || key.ends_with("_array")
}

/// Column 9 for one segment: tracked attributes use that segment's value
/// (a missing value omits the key on that line); untracked keys fall back
/// to the node's scalar attribute.
fn segment_column9(node: &Feature, seg: &Segments, i: usize) -> String {
    let mut pairs = Vec::new();
    for (key, arr) in &seg.attrs {
        if hidden(key) {
            continue;
        }
        if let Some(value) = &arr[i] {
            render_attr(key, value, &mut pairs);
        }
    }
    for (key, value) in &node.attributes {
        if hidden(key) || seg.is_tracked(key) {
            continue;
        }
        render_attr(key, value, &mut pairs);
    }
    if pairs.is_empty() {
        ".".to_string()
    } else {
        pairs.join(";")
    }
}

fn scalar_column9(node: &Feature) -> String {
    let mut pairs = Vec::new();
    for (key, value) in &node.attributes {
        if hidden(key) {
            continue;
        }
        render_attr(key, value, &mut pairs);
    }
    if pairs.is_empty() {
        ".".to_string()
    } else {
        pairs.join(";")
    }
}

/// Render one feature as GFF3, one line per segment, each line terminated
/// with a newline. A duplicate sibling renders as empty when
/// `skip_duplicates` is set.
pub fn as_string(forest: &Forest, n: NodeId, skip_duplicates: bool) -> Result<String, Error> {
    let node = forest.get(n);
    if node.duplicate && skip_duplicates {
        return Ok(String::new());
    }

    let mut out = String::new();
    match &node.segments {
        Some(seg) => {
            if !seg.is_balanced() {
                return Err(Error::Format(format!(
                    "unbalanced multi-line segments for '{}'",
                    node.id
                )));
            }
            for i in 0..seg.len() {
                let _ = writeln!(
                    out,
                    "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                    node.seq_name,
                    node.source,
                    node.ftype,
                    seg.starts[i],
                    seg.ends[i],
                    seg.scores[i],
                    node.strand,
                    seg.phases[i],
                    segment_column9(node, seg, i)
                );
            }
        }
        None => {
            let _ = writeln!(
                out,
                "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                node.seq_name,
                node.source,
                node.ftype,
                node.start,
                node.end,
                node.score,
                node.strand,
                node.phase,
                scalar_column9(node)
            );
        }
    }
    Ok(out)
}

/// Render a node and its subtree depth-first in insertion order. A subtree
/// whose root carries the skip mark is elided entirely.
pub fn structured_output(
    forest: &Forest,
    n: NodeId,
    skip_duplicates: bool,
) -> Result<String, Error> {
    let mut out = String::new();
    emit_subtree(forest, n, skip_duplicates, &mut out)?;
    Ok(out)
}

fn emit_subtree(
    forest: &Forest,
    n: NodeId,
    skip_duplicates: bool,
    out: &mut String,
) -> Result<(), Error> {
    let node = forest.get(n);
    if node.skip {
        return Ok(());
    }
    if n != ROOT {
        out.push_str(&as_string(forest, n, skip_duplicates)?);
    }
    for &child in node.child_ids() {
        emit_subtree(forest, child, skip_duplicates, out)?;
    }
    Ok(())
}
