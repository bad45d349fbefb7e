//! Feature builder: drives the parse loop and writes to the forest.
//!
//! The builder resolves parents (children may appear before parents, which
//! are adopted by the root orphanage until resolution), mints IDs where the
//! configured policy asks for one, splits plural-`Parent` features into
//! sibling copies, and coalesces multi-line features into segment arrays.

use std::io::{BufRead, BufReader, Read};

use flate2::read::GzDecoder;

use crate::classify::{LineKind, classify, strip_inline_comments};
use crate::config::{Config, IdPolicy, OrphanPolicy};
use crate::diagnostics::Diagnostics;
use crate::error::Error;
use crate::feature::{AttrValue, Feature};
use crate::forest::{Forest, NodeId, ROOT};
use crate::strand::Strand;
use crate::tokenizer::{Tokenized, tokenize};

/// Parse a GFF3 stream into a fresh forest.
pub fn parse_gff3<R: BufRead>(
    reader: R,
    config: &Config,
    diag: &mut Diagnostics,
) -> Result<Forest, Error> {
    let mut forest = Forest::new();
    let mut builder = Builder::new(config);
    builder.parse(reader, &mut forest, diag)?;
    Ok(forest)
}

/// Parse a gzip-compressed GFF3 stream into a fresh forest.
pub fn parse_gff3_gz<R: Read>(
    reader: R,
    config: &Config,
    diag: &mut Diagnostics,
) -> Result<Forest, Error> {
    let decoder = GzDecoder::new(reader);
    parse_gff3(BufReader::new(decoder), config, diag)
}

struct FastaState {
    seq_name: String,
    region: Option<NodeId>,
}

/// Streaming parser. One builder may feed one forest across several
/// `parse_chunk` calls; line numbering carries over.
pub struct Builder<'a> {
    config: &'a Config,
    fasta: Option<FastaState>,
    pending: Option<(String, u64)>,
    line_num: u64,
}

impl<'a> Builder<'a> {
    #[must_use]
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            fasta: None,
            pending: None,
            line_num: 0,
        }
    }

    /// Parse to end of stream, then run orphan resolution.
    pub fn parse<R: BufRead>(
        &mut self,
        mut reader: R,
        forest: &mut Forest,
        diag: &mut Diagnostics,
    ) -> Result<(), Error> {
        self.parse_chunk(&mut reader, forest, diag, None)?;
        Ok(())
    }

    /// Parse until end of stream or, when `break_type` is given, until a
    /// data line of that (mapped) type appears after at least one feature
    /// was built; the break line is stashed and consumed by the next call.
    /// Returns `true` when stopped at a break line, `false` at end of
    /// stream (after which orphan resolution has run).
    pub fn parse_chunk<R: BufRead>(
        &mut self,
        reader: &mut R,
        forest: &mut Forest,
        diag: &mut Diagnostics,
        break_type: Option<&str>,
    ) -> Result<bool, Error> {
        let mut built = 0usize;

        if let Some((line, line_num)) = self.pending.take() {
            built += self.handle_line(&line, line_num, forest, diag)?;
        }

        let mut buf = String::new();
        loop {
            buf.clear();
            if reader.read_line(&mut buf)? == 0 {
                self.resolve_orphans(forest)?;
                return Ok(false);
            }
            self.line_num += 1;
            let line = buf.trim_end_matches(['\n', '\r']);

            if let Some(break_key) = break_type
                && built > 0
                && self.is_break_line(line, break_key)
            {
                self.pending = Some((line.to_string(), self.line_num));
                return Ok(true);
            }

            built += self.handle_line(line, self.line_num, forest, diag)?;
        }
    }

    fn is_break_line(&self, line: &str, break_key: &str) -> bool {
        if !matches!(classify(line), LineKind::Data) {
            return false;
        }
        let sep = self.config.column_separator();
        if self.fasta.is_some() && !line.contains(sep) {
            return false;
        }
        let stripped = strip_inline_comments(line, self.config.inline_comments());
        let columns: Vec<&str> = stripped.split(sep).collect();
        let Some(&raw) = columns.get(2) else {
            return false;
        };
        let mapped = self.config.mapped_type(raw).unwrap_or(raw);
        mapped.eq_ignore_ascii_case(break_key)
    }

    /// Returns the number of features built from this line (0 or 1).
    fn handle_line(
        &mut self,
        line: &str,
        line_num: u64,
        forest: &mut Forest,
        diag: &mut Diagnostics,
    ) -> Result<usize, Error> {
        match classify(line) {
            LineKind::Blank => Ok(0),
            LineKind::Comment { .. } => {
                // Comments and directives both terminate an open FASTA block.
                self.fasta = None;
                Ok(0)
            }
            LineKind::FastaHeader(name) => {
                self.fasta = Some(FastaState {
                    seq_name: name.to_string(),
                    region: None,
                });
                Ok(0)
            }
            LineKind::Data => {
                if self.fasta.is_some() && !line.contains(self.config.column_separator()) {
                    self.append_fasta(line, forest)?;
                    return Ok(0);
                }
                self.fasta = None;
                self.build_line(line, line_num, forest, diag)
            }
        }
    }

    /// Concatenate a FASTA body line onto the region node for the current
    /// header, creating the region on demand and growing its end.
    fn append_fasta(&mut self, line: &str, forest: &mut Forest) -> Result<(), Error> {
        let Some(state) = self.fasta.as_mut() else {
            return Ok(());
        };
        let chunk = line.trim();
        if chunk.is_empty() {
            return Ok(());
        }

        if state.region.is_none() {
            let seq_name = state.seq_name.clone();
            let existing =
                forest.find_first(|f| f.type_key == "region" && f.seq_name == seq_name);
            let region = match existing {
                Some(n) => n,
                None => {
                    let mut f = Feature::bare(
                        seq_name,
                        "region".to_string(),
                        1,
                        0,
                        Strand::Forward,
                    );
                    let id = forest.mint_id("region");
                    f.set_id(id.clone());
                    f.name = id;
                    f.minted_id = true;
                    forest.insert(f, ROOT)?
                }
            };
            state.region = Some(region);
        }

        if let Some(region) = state.region {
            let node = forest.get_mut(region);
            node.sequence.get_or_insert_with(String::new).push_str(chunk);
            let len = node.sequence.as_ref().map_or(0, String::len) as u32;
            node.end = node.end.max(len);
        }
        Ok(())
    }

    fn build_line(
        &mut self,
        line: &str,
        line_num: u64,
        forest: &mut Forest,
        diag: &mut Diagnostics,
    ) -> Result<usize, Error> {
        let stripped;
        let line = if self.config.inline_comments().is_empty() {
            line
        } else {
            stripped = strip_inline_comments(line, self.config.inline_comments());
            &stripped
        };

        let mut feat = match tokenize(line, self.config, line_num, diag)? {
            Tokenized::Skipped => return Ok(0),
            Tokenized::Feature(f) => *f,
        };

        if let Some(canonical) = self.config.mapped_type(&feat.ftype) {
            feat.ftype = canonical.to_string();
            feat.type_key = feat.ftype.to_lowercase();
        }

        let parent_attr = feat.parent_attr().cloned();
        let parent = match &parent_attr {
            Some(AttrValue::Scalar(pid)) => forest.by_id(pid).unwrap_or(ROOT),
            _ => ROOT,
        };

        let id = match feat.attributes.get("ID") {
            Some(v) => v.first().to_string(),
            None => match self.config.id_policy(&feat.type_key).clone() {
                IdPolicy::Ignore => return Ok(0),
                IdPolicy::Warn => {
                    diag.warn(format!(
                        "line {line_num}: {} feature lacks an ID; line dropped",
                        feat.ftype
                    ));
                    return Ok(0);
                }
                IdPolicy::Die => {
                    return Err(Error::Parse(format!(
                        "line {line_num}: {} feature lacks an ID attribute",
                        feat.ftype
                    )));
                }
                IdPolicy::Make => self.minted_id(&mut feat, parent, forest),
                IdPolicy::Attribute(attr_name) => match feat.attributes.get(&attr_name) {
                    Some(v) => v.first().to_string(),
                    None => self.minted_id(&mut feat, parent, forest),
                },
            },
        };
        let id: String = id.chars().filter(|&c| c != '\'').collect();
        feat.set_id(id.clone());
        feat.name = match feat.attributes.get("Name") {
            Some(v) => v.first().to_string(),
            None => id.clone(),
        };

        // A plural Parent materializes one sibling per parent; the first
        // keeps the base ID, the rest are suffixed and flagged duplicate.
        if let Some(AttrValue::List(parents)) = parent_attr {
            for (i, pid) in parents.iter().enumerate() {
                let mut copy = feat.clone();
                let copy_id = if i == 0 {
                    id.clone()
                } else {
                    format!("{id}._{i}")
                };
                copy.duplicate = i > 0;
                copy.set_id(copy_id.clone());
                if !copy.attributes.contains_key("Name") {
                    copy.name = copy_id;
                }
                copy.set_parent_attr(pid);
                let p = forest.by_id(pid).unwrap_or(ROOT);
                forest.insert(copy, p)?;
            }
            return Ok(1);
        }

        if let Some(existing) = forest.by_id(&id) {
            let ex = forest.get(existing);
            let coalesces = self.config.is_multiline(&ex.type_key)
                && ex.seq_name == feat.seq_name
                && ex.type_key == feat.type_key
                && ex.strand == feat.strand
                && ex.parent_attr() == feat.parent_attr();
            if coalesces {
                let old_start = forest.get_mut(existing).insert_segment(&feat);
                forest.reindex_start(existing, old_start);
                return Ok(1);
            }
            return Err(Error::Parse(format!(
                "line {line_num}: ID '{id}' already used by a {} feature; declare the type \
                 multi-line if these lines are segments of one feature",
                forest.get(existing).ftype
            )));
        }

        forest.insert(feat, parent)?;
        Ok(1)
    }

    /// Mint an ID, reusing the parent's existing minted multi-line child of
    /// the same type so its further lines coalesce.
    fn minted_id(&self, feat: &mut Feature, parent: NodeId, forest: &mut Forest) -> String {
        if self.config.is_multiline(&feat.type_key) {
            for &child in forest.get(parent).child_ids() {
                let c = forest.get(child);
                if c.type_key == feat.type_key && c.minted_id {
                    return c.id.clone();
                }
            }
        }
        feat.minted_id = true;
        forest.mint_id(&feat.ftype)
    }

    /// Re-parent root children whose `Parent` now resolves, repeating until
    /// a fixed point. A `Parent` resolving into the node's own subtree is
    /// never followed. Unresolved orphans are fatal under the `die` policy.
    fn resolve_orphans(&mut self, forest: &mut Forest) -> Result<(), Error> {
        loop {
            let mut moved = false;
            for n in forest.get(ROOT).child_ids().to_vec() {
                let Some(pid) = forest.get(n).parent_attr().map(|v| v.first().to_string())
                else {
                    continue;
                };
                let Some(p) = forest.by_id(&pid) else {
                    continue;
                };
                if p == n || forest.is_descendant(p, n) {
                    continue;
                }
                forest.attach(n, p);
                moved = true;
            }
            if !moved {
                break;
            }
        }

        if self.config.orphan_policy() == OrphanPolicy::Die {
            // After the fixpoint, any root child still holding a Parent
            // attribute could not be followed.
            let mut unresolved = Vec::new();
            for &n in forest.get(ROOT).child_ids() {
                let node = forest.get(n);
                if let Some(pid) = node.parent_attr().map(|v| v.first().to_string()) {
                    unresolved.push(format!("'{}' -> '{pid}'", node.id));
                }
            }
            if !unresolved.is_empty() {
                return Err(Error::Validation(format!(
                    "unresolved Parent references after parsing: {}",
                    unresolved.join(", ")
                )));
            }
        }
        Ok(())
    }
}
