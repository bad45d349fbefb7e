//! Feature nodes of the GFF3 forest.

use std::fmt;

use indexmap::IndexMap;

use crate::forest::NodeId;
use crate::strand::Strand;

/// Codon phase from GFF3 column 8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// `.` — not applicable.
    #[default]
    Unknown,
    Zero,
    One,
    Two,
}

impl Phase {
    /// Parse from GFF3 column 8. Unrecognized values map to `.`.
    #[must_use]
    pub fn from_gff3(s: &str) -> Self {
        match s {
            "0" => Self::Zero,
            "1" => Self::One,
            "2" => Self::Two,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "."),
            Self::Zero => write!(f, "0"),
            Self::One => write!(f, "1"),
            Self::Two => write!(f, "2"),
        }
    }
}

/// A column-9 attribute value: a single string or an ordered list
/// (comma-split at parse time).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    Scalar(String),
    List(Vec<String>),
}

impl AttrValue {
    /// Collapse a parsed part list: one element becomes a scalar.
    #[must_use]
    pub fn from_parts(mut parts: Vec<String>) -> Self {
        if parts.len() == 1 {
            Self::Scalar(parts.remove(0))
        } else {
            Self::List(parts)
        }
    }

    /// The scalar value, or the first list element.
    #[must_use]
    pub fn first(&self) -> &str {
        match self {
            Self::Scalar(s) => s,
            Self::List(items) => items.first().map(String::as_str).unwrap_or(""),
        }
    }

    /// All values in order.
    #[must_use]
    pub fn values(&self) -> Vec<&str> {
        match self {
            Self::Scalar(s) => vec![s.as_str()],
            Self::List(items) => items.iter().map(String::as_str).collect(),
        }
    }
}

/// Ordered column-9 attribute map.
pub type Attributes = IndexMap<String, AttrValue>;

/// Aligned per-segment arrays for a multi-line feature. All arrays have
/// identical length; `attrs` holds one array per attribute key that ever
/// appeared on a segment, with `None` marking segments where the key was
/// absent.
#[derive(Debug, Clone, Default)]
pub struct Segments {
    pub starts: Vec<u32>,
    pub ends: Vec<u32>,
    pub scores: Vec<String>,
    pub phases: Vec<Phase>,
    pub attrs: IndexMap<String, Vec<Option<AttrValue>>>,
}

impl Segments {
    #[must_use]
    pub fn len(&self) -> usize {
        self.starts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    /// Whether a key has been expanded into a per-segment array.
    #[must_use]
    pub fn is_tracked(&self, key: &str) -> bool {
        self.attrs.contains_key(key)
    }

    /// Segment spans as (start, end) pairs, in stored (ascending) order.
    #[must_use]
    pub fn spans(&self) -> Vec<(u32, u32)> {
        self.starts.iter().copied().zip(self.ends.iter().copied()).collect()
    }

    /// True when every array has the same length.
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        let n = self.starts.len();
        self.ends.len() == n
            && self.scores.len() == n
            && self.phases.len() == n
            && self.attrs.values().all(|a| a.len() == n)
    }
}

/// One node of the feature forest.
#[derive(Debug, Clone)]
pub struct Feature {
    pub seq_name: String,
    pub source: String,
    /// Type as written in the input, preserved for emission.
    pub ftype: String,
    /// Lower-cased type used for rule dispatch and position indexing.
    pub type_key: String,
    /// 1-based inclusive span. For multi-line features these hold the
    /// minimum start and maximum end across segments.
    pub start: u32,
    pub end: u32,
    pub score: String,
    pub strand: Strand,
    pub phase: Phase,
    pub attributes: Attributes,
    pub id: String,
    pub name: String,
    /// Per-segment arrays, present once a second input line has coalesced.
    pub segments: Option<Segments>,
    /// Extra sibling created by a plural `Parent` attribute.
    pub duplicate: bool,
    /// Set by the `skip` expectation action; the emitter elides the subtree.
    pub skip: bool,
    /// FASTA sequence attached to a region node.
    pub sequence: Option<String>,
    /// The ID was minted rather than read from the input.
    pub(crate) minted_id: bool,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
}

impl Feature {
    /// The synthetic container used as the forest root. No intrinsic fields.
    #[must_use]
    pub(crate) fn container() -> Self {
        Self::bare(String::new(), String::new(), 0, 0, Strand::Unknown)
    }

    /// A minimal feature with the given coordinates; remaining fields empty.
    #[must_use]
    pub fn bare(seq_name: String, ftype: String, start: u32, end: u32, strand: Strand) -> Self {
        let type_key = ftype.to_lowercase();
        Self {
            seq_name,
            source: ".".to_string(),
            ftype,
            type_key,
            start,
            end,
            score: ".".to_string(),
            strand,
            phase: Phase::Unknown,
            attributes: Attributes::new(),
            id: String::new(),
            name: String::new(),
            segments: None,
            duplicate: false,
            skip: false,
            sequence: None,
            minted_id: false,
            parent: None,
            children: Vec::new(),
        }
    }

    /// Set the ID field and mirror it into the attribute map.
    pub fn set_id(&mut self, id: String) {
        self.attributes
            .insert("ID".to_string(), AttrValue::Scalar(id.clone()));
        self.id = id;
    }

    /// Set the `Parent` attribute to a single parent ID.
    pub fn set_parent_attr(&mut self, parent_id: &str) {
        self.attributes.insert(
            "Parent".to_string(),
            AttrValue::Scalar(parent_id.to_string()),
        );
    }

    /// The `Parent` attribute, if any.
    #[must_use]
    pub fn parent_attr(&self) -> Option<&AttrValue> {
        self.attributes.get("Parent")
    }

    #[must_use]
    pub fn parent_id(&self) -> Option<NodeId> {
        self.parent
    }

    #[must_use]
    pub fn child_ids(&self) -> &[NodeId] {
        &self.children
    }

    /// Number of input lines behind this feature.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.segments.as_ref().map_or(1, Segments::len)
    }

    /// Segment spans; a single-line feature yields its one (start, end).
    #[must_use]
    pub fn spans(&self) -> Vec<(u32, u32)> {
        match &self.segments {
            Some(seg) => seg.spans(),
            None => vec![(self.start, self.end)],
        }
    }

    /// Resolve an attribute name for comparison rules. Intrinsic columns are
    /// exposed under pseudo-keys; everything else reads the attribute map
    /// (list values yield their first element).
    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<String> {
        match key {
            "start" => Some(self.start.to_string()),
            "end" => Some(self.end.to_string()),
            "score" => Some(self.score.clone()),
            "strand" => Some(self.strand.to_string()),
            "phase" => Some(self.phase.to_string()),
            "seq_name" => Some(self.seq_name.clone()),
            "source" => Some(self.source.clone()),
            _ => self.attributes.get(key).map(|v| v.first().to_string()),
        }
    }

    /// Expand the scalar fields into one-element segment arrays. Every
    /// current attribute key becomes tracked. No-op when already expanded.
    pub fn ensure_segments(&mut self) {
        if self.segments.is_some() {
            return;
        }
        let mut attrs = IndexMap::with_capacity(self.attributes.len());
        for (key, value) in &self.attributes {
            attrs.insert(key.clone(), vec![Some(value.clone())]);
        }
        self.segments = Some(Segments {
            starts: vec![self.start],
            ends: vec![self.end],
            scores: vec![self.score.clone()],
            phases: vec![self.phase],
            attrs,
        });
    }

    /// Fold one more input line into this feature as a new segment, keeping
    /// the segment arrays sorted by start ascending and every tracked
    /// attribute array aligned. Returns the previous effective start so the
    /// caller can rebucket the position index when it changed.
    pub fn insert_segment(&mut self, line: &Feature) -> u32 {
        let old_start = self.start;
        self.ensure_segments();
        let Some(seg) = self.segments.as_mut() else {
            return old_start;
        };

        let before = seg.starts.len();
        let i = seg.starts.partition_point(|&s| s <= line.start);
        seg.starts.insert(i, line.start);
        seg.ends.insert(i, line.end);
        seg.scores.insert(i, line.score.clone());
        seg.phases.insert(i, line.phase);

        for (key, arr) in &mut seg.attrs {
            arr.insert(i, line.attributes.get(key).cloned());
        }
        for (key, value) in &line.attributes {
            if !seg.attrs.contains_key(key) {
                // Key first seen on this segment: left-pad the earlier
                // segments with missing values.
                let mut arr = vec![None; before];
                arr.insert(i, Some(value.clone()));
                seg.attrs.insert(key.clone(), arr);
            }
        }

        self.start = self.start.min(line.start);
        self.end = self.end.max(line.end);
        old_start
    }
}
