//! Declarative expectations and the validation pass.
//!
//! A rule binds a relation (`hasParent`, `hasChild`, `hasSister`, or an
//! attribute comparison) to an action dispatched when the relation does
//! not hold. The repair actions (`find`, `make`, `force`) mutate the
//! forest while validation runs.

use crate::config::Config;
use crate::diagnostics::Diagnostics;
use crate::error::Error;
use crate::feature::Feature;
use crate::forest::{Forest, NodeId, ROOT};
use crate::sister;
use crate::strand::Strand;

/// Comparison operator inside a `<op>[attr_a,attr_b]` relation. The
/// symbolic operators compare numerically; `eq`/`ne`/`lt`/`gt` compare
/// lexically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    NumLt,
    NumGt,
    NumLe,
    NumGe,
    NumEq,
    NumNe,
    StrEq,
    StrNe,
    StrLt,
    StrGt,
}

impl CompareOp {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "<" => Some(Self::NumLt),
            ">" => Some(Self::NumGt),
            "<=" => Some(Self::NumLe),
            ">=" => Some(Self::NumGe),
            "==" => Some(Self::NumEq),
            "!=" => Some(Self::NumNe),
            "eq" => Some(Self::StrEq),
            "ne" => Some(Self::StrNe),
            "lt" => Some(Self::StrLt),
            "gt" => Some(Self::StrGt),
            _ => None,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Self::NumLt => "<",
            Self::NumGt => ">",
            Self::NumLe => "<=",
            Self::NumGe => ">=",
            Self::NumEq => "==",
            Self::NumNe => "!=",
            Self::StrEq => "eq",
            Self::StrNe => "ne",
            Self::StrLt => "lt",
            Self::StrGt => "gt",
        }
    }

    fn eval(self, a: &str, b: &str) -> bool {
        match self {
            Self::StrEq => a == b,
            Self::StrNe => a != b,
            Self::StrLt => a < b,
            Self::StrGt => a > b,
            _ => {
                let (Ok(x), Ok(y)) = (a.parse::<f64>(), b.parse::<f64>()) else {
                    return false;
                };
                match self {
                    Self::NumLt => x < y,
                    Self::NumGt => x > y,
                    Self::NumLe => x <= y,
                    Self::NumGe => x >= y,
                    Self::NumEq => x == y,
                    Self::NumNe => x != y,
                    _ => false,
                }
            }
        }
    }
}

/// What a rule asserts about a feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relation {
    HasParent,
    HasChild,
    HasSister,
    Compare {
        op: CompareOp,
        attr_a: String,
        attr_b: String,
    },
}

impl Relation {
    /// Parse `hasParent`/`hasChild`/`hasSister` (case-insensitive) or a
    /// comparison of the form `<op>[attr_a,attr_b]`.
    pub fn parse(s: &str) -> Result<Self, Error> {
        let t = s.trim();
        match t.to_lowercase().as_str() {
            "hasparent" => return Ok(Self::HasParent),
            "haschild" => return Ok(Self::HasChild),
            "hassister" => return Ok(Self::HasSister),
            _ => {}
        }

        let bad = || Error::Parse(format!("unrecognized relation: '{s}'"));
        let open = t.find('[').ok_or_else(bad)?;
        let close = t.rfind(']').filter(|&c| c > open).ok_or_else(bad)?;
        let op = CompareOp::parse(t[..open].trim()).ok_or_else(bad)?;
        let (attr_a, attr_b) = t[open + 1..close].split_once(',').ok_or_else(bad)?;
        Ok(Self::Compare {
            op,
            attr_a: attr_a.trim().to_string(),
            attr_b: attr_b.trim().to_string(),
        })
    }
}

/// Where a comparison reads its second attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareTarget {
    OnSelf,
    OnParent,
}

/// The `alt` column of a rule: a type pattern for structural relations, a
/// comparison target otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alt {
    Types(Vec<String>),
    Target(CompareTarget),
}

/// Action dispatched when a rule is unsatisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Ignore,
    Warn,
    Die,
    Skip,
    Find,
    Make,
    Force,
}

impl std::str::FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ignore" => Ok(Self::Ignore),
            "warn" => Ok(Self::Warn),
            "die" => Ok(Self::Die),
            "skip" => Ok(Self::Skip),
            "find" => Ok(Self::Find),
            "make" => Ok(Self::Make),
            "force" => Ok(Self::Force),
            _ => Err(Error::Parse(format!("unrecognized expectation flag: '{s}'"))),
        }
    }
}

/// One registered validation rule.
#[derive(Debug, Clone)]
pub struct Expectation {
    pub relation: Relation,
    pub alt: Alt,
    pub action: Action,
}

impl Expectation {
    /// Validate the `alt` column against the relation kind.
    pub fn new(relation: Relation, alt: &str, action: Action) -> Result<Self, Error> {
        let alt = match relation {
            Relation::Compare { .. } => match alt.to_lowercase().as_str() {
                "self" => Alt::Target(CompareTarget::OnSelf),
                "parent" => Alt::Target(CompareTarget::OnParent),
                _ => {
                    return Err(Error::Parse(format!(
                        "comparison alt must be SELF or PARENT, got '{alt}'"
                    )));
                }
            },
            _ => {
                let types: Vec<String> = alt
                    .split('|')
                    .map(|a| a.trim().to_lowercase())
                    .filter(|a| !a.is_empty())
                    .collect();
                if types.is_empty() {
                    return Err(Error::Parse(format!("empty type pattern: '{alt}'")));
                }
                Alt::Types(types)
            }
        };
        Ok(Self {
            relation,
            alt,
            action,
        })
    }
}

/// Evaluate every registered rule against every node. Repair actions
/// mutate the forest; `die` aborts with the failure diagnostic.
pub fn validate(forest: &mut Forest, config: &Config, diag: &mut Diagnostics) -> Result<(), Error> {
    for n in forest.all_nodes() {
        let type_key = forest.get(n).type_key.clone();
        for rule in config.rules_for(&type_key) {
            apply_rule(forest, config, diag, n, rule)?;
        }
    }
    Ok(())
}

fn apply_rule(
    forest: &mut Forest,
    config: &Config,
    diag: &mut Diagnostics,
    n: NodeId,
    rule: &Expectation,
) -> Result<(), Error> {
    if rule_satisfied(forest, config, n, rule) {
        return Ok(());
    }
    let msg = failure_message(forest, n, rule);

    match rule.action {
        Action::Ignore => {}
        Action::Warn => diag.warn(msg),
        Action::Die => return Err(Error::Validation(msg)),
        Action::Skip => {
            forest.get_mut(n).skip = true;
            diag.warn(format!("{msg}; subtree skipped"));
        }
        Action::Find => match repair_find(forest, n, rule) {
            FindOutcome::Repaired(parent) => diag.warn(format!(
                "{msg}; reparented under '{}'",
                forest.get(parent).id
            )),
            FindOutcome::NoCandidate => diag.warn(format!("{msg}; no candidate found")),
            FindOutcome::Unsupported => {
                diag.warn(format!("{msg}; find is not supported for this relation"));
            }
        },
        Action::Make => repair_make(forest, config, diag, n, rule, &msg)?,
        Action::Force => match repair_find(forest, n, rule) {
            FindOutcome::Repaired(parent) => diag.warn(format!(
                "{msg}; reparented under '{}'",
                forest.get(parent).id
            )),
            _ => repair_make(forest, config, diag, n, rule, &msg)?,
        },
    }
    Ok(())
}

fn rule_satisfied(forest: &Forest, config: &Config, n: NodeId, rule: &Expectation) -> bool {
    match (&rule.relation, &rule.alt) {
        (Relation::HasParent, Alt::Types(alts)) => {
            let node = forest.get(n);
            node.parent_id()
                .map(|p| forest.get(p))
                .is_some_and(|p| alts.iter().any(|a| *a == p.type_key))
        }
        (Relation::HasChild, Alt::Types(alts)) => {
            alts.iter().any(|a| !forest.by_type(n, a).is_empty())
        }
        (Relation::HasSister, Alt::Types(alts)) => {
            sister::find_sister(forest, config, n, alts).is_some()
        }
        (Relation::Compare { op, attr_a, attr_b }, Alt::Target(target)) => {
            let node = forest.get(n);
            let Some(first) = node.lookup(attr_a) else {
                return false;
            };
            let second_holder: Option<&Feature> = match target {
                CompareTarget::OnSelf => Some(node),
                CompareTarget::OnParent => node
                    .parent_id()
                    .filter(|&p| p != ROOT)
                    .map(|p| forest.get(p)),
            };
            let Some(second) = second_holder.and_then(|f| f.lookup(attr_b)) else {
                return false;
            };
            op.eval(&first, &second)
        }
        // Constructors never produce a mismatched relation/alt pair.
        _ => true,
    }
}

fn failure_message(forest: &Forest, n: NodeId, rule: &Expectation) -> String {
    let node = forest.get(n);
    let label = format!("{} '{}'", node.ftype, node.id);
    match (&rule.relation, &rule.alt) {
        (Relation::HasParent, Alt::Types(alts)) => {
            let (found, mother) = match node.parent_id() {
                Some(p) if p != ROOT => {
                    let m = forest.get(p);
                    (m.ftype.clone(), m.id.clone())
                }
                _ => ("none".to_string(), "root".to_string()),
            };
            format!(
                "{label}: expected parent of type '{}', found '{found}' (mother '{mother}')",
                alts.join("|")
            )
        }
        (Relation::HasChild, Alt::Types(alts)) => {
            format!("{label}: no child of type '{}'", alts.join("|"))
        }
        (Relation::HasSister, Alt::Types(alts)) => {
            format!("{label}: no sister of type '{}'", alts.join("|"))
        }
        (Relation::Compare { op, attr_a, attr_b }, Alt::Target(target)) => {
            let side = match target {
                CompareTarget::OnSelf => "self",
                CompareTarget::OnParent => "parent",
            };
            let first = node.lookup(attr_a).unwrap_or_else(|| "(unset)".to_string());
            let second = match target {
                CompareTarget::OnSelf => node.lookup(attr_b),
                CompareTarget::OnParent => node
                    .parent_id()
                    .filter(|&p| p != ROOT)
                    .and_then(|p| forest.get(p).lookup(attr_b)),
            }
            .unwrap_or_else(|| "(unset)".to_string());
            format!(
                "{label}: expected {attr_a} {} {attr_b} on {side} ({attr_a}='{first}', {attr_b}='{second}')",
                op.symbol()
            )
        }
        _ => format!("{label}: expectation failed"),
    }
}

enum FindOutcome {
    Repaired(NodeId),
    NoCandidate,
    Unsupported,
}

/// Locate an existing parent by position: first an exact-start candidate
/// with an equal end, then the nearest start at or below with a covering
/// end. Only `hasParent` is repairable this way.
fn repair_find(forest: &mut Forest, n: NodeId, rule: &Expectation) -> FindOutcome {
    let (Relation::HasParent, Alt::Types(alts)) = (&rule.relation, &rule.alt) else {
        return FindOutcome::Unsupported;
    };
    let (seq, start, end) = {
        let f = forest.get(n);
        (f.seq_name.clone(), f.start, f.end)
    };

    for alt in alts {
        for cand in forest.by_start(&seq, alt, start).to_vec() {
            if cand != n && !forest.is_descendant(cand, n) && forest.get(cand).end == end {
                adopt(forest, n, cand);
                return FindOutcome::Repaired(cand);
            }
        }
    }
    for alt in alts {
        if let Some((_, bucket)) = forest.nearest_start(&seq, alt, start) {
            for cand in bucket.to_vec() {
                if cand != n && !forest.is_descendant(cand, n) && forest.get(cand).end >= end {
                    adopt(forest, n, cand);
                    return FindOutcome::Repaired(cand);
                }
            }
        }
    }
    FindOutcome::NoCandidate
}

fn adopt(forest: &mut Forest, n: NodeId, parent: NodeId) {
    let pid = forest.get(parent).id.clone();
    forest.get_mut(n).set_parent_attr(&pid);
    forest.attach(n, parent);
}

fn repair_make(
    forest: &mut Forest,
    config: &Config,
    diag: &mut Diagnostics,
    n: NodeId,
    rule: &Expectation,
    msg: &str,
) -> Result<(), Error> {
    match (&rule.relation, &rule.alt) {
        (Relation::HasParent, Alt::Types(alts)) => {
            let alt = alts[0].clone();
            let made = if alt == "region" {
                make_region(forest, n, &alt)?
            } else {
                make_parent(forest, n, &alt)?
            };
            diag.warn(format!("{msg}; made '{}'", forest.get(made).id));
        }
        (Relation::HasChild, Alt::Types(alts)) => {
            let made = sister::make_child(forest, n, &alts[0])?;
            diag.warn(format!("{msg}; made '{}'", forest.get(made).id));
        }
        (Relation::HasSister, Alt::Types(alts)) => {
            let made = sister::make_sister(forest, config, n, &alts[0])?;
            diag.warn(format!("{msg}; made '{}'", forest.get(made).id));
        }
        _ => diag.warn(format!("{msg}; make is not supported for comparison rules")),
    }
    Ok(())
}

/// Adopt `n` under the region covering its reference sequence, creating a
/// region spanning `[1, max(end) on seq]` with strand `+` when none
/// exists.
fn make_region(forest: &mut Forest, n: NodeId, region_type: &str) -> Result<NodeId, Error> {
    let (seq, cur_parent) = {
        let f = forest.get(n);
        (f.seq_name.clone(), f.parent_id().unwrap_or(ROOT))
    };

    let existing = forest.find_first(|f| f.type_key == region_type && f.seq_name == seq);
    let region = match existing {
        Some(r) if r != n && !forest.is_descendant(r, n) => r,
        _ => {
            let max_end = forest.max_end_on_seq(&seq).max(1);
            let mut region = Feature::bare(
                seq,
                region_type.to_string(),
                1,
                max_end,
                Strand::Forward,
            );
            let id = forest.mint_id(region_type);
            region.set_id(id.clone());
            region.name = id;
            region.minted_id = true;
            if cur_parent != ROOT {
                let pid = forest.get(cur_parent).id.clone();
                region.set_parent_attr(&pid);
            }
            forest.insert(region, cur_parent)?
        }
    };

    adopt(forest, n, region);
    Ok(region)
}

/// Synthesize a covering parent of type `alt`, inheriting self's span,
/// strand, parent chain, and `Parent` attribute, then adopt self under it.
fn make_parent(forest: &mut Forest, n: NodeId, alt: &str) -> Result<NodeId, Error> {
    let node = forest.get(n).clone();
    let cur_parent = node.parent_id().unwrap_or(ROOT);
    let mut parent = Feature::bare(
        node.seq_name.clone(),
        alt.to_string(),
        node.start,
        node.end,
        node.strand,
    );
    parent.source = node.source.clone();
    let id = forest.mint_id(alt);
    parent.set_id(id.clone());
    parent.name = id;
    parent.minted_id = true;
    if let Some(pa) = node.parent_attr() {
        parent.attributes.insert("Parent".to_string(), pa.clone());
    }
    let pid = forest.insert(parent, cur_parent)?;
    adopt(forest, n, pid);
    Ok(pid)
}
