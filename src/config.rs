//! Engine configuration surface and JSON rule files.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::classify::CommentPattern;
use crate::error::Error;
use crate::expect::{Action, Expectation, Relation};

/// Policy for features missing an `ID` attribute.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IdPolicy {
    /// Drop the line silently.
    #[default]
    Ignore,
    /// Warn and drop the line.
    Warn,
    /// Fatal error with the line number.
    Die,
    /// Mint an ID.
    Make,
    /// Use this attribute's value as the ID, falling back to `Make`.
    Attribute(String),
}

impl IdPolicy {
    /// Any string that is not a known policy names an alternative attribute.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "ignore" => Self::Ignore,
            "warn" => Self::Warn,
            "die" => Self::Die,
            "make" => Self::Make,
            _ => Self::Attribute(s.to_string()),
        }
    }
}

/// Policy for orphans whose `Parent` never resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrphanPolicy {
    Die,
    /// Leave the node under root for validation to repair.
    #[default]
    Make,
}

impl std::str::FromStr for OrphanPolicy {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "die" => Ok(Self::Die),
            "make" => Ok(Self::Make),
            _ => Err(Error::Parse(format!(
                "unrecognized undefined-parent policy: '{s}'"
            ))),
        }
    }
}

/// Flag for expected-column-count mismatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnFlag {
    Ignore,
    Warn,
    Die,
    Skip,
}

impl std::str::FromStr for ColumnFlag {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ignore" => Ok(Self::Ignore),
            "warn" => Ok(Self::Warn),
            "die" => Ok(Self::Die),
            "skip" => Ok(Self::Skip),
            _ => Err(Error::Parse(format!("unrecognized column flag: '{s}'"))),
        }
    }
}

/// All knobs callable before parsing.
#[derive(Debug, Default)]
pub struct Config {
    separator: Option<String>,
    comment_patterns: Vec<CommentPattern>,
    type_map: HashMap<String, String>,
    multiline_all: bool,
    multiline_types: HashSet<String>,
    lacks_id: HashMap<String, IdPolicy>,
    lacks_id_default: IdPolicy,
    undefined_parent: OrphanPolicy,
    expected_columns: Option<(usize, ColumnFlag)>,
    expectations: HashMap<String, Vec<Expectation>>,
}

impl Config {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the column separator (default TAB).
    pub fn separator(&mut self, sep: &str) -> &mut Self {
        self.separator = Some(sep.to_string());
        self
    }

    /// Declare inline comment delimiters and delimiter pairs.
    pub fn has_comments(&mut self, patterns: impl IntoIterator<Item = CommentPattern>) -> &mut Self {
        self.comment_patterns.extend(patterns);
        self
    }

    /// Declare raw → canonical type aliases applied at parse time.
    pub fn map_types(&mut self, map: impl IntoIterator<Item = (String, String)>) -> &mut Self {
        self.type_map.extend(map);
        self
    }

    /// Allow a type (case-insensitive) to coalesce across lines. `all`
    /// allows any type.
    pub fn multiline(&mut self, ftype: &str) -> &mut Self {
        let key = ftype.to_lowercase();
        if key == "all" {
            self.multiline_all = true;
        } else {
            self.multiline_types.insert(key);
        }
        self
    }

    /// Policy for a missing ID, per type. `all` sets the default.
    pub fn lacks_id(&mut self, ftype: &str, policy: IdPolicy) -> &mut Self {
        let key = ftype.to_lowercase();
        if key == "all" {
            self.lacks_id_default = policy;
        } else {
            self.lacks_id.insert(key, policy);
        }
        self
    }

    pub fn undefined_parent(&mut self, policy: OrphanPolicy) -> &mut Self {
        self.undefined_parent = policy;
        self
    }

    /// Enforce exactly `count` columns per data line.
    pub fn expect_columns(&mut self, count: usize, flag: ColumnFlag) -> &mut Self {
        self.expected_columns = Some((count, flag));
        self
    }

    /// Register a validation rule. The type pattern may join several
    /// lower-cased names with `|`; the rule is registered once per name.
    pub fn add_expectation(
        &mut self,
        type_pattern: &str,
        relation: &str,
        alt: &str,
        flag: &str,
    ) -> std::result::Result<&mut Self, Error> {
        let relation = Relation::parse(relation)?;
        let action: Action = flag.parse()?;
        let expectation = Expectation::new(relation, alt, action)?;
        for name in type_pattern.split('|') {
            let name = name.trim().to_lowercase();
            if name.is_empty() {
                continue;
            }
            self.expectations
                .entry(name)
                .or_default()
                .push(expectation.clone());
        }
        Ok(self)
    }

    // ── Read side ────────────────────────────────────────

    #[must_use]
    pub fn column_separator(&self) -> &str {
        self.separator.as_deref().unwrap_or("\t")
    }

    #[must_use]
    pub fn inline_comments(&self) -> &[CommentPattern] {
        &self.comment_patterns
    }

    #[must_use]
    pub fn mapped_type(&self, raw: &str) -> Option<&str> {
        self.type_map.get(raw).map(String::as_str)
    }

    #[must_use]
    pub fn is_multiline(&self, type_key: &str) -> bool {
        self.multiline_all || self.multiline_types.contains(type_key)
    }

    #[must_use]
    pub fn id_policy(&self, type_key: &str) -> &IdPolicy {
        self.lacks_id.get(type_key).unwrap_or(&self.lacks_id_default)
    }

    #[must_use]
    pub fn orphan_policy(&self) -> OrphanPolicy {
        self.undefined_parent
    }

    #[must_use]
    pub fn expected_columns(&self) -> Option<(usize, ColumnFlag)> {
        self.expected_columns
    }

    #[must_use]
    pub fn rules_for(&self, type_key: &str) -> &[Expectation] {
        self.expectations
            .get(type_key)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.expectations.values().map(Vec::len).sum()
    }

    /// Load the whole configuration surface from a JSON rule file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read rule file: {}", path.display()))?;
        let raw: RawConfig = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse rule file: {}", path.display()))?;
        raw.into_config()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawConfig {
    separator: Option<String>,
    comments: Option<Vec<Vec<String>>>,
    type_map: Option<HashMap<String, String>>,
    multiline: Option<Vec<String>>,
    lacks_id: Option<HashMap<String, String>>,
    undefined_parent: Option<String>,
    expect_columns: Option<RawExpectColumns>,
    expectations: Option<Vec<[String; 4]>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawExpectColumns {
    count: usize,
    flag: String,
}

impl RawConfig {
    fn into_config(self) -> Result<Config> {
        let mut config = Config::new();

        if let Some(sep) = self.separator {
            config.separator(&sep);
        }
        if let Some(patterns) = self.comments {
            let mut converted = Vec::with_capacity(patterns.len());
            for parts in patterns {
                match parts.as_slice() {
                    [delim] => converted.push(CommentPattern::Delimiter(delim.clone())),
                    [open, close] => {
                        converted.push(CommentPattern::Pair(open.clone(), close.clone()));
                    }
                    _ => bail!(
                        "comment pattern must have 1 (delimiter) or 2 (pair) elements, got {}",
                        parts.len()
                    ),
                }
            }
            config.has_comments(converted);
        }
        if let Some(map) = self.type_map {
            config.map_types(map);
        }
        for ftype in self.multiline.unwrap_or_default() {
            config.multiline(&ftype);
        }
        for (ftype, policy) in self.lacks_id.unwrap_or_default() {
            config.lacks_id(&ftype, IdPolicy::parse(&policy));
        }
        if let Some(policy) = self.undefined_parent {
            config.undefined_parent(
                policy
                    .parse()
                    .with_context(|| format!("invalid undefinedParent: '{policy}'"))?,
            );
        }
        if let Some(cols) = self.expect_columns {
            config.expect_columns(
                cols.count,
                cols.flag
                    .parse()
                    .with_context(|| format!("invalid expectColumns flag: '{}'", cols.flag))?,
            );
        }
        for [types, relation, alt, flag] in self.expectations.unwrap_or_default() {
            config
                .add_expectation(&types, &relation, &alt, &flag)
                .with_context(|| format!("invalid expectation for '{types}'"))?;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_rules(json: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(json.as_bytes()).unwrap();
        f
    }

    #[test]
    fn defaults() {
        let config = Config::new();
        assert_eq!(config.column_separator(), "\t");
        assert_eq!(*config.id_policy("exon"), IdPolicy::Ignore);
        assert_eq!(config.orphan_policy(), OrphanPolicy::Make);
        assert!(config.expected_columns().is_none());
        assert!(!config.is_multiline("cds"));
    }

    #[test]
    fn multiline_all_wildcard() {
        let mut config = Config::new();
        config.multiline("all");
        assert!(config.is_multiline("cds"));
        assert!(config.is_multiline("anything"));
    }

    #[test]
    fn multiline_case_insensitive() {
        let mut config = Config::new();
        config.multiline("CDS");
        assert!(config.is_multiline("cds"));
    }

    #[test]
    fn lacks_id_all_sets_default() {
        let mut config = Config::new();
        config.lacks_id("all", IdPolicy::Make);
        config.lacks_id("exon", IdPolicy::Die);
        assert_eq!(*config.id_policy("cds"), IdPolicy::Make);
        assert_eq!(*config.id_policy("exon"), IdPolicy::Die);
    }

    #[test]
    fn id_policy_parse() {
        assert_eq!(IdPolicy::parse("ignore"), IdPolicy::Ignore);
        assert_eq!(IdPolicy::parse("MAKE"), IdPolicy::Make);
        assert_eq!(
            IdPolicy::parse("transcript_id"),
            IdPolicy::Attribute("transcript_id".to_string())
        );
    }

    #[test]
    fn expectation_registered_per_name() {
        let mut config = Config::new();
        config
            .add_expectation("mrna|trna", "hasParent", "gene", "warn")
            .unwrap();
        assert_eq!(config.rules_for("mrna").len(), 1);
        assert_eq!(config.rules_for("trna").len(), 1);
        assert!(config.rules_for("gene").is_empty());
        assert_eq!(config.rule_count(), 2);
    }

    #[test]
    fn bad_relation_rejected() {
        let mut config = Config::new();
        assert!(config.add_expectation("mrna", "hasCousin", "gene", "warn").is_err());
        assert!(config.add_expectation("mrna", "hasParent", "gene", "shrug").is_err());
    }

    #[test]
    fn rule_file_round_trip() {
        let json = r#"{
            "separator": "\t",
            "comments": [["//"], ["[", "]"]],
            "typeMap": { "mRNA": "transcript" },
            "multiline": ["CDS"],
            "lacksId": { "all": "make", "exon": "warn" },
            "undefinedParent": "die",
            "expectColumns": { "count": 9, "flag": "skip" },
            "expectations": [
                ["mrna", "hasParent", "gene", "find"],
                ["cds", "<=[start,end]", "SELF", "warn"]
            ]
        }"#;
        let f = write_rules(json);
        let config = Config::from_file(f.path()).unwrap();
        assert_eq!(config.inline_comments().len(), 2);
        assert_eq!(config.mapped_type("mRNA"), Some("transcript"));
        assert!(config.is_multiline("cds"));
        assert_eq!(*config.id_policy("gene"), IdPolicy::Make);
        assert_eq!(*config.id_policy("exon"), IdPolicy::Warn);
        assert_eq!(config.orphan_policy(), OrphanPolicy::Die);
        assert_eq!(config.expected_columns(), Some((9, ColumnFlag::Skip)));
        assert_eq!(config.rule_count(), 2);
    }

    #[test]
    fn rule_file_bad_comment_pattern() {
        let json = r#"{ "comments": [["a", "b", "c"]] }"#;
        let f = write_rules(json);
        let err = Config::from_file(f.path()).unwrap_err();
        assert!(err.to_string().contains("comment pattern"));
    }

    #[test]
    fn rule_file_bad_expectation() {
        let json = r#"{ "expectations": [["mrna", "hasParent", "gene", "nonsense"]] }"#;
        let f = write_rules(json);
        assert!(Config::from_file(f.path()).is_err());
    }
}
