//! GFF3 line tokenizer: fixed columns plus the column-9 attribute map.

use crate::config::{ColumnFlag, Config};
use crate::diagnostics::Diagnostics;
use crate::error::Error;
use crate::feature::{AttrValue, Attributes, Feature, Phase};
use crate::strand::Strand;

/// Result of tokenizing one data line.
pub enum Tokenized {
    Feature(Box<Feature>),
    /// The line was dropped (column-count skip, or too few columns).
    Skipped,
}

/// Split a data line into a feature. Comment and FASTA classification has
/// already happened; inline comments are already stripped.
pub fn tokenize(
    line: &str,
    config: &Config,
    line_num: u64,
    diag: &mut Diagnostics,
) -> Result<Tokenized, Error> {
    let sep = config.column_separator();
    let columns: Vec<&str> = line.split(sep).collect();

    if let Some((expected, flag)) = config.expected_columns()
        && columns.len() != expected
    {
        let msg = format!(
            "line {line_num}: expected {expected} columns, found {}",
            columns.len()
        );
        match flag {
            ColumnFlag::Ignore => {}
            ColumnFlag::Warn => diag.warn(msg),
            ColumnFlag::Die => return Err(Error::Parse(msg)),
            ColumnFlag::Skip => {
                diag.warn(format!("{msg}; line skipped"));
                return Ok(Tokenized::Skipped);
            }
        }
    }

    if columns.len() < 8 {
        diag.warn(format!(
            "line {line_num}: malformed record with {} columns; line skipped",
            columns.len()
        ));
        return Ok(Tokenized::Skipped);
    }

    let start: u32 = columns[3].parse().map_err(|e| {
        Error::Parse(format!(
            "line {line_num}: invalid start '{}': {e}",
            columns[3]
        ))
    })?;
    let end: u32 = columns[4].parse().map_err(|e| {
        Error::Parse(format!("line {line_num}: invalid end '{}': {e}", columns[4]))
    })?;

    // Stray separators inside column 9 are rejoined rather than dropped.
    let attr_column = if columns.len() > 9 {
        columns[8..].join(sep)
    } else {
        columns.get(8).copied().unwrap_or("").to_string()
    };

    let ftype = columns[2].to_string();
    let feature = Feature {
        seq_name: columns[0].to_string(),
        source: columns[1].to_string(),
        type_key: ftype.to_lowercase(),
        ftype,
        start,
        end,
        score: columns[5].to_string(),
        strand: Strand::from_gff3(columns[6]),
        phase: Phase::from_gff3(columns[7]),
        attributes: parse_attributes(&attr_column),
        ..Feature::bare(String::new(), String::new(), 0, 0, Strand::Unknown)
    };

    Ok(Tokenized::Feature(Box::new(feature)))
}

/// Parse GFF3 column 9: `;`-separated `key=value` pairs. Values are
/// percent-decoded, then comma-split into ordered lists. Empty values drop
/// the key.
#[must_use]
pub fn parse_attributes(attrs_str: &str) -> Attributes {
    let mut attrs = Attributes::new();

    for pair in attrs_str.split(';') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let Some(eq_pos) = pair.find('=') else {
            continue;
        };
        let key = pair[..eq_pos].trim();
        let raw = pair[eq_pos + 1..].trim();
        if key.is_empty() || raw.is_empty() {
            continue;
        }

        let decoded = percent_decode(raw);
        let parts: Vec<String> = if decoded.contains(',') {
            decoded.split(',').map(str::to_string).collect()
        } else {
            vec![decoded]
        };
        attrs.insert(key.to_string(), AttrValue::from_parts(parts));
    }

    attrs
}

/// Replace `%XX` hex escapes with the corresponding byte. Malformed escapes
/// are left as written.
#[must_use]
pub fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%'
            && let (Some(hi), Some(lo)) = (
                bytes.get(i + 1).copied().and_then(hex_digit),
                bytes.get(i + 2).copied().and_then(hex_digit),
            )
        {
            out.push(hi * 16 + lo);
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn tok(line: &str) -> Result<Tokenized, Error> {
        let config = Config::new();
        let mut diag = Diagnostics::new();
        tokenize(line, &config, 1, &mut diag)
    }

    #[test]
    fn tokenize_gene_line() {
        let line = "chr1\tRefSeq\tgene\t11874\t14409\t.\t+\t.\tID=g1;Name=DDX11L1";
        match tok(line).unwrap() {
            Tokenized::Feature(f) => {
                assert_eq!(f.seq_name, "chr1");
                assert_eq!(f.source, "RefSeq");
                assert_eq!(f.ftype, "gene");
                assert_eq!(f.type_key, "gene");
                assert_eq!(f.start, 11874);
                assert_eq!(f.end, 14409);
                assert_eq!(f.strand, Strand::Forward);
                assert_eq!(
                    f.attributes.get("Name"),
                    Some(&AttrValue::Scalar("DDX11L1".to_string()))
                );
            }
            Tokenized::Skipped => panic!("expected a feature"),
        }
    }

    #[test]
    fn invalid_start_is_fatal() {
        assert!(tok("chr1\t.\tgene\tnot_a_number\t100\t.\t+\t.\tID=g1").is_err());
    }

    #[test]
    fn short_line_skipped_leniently() {
        let config = Config::new();
        let mut diag = Diagnostics::new();
        let result = tokenize("chr1\tonly\ttwo", &config, 3, &mut diag).unwrap();
        assert!(matches!(result, Tokenized::Skipped));
        assert_eq!(diag.len(), 1);
    }

    #[test]
    fn expected_columns_skip() {
        let mut config = Config::new();
        config.expect_columns(9, ColumnFlag::Skip);
        let mut diag = Diagnostics::new();
        let result = tokenize(
            "chr1\t.\tgene\t1\t100\t.\t+\t.\tID=g1\textra",
            &config,
            1,
            &mut diag,
        )
        .unwrap();
        assert!(matches!(result, Tokenized::Skipped));
        assert_eq!(diag.len(), 1);
    }

    #[test]
    fn expected_columns_die() {
        let mut config = Config::new();
        config.expect_columns(9, ColumnFlag::Die);
        let mut diag = Diagnostics::new();
        assert!(tokenize("chr1\t.\tgene\t1\t100\t.\t+\t.", &config, 1, &mut diag).is_err());
    }

    #[test]
    fn missing_attribute_column() {
        match tok("chr1\t.\tgene\t1\t100\t.\t+\t.").unwrap() {
            Tokenized::Feature(f) => assert!(f.attributes.is_empty()),
            Tokenized::Skipped => panic!("expected a feature"),
        }
    }

    #[test]
    fn attributes_comma_split() {
        let attrs = parse_attributes("Parent=a,b;Note=single");
        assert_eq!(
            attrs.get("Parent"),
            Some(&AttrValue::List(vec!["a".to_string(), "b".to_string()]))
        );
        assert_eq!(
            attrs.get("Note"),
            Some(&AttrValue::Scalar("single".to_string()))
        );
    }

    #[test]
    fn attributes_empty_value_dropped() {
        let attrs = parse_attributes("ID=;Name=x");
        assert!(!attrs.contains_key("ID"));
        assert!(attrs.contains_key("Name"));
    }

    #[test]
    fn attributes_preserve_order() {
        let attrs = parse_attributes("ID=x;Zed=1;Alpha=2");
        let keys: Vec<&str> = attrs.keys().map(String::as_str).collect();
        assert_eq!(keys, ["ID", "Zed", "Alpha"]);
    }

    #[test]
    fn percent_decoding() {
        assert_eq!(percent_decode("bar%3Bbaz"), "bar;baz");
        assert_eq!(percent_decode("a%3Db"), "a=b");
        assert_eq!(percent_decode("100%25"), "100%");
        // Malformed escapes pass through
        assert_eq!(percent_decode("odd%zz"), "odd%zz");
        assert_eq!(percent_decode("tail%"), "tail%");
    }

    #[test]
    fn decoded_comma_splits_into_list() {
        let attrs = parse_attributes("tags=a%2Cb");
        assert_eq!(
            attrs.get("tags"),
            Some(&AttrValue::List(vec!["a".to_string(), "b".to_string()]))
        );
    }

    #[test]
    fn value_with_encoded_reserved_characters() {
        let attrs = parse_attributes("note=foo%3Dbar%3Bbaz");
        assert_eq!(
            attrs.get("note"),
            Some(&AttrValue::Scalar("foo=bar;baz".to_string()))
        );
    }
}
