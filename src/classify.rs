//! Line classification and inline comment stripping.

/// Category of a raw input line. FASTA body lines classify as `Data`; the
/// builder decides by its FASTA mode whether they are sequence or records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind<'a> {
    Blank,
    /// `depth` counts the leading `#` characters; depth >= 2 is a directive.
    Comment { depth: usize },
    FastaHeader(&'a str),
    Data,
}

/// An inline comment pattern applied to data lines before tokenization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommentPattern {
    /// Strip from the delimiter to end of line.
    Delimiter(String),
    /// Strip every matched enclosed span. Unclosed openers are left intact.
    Pair(String, String),
}

/// Classify a raw input line.
#[must_use]
pub fn classify(line: &str) -> LineKind<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return LineKind::Blank;
    }
    if trimmed.starts_with('#') {
        let depth = trimmed.chars().take_while(|&c| c == '#').count();
        return LineKind::Comment { depth };
    }
    if let Some(rest) = trimmed.strip_prefix('>') {
        let name = rest.split_whitespace().next().unwrap_or("");
        return LineKind::FastaHeader(name);
    }
    LineKind::Data
}

/// Apply the configured inline comment patterns, in declared order.
#[must_use]
pub fn strip_inline_comments(line: &str, patterns: &[CommentPattern]) -> String {
    let mut out = line.to_string();
    for pattern in patterns {
        match pattern {
            CommentPattern::Delimiter(delim) => {
                if let Some(pos) = out.find(delim.as_str()) {
                    out.truncate(pos);
                }
            }
            CommentPattern::Pair(open, close) => {
                while let Some(start) = out.find(open.as_str()) {
                    let after = start + open.len();
                    match out[after..].find(close.as_str()) {
                        Some(offset) => {
                            out.replace_range(start..after + offset + close.len(), "");
                        }
                        None => break,
                    }
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_blank() {
        assert_eq!(classify(""), LineKind::Blank);
        assert_eq!(classify("   \t"), LineKind::Blank);
    }

    #[test]
    fn classify_comment_depth() {
        assert_eq!(classify("# note"), LineKind::Comment { depth: 1 });
        assert_eq!(classify("##gff-version 3"), LineKind::Comment { depth: 2 });
        assert_eq!(classify("###"), LineKind::Comment { depth: 3 });
    }

    #[test]
    fn classify_fasta_header() {
        assert_eq!(
            classify(">chr1 Homo sapiens chromosome 1"),
            LineKind::FastaHeader("chr1")
        );
        assert_eq!(classify(">"), LineKind::FastaHeader(""));
    }

    #[test]
    fn classify_data() {
        assert_eq!(
            classify("chr1\t.\tgene\t1\t100\t.\t+\t.\tID=g1"),
            LineKind::Data
        );
    }

    #[test]
    fn strip_single_delimiter() {
        let patterns = [CommentPattern::Delimiter("//".to_string())];
        assert_eq!(
            strip_inline_comments("chr1\tgene // trailing note", &patterns),
            "chr1\tgene "
        );
        assert_eq!(strip_inline_comments("no comment", &patterns), "no comment");
    }

    #[test]
    fn strip_matched_pairs() {
        let patterns = [CommentPattern::Pair("[".to_string(), "]".to_string())];
        assert_eq!(
            strip_inline_comments("a[one]b[two]c", &patterns),
            "abc"
        );
    }

    #[test]
    fn unclosed_pair_left_intact() {
        let patterns = [CommentPattern::Pair("[".to_string(), "]".to_string())];
        assert_eq!(strip_inline_comments("a[open b", &patterns), "a[open b");
    }

    #[test]
    fn patterns_apply_in_order() {
        let patterns = [
            CommentPattern::Pair("(".to_string(), ")".to_string()),
            CommentPattern::Delimiter("#".to_string()),
        ];
        assert_eq!(
            strip_inline_comments("x(a)y#z", &patterns),
            "xy"
        );
    }
}
