//! Profanity filter: configurable dictionary plus regex patterns.

use aho_corasick::AhoCorasick;
use regex::Regex;
use std::io::BufRead;
use std::path::Path;
use tracing::warn;

use super::{ContentCtx, ContentFilter, Decision};

/// Dictionary- and regex-based content filter.
///
/// Dictionary terms block outright; regex pattern matches flag for review.
pub struct ProfanityFilter {
    matcher: Option<AhoCorasick>,
    flag_patterns: Vec<Regex>,
}

/// Load dictionary terms from a file: one term per line, `#` comments and
/// blank lines ignored.
pub fn load_dictionary(path: impl AsRef<Path>) -> std::io::Result<Vec<String>> {
    let file = std::fs::File::open(path)?;
    let mut terms = Vec::new();
    for line in std::io::BufReader::new(file).lines() {
        let line = line?;
        let term = line.trim();
        if term.is_empty() || term.starts_with('#') {
            continue;
        }
        terms.push(term.to_string());
    }
    Ok(terms)
}

impl ProfanityFilter {
    /// Build the filter from blocked terms and flag-only patterns.
    pub fn new(blocked_terms: Vec<String>, flag_patterns: Vec<Regex>) -> Self {
        let matcher = if blocked_terms.is_empty() {
            None
        } else {
            match AhoCorasick::builder()
                .ascii_case_insensitive(true)
                .build(&blocked_terms)
            {
                Ok(matcher) => Some(matcher),
                Err(err) => {
                    warn!(error = ?err, "failed to build profanity matcher; dictionary disabled");
                    None
                }
            }
        };

        Self {
            matcher,
            flag_patterns,
        }
    }
}

impl ContentFilter for ProfanityFilter {
    fn name(&self) -> &'static str {
        "profanity"
    }

    fn inspect(&self, ctx: &ContentCtx<'_>) -> Decision {
        if let Some(matcher) = &self.matcher {
            if let Some(hit) = matcher.find(ctx.content) {
                let term = &ctx.content[hit.start()..hit.end()];
                return Decision::Block(format!("blocked term: {term}"));
            }
        }

        for pattern in &self.flag_patterns {
            if pattern.is_match(ctx.content) {
                return Decision::Flag(format!("matched pattern: {}", pattern.as_str()));
            }
        }

        Decision::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palaver_proto::MessageKind;

    fn ctx(content: &str) -> ContentCtx<'_> {
        ContentCtx {
            principal_id: 1,
            room_id: 1,
            content,
            kind: MessageKind::Text,
        }
    }

    #[test]
    fn dictionary_term_blocks() {
        let filter = ProfanityFilter::new(vec!["BLOCKED".into()], vec![]);
        match filter.inspect(&ctx("hello BLOCKED world")) {
            Decision::Block(reason) => assert!(reason.contains("BLOCKED")),
            other => panic!("expected block, got {other:?}"),
        }
    }

    #[test]
    fn dictionary_match_is_case_insensitive() {
        let filter = ProfanityFilter::new(vec!["blocked".into()], vec![]);
        assert!(filter.inspect(&ctx("well BlOcKeD then")).is_block());
    }

    #[test]
    fn flag_pattern_flags_without_blocking() {
        let filter = ProfanityFilter::new(
            vec![],
            vec![Regex::new(r"(?i)free\s+crypto").unwrap()],
        );
        match filter.inspect(&ctx("get FREE   crypto now")) {
            Decision::Flag(_) => {}
            other => panic!("expected flag, got {other:?}"),
        }
    }

    #[test]
    fn clean_content_allowed() {
        let filter = ProfanityFilter::new(
            vec!["badword".into()],
            vec![Regex::new("pattern").unwrap()],
        );
        assert_eq!(filter.inspect(&ctx("a perfectly fine message")), Decision::Allow);
    }

    #[test]
    fn empty_dictionary_never_blocks() {
        let filter = ProfanityFilter::new(vec![], vec![]);
        assert_eq!(filter.inspect(&ctx("anything at all")), Decision::Allow);
    }

    #[test]
    fn dictionary_loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("terms.txt");
        std::fs::write(&path, "# comment\nalpha\n\n  beta  \n").unwrap();
        let terms = load_dictionary(&path).unwrap();
        assert_eq!(terms, vec!["alpha".to_string(), "beta".to_string()]);
    }
}
