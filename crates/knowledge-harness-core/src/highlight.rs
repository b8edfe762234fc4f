//! Query-term highlighting for search results.
//!
//! Produces a window of at most `HIGHLIGHT_BEFORE + HIGHLIGHT_AFTER`
//! characters around the earliest matching term, with every matched term
//! wrapped in `**`. Positions are counted in characters, not bytes.

use crate::text::tokenize;

pub const HIGHLIGHT_BEFORE: usize = 100;
pub const HIGHLIGHT_AFTER: usize = 200;
pub const HIGHLIGHT_PREFIX: usize = 200;
pub const ELLIPSIS: &str = "...";
pub const MARK: &str = "**";

fn fold(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}

fn matches_at(lower: &[char], pos: usize, term: &[char]) -> bool {
    lower.len() >= pos + term.len() && lower[pos..pos + term.len()] == *term
}

/// Longest term matching at `pos`, if any.
fn term_at(lower: &[char], pos: usize, terms: &[Vec<char>]) -> Option<usize> {
    terms
        .iter()
        .filter(|t| matches_at(lower, pos, t))
        .map(|t| t.len())
        .max()
}

/// Build the highlight for `content` given the raw `query`.
pub fn highlight(content: &str, query: &str) -> String {
    let chars: Vec<char> = content.chars().collect();
    let lower: Vec<char> = chars.iter().map(|c| fold(*c)).collect();
    let terms: Vec<Vec<char>> = tokenize(query)
        .into_iter()
        .map(|t| t.chars().collect::<Vec<char>>())
        .filter(|t| !t.is_empty())
        .collect();

    let first = (0..lower.len()).find(|&pos| term_at(&lower, pos, &terms).is_some());

    let Some(first) = first else {
        return prefix(&chars);
    };

    let start = first.saturating_sub(HIGHLIGHT_BEFORE);
    let end = (first + HIGHLIGHT_AFTER).min(chars.len());

    let mut out = String::new();
    if start > 0 {
        out.push_str(ELLIPSIS);
    }

    let mut pos = start;
    while pos < end {
        match term_at(&lower, pos, &terms) {
            Some(len) if pos + len <= end => {
                out.push_str(MARK);
                out.extend(&chars[pos..pos + len]);
                out.push_str(MARK);
                pos += len;
            }
            _ => {
                out.push(chars[pos]);
                pos += 1;
            }
        }
    }

    if end < chars.len() {
        out.push_str(ELLIPSIS);
    }
    out
}

fn prefix(chars: &[char]) -> String {
    if chars.len() <= HIGHLIGHT_PREFIX {
        return chars.iter().collect();
    }
    let mut out: String = chars[..HIGHLIGHT_PREFIX].iter().collect();
    out.push_str(ELLIPSIS);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn visible_len(h: &str) -> usize {
        let mut s = h.replace(MARK, "");
        if s.starts_with(ELLIPSIS) {
            s = s[ELLIPSIS.len()..].to_string();
        }
        if s.ends_with(ELLIPSIS) {
            s.truncate(s.len() - ELLIPSIS.len());
        }
        s.chars().count()
    }

    #[test]
    fn test_wraps_terms_case_insensitively() {
        let h = highlight("Add Retry logic to the QUEUE consumer", "retry queue");
        assert_eq!(h, "Add **Retry** logic to the **QUEUE** consumer");
    }

    #[test]
    fn test_no_match_returns_prefix() {
        let short = "unrelated topic about fonts";
        assert_eq!(highlight(short, "retry"), short);

        let long = "z".repeat(500);
        let h = highlight(&long, "retry");
        assert!(h.ends_with(ELLIPSIS));
        assert_eq!(h.chars().count(), HIGHLIGHT_PREFIX + ELLIPSIS.len());
    }

    #[test]
    fn test_window_bounds_with_ellipses() {
        let content = format!("{} needle {}", "a ".repeat(300), "b ".repeat(300));
        let h = highlight(&content, "needle");
        assert!(h.starts_with(ELLIPSIS));
        assert!(h.ends_with(ELLIPSIS));
        assert!(h.contains("**needle**"));
        assert!(visible_len(&h) <= HIGHLIGHT_BEFORE + HIGHLIGHT_AFTER);
    }

    #[test]
    fn test_multibyte_content_does_not_panic() {
        let content = format!("{}café déjà vu{}", "é".repeat(150), "ü".repeat(400));
        let h = highlight(&content, "DÉJÀ");
        assert!(h.contains("**déjà**"));
        assert!(visible_len(&h) <= HIGHLIGHT_BEFORE + HIGHLIGHT_AFTER);
    }

    #[test]
    fn test_empty_content() {
        assert_eq!(highlight("", "anything"), "");
    }
}
