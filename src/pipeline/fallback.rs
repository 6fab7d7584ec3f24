//! Empty-result fallback - strip the statement-scope time filter once
//!
//! A plan that returns zero rows often over-filtered on time. The fallback
//! removes the first `ts >=` filter and retries. Stripping only happens at
//! statement scope; a nested filter means we skip the fallback entirely
//! rather than risk emitting malformed SQL.

use crate::guard::mask::mask_literals;
use once_cell::sync::Lazy;
use regex::Regex;

static TS_FILTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:[a-z_][a-z0-9_]*\.)?ts\s*>=").unwrap());

static FILTER_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(order\s+by|limit|group\s+by|and|or)\b").unwrap());

/// Rewrite `sql` without its first top-level `ts >=` filter, or None when
/// there is nothing to strip or the filter is nested.
pub fn strip_time_filter(sql: &str) -> Option<String> {
    let masked = mask_literals(sql);
    let m = TS_FILTER.find(&masked)?;

    let depth = masked[..m.start()]
        .bytes()
        .fold(0i32, |d, b| match b {
            b'(' => d + 1,
            b')' => d - 1,
            _ => d,
        });
    if depth != 0 {
        return None;
    }

    let before = masked[..m.start()].trim_end();
    let lead = if ends_with_word(before, "and") {
        Lead::And(before.len() - 3)
    } else if ends_with_word(before, "where") {
        Lead::Where
    } else {
        return None;
    };

    let end = filter_end(&masked, m.end());

    let mut out = String::new();
    match lead {
        Lead::And(and_start) => {
            out.push_str(sql[..and_start].trim_end());
            out.push(' ');
            out.push_str(sql[end..].trim_start());
        }
        Lead::Where => {
            // WHERE 1=1 keeps any following AND clauses valid
            out.push_str(&sql[..m.start()]);
            out.push_str("1=1 ");
            out.push_str(sql[end..].trim_start());
        }
    }
    Some(out.trim_end().to_string())
}

enum Lead {
    And(usize),
    Where,
}

fn ends_with_word(text: &str, word: &str) -> bool {
    let lower = text.to_lowercase();
    if !lower.ends_with(word) {
        return false;
    }
    let boundary = lower.len() - word.len();
    boundary == 0
        || !lower.as_bytes()[boundary - 1].is_ascii_alphanumeric()
            && lower.as_bytes()[boundary - 1] != b'_'
}

/// Scan to the end of the filter expression: the first `)` that closes the
/// enclosing scope, a statement-scope clause keyword or AND/OR boundary,
/// or end of text
fn filter_end(masked: &str, from: usize) -> usize {
    let bytes = masked.as_bytes();
    let mut depth = 0i32;
    let mut i = from;
    while i < bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => {
                if depth == 0 {
                    return i;
                }
                depth -= 1;
            }
            _ => {
                if depth == 0
                    && is_word_start(bytes, i)
                    && FILTER_BOUNDARY.is_match(&masked[i..])
                {
                    return i;
                }
            }
        }
        i += 1;
    }
    masked.len()
}

fn is_word_start(bytes: &[u8], i: usize) -> bool {
    (bytes[i].is_ascii_alphabetic())
        && (i == 0 || !(bytes[i - 1].is_ascii_alphanumeric() || bytes[i - 1] == b'_'))
}
