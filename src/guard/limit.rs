//! LIMIT normalization at statement scope
//!
//! Clamping is paren-depth aware: only a LIMIT at depth zero counts as the
//! statement-scope limit. Subquery limits are left alone; clamping them
//! could change what an aggregate sees.

use super::lexer::{TokKind, Token};

/// Clamp every top-level `LIMIT n` to `max` and append one when the
/// statement has none. `tokens` were produced from the masked twin of
/// `text`, so spans carry over byte-for-byte.
pub fn normalize_limit(text: &str, tokens: &[Token], masked: &str, max: u64) -> String {
    let mut edits: Vec<(usize, usize, String)> = Vec::new();
    let mut top_level_found = false;

    for (i, tok) in tokens.iter().enumerate() {
        if tok.kind != TokKind::Ident || tok.depth != 0 || tok.ident_lower(masked) != "limit" {
            continue;
        }
        top_level_found = true;
        match tokens.get(i + 1) {
            Some(n) if n.kind == TokKind::Number => {
                let within = n
                    .text(masked)
                    .parse::<u64>()
                    .map(|v| v <= max)
                    .unwrap_or(false);
                if !within {
                    edits.push((n.start, n.end, max.to_string()));
                }
            }
            Some(n) if n.kind == TokKind::Ident && n.ident_lower(masked) == "all" => {
                edits.push((n.start, n.end, max.to_string()));
            }
            _ => {}
        }
    }

    let mut out = text.to_string();
    edits.sort_by(|a, b| b.0.cmp(&a.0));
    for (start, end, replacement) in edits {
        out.replace_range(start..end, &replacement);
    }
    if !top_level_found {
        out.push_str(&format!("\nLIMIT {}", max));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::super::lexer::tokenize;
    use super::*;

    fn run(sql: &str, max: u64) -> String {
        let tokens = tokenize(sql);
        normalize_limit(sql, &tokens, sql, max)
    }

    #[test]
    fn test_append_when_missing() {
        assert_eq!(run("SELECT 1", 500), "SELECT 1\nLIMIT 500");
    }

    #[test]
    fn test_clamp_oversized() {
        assert_eq!(run("SELECT 1 LIMIT 501", 500), "SELECT 1 LIMIT 500");
    }

    #[test]
    fn test_keep_within_bounds() {
        assert_eq!(run("SELECT 1 LIMIT 42", 500), "SELECT 1 LIMIT 42");
    }

    #[test]
    fn test_limit_all_is_clamped() {
        assert_eq!(run("SELECT 1 LIMIT ALL", 500), "SELECT 1 LIMIT 500");
    }

    #[test]
    fn test_subquery_limit_untouched_but_top_level_appended() {
        let out = run("SELECT * FROM (SELECT 1 LIMIT 1000) x", 500);
        assert_eq!(out, "SELECT * FROM (SELECT 1 LIMIT 1000) x\nLIMIT 500");
    }
}
