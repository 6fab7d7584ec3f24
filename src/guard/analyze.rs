//! Guard analysis passes over the masked, tokenized statement

use super::lexer::{tokenize, TokKind, Token};
use super::limit::normalize_limit;
use super::mask::mask_literals;
use super::{GuardError, GuardedSql, DEFAULT_MAX_LIMIT};
use crate::schema::SchemaRegistry;
use std::collections::{BTreeMap, BTreeSet};

/// Write, DDL and admin keywords banned anywhere outside string literals
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "update", "insert", "delete", "drop", "alter", "truncate", "create", "grant", "revoke",
    "copy", "vacuum", "analyze",
];

/// Set-returning functions permitted as FROM targets
const SRF_ALLOWLIST: &[&str] = &["generate_series", "unnest"];

/// Functions whose argument list legally contains a FROM keyword
const FUNC_WITH_FROM: &[&str] = &["extract", "substring", "trim", "position", "overlay"];

/// Words that can follow `)` without being a derived-table alias
const ALIAS_STOPWORDS: &[&str] = &[
    "where", "group", "order", "limit", "having", "union", "intersect", "except", "on", "join",
    "inner", "left", "right", "full", "cross", "natural", "and", "or", "not", "when", "then",
    "else", "end", "from", "select", "offset", "fetch", "over", "filter", "desc", "asc", "in",
    "is", "like", "ilike", "between", "using", "window", "partition", "by", "with", "lateral",
    "as",
];

/// Clause keywords that terminate a FROM-list table reference
const CLAUSE_KEYWORDS: &[&str] = &[
    "where", "group", "order", "limit", "having", "union", "intersect", "except", "on", "join",
    "inner", "left", "right", "full", "cross", "natural", "offset", "fetch", "window", "using",
    "for", "tablesample",
];

pub struct Guard {
    tables: BTreeSet<String>,
    columns: BTreeMap<String, BTreeSet<String>>,
    max_limit: u64,
}

impl Guard {
    pub fn new(registry: &SchemaRegistry) -> Self {
        Self::from_parts(
            registry.tables().clone(),
            registry.columns_by_table().clone(),
            DEFAULT_MAX_LIMIT,
        )
    }

    pub fn from_parts(
        tables: BTreeSet<String>,
        columns: BTreeMap<String, BTreeSet<String>>,
        max_limit: u64,
    ) -> Self {
        Self {
            tables,
            columns,
            max_limit,
        }
    }

    /// Accept or reject one candidate statement. On accept, the returned
    /// statement carries a top-level LIMIT of at most `max_limit`.
    pub fn check(&self, sql: &str) -> Result<GuardedSql, GuardError> {
        let mut text = sql.trim().to_string();
        if text.is_empty() {
            return Err(GuardError::EmptyStatement);
        }
        let mut masked = mask_literals(&text);

        if masked.contains("--") || masked.contains("/*") {
            return Err(GuardError::CommentNotAllowed);
        }

        // one optional trailing semicolon is tolerated and dropped
        let end = masked.trim_end().len();
        if end > 0 && masked.as_bytes()[end - 1] == b';' {
            masked.truncate(end - 1);
            text.truncate(end - 1);
        }
        let end = masked.trim_end().len();
        masked.truncate(end);
        text.truncate(end);

        if text.trim().is_empty() {
            return Err(GuardError::EmptyStatement);
        }
        if masked.contains(';') {
            return Err(GuardError::MultiStatement);
        }

        let tokens = tokenize(&masked);
        let first = tokens.first().ok_or(GuardError::EmptyStatement)?;
        if first.kind != TokKind::Ident {
            return Err(GuardError::NotReadOnly(first.text(&masked).to_string()));
        }
        let head = first.ident_lower(&masked);
        if head != "select" && head != "with" {
            return Err(GuardError::NotReadOnly(first.text(&masked).to_string()));
        }

        self.scan_keywords(&tokens, &masked)?;
        let synthetic = collect_synthetic_names(&tokens, &masked);
        self.check_tables(&tokens, &masked, &synthetic)?;
        self.check_columns(&tokens, &masked, &synthetic)?;

        let normalized = normalize_limit(&text, &tokens, &masked, self.max_limit);
        Ok(GuardedSql(normalized))
    }

    /// Forbidden write/DDL/admin keywords and system schemas, word-exact
    fn scan_keywords(&self, tokens: &[Token], src: &str) -> Result<(), GuardError> {
        for tok in tokens {
            if tok.kind != TokKind::Ident {
                continue;
            }
            let word = tok.ident_lower(src);
            if FORBIDDEN_KEYWORDS.contains(&word.as_str()) {
                return Err(GuardError::NotReadOnly(word.to_uppercase()));
            }
            if word == "pg_catalog" || word == "information_schema" || word.starts_with("pg_toast")
            {
                return Err(GuardError::SystemSchema(word));
            }
        }
        Ok(())
    }

    /// Every table named after FROM/JOIN must be declared, a collected
    /// alias/CTE name, or an allow-listed set-returning function
    fn check_tables(
        &self,
        tokens: &[Token],
        src: &str,
        synthetic: &BTreeSet<String>,
    ) -> Result<(), GuardError> {
        // stack of enclosing call names so EXTRACT(EPOCH FROM ts) and
        // friends do not read as table references
        let mut call_stack: Vec<Option<String>> = Vec::new();
        let mut idx = 0;

        while idx < tokens.len() {
            let tok = &tokens[idx];
            match tok.kind {
                TokKind::LParen => {
                    let func = if idx > 0 && tokens[idx - 1].kind == TokKind::Ident {
                        Some(tokens[idx - 1].ident_lower(src))
                    } else {
                        None
                    };
                    call_stack.push(func);
                }
                TokKind::RParen => {
                    call_stack.pop();
                }
                TokKind::Ident => {
                    let word = tok.ident_lower(src);
                    if word == "from" || word == "join" {
                        let in_scalar_fn = matches!(
                            call_stack.last(),
                            Some(Some(f)) if FUNC_WITH_FROM.contains(&f.as_str())
                        );
                        if !(word == "from" && in_scalar_fn) {
                            idx = self.check_table_list(tokens, src, idx + 1, synthetic)?;
                            continue;
                        }
                    }
                }
                _ => {}
            }
            idx += 1;
        }
        Ok(())
    }

    /// Validate the table references starting at `i`, following commas
    /// between plain table names. Never advances past a paren so the
    /// caller's call-stack bookkeeping stays exact.
    fn check_table_list(
        &self,
        tokens: &[Token],
        src: &str,
        mut i: usize,
        synthetic: &BTreeSet<String>,
    ) -> Result<usize, GuardError> {
        loop {
            if matches!(tokens.get(i), Some(t) if t.kind == TokKind::Ident && t.ident_lower(src) == "lateral")
            {
                i += 1;
            }
            match tokens.get(i) {
                // derived table; the caller resumes at the paren
                Some(t) if t.kind == TokKind::LParen => return Ok(i),
                Some(t) if t.kind == TokKind::Ident => {
                    let (parts, next) = read_dotted_chain(tokens, src, i);
                    let display = parts.join(".");

                    // function in FROM position
                    if matches!(tokens.get(next), Some(t) if t.kind == TokKind::LParen) {
                        let base = parts.last().map(String::as_str).unwrap_or("");
                        if !SRF_ALLOWLIST.contains(&base) {
                            return Err(GuardError::TableNotAllowed(display));
                        }
                        return Ok(next);
                    }

                    if parts.len() == 1 {
                        let name = &parts[0];
                        let allowed = synthetic.contains(name)
                            || self.tables.contains(name)
                            || self.tables.contains(&format!("public.{}", name));
                        if !allowed {
                            return Err(GuardError::TableNotAllowed(display));
                        }
                    } else if !self.tables.contains(&display) {
                        return Err(GuardError::TableNotAllowed(display));
                    }
                    i = next;

                    // optional alias
                    if let Some(t) = tokens.get(i) {
                        if t.kind == TokKind::Ident {
                            let w = t.ident_lower(src);
                            if w == "as" {
                                i += 2;
                            } else if !CLAUSE_KEYWORDS.contains(&w.as_str()) {
                                i += 1;
                            }
                        }
                    }

                    if matches!(tokens.get(i), Some(t) if t.kind == TokKind::Comma) {
                        i += 1;
                        continue;
                    }
                    return Ok(i);
                }
                _ => return Ok(i),
            }
        }
    }

    /// Qualified references `tbl.col` against the per-table column sets.
    /// Qualifiers that are aliases, CTE names or SRFs are exempt; unknown
    /// qualifiers are left to the database to resolve.
    fn check_columns(
        &self,
        tokens: &[Token],
        src: &str,
        synthetic: &BTreeSet<String>,
    ) -> Result<(), GuardError> {
        let mut i = 0;
        while i < tokens.len() {
            if tokens[i].kind != TokKind::Ident
                || (i > 0 && tokens[i - 1].kind == TokKind::Dot)
            {
                i += 1;
                continue;
            }
            let (parts, next) = read_dotted_chain(tokens, src, i);
            if parts.len() < 2 {
                i = next;
                continue;
            }
            // a qualified function call, not a column reference
            if matches!(tokens.get(next), Some(t) if t.kind == TokKind::LParen) {
                i = next;
                continue;
            }

            let (qualifier, column) = if parts.len() == 2 {
                (parts[0].clone(), parts[1].clone())
            } else {
                (parts[..2].join("."), parts[2].clone())
            };

            if parts.len() == 2
                && (synthetic.contains(&qualifier) || SRF_ALLOWLIST.contains(&qualifier.as_str()))
            {
                i = next;
                continue;
            }

            let resolved = if self.columns.contains_key(&qualifier) {
                Some(qualifier.clone())
            } else if parts.len() == 2 {
                let fq = format!("public.{}", qualifier);
                self.columns.contains_key(&fq).then_some(fq)
            } else {
                None
            };

            if let Some(table) = resolved {
                let cols = &self.columns[&table];
                if !cols.is_empty() && !cols.contains(&column) {
                    return Err(GuardError::ColumnNotAllowed(format!(
                        "{}.{}",
                        qualifier, column
                    )));
                }
            }
            i = next;
        }
        Ok(())
    }
}

/// Read `a` or `a.b` or `a.b.c` starting at an identifier token.
/// Returns lower-cased parts and the index after the chain.
fn read_dotted_chain(tokens: &[Token], src: &str, start: usize) -> (Vec<String>, usize) {
    let mut parts = vec![tokens[start].ident_lower(src)];
    let mut i = start + 1;
    while i + 1 < tokens.len()
        && tokens[i].kind == TokKind::Dot
        && tokens[i + 1].kind == TokKind::Ident
    {
        parts.push(tokens[i + 1].ident_lower(src));
        i += 2;
    }
    (parts, i)
}

/// Names that look like tables but are not: CTE names and derived-table
/// aliases. References qualified by them are exempt from allow-list checks.
fn collect_synthetic_names(tokens: &[Token], src: &str) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for i in 0..tokens.len() {
        match tokens[i].kind {
            TokKind::Ident => {
                // `name AS (` and `name (col, ...) AS (`
                let mut j = i + 1;
                if matches!(tokens.get(j), Some(t) if t.kind == TokKind::LParen) {
                    j = skip_balanced(tokens, j);
                }
                let is_cte = matches!(tokens.get(j), Some(t) if t.kind == TokKind::Ident && t.ident_lower(src) == "as")
                    && matches!(tokens.get(j + 1), Some(t) if t.kind == TokKind::LParen);
                if is_cte {
                    names.insert(tokens[i].ident_lower(src));
                }
            }
            TokKind::RParen => {
                // `) alias` and `) AS alias`
                if let Some(next) = tokens.get(i + 1) {
                    if next.kind == TokKind::Ident {
                        let w = next.ident_lower(src);
                        if w == "as" {
                            if let Some(t) = tokens.get(i + 2) {
                                if t.kind == TokKind::Ident {
                                    names.insert(t.ident_lower(src));
                                }
                            }
                        } else if !ALIAS_STOPWORDS.contains(&w.as_str()) {
                            names.insert(w);
                        }
                    }
                }
            }
            _ => {}
        }
    }
    names
}

/// `tokens[open]` is a LParen; returns the index just past its match
fn skip_balanced(tokens: &[Token], open: usize) -> usize {
    let mut depth = 0i32;
    let mut i = open;
    while i < tokens.len() {
        match tokens[i].kind {
            TokKind::LParen => depth += 1,
            TokKind::RParen => {
                depth -= 1;
                if depth == 0 {
                    return i + 1;
                }
            }
            _ => {}
        }
        i += 1;
    }
    tokens.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_guard() -> Guard {
        let tables: BTreeSet<String> = ["public.market_data", "public.token_prices"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut columns = BTreeMap::new();
        columns.insert(
            "public.market_data".to_string(),
            ["ts", "protocol", "symbol", "utilization", "borrow_apy"]
                .iter()
                .map(|s| s.to_string())
                .collect::<BTreeSet<String>>(),
        );
        columns.insert(
            "public.token_prices".to_string(),
            ["ts", "symbol", "price_usd"]
                .iter()
                .map(|s| s.to_string())
                .collect::<BTreeSet<String>>(),
        );
        Guard::from_parts(tables, columns, 500)
    }

    #[test]
    fn test_accepts_plain_select_and_appends_limit() {
        let guarded = test_guard()
            .check("SELECT ts, utilization FROM public.market_data")
            .unwrap();
        assert!(guarded.as_str().ends_with("LIMIT 500"));
    }

    #[test]
    fn test_rejects_write_keyword() {
        let err = test_guard()
            .check("DROP TABLE public.market_data")
            .unwrap_err();
        assert!(matches!(err, GuardError::NotReadOnly(_)));
    }

    #[test]
    fn test_second_statement_rejected_before_it_can_write() {
        let err = test_guard()
            .check("SELECT 1; DELETE FROM public.market_data")
            .unwrap_err();
        assert_eq!(err, GuardError::MultiStatement);
    }

    #[test]
    fn test_system_schema_rejected_anywhere_in_statement() {
        let err = test_guard()
            .check("SELECT 1 UNION SELECT 2 FROM public.market_data CROSS JOIN pg_catalog.pg_tables")
            .unwrap_err();
        assert!(matches!(err, GuardError::SystemSchema(_)));
    }

    #[test]
    fn test_dangerous_tokens_inside_literal_are_fine() {
        let guarded = test_guard()
            .check("SELECT ts FROM public.market_data WHERE symbol = '; DROP TABLE t; --'")
            .unwrap();
        assert!(guarded.as_str().contains("DROP TABLE t"), "literal survives");
    }

    #[test]
    fn test_rejects_comment_markers() {
        let err = test_guard()
            .check("SELECT ts FROM public.market_data -- sneaky")
            .unwrap_err();
        assert_eq!(err, GuardError::CommentNotAllowed);
    }

    #[test]
    fn test_rejects_undeclared_table() {
        let err = test_guard().check("SELECT * FROM public.users").unwrap_err();
        assert_eq!(
            err,
            GuardError::TableNotAllowed("public.users".to_string())
        );
    }

    #[test]
    fn test_rejects_second_table_in_comma_list() {
        let err = test_guard()
            .check("SELECT * FROM public.market_data, public.users")
            .unwrap_err();
        assert_eq!(
            err,
            GuardError::TableNotAllowed("public.users".to_string())
        );
    }

    #[test]
    fn test_bare_table_name_resolves_through_public() {
        assert!(test_guard().check("SELECT ts FROM market_data").is_ok());
    }

    #[test]
    fn test_srf_from_target_is_exempt() {
        assert!(test_guard()
            .check("SELECT g FROM generate_series(1, 10) g")
            .is_ok());
    }

    #[test]
    fn test_cte_name_is_exempt() {
        let sql = "WITH hourly AS (SELECT ts FROM public.market_data) SELECT * FROM hourly";
        assert!(test_guard().check(sql).is_ok());
    }

    #[test]
    fn test_derived_alias_is_exempt_for_columns() {
        let sql =
            "SELECT h.whatever FROM (SELECT ts AS whatever FROM public.market_data) h";
        assert!(test_guard().check(sql).is_ok());
    }

    #[test]
    fn test_rejects_undeclared_column() {
        let err = test_guard()
            .check("SELECT market_data.secret FROM public.market_data")
            .unwrap_err();
        assert_eq!(
            err,
            GuardError::ColumnNotAllowed("market_data.secret".to_string())
        );
    }

    #[test]
    fn test_extract_from_is_not_a_table_reference() {
        let sql = "SELECT EXTRACT(EPOCH FROM ts) FROM public.market_data";
        assert!(test_guard().check(sql).is_ok());
    }

    #[test]
    fn test_limit_clamped_to_max() {
        let guarded = test_guard()
            .check("SELECT ts FROM public.market_data LIMIT 501")
            .unwrap();
        assert!(guarded.as_str().ends_with("LIMIT 500"));
        assert!(!guarded.as_str().contains("501"));
    }

    #[test]
    fn test_limit_within_max_is_untouched() {
        let guarded = test_guard()
            .check("SELECT ts FROM public.market_data LIMIT 10")
            .unwrap();
        assert!(guarded.as_str().ends_with("LIMIT 10"));
    }

    #[test]
    fn test_subquery_limit_does_not_satisfy_statement_scope() {
        let guarded = test_guard()
            .check("SELECT * FROM (SELECT ts FROM public.market_data LIMIT 10) h")
            .unwrap();
        assert!(guarded.as_str().ends_with("LIMIT 500"));
        assert!(guarded.as_str().contains("LIMIT 10"), "inner limit is kept");
    }

    #[test]
    fn test_trailing_semicolon_tolerated() {
        assert!(test_guard()
            .check("SELECT ts FROM public.market_data;")
            .is_ok());
    }

    #[test]
    fn test_empty_statement() {
        assert_eq!(
            test_guard().check("   ").unwrap_err(),
            GuardError::EmptyStatement
        );
        assert_eq!(
            test_guard().check(" ; ").unwrap_err(),
            GuardError::EmptyStatement
        );
    }

    #[test]
    fn test_prefix_must_be_select_or_with() {
        let err = test_guard()
            .check("EXPLAIN SELECT ts FROM public.market_data")
            .unwrap_err();
        assert!(matches!(err, GuardError::NotReadOnly(_)));
    }

    #[test]
    fn test_decision_independent_of_literal_content() {
        let g = test_guard();
        let a = g.check("SELECT ts FROM public.market_data WHERE symbol = 'USDC'");
        let b = g.check("SELECT ts FROM public.market_data WHERE symbol = 'DROPX'");
        assert_eq!(a.is_ok(), b.is_ok());
    }
}
