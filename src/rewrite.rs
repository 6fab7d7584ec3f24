//! Heuristic Rewriter - deterministic patches for recurring LLM SQL slips
//!
//! A fixed catalog of textual rewrites applied before the guard sees the
//! candidate. Each rule matches on the literal-masked twin of the SQL and
//! edits the raw text at the matched byte spans, so quoted content is never
//! touched. Running the catalog twice yields the same output.

use crate::guard::mask::mask_literals;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Shape of the minutely time-series table the hourly rules target
#[derive(Clone, Debug)]
pub struct TimeseriesProfile {
    pub table: String,
    pub ts_column: String,
    pub dimension_columns: Vec<String>,
    pub metric_columns: Vec<String>,
}

pub struct HeuristicRewriter {
    fraction_re: Regex,
    profile: TimeseriesProfile,
}

static AT_LEAST: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bat least\s+(\d+)").unwrap());

static HOURLY_TRIGGER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(consecutive|streak|hour|hours)\b").unwrap());

static PERCENTILE_OVER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\bpercentile_(cont|disc)\s*\(\s*([0-9]*\.?[0-9]+)\s*\)\s*within\s+group\s*\(\s*order\s+by\s+([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)?)\s*\)\s*over\s*\(",
    )
    .unwrap()
});

/// Alias candidates that are really clause keywords
const NOT_AN_ALIAS: &[&str] = &[
    "where", "group", "order", "limit", "having", "union", "intersect", "except", "on", "join",
    "inner", "left", "right", "full", "cross", "natural", "offset", "fetch", "window",
];

impl HeuristicRewriter {
    pub fn new(fraction_columns: &[&str], profile: TimeseriesProfile) -> Self {
        let cols = fraction_columns
            .iter()
            .map(|c| regex::escape(c))
            .collect::<Vec<_>>()
            .join("|");
        let fraction_re = Regex::new(&format!(
            r"(?i)\b({})\s*(>=|<=|>|<|=)\s*(\d+(?:\.\d+)?)",
            cols
        ))
        .unwrap();
        Self {
            fraction_re,
            profile,
        }
    }

    /// The deployed catalog: lending-market fraction columns over
    /// public.market_data
    pub fn market_default() -> Self {
        Self::new(
            &["utilization", "borrow_apy", "supply_apy"],
            TimeseriesProfile {
                table: "public.market_data".to_string(),
                ts_column: "ts".to_string(),
                dimension_columns: vec!["protocol".to_string(), "symbol".to_string()],
                metric_columns: vec![
                    "utilization".to_string(),
                    "borrow_apy".to_string(),
                    "supply_apy".to_string(),
                    "price_usd".to_string(),
                ],
            },
        )
    }

    /// Apply the catalog in order. Idempotent.
    pub fn rewrite(&self, question: &str, sql: &str) -> String {
        let mut out = self.percent_to_fraction(sql);
        out = self.at_least_comparison(question, &out);
        out = self.hourly_preaggregate(question, &out);
        out = self.percentile_window(&out);
        if out != sql {
            debug!(original = sql, rewritten = %out, "heuristic rewrite applied");
        }
        out
    }

    /// Rule 1: a threshold in [1,100) against a column bounded to [0,1]
    /// was almost certainly meant as a percentage. The upper gate keeps the
    /// scaled value below 1, so a second pass never fires on the output.
    fn percent_to_fraction(&self, sql: &str) -> String {
        let masked = mask_literals(sql);
        let mut edits = Vec::new();
        for cap in self.fraction_re.captures_iter(&masked) {
            let num = cap.get(3).unwrap();
            let n: f64 = match num.as_str().parse() {
                Ok(v) => v,
                Err(_) => continue,
            };
            if (1.0..100.0).contains(&n) {
                let scaled = (n / 100.0 * 10_000.0).round() / 10_000.0;
                edits.push((num.start(), num.end(), format!("{}", scaled)));
            }
        }
        apply_edits(sql, edits)
    }

    /// Rule 2: "at least N" in the question means >=, not =
    fn at_least_comparison(&self, question: &str, sql: &str) -> String {
        let Some(cap) = AT_LEAST.captures(question) else {
            return sql.to_string();
        };
        let n = &cap[1];
        let re = Regex::new(&format!(
            r"(?i)\b(streak_count|hours)\s*=\s*{}\b",
            regex::escape(n)
        ))
        .unwrap();
        let masked = mask_literals(sql);
        let mut edits = Vec::new();
        for cap in re.captures_iter(&masked) {
            let whole = cap.get(0).unwrap();
            edits.push((
                whole.start(),
                whole.end(),
                format!("{} >= {}", &cap[1], n),
            ));
        }
        apply_edits(sql, edits)
    }

    /// Rule 3: streak questions over the minutely table need an hourly
    /// pre-aggregation; wrap the base reference and rename bare ts
    fn hourly_preaggregate(&self, question: &str, sql: &str) -> String {
        if !HOURLY_TRIGGER.is_match(question) {
            return sql.to_string();
        }
        if sql.to_lowercase().contains("date_trunc('hour'") {
            return sql.to_string();
        }
        let masked = mask_literals(sql);
        let table_re = Regex::new(&format!(
            r"(?i)\bfrom\s+{}\b",
            regex::escape(&self.profile.table)
        ))
        .unwrap();
        let Some(table_match) = table_re.find(&masked) else {
            return sql.to_string();
        };
        let Some(metric) = self
            .profile
            .metric_columns
            .iter()
            .find(|m| word_present(&masked, m))
        else {
            return sql.to_string();
        };

        let (alias, span_end) = parse_alias_after(&masked, table_match.end());
        let alias = alias.unwrap_or_else(|| "h".to_string());
        let filters = self.collect_dimension_filters(sql, &masked);

        let dims = &self.profile.dimension_columns;
        let ts = &self.profile.ts_column;
        let mut inner = format!(
            "SELECT date_trunc('hour', {ts}) AS hour, AVG({metric}) AS {metric}",
            ts = ts,
            metric = metric
        );
        for d in dims {
            inner.push_str(&format!(", {}", d));
        }
        inner.push_str(&format!(" FROM {}", self.profile.table));
        if !filters.is_empty() {
            inner.push_str(&format!(" WHERE {}", filters.join(" AND ")));
        }
        inner.push_str(" GROUP BY 1");
        for d in dims {
            inner.push_str(&format!(", {}", d));
        }

        let mut edits = vec![(
            table_match.start(),
            span_end,
            format!("FROM ({}) {}", inner, alias),
        )];

        // every bare ts outside the new derived table now means the hour
        let ts_re = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(ts))).unwrap();
        for m in ts_re.find_iter(&masked) {
            if m.start() >= table_match.start() && m.end() <= span_end {
                continue;
            }
            edits.push((m.start(), m.end(), "hour".to_string()));
        }
        apply_edits(sql, edits)
    }

    /// Rule 4: Postgres refuses ordered-set aggregates as window functions;
    /// compute the percentile with a correlated subquery over a 30-day
    /// trailing window on an hourly pre-aggregation instead
    fn percentile_window(&self, sql: &str) -> String {
        let masked = mask_literals(sql);
        let mut edits = Vec::new();

        for cap in PERCENTILE_OVER.captures_iter(&masked) {
            let whole = cap.get(0).unwrap();
            let Some(close) = matching_paren(&masked, whole.end() - 1) else {
                continue;
            };
            let func = cap[1].to_lowercase();
            let p = cap[2].to_string();
            let target = cap[3].to_lowercase();

            let (outer_qualifier, column) = match target.split_once('.') {
                Some((q, c)) => (q.to_string(), c.to_string()),
                None => {
                    // qualify through the hourly alias when rule 3 already
                    // ran, through the base table name otherwise
                    let q = if sql.to_lowercase().contains("date_trunc('hour'") {
                        "h".to_string()
                    } else {
                        self.profile
                            .table
                            .rsplit('.')
                            .next()
                            .unwrap_or(&self.profile.table)
                            .to_string()
                    };
                    (q, target.clone())
                }
            };
            let anchor = if sql.to_lowercase().contains("date_trunc('hour'") {
                "hour".to_string()
            } else {
                self.profile.ts_column.clone()
            };

            let dims = &self.profile.dimension_columns;
            let mut inner = format!(
                "SELECT date_trunc('hour', {ts}) AS hour, AVG({col}) AS {col}",
                ts = self.profile.ts_column,
                col = column
            );
            for d in dims {
                inner.push_str(&format!(", {}", d));
            }
            inner.push_str(&format!(" FROM {} GROUP BY 1", self.profile.table));
            for d in dims {
                inner.push_str(&format!(", {}", d));
            }

            let mut correlation = dims
                .iter()
                .map(|d| format!("pw.{d} = {q}.{d}", d = d, q = outer_qualifier))
                .collect::<Vec<_>>()
                .join(" AND ");
            if correlation.is_empty() {
                correlation = "1=1".to_string();
            }

            let replacement = format!(
                "(SELECT percentile_{func}({p}) WITHIN GROUP (ORDER BY pw.{col}) \
                 FROM ({inner}) pw \
                 WHERE {correlation} \
                 AND pw.hour >= {q}.{anchor} - INTERVAL '30 days' \
                 AND pw.hour <= {q}.{anchor})",
                func = func,
                p = p,
                col = column,
                inner = inner,
                correlation = correlation,
                q = outer_qualifier,
                anchor = anchor
            );
            edits.push((whole.start(), close + 1, replacement));
        }
        apply_edits(sql, edits)
    }

    /// First equality filter per dimension column, literal read from the
    /// raw text so quoting survives intact
    fn collect_dimension_filters(&self, raw: &str, masked: &str) -> Vec<String> {
        let mut filters = Vec::new();
        for dim in &self.profile.dimension_columns {
            let re = Regex::new(&format!(r"(?i)\b{}\s*=\s*'", regex::escape(dim))).unwrap();
            if let Some(m) = re.find(masked) {
                let open = m.end() - 1;
                if let Some(close) = literal_end(raw, open) {
                    filters.push(format!("{} = {}", dim, &raw[open..=close]));
                }
            }
        }
        filters
    }
}

/// Apply byte-span edits computed on the masked twin to the raw text
fn apply_edits(raw: &str, mut edits: Vec<(usize, usize, String)>) -> String {
    let mut out = raw.to_string();
    edits.sort_by(|a, b| b.0.cmp(&a.0));
    for (start, end, replacement) in edits {
        out.replace_range(start..end, &replacement);
    }
    out
}

fn word_present(masked: &str, word: &str) -> bool {
    Regex::new(&format!(r"(?i)\b{}\b", regex::escape(word)))
        .map(|re| re.is_match(masked))
        .unwrap_or(false)
}

/// Optional `[AS] alias` after a table reference. Returns the alias and the
/// byte offset just past it, or the original offset when absent.
fn parse_alias_after(masked: &str, from: usize) -> (Option<String>, usize) {
    let bytes = masked.as_bytes();
    let mut i = from;
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    let word_start = i;
    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
        i += 1;
    }
    if i == word_start {
        return (None, from);
    }
    let word = masked[word_start..i].to_lowercase();
    if word == "as" {
        let (alias, end) = parse_alias_after(masked, i);
        return match alias {
            Some(a) => (Some(a), end),
            None => (None, from),
        };
    }
    if NOT_AN_ALIAS.contains(&word.as_str()) {
        return (None, from);
    }
    (Some(word), i)
}

/// Index of the `'` closing the literal opened at `open`, honoring `''`
fn literal_end(raw: &str, open: usize) -> Option<usize> {
    let bytes = raw.as_bytes();
    let mut i = open + 1;
    while i < bytes.len() {
        if bytes[i] == b'\'' {
            if i + 1 < bytes.len() && bytes[i + 1] == b'\'' {
                i += 2;
                continue;
            }
            return Some(i);
        }
        i += 1;
    }
    None
}

/// Index of the `)` matching the `(` at `open`
fn matching_paren(masked: &str, open: usize) -> Option<usize> {
    let bytes = masked.as_bytes();
    let mut depth = 0i32;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewriter() -> HeuristicRewriter {
        HeuristicRewriter::market_default()
    }

    #[test]
    fn test_percent_threshold_becomes_fraction() {
        let out = rewriter().rewrite(
            "when was utilization above 80",
            "SELECT ts FROM public.market_data WHERE utilization > 80",
        );
        assert!(out.contains("utilization > 0.8"), "got: {}", out);
    }

    #[test]
    fn test_fraction_threshold_untouched() {
        let sql = "SELECT ts FROM public.market_data WHERE utilization > 0.8";
        assert_eq!(rewriter().rewrite("q", sql), sql);
    }

    #[test]
    fn test_threshold_of_100_or_more_is_left_alone() {
        // scaling these would land at or above 1 and invite a second pass
        let sql = "SELECT ts FROM public.market_data WHERE utilization >= 100";
        assert_eq!(rewriter().rewrite("fully utilized", sql), sql);

        let sql = "SELECT ts FROM public.market_data WHERE borrow_apy > 150";
        assert_eq!(rewriter().rewrite("q", sql), sql);
    }

    #[test]
    fn test_percent_rule_ignores_literals() {
        let sql = "SELECT ts FROM public.market_data WHERE note = 'utilization > 80'";
        assert_eq!(rewriter().rewrite("q", sql), sql);
    }

    #[test]
    fn test_at_least_turns_equality_into_gte() {
        let out = rewriter().rewrite(
            "streaks of at least 4 hours",
            "SELECT symbol FROM public.market_data WHERE date_trunc('hour', ts) IS NOT NULL AND hours = 4",
        );
        assert!(out.contains("hours >= 4"), "got: {}", out);
    }

    #[test]
    fn test_at_least_requires_question_evidence() {
        let sql = "SELECT symbol FROM public.market_data WHERE date_trunc('hour', ts) IS NOT NULL AND hours = 4";
        assert_eq!(rewriter().rewrite("exactly 4 hours", sql), sql);
    }

    #[test]
    fn test_hourly_wrap_added_for_streak_questions() {
        let out = rewriter().rewrite(
            "how many consecutive hours was WETH utilization above 80%",
            "SELECT ts, utilization FROM public.market_data WHERE protocol = 'aave' AND symbol = 'WETH' AND utilization > 0.8",
        );
        assert!(out.contains("date_trunc('hour', ts) AS hour"), "got: {}", out);
        assert!(out.contains("FROM (SELECT"), "got: {}", out);
        assert!(out.contains("GROUP BY 1, protocol, symbol"), "got: {}", out);
        // outer references now speak in hours
        assert!(out.contains("hour, utilization") || out.starts_with("SELECT hour"), "got: {}", out);
        // dimension filters were hoisted into the pre-aggregation
        assert!(out.contains("WHERE protocol = 'aave' AND symbol = 'WETH' GROUP BY"), "got: {}", out);
    }

    #[test]
    fn test_hourly_wrap_skipped_when_already_hourly() {
        let sql = "SELECT date_trunc('hour', ts) AS hour FROM public.market_data GROUP BY 1";
        assert_eq!(
            rewriter().rewrite("consecutive hours above threshold", sql),
            sql
        );
    }

    #[test]
    fn test_percentile_over_window_is_replaced() {
        let sql = "SELECT ts, percentile_cont(0.9) WITHIN GROUP (ORDER BY utilization) OVER (PARTITION BY symbol) FROM public.market_data";
        let out = rewriter().rewrite("90th percentile", sql);
        assert!(!out.to_lowercase().contains("over ("), "got: {}", out);
        assert!(out.contains("percentile_cont(0.9) WITHIN GROUP (ORDER BY pw.utilization)"), "got: {}", out);
        assert!(out.contains("INTERVAL '30 days'"), "got: {}", out);
        assert!(out.contains("pw.protocol = market_data.protocol"), "got: {}", out);
    }

    #[test]
    fn test_rewriter_is_idempotent() {
        let cases = [
            (
                "when was utilization above 80",
                "SELECT ts FROM public.market_data WHERE utilization > 80",
            ),
            (
                "when was utilization at 100",
                "SELECT ts FROM public.market_data WHERE utilization >= 100",
            ),
            (
                "utilization over 150 percent",
                "SELECT ts FROM public.market_data WHERE utilization > 150",
            ),
            (
                "streaks of at least 4 hours",
                "SELECT symbol FROM public.market_data WHERE hours = 4",
            ),
            (
                "how many consecutive hours was WETH above 80%",
                "SELECT ts, utilization FROM public.market_data WHERE symbol = 'WETH'",
            ),
            (
                "90th percentile utilization",
                "SELECT ts, percentile_cont(0.9) WITHIN GROUP (ORDER BY utilization) OVER (PARTITION BY symbol) FROM public.market_data",
            ),
        ];
        let rw = rewriter();
        for (question, sql) in cases {
            let once = rw.rewrite(question, sql);
            let twice = rw.rewrite(question, &once);
            assert_eq!(once, twice, "not idempotent for: {}", sql);
        }
    }
}
