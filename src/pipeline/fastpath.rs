//! Fast paths - hand-written queries for common "latest" questions
//!
//! These bypass the planner and the rewriter entirely but still pass
//! through the guard and the executor. The statements are written to pass
//! the guard trivially.

use crate::db::Row;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;

static LATEST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(latest|most recent|current)\b").unwrap());

static SYMBOL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(USDC|USDT|DAI|WETH|WBTC)\b").unwrap());

static PAIR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([A-Z]{2,6}/[A-Z]{2,6})\b").unwrap());

static UTILIZATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\butilization\b").unwrap());
static PRICE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bprices?\b").unwrap());
static DEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(dex|volume|trades?|swaps?)\b").unwrap());

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FastPath {
    LatestUtilization { symbol: String },
    LatestPrice { symbol: String },
    LatestDexVolume { pair: Option<String> },
}

/// Match a normalized question against the fast-path catalog
pub fn detect(question: &str) -> Option<FastPath> {
    if !LATEST.is_match(question) {
        return None;
    }
    let symbol = SYMBOL
        .captures(question)
        .map(|c| c[1].to_string());

    if UTILIZATION.is_match(question) {
        return symbol.map(|symbol| FastPath::LatestUtilization { symbol });
    }
    if PRICE.is_match(question) {
        return symbol.map(|symbol| FastPath::LatestPrice { symbol });
    }
    if DEX.is_match(question) {
        let pair = PAIR.captures(question).map(|c| c[1].to_string());
        return Some(FastPath::LatestDexVolume { pair });
    }
    None
}

impl FastPath {
    pub fn sql(&self) -> String {
        match self {
            Self::LatestUtilization { symbol } => format!(
                "SELECT ts, utilization, ROUND(utilization*100,2) AS utilization_pct \
                 FROM public.market_data WHERE protocol='aave' AND symbol='{}' \
                 ORDER BY ts DESC LIMIT 1",
                symbol
            ),
            Self::LatestPrice { symbol } => format!(
                "SELECT ts, symbol, price_usd FROM public.token_prices \
                 WHERE symbol='{}' ORDER BY ts DESC LIMIT 1",
                symbol
            ),
            Self::LatestDexVolume { pair } => {
                let pair_filter = pair
                    .as_ref()
                    .map(|p| format!("WHERE pair='{}' ", p))
                    .unwrap_or_default();
                format!(
                    "SELECT day, protocol, pair, volume_usd FROM public.dex_trades_daily \
                     {}ORDER BY day DESC LIMIT 1",
                    pair_filter
                )
            }
        }
    }

    /// Direct answer from the returned rows; None defers to the canned
    /// row-count fallback
    pub fn answer(&self, rows: &[Row]) -> Option<String> {
        let row = rows.first()?;
        match self {
            Self::LatestUtilization { symbol } => {
                let pct = number(row.get("utilization_pct")?)?;
                Some(format!("Latest {} utilization is {:.2}%.", symbol, pct))
            }
            Self::LatestPrice { symbol } => {
                let price = number(row.get("price_usd")?)?;
                Some(format!("Latest {} price is ${:.2}.", symbol, price))
            }
            Self::LatestDexVolume { .. } => {
                let volume = number(row.get("volume_usd")?)?;
                let pair = row
                    .get("pair")
                    .and_then(JsonValue::as_str)
                    .unwrap_or("all pairs");
                let day = row.get("day").and_then(JsonValue::as_str).unwrap_or("");
                Some(format!(
                    "Latest daily DEX volume for {} is ${:.0} on {}.",
                    pair, volume, day
                ))
            }
        }
    }
}

fn number(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_utilization_detected() {
        let fp = detect("What is the latest USDC utilization?").unwrap();
        assert_eq!(
            fp,
            FastPath::LatestUtilization {
                symbol: "USDC".to_string()
            }
        );
        assert!(fp.sql().contains("ROUND(utilization*100,2) AS utilization_pct"));
        assert!(fp.sql().contains("symbol='USDC'"));
    }

    #[test]
    fn test_latest_price_detected() {
        let fp = detect("current WETH price please").unwrap();
        assert!(matches!(fp, FastPath::LatestPrice { .. }));
    }

    #[test]
    fn test_latest_dex_volume_detected_without_pair() {
        let fp = detect("most recent dex volume").unwrap();
        assert_eq!(fp, FastPath::LatestDexVolume { pair: None });
        assert!(!fp.sql().contains("WHERE pair"));
    }

    #[test]
    fn test_no_latest_keyword_means_no_fast_path() {
        assert!(detect("average USDC utilization over 7 days").is_none());
    }

    #[test]
    fn test_latest_without_domain_defers_to_planner() {
        assert!(detect("latest interesting thing?").is_none());
    }

    #[test]
    fn test_utilization_answer_formats_percent() {
        let fp = FastPath::LatestUtilization {
            symbol: "USDC".to_string(),
        };
        let mut row = Row::new();
        row.insert("ts".into(), serde_json::json!("2024-11-11T00:00:00Z"));
        row.insert("utilization".into(), serde_json::json!(0.8312));
        row.insert("utilization_pct".into(), serde_json::json!(83.12));
        let answer = fp.answer(&[row]).unwrap();
        assert_eq!(answer, "Latest USDC utilization is 83.12%.");
    }

    #[test]
    fn test_empty_rows_give_no_answer() {
        let fp = FastPath::LatestDexVolume { pair: None };
        assert!(fp.answer(&[]).is_none());
    }
}
