//! Question normalization before any routing decision

use once_cell::sync::Lazy;
use regex::Regex;

static UTILIZATION_TYPOS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(utilisation|utilzation|utilizaton|utlization|utiliztion)\b").unwrap()
});

static TICKERS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(usdc|usdt|dai|weth|wbtc|eth)\b").unwrap());

static BARE_ETH: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bETH\b").unwrap());

/// Collapse whitespace, repair recurring utilization misspellings,
/// upper-case known tickers and map ETH to its wrapped form.
pub fn normalize_question(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let fixed = UTILIZATION_TYPOS.replace_all(&collapsed, "utilization");
    let upper = TICKERS.replace_all(&fixed, |caps: &regex::Captures| caps[1].to_uppercase());
    BARE_ETH.replace_all(&upper, "WETH").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitespace_collapsed() {
        assert_eq!(normalize_question("  what   is\tthe  deal "), "what is the deal");
    }

    #[test]
    fn test_utilization_typos_fixed() {
        assert_eq!(
            normalize_question("latest USDC utilisation?"),
            "latest USDC utilization?"
        );
        assert_eq!(
            normalize_question("show utilzation for dai"),
            "show utilization for DAI"
        );
    }

    #[test]
    fn test_tickers_uppercased_and_eth_mapped() {
        assert_eq!(
            normalize_question("average borrow apy for eth last week"),
            "average borrow apy for WETH last week"
        );
        assert_eq!(normalize_question("price of wbtc"), "price of WBTC");
    }

    #[test]
    fn test_weth_not_double_mapped() {
        assert_eq!(normalize_question("price of weth"), "price of WETH");
    }

    #[test]
    fn test_ethereum_word_untouched() {
        assert_eq!(
            normalize_question("ethereum lending markets"),
            "ethereum lending markets"
        );
    }
}
