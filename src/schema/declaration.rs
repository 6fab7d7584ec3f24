//! Static table declaration - the only schema the service may touch
//!
//! Loaded once at startup and verified against information_schema before the
//! first request is served. The LLM never sees anything beyond what is
//! declared here.

use serde::{Deserialize, Serialize};

/// One declared warehouse table
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TableSpec {
    /// Fully-qualified name, `schema.table`, stored lower-cased
    pub name: String,

    /// Human-readable description emitted to the LLM
    pub description: String,

    /// Ordered columns with descriptive text
    pub columns: Vec<ColumnSpec>,

    /// Primary key columns, possibly empty
    pub primary_key: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub description: String,
}

impl TableSpec {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_lowercase(),
            description: description.to_string(),
            columns: Vec::new(),
            primary_key: Vec::new(),
        }
    }

    pub fn column(mut self, name: &str, description: &str) -> Self {
        self.columns.push(ColumnSpec {
            name: name.to_lowercase(),
            description: description.to_string(),
        });
        self
    }

    pub fn primary_key(mut self, cols: &[&str]) -> Self {
        self.primary_key = cols.iter().map(|c| c.to_lowercase()).collect();
        self
    }
}

/// The deployed warehouse declaration
pub fn declared_tables() -> Vec<TableSpec> {
    vec![
        TableSpec::new(
            "public.market_data",
            "Minutely lending-market time series per protocol and asset",
        )
        .column("ts", "Observation timestamp (UTC, timestamptz)")
        .column("protocol", "Lending protocol slug, e.g. 'aave'")
        .column("symbol", "Asset ticker in upper case, e.g. 'USDC', 'WETH'")
        .column("utilization", "Pool utilization as a fraction in [0,1]")
        .column("borrow_apy", "Variable borrow APY as a fraction in [0,1]")
        .column("supply_apy", "Supply APY as a fraction in [0,1]")
        .column("total_supplied_usd", "Total supplied to the pool in USD")
        .column("total_borrowed_usd", "Total borrowed from the pool in USD")
        .column("price_usd", "Asset oracle price in USD at ts")
        .primary_key(&["ts", "protocol", "symbol"]),
        TableSpec::new(
            "public.dex_trades_daily",
            "Daily DEX trade aggregates per protocol and pair",
        )
        .column("day", "Trading day (date, UTC)")
        .column("protocol", "DEX protocol slug, e.g. 'uniswap'")
        .column("pair", "Trading pair label, e.g. 'WETH/USDC'")
        .column("volume_usd", "Total traded volume in USD for the day")
        .column("trade_count", "Number of trades for the day")
        .column("fees_usd", "Fees collected in USD for the day")
        .primary_key(&["day", "protocol", "pair"]),
        TableSpec::new("public.token_prices", "Spot token prices over time")
            .column("ts", "Price timestamp (UTC, timestamptz)")
            .column("symbol", "Asset ticker in upper case")
            .column("price_usd", "Spot price in USD")
            .primary_key(&["ts", "symbol"]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declaration_is_lowercased() {
        let spec = TableSpec::new("Public.Market_Data", "x").column("TS", "y");
        assert_eq!(spec.name, "public.market_data");
        assert_eq!(spec.columns[0].name, "ts");
    }

    #[test]
    fn test_declared_tables_are_unique() {
        let tables = declared_tables();
        let mut names: Vec<&str> = tables.iter().map(|t| t.name.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), tables.len(), "table names must be unique");
    }
}
