/// The rewriter's output must always survive the guard: a heuristic patch
/// that produces unguardable SQL would turn a fixable plan into a 400

use warequery::guard::Guard;
use warequery::rewrite::HeuristicRewriter;
use warequery::schema::{declared_tables, SchemaRegistry};

fn harness() -> (HeuristicRewriter, Guard) {
    let registry = SchemaRegistry::from_declaration(declared_tables());
    (HeuristicRewriter::market_default(), Guard::new(&registry))
}

#[test]
fn test_percent_fix_passes_guard() {
    let (rw, guard) = harness();
    let sql = "SELECT ts FROM public.market_data WHERE utilization > 80 ORDER BY ts DESC";
    let rewritten = rw.rewrite("when was utilization above 80", sql);
    assert!(rewritten.contains("> 0.8"));
    guard.check(&rewritten).expect("rewritten SQL must pass the guard");
}

#[test]
fn test_hourly_wrap_passes_guard() {
    let (rw, guard) = harness();
    let sql = "SELECT ts, utilization FROM public.market_data \
               WHERE protocol = 'aave' AND symbol = 'WETH' AND utilization > 0.8";
    let rewritten = rw.rewrite("how many consecutive hours above 80%", sql);
    assert!(rewritten.contains("date_trunc('hour', ts)"));
    guard.check(&rewritten).expect("hourly wrap must pass the guard");
}

#[test]
fn test_percentile_rewrite_passes_guard() {
    let (rw, guard) = harness();
    let sql = "SELECT ts, percentile_cont(0.9) WITHIN GROUP (ORDER BY utilization) \
               OVER (PARTITION BY symbol) AS p90 FROM public.market_data";
    let rewritten = rw.rewrite("what is the 90th percentile of utilization", sql);
    assert!(!rewritten.contains("OVER (PARTITION"));
    guard
        .check(&rewritten)
        .expect("percentile rewrite must pass the guard");
}

#[test]
fn test_fast_path_sql_passes_guard() {
    let (_, guard) = harness();
    use warequery::pipeline::fastpath::{detect, FastPath};

    let questions = [
        "What is the latest USDC utilization?",
        "current WETH price",
        "most recent dex volume for WETH/USDC",
    ];
    for q in questions {
        let path = detect(q).unwrap_or_else(|| panic!("no fast path for {}", q));
        guard
            .check(&path.sql())
            .unwrap_or_else(|e| panic!("fast path SQL failed guard for {}: {}", q, e));
    }

    // the canonical scenario emits the canonical statement
    let path = detect("What is the latest USDC utilization?").unwrap();
    assert_eq!(
        path,
        FastPath::LatestUtilization {
            symbol: "USDC".to_string()
        }
    );
    assert_eq!(
        path.sql(),
        "SELECT ts, utilization, ROUND(utilization*100,2) AS utilization_pct \
         FROM public.market_data WHERE protocol='aave' AND symbol='USDC' \
         ORDER BY ts DESC LIMIT 1"
    );
}
