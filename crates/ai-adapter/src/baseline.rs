//! Deterministic baseline rating/confidence, computed purely from `ai_input` JSON
//! before the model is ever called. The prompt instructs the model to anchor its
//! own rating within a bounded delta of this baseline, and `ai_validation` enforces
//! that bound, so model-to-model variance stays small across prompt or provider swaps.

use serde_json::{json, Value};

fn clamp(x: f64, lo: f64, hi: f64) -> f64 {
    x.max(lo).min(hi)
}

fn norm_title(title: &Value) -> String {
    title.as_str().unwrap_or_default().trim().to_lowercase()
}

fn is_ceo(title: &Value) -> bool {
    let t = norm_title(title);
    !t.is_empty() && (t.contains("chief executive") || t.split_whitespace().any(|w| w == "ceo"))
}

fn is_cfo(title: &Value) -> bool {
    let t = norm_title(title);
    !t.is_empty() && (t.contains("chief financial") || t.split_whitespace().any(|w| w == "cfo"))
}

/// Broad exec heuristic (CEO/CFO/COO/President/VP/etc).
fn is_exec(title: &Value) -> bool {
    let t = norm_title(title);
    if t.is_empty() {
        return false;
    }
    const KEYWORDS: &[&str] = &["chief ", "ceo", "cfo", "coo", "president", "vp", "vice president", "executive"];
    KEYWORDS.iter().any(|k| t.contains(k))
}

fn bucket_adj(bucket: Option<&str>) -> f64 {
    match bucket.map(str::to_lowercase).as_deref() {
        Some("micro") => 0.7,
        Some("small") => 0.4,
        Some("mid") => 0.2,
        Some("mega") => -0.3,
        _ => 0.0,
    }
}

fn role_adj(title: &Value) -> f64 {
    if is_ceo(title) {
        0.6
    } else if is_exec(title) {
        0.3
    } else {
        0.0
    }
}

fn pct_base(pct: Option<f64>, is_buy: bool) -> f64 {
    let Some(pct) = pct else { return if is_buy { 5.6 } else { 5.4 } };
    if pct >= 200.0 {
        return if is_buy { 9.5 } else { 9.0 };
    }
    if pct >= 100.0 {
        return if is_buy { 9.0 } else { 8.5 };
    }
    if pct >= 50.0 {
        return if is_buy { 8.5 } else { 8.0 };
    }
    if pct >= 25.0 {
        return if is_buy { 8.0 } else { 7.5 };
    }
    if pct >= 10.0 {
        return if is_buy { 7.5 } else { 7.0 };
    }
    if pct >= 5.0 {
        return if is_buy { 7.0 } else { 6.5 };
    }
    if pct >= 2.0 {
        return 6.5;
    }
    if pct >= 1.0 {
        return 5.8;
    }
    5.2
}

fn trade_size_adj(dollars: Option<f64>, pct_mcap: Option<f64>) -> f64 {
    if let Some(pct_mcap) = pct_mcap {
        if pct_mcap >= 1.0 {
            return 1.0;
        }
        if pct_mcap >= 0.5 {
            return 0.7;
        }
        if pct_mcap >= 0.1 {
            return 0.4;
        }
        if pct_mcap >= 0.05 {
            return 0.2;
        }
        if pct_mcap < 0.005 {
            return -0.4;
        }
        if pct_mcap < 0.02 {
            return -0.2;
        }
        return 0.0;
    }

    let Some(d) = dollars else { return 0.0 };
    if d >= 5_000_000.0 {
        0.7
    } else if d >= 1_000_000.0 {
        0.5
    } else if d >= 250_000.0 {
        0.3
    } else if d >= 100_000.0 {
        0.2
    } else if d < 25_000.0 {
        -0.2
    } else {
        0.0
    }
}

fn history_adj(prior_events_total: Option<i64>, trade_size_adj: f64) -> f64 {
    let Some(n) = prior_events_total else { return 0.0 };
    if n == 0 {
        return if trade_size_adj >= 0.2 { 0.35 } else { 0.1 };
    }
    if n <= 2 {
        return 0.2;
    }
    if n <= 5 {
        return 0.1;
    }
    0.0
}

fn cluster_adj(cluster: &Value) -> f64 {
    if cluster.get("cluster_flag").and_then(|v| v.as_bool()).unwrap_or(false) {
        0.4
    } else {
        0.0
    }
}

fn trend_adj(trend_context: &Value, is_buy: bool) -> f64 {
    let Some(r) = trend_context.pointer("/pre_returns/ret_60d").and_then(|v| v.as_f64()) else { return 0.0 };
    if is_buy {
        if r <= -0.25 {
            0.35
        } else if r <= -0.10 {
            0.2
        } else if r >= 0.25 {
            -0.2
        } else {
            0.0
        }
    } else if r >= 0.25 {
        0.25
    } else if r >= 0.10 {
        0.15
    } else if r <= -0.25 {
        -0.15
    } else {
        0.0
    }
}

fn side_baseline(
    side: &Value,
    side_key: &str,
    title: &Value,
    bucket: Option<&str>,
    insider_history: &Value,
    cluster: &Value,
    trend_context: &Value,
    data_quality: &Value,
) -> Value {
    let has_key = format!("has_{side_key}");
    let has = side.get(&has_key).and_then(|v| v.as_bool()).unwrap_or(false);
    if !has {
        return json!({"rating": null, "confidence": null, "reasons": []});
    }

    let is_buy = side_key == "buy";
    let pct = side.get("holdings_change_pct").and_then(|v| v.as_f64());
    let dollars = side.get("dollars").and_then(|v| v.as_f64());
    let pct_mcap = side.get("trade_value_pct_market_cap").and_then(|v| v.as_f64());
    let size_adj = trade_size_adj(dollars, pct_mcap);

    let prior_key = format!("prior_{side_key}_events_total");
    let prior = insider_history.get(prior_key).and_then(|v| v.as_i64());

    let mut rating = pct_base(pct, is_buy);
    rating += size_adj;
    rating += bucket_adj(bucket);
    rating += role_adj(title);
    rating += history_adj(prior, size_adj);
    rating += cluster_adj(cluster);
    rating += trend_adj(trend_context, is_buy);
    rating = clamp(rating, 1.0, 10.0);
    let rating = (rating * 10.0).round() / 10.0;

    let mut conf = if is_buy { 0.40 } else { 0.38 };
    let strong_threshold = if is_buy { 50.0 } else { 25.0 };
    if pct.map(|p| p >= strong_threshold).unwrap_or(false) {
        conf += 0.10;
    }
    if is_ceo(title) || is_cfo(title) {
        conf += 0.05;
    }
    if cluster_adj(cluster) > 0.0 {
        conf += 0.05;
    }
    let vwap_partial_key = format!("{side_key}_vwap_is_partial");
    if data_quality.get(vwap_partial_key).and_then(|v| v.as_bool()).unwrap_or(false) {
        conf -= 0.07;
    }
    if data_quality.get("trend_missing").and_then(|v| v.as_bool()).unwrap_or(false) {
        conf -= 0.05;
    }
    let conf = clamp(conf, 0.0, 1.0);

    json!({"rating": rating, "confidence": conf, "reasons": ["pct_holdings_change"]})
}

/// Compute `$.baseline` from the rest of an assembled `ai_input` document.
pub fn compute_baseline(ai_input: &Value) -> Value {
    let event = ai_input.get("event").cloned().unwrap_or(Value::Null);
    let issuer_context = ai_input.get("issuer_context").cloned().unwrap_or(Value::Null);
    let cluster_context = ai_input.get("cluster_context").cloned().unwrap_or(Value::Null);
    let trend_context = ai_input.get("trend_context").cloned().unwrap_or(Value::Null);
    let data_quality = ai_input.get("data_quality").cloned().unwrap_or(Value::Null);
    let insider_history = ai_input.get("insider_history").cloned().unwrap_or(Value::Null);

    let bucket = issuer_context.get("market_cap_bucket").and_then(|v| v.as_str());
    let title = event.get("owner_title").cloned().unwrap_or(Value::Null);

    let buy = side_baseline(
        event.get("buy").unwrap_or(&Value::Null),
        "buy",
        &title,
        bucket,
        &insider_history,
        cluster_context.get("buy_cluster").unwrap_or(&Value::Null),
        &trend_context,
        &data_quality,
    );
    let sell = side_baseline(
        event.get("sell").unwrap_or(&Value::Null),
        "sell",
        &title,
        bucket,
        &insider_history,
        cluster_context.get("sell_cluster").unwrap_or(&Value::Null),
        &trend_context,
        &data_quality,
    );

    json!({"buy": buy, "sell": sell})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_without_trade_has_no_rating() {
        let side = json!({"has_buy": false});
        let out = side_baseline(&side, "buy", &Value::Null, None, &Value::Null, &Value::Null, &Value::Null, &Value::Null);
        assert!(out["rating"].is_null());
        assert!(out["confidence"].is_null());
    }

    #[test]
    fn large_pct_change_rates_higher_than_small() {
        let small = pct_base(Some(1.5), true);
        let large = pct_base(Some(250.0), true);
        assert!(large > small);
    }

    #[test]
    fn ceo_role_adjustment_exceeds_generic_exec() {
        assert!(role_adj(&json!("Chief Executive Officer")) > role_adj(&json!("Vice President, Sales")));
        assert_eq!(role_adj(&json!("Staff Engineer")), 0.0);
    }

    #[test]
    fn cluster_flag_adds_positive_adjustment() {
        assert_eq!(cluster_adj(&json!({"cluster_flag": true})), 0.4);
        assert_eq!(cluster_adj(&json!({"cluster_flag": false})), 0.0);
    }

    #[test]
    fn rating_stays_within_bounds_for_extreme_inputs() {
        let side = json!({
            "has_buy": true,
            "holdings_change_pct": 500.0,
            "dollars": 50_000_000.0,
            "trade_value_pct_market_cap": 5.0,
        });
        let insider_history = json!({"prior_buy_events_total": 0});
        let cluster = json!({"cluster_flag": true});
        let title = json!("Chief Executive Officer");
        let out = side_baseline(&side, "buy", &title, Some("micro"), &insider_history, &cluster, &Value::Null, &Value::Null);
        let rating = out["rating"].as_f64().unwrap();
        assert!((1.0..=10.0).contains(&rating));
    }

    #[test]
    fn full_baseline_covers_both_sides() {
        let ai_input = json!({
            "event": {
                "owner_title": "CFO",
                "buy": {"has_buy": true, "holdings_change_pct": 80.0, "dollars": 300_000.0},
                "sell": {"has_sell": false},
            },
            "issuer_context": {"market_cap_bucket": "small"},
            "cluster_context": {"buy_cluster": {"cluster_flag": false}, "sell_cluster": {"cluster_flag": false}},
            "trend_context": {},
            "data_quality": {},
            "insider_history": {"prior_buy_events_total": 1},
        });
        let baseline = compute_baseline(&ai_input);
        assert!(baseline["buy"]["rating"].as_f64().is_some());
        assert!(baseline["sell"]["rating"].is_null());
    }
}
