//! Pure per-side rollup math, isolated from persistence so it can be unit tested
//! without a database.

use serde::{Deserialize, Serialize};

/// One raw Form 4 row, exactly as stored in `form4_rows_raw`, trimmed to the
/// columns the rollup needs.
#[derive(Debug, Clone)]
pub struct RawRow {
    pub row_id: i64,
    pub is_derivative: bool,
    pub transaction_code: Option<String>,
    pub transaction_date: Option<String>,
    pub shares_abs: Option<f64>,
    pub price: Option<f64>,
    pub shares_owned_following: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SideRollup {
    pub has: bool,
    pub trade_date: Option<String>,
    pub last_tx_date: Option<String>,
    pub shares_total: Option<f64>,
    pub dollars_total: Option<f64>,
    pub vwap_price: Option<f64>,
    pub priced_shares_total: Option<f64>,
    pub unpriced_shares_total: Option<f64>,
    pub vwap_is_partial: bool,
    pub shares_owned_following: Option<f64>,
    pub pct_holdings_change: Option<f64>,
    pub pct_change_missing_reason: Option<String>,
}

impl SideRollup {
    fn absent() -> Self {
        Self {
            has: false,
            trade_date: None,
            last_tx_date: None,
            shares_total: None,
            dollars_total: None,
            vwap_price: None,
            priced_shares_total: None,
            unpriced_shares_total: None,
            vwap_is_partial: false,
            shares_owned_following: None,
            pct_holdings_change: None,
            pct_change_missing_reason: None,
        }
    }
}

/// Roll up open-market, non-derivative transactions for one transaction code
/// (`"P"` purchase / `"S"` sale) into the denormalized columns stored on
/// `insider_events`.
///
/// `pct_holdings_change` is stored in PERCENT units (190.1 means +190.1%), not a
/// ratio, matching the rest of the schema's convention for change columns.
pub fn rollup_side(rows: &[RawRow], code: &str) -> SideRollup {
    let side_rows: Vec<&RawRow> =
        rows.iter().filter(|r| !r.is_derivative && r.transaction_code.as_deref() == Some(code)).collect();

    if side_rows.is_empty() {
        return SideRollup::absent();
    }

    let dates: Vec<&str> = side_rows.iter().filter_map(|r| r.transaction_date.as_deref()).collect();
    let trade_date = dates.iter().min().map(|s| s.to_string());
    let last_tx_date = dates.iter().max().map(|s| s.to_string());

    let shares_vals: Vec<f64> = side_rows.iter().filter_map(|r| r.shares_abs).collect();
    let shares_total = if shares_vals.is_empty() { None } else { Some(shares_vals.iter().sum::<f64>()) };

    let mut priced_shares_total = 0.0_f64;
    let mut dollars_total = 0.0_f64;
    for r in &side_rows {
        if let (Some(sh), Some(pr)) = (r.shares_abs, r.price) {
            if pr > 0.0 {
                priced_shares_total += sh;
                dollars_total += sh * pr;
            }
        }
    }

    let unpriced_shares_total = shares_total.map(|total| total - priced_shares_total);

    let vwap_price = if priced_shares_total > 0.0 { Some(dollars_total / priced_shares_total) } else { None };

    let vwap_is_partial = matches!(shares_total, Some(total) if total > 0.0) && priced_shares_total < shares_total.unwrap_or(0.0);

    // shares_owned_following comes from the LAST row by (transaction_date, row_id),
    // not max(shares_owned_following) — multiple legs can make max() wrong.
    let shares_owned_following = side_rows
        .iter()
        .filter(|r| r.shares_owned_following.is_some())
        .max_by_key(|r| (r.transaction_date.clone().unwrap_or_default(), r.row_id))
        .and_then(|r| r.shares_owned_following);

    let (pct_holdings_change, pct_change_missing_reason) = match shares_total {
        None => (None, Some("missing_shares_total".to_string())),
        Some(total) if total <= 0.0 => (None, Some("missing_shares_total".to_string())),
        Some(total) => match shares_owned_following {
            None => (None, Some("missing_shares_owned_following".to_string())),
            Some(following) => {
                let shares_before = match code {
                    "P" => following - total,
                    "S" => following + total,
                    _ => f64::NAN,
                };
                if !(shares_before > 0.0) {
                    (None, Some("nonpositive_shares_before".to_string()))
                } else {
                    (Some((total / shares_before) * 100.0), None)
                }
            }
        },
    };

    SideRollup {
        has: true,
        trade_date,
        last_tx_date,
        shares_total,
        dollars_total: if priced_shares_total > 0.0 { Some(dollars_total) } else { None },
        vwap_price,
        priced_shares_total: Some(if priced_shares_total > 0.0 { priced_shares_total } else { 0.0 }),
        unpriced_shares_total,
        vwap_is_partial,
        shares_owned_following,
        pct_holdings_change,
        pct_change_missing_reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(row_id: i64, code: &str, date: &str, shares: f64, price: Option<f64>, following: Option<f64>) -> RawRow {
        RawRow {
            row_id,
            is_derivative: false,
            transaction_code: Some(code.to_string()),
            transaction_date: Some(date.to_string()),
            shares_abs: Some(shares),
            price,
            shares_owned_following: following,
        }
    }

    #[test]
    fn buy_pct_change_uses_before_equals_after_minus_bought() {
        let rows = vec![row(1, "P", "2024-01-02", 1000.0, Some(10.0), Some(5000.0))];
        let roll = rollup_side(&rows, "P");
        assert!(roll.has);
        assert_eq!(roll.shares_total, Some(1000.0));
        assert_eq!(roll.vwap_price, Some(10.0));
        // before = 5000 - 1000 = 4000; pct change = 1000/4000*100 = 25%
        assert_eq!(roll.pct_holdings_change, Some(25.0));
        assert_eq!(roll.pct_change_missing_reason, None);
    }

    #[test]
    fn sell_pct_change_uses_before_equals_after_plus_sold() {
        let rows = vec![row(1, "S", "2024-01-02", 500.0, Some(20.0), Some(1500.0))];
        let roll = rollup_side(&rows, "S");
        // before = 1500 + 500 = 2000; pct change = 500/2000*100 = 25%
        assert_eq!(roll.pct_holdings_change, Some(25.0));
    }

    #[test]
    fn partial_vwap_flagged_when_some_rows_unpriced() {
        let rows = vec![
            row(1, "P", "2024-01-02", 100.0, Some(10.0), Some(1000.0)),
            row(2, "P", "2024-01-03", 50.0, None, Some(1050.0)),
        ];
        let roll = rollup_side(&rows, "P");
        assert!(roll.vwap_is_partial);
        assert_eq!(roll.priced_shares_total, Some(100.0));
        assert_eq!(roll.unpriced_shares_total, Some(50.0));
        assert_eq!(roll.vwap_price, Some(10.0));
    }

    #[test]
    fn shares_owned_following_picks_latest_row_not_max_value() {
        let rows = vec![
            row(1, "P", "2024-01-02", 100.0, Some(10.0), Some(9000.0)),
            row(2, "P", "2024-01-03", 50.0, Some(10.0), Some(1050.0)),
        ];
        let roll = rollup_side(&rows, "P");
        // row 2 is later by date, even though row 1 has a larger following value
        assert_eq!(roll.shares_owned_following, Some(1050.0));
    }

    #[test]
    fn missing_shares_owned_following_reason_when_absent() {
        let rows = vec![row(1, "P", "2024-01-02", 100.0, Some(10.0), None)];
        let roll = rollup_side(&rows, "P");
        assert_eq!(roll.pct_change_missing_reason.as_deref(), Some("missing_shares_owned_following"));
    }

    #[test]
    fn nonpositive_shares_before_reason() {
        let rows = vec![row(1, "P", "2024-01-02", 1000.0, Some(10.0), Some(500.0))];
        let roll = rollup_side(&rows, "P");
        // before = 500 - 1000 = -500 <= 0
        assert_eq!(roll.pct_change_missing_reason.as_deref(), Some("nonpositive_shares_before"));
    }

    #[test]
    fn absent_side_has_false() {
        let rows = vec![row(1, "S", "2024-01-02", 100.0, Some(10.0), Some(900.0))];
        let roll = rollup_side(&rows, "P");
        assert!(!roll.has);
    }
}
