//! Parser for SEC Form 4 `ownershipDocument` XML fragments.
//!
//! Namespace-agnostic (local tag names only) and tolerant of minor shape drift
//! between filer agents: numeric fields that fail to parse become parser
//! warnings rather than hard failures, since a handful of malformed rows
//! shouldn't sink an otherwise-good filing.

mod xml_tree;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use xml_tree::{parse_tree, Element};

#[derive(Error, Debug)]
pub enum Form4ParseError {
    #[error("XML parse error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("no ownershipDocument element found in XML")]
    MissingOwnershipDocument,
}

pub type Form4ParseResult<T> = Result<T, Form4ParseError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FootnoteRef {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportingOwner {
    pub owner_cik: Option<String>,
    pub owner_name: Option<String>,
    pub is_director: Option<bool>,
    pub is_officer: Option<bool>,
    pub is_ten_percent_owner: Option<bool>,
    pub officer_title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRow {
    pub is_derivative: bool,
    pub transaction_code: Option<String>,
    pub transaction_date: Option<String>,
    pub shares: Option<f64>,
    /// Kept as the raw string; price parsing is done downstream by the aggregator
    /// so a malformed price doesn't drop the whole row.
    pub price_raw: Option<String>,
    pub shares_owned_following: Option<f64>,
    pub footnote_ids: Vec<String>,
    pub footnotes: Vec<FootnoteRef>,
    pub security_title: Option<String>,
    pub acquired_disposed_code: Option<String>,
    /// Compact audit payload mirroring the fields above, persisted alongside the row.
    pub raw_payload: serde_json::Value,
    pub parser_warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedForm4 {
    pub document_type: Option<String>,
    pub issuer_cik: Option<String>,
    pub issuer_name: Option<String>,
    pub issuer_trading_symbol: Option<String>,
    pub reporting_owners: Vec<ReportingOwner>,
    pub transactions: Vec<TransactionRow>,
}

fn parse_float(s: Option<&str>) -> Option<f64> {
    let t = s?.trim();
    if t.is_empty() {
        return None;
    }
    t.replace(',', "").parse::<f64>().ok()
}

/// Tolerant boolean parsing for SEC's mix of `1`/`0`/`true`/`false` literals.
fn parse_bool(s: Option<&str>) -> Option<bool> {
    match s?.trim() {
        "1" | "true" | "True" => Some(true),
        "0" | "false" | "False" => Some(false),
        _ => None,
    }
}

fn parse_footnotes(root: &Element) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let Some(fn_el) = root.find_child("footnotes") else { return out };
    for child in fn_el.children.iter().filter(|c| c.tag.eq_ignore_ascii_case("footnote")) {
        let fid = child
            .attrs
            .get("id")
            .or_else(|| child.attrs.get("ID"))
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        if fid.is_empty() {
            continue;
        }
        let text = child.all_text().trim().to_string();
        if !text.is_empty() {
            out.insert(fid, text);
        }
    }
    out
}

fn collect_footnote_ids(tx_el: &Element) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for el in tx_el.iter_descendants() {
        if el.tag.eq_ignore_ascii_case("footnoteId") || el.tag.eq_ignore_ascii_case("footnoteid") {
            let fid = el
                .attrs
                .get("id")
                .or_else(|| el.attrs.get("ID"))
                .map(|s| s.trim().to_string())
                .unwrap_or_default();
            if !fid.is_empty() && seen.insert(fid.clone()) {
                out.push(fid);
            }
        }
    }
    out
}

fn parse_transaction(tx_el: &Element, is_derivative: bool, footnote_map: &HashMap<String, String>) -> TransactionRow {
    let mut warnings = Vec::new();

    let transaction_code = tx_el.find_text(&["transactionCoding", "transactionCode"]);
    let transaction_date = tx_el.find_value_text(&["transactionDate"]);

    let shares_raw = tx_el.find_value_text(&["transactionAmounts", "transactionShares"]);
    let shares = parse_float(shares_raw.as_deref());
    if shares_raw.is_some() && shares.is_none() {
        warnings.push(format!("unparseable transactionShares: {:?}", shares_raw));
    }

    let price_raw = tx_el.find_value_text(&["transactionAmounts", "transactionPricePerShare"]);

    let shares_follow_raw = tx_el.find_value_text(&["postTransactionAmounts", "sharesOwnedFollowingTransaction"]);
    let shares_owned_following = parse_float(shares_follow_raw.as_deref());
    if shares_follow_raw.is_some() && shares_owned_following.is_none() {
        warnings.push(format!("unparseable sharesOwnedFollowingTransaction: {:?}", shares_follow_raw));
    }

    let acquired_disposed_code = tx_el.find_value_text(&["transactionAmounts", "transactionAcquiredDisposedCode"]);
    let security_title = tx_el.find_value_text(&["securityTitle"]).or_else(|| tx_el.find_text(&["securityTitle"]));

    let footnote_ids = collect_footnote_ids(tx_el);
    let footnotes: Vec<FootnoteRef> = footnote_ids
        .iter()
        .filter_map(|fid| footnote_map.get(fid).map(|text| FootnoteRef { id: fid.clone(), text: text.clone() }))
        .collect();

    let raw_payload = serde_json::json!({
        "transaction_code": transaction_code,
        "transaction_date": transaction_date,
        "shares": shares,
        "price": price_raw,
        "shares_owned_following": shares_owned_following,
        "is_derivative": is_derivative,
        "acquired_disposed": acquired_disposed_code,
        "security_title": security_title,
        "footnote_ids": footnote_ids,
    });

    TransactionRow {
        is_derivative,
        transaction_code,
        transaction_date,
        shares,
        price_raw,
        shares_owned_following,
        footnote_ids,
        footnotes,
        security_title,
        acquired_disposed_code,
        raw_payload,
        parser_warnings: warnings,
    }
}

/// Some filings wrap `<ownershipDocument>` in an outer envelope; search for it by
/// local tag name, taking ownership of the matching subtree.
fn find_ownership_root(root: Element) -> Option<Element> {
    if root.tag.eq_ignore_ascii_case("ownershipdocument") {
        return Some(root);
    }
    root.children.into_iter().find_map(find_ownership_root)
}

pub fn parse_form4_xml(xml_text: &str) -> Form4ParseResult<ParsedForm4> {
    let parsed_root = parse_tree(xml_text)?;
    let root = find_ownership_root(parsed_root).ok_or(Form4ParseError::MissingOwnershipDocument)?;

    let footnote_map = parse_footnotes(&root);

    let document_type = root.find_text(&["documentType"]);

    let issuer_el = root.find_child("issuer");
    let issuer_cik = issuer_el.and_then(|e| e.find_text(&["issuerCik"])).map(|s| s.trim().to_string());
    let issuer_name = issuer_el.and_then(|e| e.find_text(&["issuerName"]));
    let issuer_trading_symbol = issuer_el.and_then(|e| e.find_text(&["issuerTradingSymbol"]));

    let reporting_owners: Vec<ReportingOwner> = root
        .find_children("reportingOwner")
        .map(|ro_el| {
            let ro_id = ro_el.find_child("reportingOwnerId");
            let owner_cik = ro_id.and_then(|e| e.find_text(&["rptOwnerCik"])).map(|s| s.trim().to_string());
            let owner_name = ro_id.and_then(|e| e.find_text(&["rptOwnerName"])).map(|s| s.trim().to_string());

            let rel = ro_el.find_child("reportingOwnerRelationship");
            let is_director = rel.and_then(|e| e.find_text(&["isDirector"])).as_deref().and_then(parse_bool_opt);
            let is_officer = rel.and_then(|e| e.find_text(&["isOfficer"])).as_deref().and_then(parse_bool_opt);
            let is_ten_percent_owner =
                rel.and_then(|e| e.find_text(&["isTenPercentOwner"])).as_deref().and_then(parse_bool_opt);
            let officer_title = rel.and_then(|e| e.find_text(&["officerTitle"])).map(|s| s.trim().to_string());

            ReportingOwner {
                owner_cik,
                owner_name,
                is_director,
                is_officer,
                is_ten_percent_owner,
                officer_title,
            }
        })
        .collect();

    let mut transactions = Vec::new();
    if let Some(nd_table) = root.find_child("nonDerivativeTable") {
        for tx in nd_table.find_children("nonDerivativeTransaction") {
            transactions.push(parse_transaction(tx, false, &footnote_map));
        }
    }
    if let Some(d_table) = root.find_child("derivativeTable") {
        for tx in d_table.find_children("derivativeTransaction") {
            transactions.push(parse_transaction(tx, true, &footnote_map));
        }
    }

    tracing::debug!(
        document_type = ?document_type,
        issuer_cik = ?issuer_cik,
        symbol = ?issuer_trading_symbol,
        owners = reporting_owners.len(),
        transactions = transactions.len(),
        footnotes = footnote_map.len(),
        "parsed Form 4"
    );

    Ok(ParsedForm4 {
        document_type,
        issuer_cik,
        issuer_name,
        issuer_trading_symbol,
        reporting_owners,
        transactions,
    })
}

fn parse_bool_opt(s: &str) -> Option<bool> {
    parse_bool(Some(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
    <ownershipDocument>
        <documentType>4</documentType>
        <issuer>
            <issuerCik>0000320193</issuerCik>
            <issuerName>Example Corp</issuerName>
            <issuerTradingSymbol>XMPL</issuerTradingSymbol>
        </issuer>
        <reportingOwner>
            <reportingOwnerId>
                <rptOwnerCik>0001234567</rptOwnerCik>
                <rptOwnerName>DOE JANE</rptOwnerName>
            </reportingOwnerId>
            <reportingOwnerRelationship>
                <isDirector>1</isDirector>
                <isOfficer>0</isOfficer>
                <isTenPercentOwner>0</isTenPercentOwner>
            </reportingOwnerRelationship>
        </reportingOwner>
        <nonDerivativeTable>
            <nonDerivativeTransaction>
                <transactionCoding><transactionCode>P</transactionCode></transactionCoding>
                <transactionDate><value>2024-03-01</value></transactionDate>
                <transactionAmounts>
                    <transactionShares><value>1,000</value></transactionShares>
                    <transactionPricePerShare><value>12.50</value></transactionPricePerShare>
                    <transactionAcquiredDisposedCode><value>A</value></transactionAcquiredDisposedCode>
                </transactionAmounts>
                <postTransactionAmounts>
                    <sharesOwnedFollowingTransaction><value>5000</value></sharesOwnedFollowingTransaction>
                </postTransactionAmounts>
                <securityTitle><value>Common Stock</value></securityTitle>
            </nonDerivativeTransaction>
        </nonDerivativeTable>
    </ownershipDocument>
    "#;

    #[test]
    fn parses_issuer_and_owner_identity() {
        let parsed = parse_form4_xml(SAMPLE).unwrap();
        assert_eq!(parsed.issuer_cik.as_deref(), Some("0000320193"));
        assert_eq!(parsed.issuer_trading_symbol.as_deref(), Some("XMPL"));
        assert_eq!(parsed.reporting_owners.len(), 1);
        let owner = &parsed.reporting_owners[0];
        assert_eq!(owner.is_director, Some(true));
        assert_eq!(owner.is_officer, Some(false));
    }

    #[test]
    fn parses_non_derivative_transaction_with_comma_shares() {
        let parsed = parse_form4_xml(SAMPLE).unwrap();
        assert_eq!(parsed.transactions.len(), 1);
        let tx = &parsed.transactions[0];
        assert!(!tx.is_derivative);
        assert_eq!(tx.transaction_code.as_deref(), Some("P"));
        assert_eq!(tx.shares, Some(1000.0));
        assert_eq!(tx.price_raw.as_deref(), Some("12.50"));
        assert_eq!(tx.shares_owned_following, Some(5000.0));
        assert!(tx.parser_warnings.is_empty());
    }

    #[test]
    fn missing_ownership_document_is_an_error() {
        let err = parse_form4_xml("<notOwnership/>").unwrap_err();
        assert!(matches!(err, Form4ParseError::MissingOwnershipDocument));
    }

    #[test]
    fn unparseable_shares_becomes_a_warning_not_a_failure() {
        let xml = r#"<ownershipDocument><nonDerivativeTable><nonDerivativeTransaction>
            <transactionAmounts><transactionShares><value>abc</value></transactionShares></transactionAmounts>
        </nonDerivativeTransaction></nonDerivativeTable></ownershipDocument>"#;
        let parsed = parse_form4_xml(xml).unwrap();
        let tx = &parsed.transactions[0];
        assert_eq!(tx.shares, None);
        assert_eq!(tx.parser_warnings.len(), 1);
    }
}
