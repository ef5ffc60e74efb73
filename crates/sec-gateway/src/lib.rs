//! Polite HTTP client for SEC EDGAR's submissions JSON and filing-document archive.
//!
//! EDGAR has no published per-key rate limit like a commercial market-data vendor;
//! it asks callers to self-throttle and to send a descriptive User-Agent. We honor
//! that with a single process-wide minimum-interval gate (mutex + monotonic clock)
//! rather than a sliding-window limiter, since there is no quota to track against.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Error, Debug)]
pub enum SecGatewayError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("SEC request failed with HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("no candidate ownership document found in accession directory: {0}")]
    NoCandidates(String),

    #[error("could not locate an ownershipDocument fragment in any candidate file for accession {0}")]
    OwnershipNotFound(String),
}

pub type SecGatewayResult<T> = Result<T, SecGatewayError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilingMetadata {
    pub issuer_cik: String,
    pub accession_number: String,
    pub filing_date: Option<String>,
    pub form_type: Option<String>,
    pub source_url: Option<String>,
}

/// Process-wide minimum-interval throttle shared by every gateway instance. SEC
/// asks that automated clients stay well under their informal rate guidance; this
/// gate enforces a single floor regardless of how many gateway clones exist.
#[derive(Clone)]
struct Throttle {
    last_request: Arc<Mutex<Option<Instant>>>,
    min_interval: Duration,
}

impl Throttle {
    fn new(min_interval_seconds: f64) -> Self {
        Self {
            last_request: Arc::new(Mutex::new(None)),
            min_interval: Duration::from_secs_f64(min_interval_seconds.max(0.0)),
        }
    }

    async fn wait(&self) {
        if self.min_interval.is_zero() {
            return;
        }
        let mut last = self.last_request.lock().await;
        let now = Instant::now();
        if let Some(prev) = *last {
            let elapsed = now.duration_since(prev);
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Extensions (in priority order) accepted as candidate ownership-document files
/// inside an accession directory.
const CANDIDATE_EXTS: &[&str] = &[".xml", ".txt", ".htm", ".html"];

#[derive(Clone)]
pub struct SecGateway {
    user_agent: String,
    client: Client,
    throttle: Throttle,
}

impl SecGateway {
    pub fn new(user_agent: impl Into<String>, min_interval_seconds: f64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            user_agent: user_agent.into(),
            client,
            throttle: Throttle::new(min_interval_seconds),
        }
    }

    async fn get_json(&self, url: &str) -> SecGatewayResult<serde_json::Value> {
        tracing::debug!(url, "GET (json)");
        self.throttle.wait().await;
        let resp = self
            .client
            .get(url)
            .header("User-Agent", &self.user_agent)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SecGatewayError::Http { status: status.as_u16(), body });
        }
        Ok(resp.json().await?)
    }

    async fn get_text(&self, url: &str) -> SecGatewayResult<String> {
        tracing::debug!(url, "GET (text)");
        self.throttle.wait().await;
        let resp = self
            .client
            .get(url)
            .header("User-Agent", &self.user_agent)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SecGatewayError::Http { status: status.as_u16(), body });
        }
        Ok(resp.text().await?)
    }

    /// Fetch `filing_date`/`form_type` for an accession from the issuer's submissions
    /// JSON. Scans the `recent` block first, then lazily walks the paginated
    /// `filings.files` index for older filings.
    pub async fn fetch_filing_metadata(
        &self,
        accession_number: &str,
        issuer_cik_hint: Option<&str>,
    ) -> SecGatewayResult<FilingMetadata> {
        let acc = accession_number.trim().to_string();
        let issuer_cik = issuer_cik_hint
            .and_then(normalize_cik10)
            .unwrap_or_else(|| cik_from_accession(&acc));

        let submissions_url = format!("https://data.sec.gov/submissions/CIK{}.json", issuer_cik);
        let data = self.get_json(&submissions_url).await?;

        let recent = data.pointer("/filings/recent");
        let (mut filing_date, mut form_type) = recent.map(|r| scan_recent_block(r, &acc)).unwrap_or((None, None));

        if filing_date.is_none() && form_type.is_none() {
            if let Some(files) = data.pointer("/filings/files").and_then(|v| v.as_array()) {
                for f in files {
                    let Some(name) = f.get("name").and_then(|n| n.as_str()) else { continue };
                    let url = format!("https://data.sec.gov/submissions/{}", name);
                    let Ok(data2) = self.get_json(&url).await else { continue };
                    if let Some(recent2) = data2.pointer("/filings/recent") {
                        let (d, t) = scan_recent_block(recent2, &acc);
                        if d.is_some() || t.is_some() {
                            filing_date = d;
                            form_type = t;
                            break;
                        }
                    }
                }
            }
        }

        Ok(FilingMetadata {
            issuer_cik,
            accession_number: acc,
            filing_date,
            form_type,
            source_url: None,
        })
    }

    /// Fetch the raw `<ownershipDocument>...</ownershipDocument>` XML fragment for an
    /// accession. Tries `issuer_cik_hint` first, falling back to the CIK implied by
    /// the accession number's prefix, since the hint can be stale for amended or
    /// reassigned filings.
    pub async fn fetch_form4_xml(
        &self,
        accession_number: &str,
        issuer_cik_hint: Option<&str>,
    ) -> SecGatewayResult<(String, String)> {
        let acc = accession_number.trim().to_string();

        let mut ciks = Vec::new();
        if let Some(cik) = issuer_cik_hint.and_then(normalize_cik10) {
            ciks.push(cik);
        }
        let prefix = cik_from_accession(&acc);
        if !ciks.contains(&prefix) {
            ciks.push(prefix);
        }

        let mut last_err: Option<SecGatewayError> = None;
        for cik10 in ciks {
            match self.fetch_form4_xml_for_cik(&acc, &cik10).await {
                Ok(result) => return Ok(result),
                Err(e) => last_err = Some(e),
            }
        }

        Err(last_err.unwrap_or_else(|| SecGatewayError::OwnershipNotFound(acc)))
    }

    async fn fetch_form4_xml_for_cik(&self, acc: &str, cik10: &str) -> SecGatewayResult<(String, String)> {
        let cik_path = cik_path_component(cik10);
        let acc_nodash = acc.replace('-', "");

        let index_url = format!("https://www.sec.gov/Archives/edgar/data/{}/{}/index.json", cik_path, acc_nodash);
        let idx = self.get_json(&index_url).await?;

        let names: Vec<String> = idx
            .pointer("/directory/item")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|it| it.get("name").and_then(|n| n.as_str()).map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let mut candidates: Vec<String> = names
            .into_iter()
            .filter(|n| {
                let lower = n.to_lowercase();
                CANDIDATE_EXTS.iter().any(|ext| lower.ends_with(ext))
            })
            .collect();

        if candidates.is_empty() {
            return Err(SecGatewayError::NoCandidates(index_url));
        }

        candidates.sort_by_key(|n| ownership_score(n));

        let base_dir = format!("https://www.sec.gov/Archives/edgar/data/{}/{}/", cik_path, acc_nodash);

        let mut last_err: Option<SecGatewayError> = None;
        for fname in candidates {
            let url = format!("{}{}", base_dir, fname);
            match self.get_text(&url).await {
                Ok(text) => {
                    if let Some(frag) = extract_ownership_document(&text) {
                        tracing::debug!(fname = %fname, cik10 = %cik10, "selected ownershipDocument file");
                        return Ok((frag, url));
                    }
                }
                Err(e) => last_err = Some(e),
            }
        }

        let _ = last_err;
        Err(SecGatewayError::OwnershipNotFound(acc.to_string()))
    }

    /// Fetch the latest filings for a single issuer's "recent" block, used by the
    /// optional Form 4 poller to discover new accessions without a full backfill scan.
    pub async fn fetch_recent_accessions(&self, issuer_cik10: &str) -> SecGatewayResult<Vec<String>> {
        let url = format!("https://data.sec.gov/submissions/CIK{}.json", issuer_cik10);
        let data = self.get_json(&url).await?;
        let accs = data
            .pointer("/filings/recent/accessionNumber")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        Ok(accs)
    }

    /// Fetches an arbitrary SEC URL as text through the same throttle/User-Agent as
    /// every other gateway call. Used by the optional poller to pull the "current
    /// Form 4" Atom feed, which isn't shaped like the submissions JSON or a filing
    /// document and so doesn't fit either of the other fetch methods.
    pub async fn fetch_raw_text(&self, url: &str) -> SecGatewayResult<String> {
        self.get_text(url).await
    }

    /// Lists every Form 4 accession on file for an issuer with a filing date on or
    /// after `start_year`, scanning the `recent` block first and then walking the
    /// paginated `filings.files` index, skipping any file block whose `filingTo` is
    /// entirely before the requested start date. Used by historical backfill discovery.
    pub async fn list_form4_accessions_since(
        &self,
        issuer_cik10: &str,
        start_year: i32,
    ) -> SecGatewayResult<Vec<FilingMetadata>> {
        let start_date = format!("{start_year:04}-01-01");
        let url = format!("https://data.sec.gov/submissions/CIK{}.json", issuer_cik10);
        let data = self.get_json(&url).await?;

        let mut out = Vec::new();
        if let Some(recent) = data.pointer("/filings/recent") {
            collect_form4_from_block(recent, issuer_cik10, &start_date, &mut out);
        }

        if let Some(files) = data.pointer("/filings/files").and_then(|v| v.as_array()) {
            for f in files {
                let filing_to = f.get("filingTo").and_then(|v| v.as_str()).unwrap_or("9999-12-31");
                if filing_to < start_date.as_str() {
                    continue;
                }
                let Some(name) = f.get("name").and_then(|n| n.as_str()) else { continue };
                let page_url = format!("https://data.sec.gov/submissions/{}", name);
                let Ok(page) = self.get_json(&page_url).await else { continue };
                if let Some(recent2) = page.pointer("/filings/recent") {
                    collect_form4_from_block(recent2, issuer_cik10, &start_date, &mut out);
                } else {
                    collect_form4_from_block(&page, issuer_cik10, &start_date, &mut out);
                }
            }
        }

        Ok(out)
    }
}

fn collect_form4_from_block(block: &serde_json::Value, issuer_cik10: &str, start_date: &str, out: &mut Vec<FilingMetadata>) {
    let accs = block.get("accessionNumber").and_then(|v| v.as_array());
    let forms = block.get("form").and_then(|v| v.as_array());
    let dates = block.get("filingDate").and_then(|v| v.as_array());

    let Some(accs) = accs else { return };
    for (i, a) in accs.iter().enumerate() {
        let Some(acc) = a.as_str() else { continue };
        let form_type = forms.and_then(|f| f.get(i)).and_then(|v| v.as_str()).unwrap_or("");
        if form_type.trim_start_matches('/') != "4" {
            continue;
        }
        let filing_date = dates.and_then(|d| d.get(i)).and_then(|v| v.as_str()).unwrap_or("");
        if filing_date < start_date {
            continue;
        }
        out.push(FilingMetadata {
            issuer_cik: issuer_cik10.to_string(),
            accession_number: acc.to_string(),
            filing_date: Some(filing_date.to_string()),
            form_type: Some(form_type.to_string()),
            source_url: None,
        });
    }
}

fn normalize_cik10(s: &str) -> Option<String> {
    let digits: String = s.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        None
    } else {
        Some(format!("{:0>10}", digits))
    }
}

fn cik_from_accession(accession_number: &str) -> String {
    let part = accession_number.split('-').next().unwrap_or("");
    let digits: String = part.chars().filter(|c| c.is_ascii_digit()).collect();
    format!("{:0>10}", digits)
}

fn cik_path_component(cik10: &str) -> String {
    let trimmed = cik10.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

fn scan_recent_block(recent: &serde_json::Value, acc: &str) -> (Option<String>, Option<String>) {
    let accs = recent.get("accessionNumber").and_then(|v| v.as_array());
    let forms = recent.get("form").and_then(|v| v.as_array());
    let dates = recent.get("filingDate").and_then(|v| v.as_array());

    let Some(accs) = accs else { return (None, None) };
    for (i, a) in accs.iter().enumerate() {
        if a.as_str().map(str::trim) == Some(acc) {
            let filing_date = dates.and_then(|d| d.get(i)).and_then(|v| v.as_str()).map(str::to_string);
            let form_type = forms.and_then(|f| f.get(i)).and_then(|v| v.as_str()).map(str::to_string);
            return (filing_date, form_type);
        }
    }
    (None, None)
}

/// Heuristic ownership-document scoring: lower is better (used as a sort key).
/// Prefers `.xml`, rewards filenames mentioning "ownership"/"form"/"4", and
/// penalizes `.xsd` schema files that sometimes share the directory.
fn ownership_score(name: &str) -> i32 {
    let n = name.to_lowercase();
    let mut s = 0;
    if n.ends_with(".xml") {
        s += 3;
    }
    if n.contains("ownership") {
        s += 4;
    }
    if n.contains("form") {
        s += 2;
    }
    if n.contains('4') {
        s += 1;
    }
    if n.ends_with(".xsd") {
        s -= 5;
    }
    -s
}

fn extract_ownership_document(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    let start = lower.find("<ownershipdocument")?;
    let end_tag = "</ownershipdocument>";
    let end = lower.find(end_tag)?;
    Some(text[start..end + end_tag.len()].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cik_path_drops_leading_zeros() {
        assert_eq!(cik_path_component("0000001234"), "1234");
        assert_eq!(cik_path_component("0000000000"), "0");
    }

    #[test]
    fn accession_prefix_cik_is_zero_padded() {
        assert_eq!(cik_from_accession("0001234567-24-000123"), "0001234567");
    }

    #[test]
    fn ownership_extension_scored_above_generic_xml() {
        let mut names = vec!["doc1.xsd".to_string(), "form4ownership.xml".to_string(), "primary_doc.xml".to_string()];
        names.sort_by_key(|n| ownership_score(n));
        assert_eq!(names[0], "form4ownership.xml");
        assert_eq!(names.last().unwrap(), "doc1.xsd");
    }

    #[test]
    fn extracts_ownership_fragment_case_insensitively() {
        let text = "garbage<OwnershipDocument><issuer/></OwnershipDocument>trailer";
        let frag = extract_ownership_document(text).unwrap();
        assert!(frag.starts_with("<OwnershipDocument>"));
        assert!(frag.ends_with("</OwnershipDocument>"));
    }

    #[test]
    fn missing_fragment_returns_none() {
        assert!(extract_ownership_document("<html>no doc here</html>").is_none());
    }
}
