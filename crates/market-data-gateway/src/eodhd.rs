//! Thin HTTP client for the EODHD market-data vendor API: symbol resolution, end-of-day
//! price history, fundamentals, and news.

use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EodhdError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("EODHD request failed with HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("no symbol match found for ticker {0}")]
    NoSymbolMatch(String),

    #[error("EODHD returned no usable rows for {0}")]
    Empty(String),

    #[error("EODHD fundamentals payload for {0} was not a JSON object")]
    BadFundamentals(String),
}

pub type EodhdResult<T> = Result<T, EodhdError>;

#[derive(Debug, Clone, PartialEq)]
pub struct EodRow {
    pub date: String,
    pub adj_close: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewsItem {
    pub url: String,
    pub title: Option<String>,
    pub source: Option<String>,
    pub published_at: Option<String>,
    pub summary: Option<String>,
    pub sentiment: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(rename = "Code")]
    code: Option<String>,
    #[serde(rename = "Exchange")]
    exchange: Option<String>,
}

#[derive(Clone)]
pub struct EodhdClient {
    base_url: String,
    api_key: String,
    client: Client,
}

/// A ticker already shaped like `CODE.EXCHANGE` (2-4 letter exchange suffix) is
/// treated as an EODHD symbol as-is and never sent through `/search`.
fn looks_like_symbol(ticker: &str) -> bool {
    let Some((code, exchange)) = ticker.rsplit_once('.') else { return false };
    !code.is_empty()
        && (2..=4).contains(&exchange.len())
        && exchange.chars().all(|c| c.is_ascii_alphabetic())
        && code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

impl EodhdClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = Client::builder().timeout(Duration::from_secs(30)).build().unwrap_or_else(|_| Client::new());
        Self { base_url: base_url.into(), api_key: api_key.into(), client }
    }

    async fn get_json(&self, path_and_query: &str) -> EodhdResult<serde_json::Value> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path_and_query);
        tracing::debug!(url = %url, "GET (eodhd)");
        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(EodhdError::Http { status: status.as_u16(), body });
        }
        Ok(resp.json().await?)
    }

    /// Resolve a bare ticker to an EODHD `CODE.EXCHANGE` symbol via `/search`, preferring
    /// an exact code match on the US exchange, else the vendor's first result.
    pub async fn resolve_symbol(&self, ticker: &str) -> EodhdResult<String> {
        if looks_like_symbol(ticker) {
            return Ok(ticker.to_string());
        }

        let path = format!("/search/{}?api_token={}&fmt=json", ticker, self.api_key);
        let value = self.get_json(&path).await?;
        let results: Vec<SearchResult> = serde_json::from_value(value).unwrap_or_default();
        if results.is_empty() {
            return Err(EodhdError::NoSymbolMatch(ticker.to_string()));
        }

        let exact = results
            .iter()
            .find(|r| r.code.as_deref() == Some(ticker) && r.exchange.as_deref() == Some("US"));
        let chosen = exact.or_else(|| results.first());
        let Some(chosen) = chosen else { return Err(EodhdError::NoSymbolMatch(ticker.to_string())) };
        let code = chosen.code.clone().unwrap_or_else(|| ticker.to_string());
        let exchange = chosen.exchange.clone().unwrap_or_else(|| "US".to_string());
        Ok(format!("{code}.{exchange}"))
    }

    /// Fetch daily end-of-day prices for `symbol` between `start_date` and `end_date`
    /// (inclusive, `YYYY-MM-DD`), preferring `adjusted_close` over `adj_close` over
    /// plain `close` for each row.
    pub async fn fetch_eod_prices(&self, symbol: &str, start_date: &str, end_date: &str) -> EodhdResult<Vec<EodRow>> {
        let path = format!(
            "/eod/{symbol}?api_token={}&period=d&from={start_date}&to={end_date}&fmt=json",
            self.api_key
        );
        let value = self.get_json(&path).await?;
        let rows = value.as_array().cloned().unwrap_or_default();

        let mut out = Vec::new();
        for row in rows {
            let Some(date) = row.get("date").and_then(|v| v.as_str()) else { continue };
            let price = row
                .get("adjusted_close")
                .and_then(|v| v.as_f64())
                .or_else(|| row.get("adj_close").and_then(|v| v.as_f64()))
                .or_else(|| row.get("close").and_then(|v| v.as_f64()));
            let Some(price) = price else { continue };
            out.push(EodRow { date: date.to_string(), adj_close: price });
        }

        if out.is_empty() {
            return Err(EodhdError::Empty(symbol.to_string()));
        }
        Ok(out)
    }

    /// Fetch the raw fundamentals payload for `symbol` as a JSON object (highlights,
    /// shares stats, general info, technicals sub-objects are picked apart by callers).
    pub async fn fetch_fundamentals(&self, symbol: &str) -> EodhdResult<serde_json::Value> {
        let path = format!("/fundamentals/{symbol}?api_token={}&fmt=json", self.api_key);
        let value = self.get_json(&path).await?;
        if !value.is_object() {
            return Err(EodhdError::BadFundamentals(symbol.to_string()));
        }
        Ok(value)
    }

    /// Fetch up to `limit` recent news items for `symbol` in `[date_from, date_to]`.
    pub async fn fetch_news(&self, symbol: &str, date_from: &str, date_to: &str, limit: u32) -> EodhdResult<Vec<NewsItem>> {
        let path = format!(
            "/news?api_token={}&s={symbol}&from={date_from}&to={date_to}&limit={limit}&offset=0&fmt=json",
            self.api_key
        );
        let value = self.get_json(&path).await?;
        let rows = value.as_array().cloned().unwrap_or_default();

        let items = rows
            .into_iter()
            .filter_map(|row| {
                let url = row
                    .get("link")
                    .and_then(|v| v.as_str())
                    .or_else(|| row.get("url").and_then(|v| v.as_str()))
                    .filter(|s| !s.is_empty())?;
                let title = row.get("title").and_then(|v| v.as_str()).map(str::to_string);
                let source = row
                    .get("source")
                    .and_then(|v| v.as_str())
                    .or_else(|| row.get("site").and_then(|v| v.as_str()))
                    .map(str::to_string);
                let published_at = row
                    .get("date")
                    .and_then(|v| v.as_str())
                    .or_else(|| row.get("datetime").and_then(|v| v.as_str()))
                    .or_else(|| row.get("published_at").and_then(|v| v.as_str()))
                    .map(str::to_string);
                let summary = row
                    .get("content")
                    .and_then(|v| v.as_str())
                    .or_else(|| row.get("text").and_then(|v| v.as_str()))
                    .or_else(|| row.get("summary").and_then(|v| v.as_str()))
                    .map(str::to_string);
                let sentiment = row.get("sentiment").and_then(|s| {
                    s.get("polarity")
                        .or_else(|| s.get("score"))
                        .or_else(|| s.get("compound"))
                        .and_then(|v| v.as_f64())
                });
                Some(NewsItem { url: url.to_string(), title, source, published_at, summary, sentiment })
            })
            .collect();
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_eodhd_shaped_tickers_pass_through() {
        assert!(looks_like_symbol("AAPL.US"));
        assert!(looks_like_symbol("BRK-B.US"));
    }

    #[test]
    fn bare_tickers_need_resolution() {
        assert!(!looks_like_symbol("AAPL"));
        assert!(!looks_like_symbol(""));
    }
}
