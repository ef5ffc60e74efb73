use serde::{Deserialize, Serialize};

/// Identity of one insider event: one reporting owner on one accession, for one issuer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventKey {
    pub issuer_cik: String,
    pub owner_key: String,
    pub accession_number: String,
}

impl EventKey {
    pub fn new(
        issuer_cik: impl Into<String>,
        owner_key: impl Into<String>,
        accession_number: impl Into<String>,
    ) -> Self {
        Self {
            issuer_cik: issuer_cik.into(),
            owner_key: owner_key.into(),
            accession_number: accession_number.into(),
        }
    }
}

/// Identity of one (issuer, owner) relationship, used by the stats engine which
/// aggregates across every accession for that pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerIssuerKey {
    pub issuer_cik: String,
    pub owner_key: String,
}

/// Trade side. Open-market buy = transaction code `P`; sell = code `S`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }

    pub fn transaction_code(self) -> char {
        match self {
            Side::Buy => 'P',
            Side::Sell => 'S',
        }
    }
}

/// Forward-return horizon in trading days. The only two horizons the outcomes/stats
/// engines compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Horizon {
    D60,
    D180,
}

impl Horizon {
    pub fn days(self) -> i64 {
        match self {
            Horizon::D60 => 60,
            Horizon::D180 => 180,
        }
    }
}

/// Market-cap bucket used by the issuer-context assembly and the baseline scorer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketCapBucket {
    Micro,
    Small,
    Mid,
    Large,
    Mega,
}

impl MarketCapBucket {
    /// Bucket boundaries mirror the original vendor-cap classification: micro <$300M,
    /// small <$2B, mid <$10B, large <$200B, otherwise mega.
    pub fn from_market_cap(market_cap: i64) -> Self {
        if market_cap < 300_000_000 {
            MarketCapBucket::Micro
        } else if market_cap < 2_000_000_000 {
            MarketCapBucket::Small
        } else if market_cap < 10_000_000_000 {
            MarketCapBucket::Mid
        } else if market_cap < 200_000_000_000 {
            MarketCapBucket::Large
        } else {
            MarketCapBucket::Mega
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MarketCapBucket::Micro => "micro",
            MarketCapBucket::Small => "small",
            MarketCapBucket::Mid => "mid",
            MarketCapBucket::Large => "large",
            MarketCapBucket::Mega => "mega",
        }
    }
}
