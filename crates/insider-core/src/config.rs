use std::env;

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_opt_string(name: &str) -> Option<String> {
    env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(raw) => matches!(
            raw.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "y" | "on"
        ),
        Err(_) => default,
    }
}

/// Runtime configuration, loaded once from the environment (with an optional local
/// `.env` via `dotenvy`). Every field here corresponds to a row of the environment
/// table in the external-interfaces section of the platform's contract.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_dsn: String,

    pub sec_user_agent: String,
    pub sec_min_interval_seconds: f64,

    pub eodhd_api_key: Option<String>,
    pub eodhd_base_url: String,
    pub market_cap_max_age_days: i64,
    pub news_max_age_hours: i64,

    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub ai_temperature: f64,
    pub ai_max_tokens: u32,

    pub benchmark_symbol: String,

    pub backfill_start_year: i32,
    pub backfill_batch_size: i64,

    pub worker_poll_seconds: f64,

    pub enable_form4_poller: bool,
    pub form4_poller_interval_seconds: u64,
    pub form4_poller_feed_url: String,

    pub current_parse_version: String,
    pub owner_norm_version: String,
    pub current_cluster_version: String,
    pub current_trend_version: String,
    pub current_outcomes_version: String,
    pub current_stats_version: String,

    pub ai_input_schema_version: String,
    pub ai_output_schema_version: String,
    pub prompt_version: String,
}

impl Config {
    /// Loads configuration from the process environment, reading a local `.env` file
    /// first when present (mirrors the original platform's bootstrap).
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        Self {
            db_dsn: env::var("DATABASE_URL")
                .or_else(|_| env::var("INSIDER_DATABASE_URL"))
                .unwrap_or_else(|_| "postgres://localhost/insider_platform".to_string()),

            sec_user_agent: env_string(
                "SEC_USER_AGENT",
                "InsiderPlatform/0.1 (contact: you@example.com)",
            ),
            sec_min_interval_seconds: env_parsed("SEC_MIN_INTERVAL_SECONDS", 0.12),

            eodhd_api_key: env_opt_string("EODHD_API_KEY"),
            eodhd_base_url: env_string("EODHD_BASE_URL", "https://eodhd.com/api"),
            market_cap_max_age_days: env_parsed("MARKET_CAP_MAX_AGE_DAYS", 7),
            news_max_age_hours: env_parsed("NEWS_MAX_AGE_HOURS", 12),

            gemini_api_key: env_opt_string("GEMINI_API_KEY"),
            gemini_model: env_string("GEMINI_MODEL", "gemini-2.5-flash-lite"),
            gemini_base_url: env_string(
                "GEMINI_BASE_URL",
                "https://generativelanguage.googleapis.com/v1beta",
            ),
            ai_temperature: env_parsed("AI_TEMPERATURE", 0.5),
            ai_max_tokens: env_parsed("AI_MAX_TOKENS", 5000),

            benchmark_symbol: env_string("BENCHMARK_SYMBOL", "SPY.US"),

            backfill_start_year: env_parsed("BACKFILL_START_YEAR", 2006),
            backfill_batch_size: env_parsed("BACKFILL_BATCH_SIZE", 50),

            worker_poll_seconds: env_parsed("WORKER_POLL_SECONDS", 1.0),

            enable_form4_poller: env_bool("ENABLE_FORM4_POLLER", false),
            form4_poller_interval_seconds: env_parsed("FORM4_POLLER_INTERVAL_SECONDS", 120),
            form4_poller_feed_url: env_string(
                "FORM4_POLLER_FEED_URL",
                "https://www.sec.gov/cgi-bin/browse-edgar?action=getcurrent&type=4&owner=only&count=200&output=atom",
            ),

            current_parse_version: env_string("CURRENT_PARSE_VERSION", "form4_parse_v1.1"),
            owner_norm_version: env_string("OWNER_NORM_VERSION", "owner_norm_v1"),
            current_cluster_version: env_string("CURRENT_CLUSTER_VERSION", "cluster_v1"),
            current_trend_version: env_string("CURRENT_TREND_VERSION", "trend_v1"),
            current_outcomes_version: env_string("CURRENT_OUTCOMES_VERSION", "outcomes_v2"),
            current_stats_version: env_string("CURRENT_STATS_VERSION", "stats_v2"),

            ai_input_schema_version: env_string("AI_INPUT_SCHEMA_VERSION", "ai_input_v2"),
            ai_output_schema_version: env_string("AI_OUTPUT_SCHEMA_VERSION", "ai_output_v1"),
            prompt_version: env_string("PROMPT_VERSION", "prompt_ai_v4"),
        }
    }
}
