// crates/common/src/config.rs
use crate::{AssetDefinition, Error, Result, SourceKind};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "config/sentiment.toml";
pub const ENV_PREFIX: &str = "SENTIMENT";

/// Full application configuration.
///
/// Layering: built-in defaults, then the TOML file (optional), then
/// `SENTIMENT__SECTION__KEY` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub assets: Vec<AssetDefinition>,
    pub sources: Vec<SourceConfig>,
    pub aggregator: AggregatorSection,
    pub summarizer: Option<SummarizerSection>,
    pub lexicon: LexiconSection,
    pub scoring: ScoringSection,
    pub snapshots: SnapshotSection,
    pub lock: LockSection,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            assets: default_assets(),
            sources: Vec::new(),
            aggregator: AggregatorSection::default(),
            summarizer: None,
            lexicon: LexiconSection::default(),
            scoring: ScoringSection::default(),
            snapshots: SnapshotSection::default(),
            lock: LockSection::default(),
        }
    }
}

pub fn default_assets() -> Vec<AssetDefinition> {
    vec![
        AssetDefinition::new("BTC", "Bitcoin"),
        AssetDefinition::new("ETH", "Ethereum"),
        AssetDefinition::new("SOL", "Solana"),
        AssetDefinition::new("XRP", "XRP"),
    ]
}

/// One configured feed. Exactly one of `url` / `path` must be set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub kind: SourceKind,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_source_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_sec: f64,
}

fn default_source_timeout_ms() -> u64 {
    6_000
}

fn default_rate_limit() -> f64 {
    5.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorSection {
    pub top_signals: usize,
    pub summarize_timeout_ms: u64,
    pub max_concurrent_summaries: usize,
}

impl Default for AggregatorSection {
    fn default() -> Self {
        Self {
            top_signals: 5,
            summarize_timeout_ms: 8_000,
            max_concurrent_summaries: 4,
        }
    }
}

/// OpenAI-compatible chat completions endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerSection {
    pub api_base: String,
    pub model: String,
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for SummarizerSection {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.2,
            max_tokens: 220,
        }
    }
}

/// Keyword lists for the heuristic sentiment tally. Matching is
/// lowercase substring, so stems work across inflections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LexiconSection {
    pub positive: Vec<String>,
    pub negative: Vec<String>,
}

impl Default for LexiconSection {
    fn default() -> Self {
        let positive = [
            // de
            "pump", "bull", "rally", "surge", "auf", "steig", "ankünd", "positiv", "stark", "erholt",
            // en
            "gain", "rise", "soar", "record", "inflow", "partnership", "upgrade", "adoption",
        ];
        let negative = [
            // de
            "dump", "bear", "fall", "drop", "sink", "schwäche", "verlust", "abfluss", "skepsis",
            // en
            "loss", "outflow", "hack", "exploit", "lawsuit", "decline", "weak", "sell-off",
        ];
        Self {
            positive: positive.iter().map(|s| s.to_string()).collect(),
            negative: negative.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringSection {
    pub social_weight: f64,
    pub news_weight: f64,
    pub derivatives_weight: f64,
    pub onchain_weight: f64,
    pub price_weight: f64,
    pub bullish_threshold: u8,
    pub bearish_threshold: u8,
    pub decisive_margin: u8,
}

impl Default for ScoringSection {
    fn default() -> Self {
        Self {
            social_weight: 0.25,
            news_weight: 0.15,
            derivatives_weight: 0.25,
            onchain_weight: 0.20,
            price_weight: 0.15,
            bullish_threshold: 55,
            bearish_threshold: 45,
            decisive_margin: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotSection {
    pub dir: String,
    pub locales: Vec<String>,
    pub history_len: usize,
}

impl Default for SnapshotSection {
    fn default() -> Self {
        Self {
            dir: "data/reports".to_string(),
            locales: vec!["de".to_string(), "en".to_string()],
            history_len: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockSection {
    pub dir: String,
    pub ttl_secs: u64,
}

impl Default for LockSection {
    fn default() -> Self {
        Self {
            dir: "data/locks".to_string(),
            ttl_secs: 900,
        }
    }
}

impl AppConfig {
    /// Load configuration. A missing file is fine; a malformed one is not.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));

        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: AppConfig = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.assets.iter().any(|a| a.enabled) {
            return Err(Error::Config("no enabled assets in whitelist".to_string()));
        }
        for source in &self.sources {
            match (&source.url, &source.path) {
                (Some(_), None) | (None, Some(_)) => {}
                _ => {
                    return Err(Error::Config(format!(
                        "source '{}' needs exactly one of url/path",
                        source.name
                    )));
                }
            }
        }
        let s = &self.scoring;
        let weights = [
            s.social_weight,
            s.news_weight,
            s.derivatives_weight,
            s.onchain_weight,
            s.price_weight,
        ];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) || weights.iter().sum::<f64>() <= 0.0 {
            return Err(Error::Config("scoring weights must be non-negative with a positive sum".to_string()));
        }
        if s.bearish_threshold > s.bullish_threshold {
            return Err(Error::Config("bearish_threshold must not exceed bullish_threshold".to_string()));
        }
        if self.snapshots.locales.is_empty() {
            return Err(Error::Config("at least one snapshot locale is required".to_string()));
        }
        if self.aggregator.top_signals == 0 {
            return Err(Error::Config("aggregator.top_signals must be positive".to_string()));
        }
        Ok(())
    }
}
