// crates/common/src/lib.rs
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub mod config;
pub mod error;
pub mod telemetry;
pub mod time;

pub use error::{Error, Result};

/// Method note used when nothing survives filtering.
pub const NO_SOURCE_DATA: &str = "no source data";

/// Feed family a signal came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Social,
    News,
    Onchain,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Social => "social",
            SourceKind::News => "news",
            SourceKind::Onchain => "onchain",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One normalized piece of evidence about an asset.
///
/// Adapters create these; the aggregator consumes them within a single run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEntry {
    pub id: String,
    pub source_kind: SourceKind,
    pub source_name: String,
    pub asset: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engagement: Option<f64>,
}

impl NormalizedEntry {
    /// Engagement with missing or invalid values treated as zero.
    pub fn engagement_or_zero(&self) -> f64 {
        match self.engagement {
            Some(e) if e.is_finite() && e > 0.0 => e,
            _ => 0.0,
        }
    }

    /// Milliseconds since epoch; unparsable timestamps sort as epoch 0.
    pub fn timestamp_ms(&self) -> i64 {
        time::parse_timestamp_ms(&self.timestamp).unwrap_or(0)
    }
}

/// Sentiment label carried by an asset report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Bullish,
    Bearish,
    #[default]
    Neutral,
}

impl Sentiment {
    /// Heuristic thresholds on the [0,1] score.
    pub fn from_score(score: f64) -> Self {
        if score > 0.6 {
            Sentiment::Bullish
        } else if score < 0.4 {
            Sentiment::Bearish
        } else {
            Sentiment::Neutral
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "bullish" => Some(Sentiment::Bullish),
            "bearish" => Some(Sentiment::Bearish),
            "neutral" => Some(Sentiment::Neutral),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopSignal {
    pub source: String,
    pub evidence: String,
}

/// Per-asset result of an aggregation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetReport {
    pub symbol: String,
    pub sentiment: Sentiment,
    pub score: f64,
    pub confidence: f64,
    pub rationale: String,
    pub top_signals: Vec<TopSignal>,
}

impl AssetReport {
    /// Force score and confidence back into [0,1].
    pub fn clamped(mut self) -> Self {
        self.score = clamp01(self.score);
        self.confidence = clamp01(self.confidence);
        self
    }
}

/// The persisted report artifact. Field names are part of the wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedReport {
    pub date: String,
    pub universe: Vec<String>,
    pub assets: Vec<AssetReport>,
    pub method_note: String,
}

impl AggregatedReport {
    pub fn empty(date: String, universe: Vec<String>) -> Self {
        Self {
            date,
            universe,
            assets: Vec::new(),
            method_note: NO_SOURCE_DATA.to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

/// Whitelist entry as configured
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDefinition {
    pub ticker: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl AssetDefinition {
    pub fn new(ticker: &str, name: &str) -> Self {
        Self {
            ticker: ticker.to_string(),
            name: name.to_string(),
            enabled: true,
        }
    }
}

/// Scoring categories, in canonical order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Category {
    Social,
    News,
    Derivatives,
    OnChain,
    Price,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Social,
        Category::News,
        Category::Derivatives,
        Category::OnChain,
        Category::Price,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Category::Social => "social",
            Category::News => "news",
            Category::Derivatives => "derivatives",
            Category::OnChain => "on-chain",
            Category::Price => "price",
        }
    }
}

pub type CategoryMap = BTreeMap<Category, f64>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolatilityRegime {
    High,
    Low,
    #[default]
    Normal,
}

/// Scoring input: one optional signed value per category plus context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub social: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub news: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derivatives: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_chain: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_severity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volatility_regime: Option<VolatilityRegime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diversity: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub score_history: Vec<f64>,
}

impl FeatureSet {
    pub fn get(&self, category: Category) -> Option<f64> {
        match category {
            Category::Social => self.social,
            Category::News => self.news,
            Category::Derivatives => self.derivatives,
            Category::OnChain => self.on_chain,
            Category::Price => self.price,
        }
    }

    pub fn set(&mut self, category: Category, value: f64) {
        let slot = match category {
            Category::Social => &mut self.social,
            Category::News => &mut self.news,
            Category::Derivatives => &mut self.derivatives,
            Category::OnChain => &mut self.on_chain,
            Category::Price => &mut self.price,
        };
        *slot = Some(value);
    }
}

/// Discretized score bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreLabel {
    Bullish,
    #[default]
    Neutral,
    Bearish,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceDetails {
    pub coverage: f64,
    pub diversity: f64,
    pub agreement: f64,
    pub stability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreResult {
    pub asset: String,
    pub subscores: CategoryMap,
    pub weights: CategoryMap,
    pub total_score: f64,
    pub score01: u8,
    pub confidence: f64,
    pub confidence_details: ConfidenceDetails,
    pub label: ScoreLabel,
    pub reasons: Vec<String>,
}

/// Scored asset as stored in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotAsset {
    #[serde(flatten)]
    pub result: ScoreResult,
    pub as_of: String,
    /// Rolling window of recent total scores, oldest first.
    pub history: Vec<f64>,
}

/// Dated, localized persisted copy of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub date: String,
    pub locale: String,
    pub generated_at: String,
    pub version: String,
    pub complete: bool,
    pub report: AggregatedReport,
    pub assets: Vec<SnapshotAsset>,
}

impl Snapshot {
    pub fn asset(&self, symbol: &str) -> Option<&SnapshotAsset> {
        self.assets
            .iter()
            .find(|a| a.result.asset.eq_ignore_ascii_case(symbol))
    }
}

pub fn clamp01(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

pub fn clamp_signed(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(-1.0, 1.0)
}
